//! Binary morphology and connected-component labelling on boolean rasters
//!
//! Erosion treats pixels outside the grid as set, dilation treats them as
//! unset. Disk dilation is computed from an exact squared Euclidean distance
//! transform, so large radii cost the same as small ones.

use crate::types::BoolMask;
use ndarray::Array2;
use std::collections::VecDeque;

const FAR: f64 = 1e20;

/// Shape of a structuring element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuringElement {
    /// Offsets with dx² + dy² <= r²
    Disk(usize),
    /// Square of side 2r + 1
    Square(usize),
}

impl StructuringElement {
    pub fn radius(&self) -> usize {
        match self {
            StructuringElement::Disk(r) | StructuringElement::Square(r) => *r,
        }
    }

    /// (dr, dc) offsets of the active cells relative to the centre
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius() as isize;
        let mut offsets = Vec::new();
        for dr in -r..=r {
            for dc in -r..=r {
                let inside = match self {
                    StructuringElement::Disk(_) => dr * dr + dc * dc <= r * r,
                    StructuringElement::Square(_) => true,
                };
                if inside {
                    offsets.push((dr, dc));
                }
            }
        }
        offsets
    }
}

/// Grow the set pixels of `mask` by the structuring element
pub fn binary_dilation(mask: &BoolMask, element: StructuringElement) -> BoolMask {
    if element.radius() == 0 {
        return mask.clone();
    }
    match element {
        StructuringElement::Disk(r) => {
            let limit = (r * r) as f64;
            squared_distance_transform(mask).mapv(|d| d <= limit)
        }
        StructuringElement::Square(r) => {
            let rows = windowed_any(mask, r, true);
            windowed_any(&rows, r, false)
        }
    }
}

/// Shrink the set pixels of `mask` by the structuring element
pub fn binary_erosion(mask: &BoolMask, element: StructuringElement) -> BoolMask {
    let inverted = mask.mapv(|v| !v);
    binary_dilation(&inverted, element).mapv(|v| !v)
}

/// Erosion followed by dilation, removing features smaller than the element
pub fn binary_opening(mask: &BoolMask, element: StructuringElement) -> BoolMask {
    binary_dilation(&binary_erosion(mask, element), element)
}

/// Squared Euclidean distance (in pixels) from every pixel to the nearest set pixel
///
/// Felzenszwalb & Huttenlocher separable transform. Pixels of an empty mask
/// get a very large finite value.
pub fn squared_distance_transform(mask: &BoolMask) -> Array2<f64> {
    let (rows, cols) = mask.dim();
    let mut dist = mask.mapv(|v| if v { 0.0 } else { FAR });
    if rows == 0 || cols == 0 {
        return dist;
    }

    let n = rows.max(cols);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    for mut column in dist.columns_mut() {
        for (i, value) in column.iter().enumerate() {
            f[i] = *value;
        }
        distance_1d(&f[..rows], &mut d[..rows], &mut v, &mut z);
        for (i, value) in column.iter_mut().enumerate() {
            *value = d[i];
        }
    }
    for mut row in dist.rows_mut() {
        for (i, value) in row.iter().enumerate() {
            f[i] = *value;
        }
        distance_1d(&f[..cols], &mut d[..cols], &mut v, &mut z);
        for (i, value) in row.iter_mut().enumerate() {
            *value = d[i];
        }
    }
    dist
}

fn distance_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate().take(n) {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let offset = q as f64 - v[k] as f64;
        *out = offset * offset + f[v[k]];
    }
}

/// True where any pixel within `radius` along one axis is set
fn windowed_any(mask: &BoolMask, radius: usize, along_rows: bool) -> BoolMask {
    let (rows, cols) = mask.dim();
    let mut out = Array2::from_elem((rows, cols), false);
    let (outer, inner) = if along_rows { (rows, cols) } else { (cols, rows) };
    let mut prefix = vec![0usize; inner + 1];

    for o in 0..outer {
        for i in 0..inner {
            let set = if along_rows { mask[[o, i]] } else { mask[[i, o]] };
            prefix[i + 1] = prefix[i] + set as usize;
        }
        for i in 0..inner {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(inner);
            let any = prefix[hi] > prefix[lo];
            if along_rows {
                out[[o, i]] = any;
            } else {
                out[[i, o]] = any;
            }
        }
    }
    out
}

/// Label 4-connected regions of set pixels
///
/// Returns the label raster (0 = background, regions numbered from 1 in
/// raster-scan order of their first pixel) and the number of regions.
pub fn label_regions(mask: &BoolMask) -> (Array2<u32>, u32) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut next = 0u32;
    let mut queue = VecDeque::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            next += 1;
            labels[[r, c]] = next;
            queue.push_back((r, c));

            while let Some((cr, cc)) = queue.pop_front() {
                let neighbours = [
                    (cr.wrapping_sub(1), cc),
                    (cr + 1, cc),
                    (cr, cc.wrapping_sub(1)),
                    (cr, cc + 1),
                ];
                for (nr, nc) in neighbours {
                    if nr < rows && nc < cols && mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = next;
                        queue.push_back((nr, nc));
                    }
                }
            }
        }
    }

    (labels, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dilation(mask: &BoolMask, element: StructuringElement) -> BoolMask {
        let (rows, cols) = mask.dim();
        let offsets = element.offsets();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            offsets.iter().any(|&(dr, dc)| {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                nr >= 0
                    && nc >= 0
                    && (nr as usize) < rows
                    && (nc as usize) < cols
                    && mask[[nr as usize, nc as usize]]
            })
        })
    }

    fn scattered_mask() -> BoolMask {
        Array2::from_shape_fn((17, 23), |(r, c)| (r * 7 + c * 13) % 19 == 0 || (r == 8 && c > 15))
    }

    #[test]
    fn test_disk_offsets() {
        let offsets = StructuringElement::Disk(2).offsets();
        assert_eq!(offsets.len(), 13);
        assert!(offsets.contains(&(0, 2)));
        assert!(!offsets.contains(&(2, 2)));
        assert_eq!(StructuringElement::Square(1).offsets().len(), 9);
    }

    #[test]
    fn test_disk_dilation_matches_naive() {
        let mask = scattered_mask();
        for r in [1, 2, 3, 5] {
            let element = StructuringElement::Disk(r);
            assert_eq!(binary_dilation(&mask, element), naive_dilation(&mask, element), "radius {}", r);
        }
    }

    #[test]
    fn test_square_dilation_matches_naive() {
        let mask = scattered_mask();
        for r in [1, 2] {
            let element = StructuringElement::Square(r);
            assert_eq!(binary_dilation(&mask, element), naive_dilation(&mask, element));
        }
    }

    #[test]
    fn test_erosion_keeps_border_blocks() {
        // A block touching the top-left edge survives erosion because
        // out-of-grid pixels count as set
        let mut mask = Array2::from_elem((10, 10), false);
        mask.slice_mut(ndarray::s![0..4, 0..4]).fill(true);
        let eroded = binary_erosion(&mask, StructuringElement::Disk(1));
        assert!(eroded[[0, 0]]);
        assert!(eroded[[2, 2]]);
        assert!(!eroded[[3, 3]]);
        assert!(!eroded[[0, 3]]);
    }

    #[test]
    fn test_opening_removes_specks() {
        let mut mask = Array2::from_elem((20, 20), false);
        mask.slice_mut(ndarray::s![2..14, 2..14]).fill(true);
        mask[[17, 17]] = true;
        let opened = binary_opening(&mask, StructuringElement::Disk(2));
        assert!(!opened[[17, 17]]);
        assert!(opened[[8, 8]]);
    }

    #[test]
    fn test_empty_mask_dilation_is_empty() {
        let mask = Array2::from_elem((5, 5), false);
        assert!(!binary_dilation(&mask, StructuringElement::Disk(3)).iter().any(|&v| v));
    }

    #[test]
    fn test_label_four_connectivity() {
        // Diagonal neighbours are separate regions
        let mask = Array2::from_shape_vec(
            (3, 3),
            vec![true, false, false, false, true, false, false, true, true],
        )
        .unwrap();
        let (labels, count) = label_regions(&mask);
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[1, 1]], 2);
        assert_eq!(labels[[2, 2]], 2);
        assert_eq!(labels[[0, 1]], 0);
    }
}
