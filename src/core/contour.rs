//! Subpixel shoreline extraction with marching squares
//!
//! Crossing points are keyed by the grid edge they lie on, so segments from
//! neighbouring squares are chained by exact key equality rather than by
//! coordinate tolerance.

use crate::types::{AnnualContours, CoastError, CoastResult, GeoBox, YearBand};
use geo::{Coord, LineString, MultiLineString};
use std::collections::{BTreeMap, HashMap};

/// What to do when no year yields a contour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourErrors {
    Raise,
    Ignore,
}

/// Contour extraction parameters
#[derive(Debug, Clone)]
pub struct ContourParams {
    pub threshold: f32,
    /// Lines with fewer vertices are discarded
    pub min_vertices: usize,
    pub errors: ContourErrors,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            min_vertices: 30,
            errors: ContourErrors::Raise,
        }
    }
}

/// Grid edge holding a crossing point: horizontal edges join (row, col) to
/// (row, col + 1), vertical edges join (row, col) to (row + 1, col)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeKey {
    Horizontal(usize, usize),
    Vertical(usize, usize),
}

/// Extracts annual shoreline contours from masked index rasters
pub struct ContourExtractor {
    params: ContourParams,
}

impl ContourExtractor {
    pub fn new() -> Self {
        Self {
            params: ContourParams::default(),
        }
    }

    pub fn with_params(params: ContourParams) -> Self {
        Self { params }
    }

    /// Contours of every year in map coordinates; years without lines are dropped
    pub fn extract(
        &self,
        masked_index: &BTreeMap<i32, YearBand>,
        geobox: &GeoBox,
    ) -> CoastResult<AnnualContours> {
        log::info!(
            "Extracting contours at {} for {} years",
            self.params.threshold,
            masked_index.len()
        );

        let per_year = self.extract_years(masked_index, geobox);
        let mut contours = AnnualContours::new();
        for (year, lines) in per_year {
            if lines.0.is_empty() {
                log::warn!("{}: no contour with at least {} vertices", year, self.params.min_vertices);
                continue;
            }
            log::debug!("{}: {} contour lines", year, lines.0.len());
            contours.insert(year, lines);
        }

        if contours.is_empty() && self.params.errors == ContourErrors::Raise {
            return Err(CoastError::EmptyContourSet);
        }
        Ok(contours)
    }

    #[cfg(feature = "parallel")]
    fn extract_years(
        &self,
        masked_index: &BTreeMap<i32, YearBand>,
        geobox: &GeoBox,
    ) -> Vec<(i32, MultiLineString<f64>)> {
        use rayon::prelude::*;

        let years: Vec<(&i32, &YearBand)> = masked_index.iter().collect();
        years
            .into_par_iter()
            .map(|(&year, band)| (year, self.year_contours(band, geobox)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn extract_years(
        &self,
        masked_index: &BTreeMap<i32, YearBand>,
        geobox: &GeoBox,
    ) -> Vec<(i32, MultiLineString<f64>)> {
        masked_index
            .iter()
            .map(|(&year, band)| (year, self.year_contours(band, geobox)))
            .collect()
    }

    fn year_contours(&self, band: &YearBand, geobox: &GeoBox) -> MultiLineString<f64> {
        let lines = subpixel_contours(band, self.params.threshold)
            .into_iter()
            .filter(|line| line.len() >= self.params.min_vertices)
            .map(|line| {
                let coords: Vec<Coord<f64>> = line
                    .into_iter()
                    .map(|(row, col)| geobox.transform.pixel_to_map(col + 0.5, row + 0.5))
                    .collect();
                LineString::new(coords)
            })
            .collect();
        MultiLineString::new(lines)
    }
}

impl Default for ContourExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Iso-lines of `band` at `level` as fractional (row, col) vertex lists
///
/// Squares with a NaN corner produce nothing. Ambiguous saddles are resolved
/// with the mean of the four corners. Closed lines repeat their first vertex.
pub fn subpixel_contours(band: &YearBand, level: f32) -> Vec<Vec<(f64, f64)>> {
    let (rows, cols) = band.dim();
    if rows < 2 || cols < 2 {
        return Vec::new();
    }

    let mut points: HashMap<EdgeKey, (f64, f64)> = HashMap::new();
    let mut segments: Vec<(EdgeKey, EdgeKey)> = Vec::new();

    for r in 0..rows - 1 {
        for c in 0..cols - 1 {
            let tl = band[[r, c]];
            let tr = band[[r, c + 1]];
            let br = band[[r + 1, c + 1]];
            let bl = band[[r + 1, c]];
            if tl.is_nan() || tr.is_nan() || br.is_nan() || bl.is_nan() {
                continue;
            }

            let case = (tl > level) as u8
                | ((tr > level) as u8) << 1
                | ((br > level) as u8) << 2
                | ((bl > level) as u8) << 3;
            if case == 0 || case == 15 {
                continue;
            }

            let top = EdgeKey::Horizontal(r, c);
            let bottom = EdgeKey::Horizontal(r + 1, c);
            let left = EdgeKey::Vertical(r, c);
            let right = EdgeKey::Vertical(r, c + 1);
            let centre_above = (tl + tr + br + bl) / 4.0 > level;

            let pairs = match case {
                1 | 14 => [Some((left, top)), None],
                2 | 13 => [Some((top, right)), None],
                3 | 12 => [Some((left, right)), None],
                4 | 11 => [Some((right, bottom)), None],
                6 | 9 => [Some((top, bottom)), None],
                7 | 8 => [Some((left, bottom)), None],
                // tl and br above
                5 if centre_above => [Some((top, right)), Some((left, bottom))],
                5 => [Some((left, top)), Some((right, bottom))],
                // tr and bl above
                10 if centre_above => [Some((left, top)), Some((right, bottom))],
                10 => [Some((top, right)), Some((left, bottom))],
                _ => [None, None],
            };

            for (a, b) in pairs.into_iter().flatten() {
                for key in [a, b] {
                    points
                        .entry(key)
                        .or_insert_with(|| crossing(band, key, level));
                }
                segments.push((a, b));
            }
        }
    }

    chain_segments(&segments)
        .into_iter()
        .map(|keys| keys.iter().filter_map(|k| points.get(k).copied()).collect())
        .collect()
}

/// Linearly interpolated crossing on a grid edge
fn crossing(band: &YearBand, key: EdgeKey, level: f32) -> (f64, f64) {
    let ((r0, c0), (r1, c1)) = match key {
        EdgeKey::Horizontal(r, c) => ((r, c), (r, c + 1)),
        EdgeKey::Vertical(r, c) => ((r, c), (r + 1, c)),
    };
    let v0 = band[[r0, c0]] as f64;
    let v1 = band[[r1, c1]] as f64;
    let t = if v1 == v0 {
        0.5
    } else {
        ((level as f64 - v0) / (v1 - v0)).clamp(0.0, 1.0)
    };
    (
        r0 as f64 + t * (r1 as f64 - r0 as f64),
        c0 as f64 + t * (c1 as f64 - c0 as f64),
    )
}

/// Join segments sharing an edge key into polylines, open lines first
fn chain_segments(segments: &[(EdgeKey, EdgeKey)]) -> Vec<Vec<EdgeKey>> {
    let mut adjacency: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for (i, (a, b)) in segments.iter().enumerate() {
        adjacency.entry(*a).or_default().push(i);
        adjacency.entry(*b).or_default().push(i);
    }
    let degree = |key: &EdgeKey| adjacency.get(key).map_or(0, |s| s.len());

    let mut used = vec![false; segments.len()];
    let mut lines = Vec::new();

    for i in 0..segments.len() {
        if used[i] {
            continue;
        }
        let (a, b) = segments[i];
        let start = if degree(&a) == 1 {
            Some(a)
        } else if degree(&b) == 1 {
            Some(b)
        } else {
            None
        };
        if let Some(start) = start {
            lines.push(walk(i, start, segments, &adjacency, &mut used));
        }
    }
    // Everything left is part of a closed ring
    for i in 0..segments.len() {
        if !used[i] {
            lines.push(walk(i, segments[i].0, segments, &adjacency, &mut used));
        }
    }
    lines
}

fn walk(
    first: usize,
    start: EdgeKey,
    segments: &[(EdgeKey, EdgeKey)],
    adjacency: &HashMap<EdgeKey, Vec<usize>>,
    used: &mut [bool],
) -> Vec<EdgeKey> {
    let mut keys = vec![start];
    let mut segment = first;
    let mut at = start;
    loop {
        used[segment] = true;
        let (a, b) = segments[segment];
        let next = if a == at { b } else { a };
        keys.push(next);
        at = next;
        let following = adjacency
            .get(&next)
            .and_then(|s| s.iter().copied().find(|&s| !used[s]));
        match following {
            Some(s) => segment = s,
            None => break,
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// Water (positive) left of `edge`, land right of it, linear ramp
    fn ramp(rows: usize, cols: usize, edge: f32) -> YearBand {
        Array2::from_shape_fn((rows, cols), |(_, c)| (edge - c as f32) / 10.0)
    }

    #[test]
    fn test_straight_contour_position() {
        let lines = subpixel_contours(&ramp(10, 8, 3.5), 0.0);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.len(), 10);
        for &(_, col) in line {
            assert_relative_eq!(col, 3.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_nan_squares_break_lines() {
        let mut band = ramp(10, 8, 3.5);
        band[[5, 3]] = f32::NAN;
        let lines = subpixel_contours(&band, 0.0);
        // rows 4-5 squares touching the NaN are skipped, splitting the line
        assert_eq!(lines.len(), 2);
        let total: usize = lines.iter().map(|l| l.len()).sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_closed_ring_repeats_first_vertex() {
        let band = Array2::from_shape_fn((7, 7), |(r, c)| {
            let d = ((r as f32 - 3.0).powi(2) + (c as f32 - 3.0).powi(2)).sqrt();
            2.0 - d
        });
        let lines = subpixel_contours(&band, 0.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].first(), lines[0].last());
    }

    #[test]
    fn test_saddle_uses_centre_mean() {
        // tl and br above, centre mean above -> segments wrap tr and bl
        let band = Array2::from_shape_vec((2, 2), vec![1.0, -0.2, -0.2, 1.0]).unwrap();
        let lines = subpixel_contours(&band, 0.0);
        assert_eq!(lines.len(), 2);
        let band = Array2::from_shape_vec((2, 2), vec![0.2, -1.0, -1.0, 0.2]).unwrap();
        assert_eq!(subpixel_contours(&band, 0.0).len(), 2);
    }

    #[test]
    fn test_extract_applies_min_vertices_and_affine() {
        let gb = GeoBox::new(
            "LOCAL",
            GeoTransform::from_gdal([1000.0, 30.0, 0.0, 2000.0, 0.0, -30.0]),
            8,
            40,
        );
        let mut masked = BTreeMap::new();
        masked.insert(2000, ramp(40, 8, 3.5));
        masked.insert(2001, ramp(20, 8, 3.5)); // too short once min_vertices = 30
        let extractor = ContourExtractor::with_params(ContourParams {
            min_vertices: 30,
            ..ContourParams::default()
        });
        let contours = extractor.extract(&masked, &gb).unwrap();
        assert_eq!(contours.keys().copied().collect::<Vec<_>>(), vec![2000]);
        let line = &contours[&2000].0[0];
        assert_eq!(line.0.len(), 40);
        for c in &line.0 {
            assert_relative_eq!(c.x, 1000.0 + 4.0 * 30.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_all_empty_years() {
        let gb = GeoBox::new(
            "LOCAL",
            GeoTransform::from_gdal([0.0, 30.0, 0.0, 0.0, 0.0, -30.0]),
            8,
            8,
        );
        let mut masked = BTreeMap::new();
        masked.insert(2000, Array2::from_elem((8, 8), f32::NAN));
        let err = ContourExtractor::new().extract(&masked, &gb).unwrap_err();
        assert_eq!(err.kind(), "EmptyContourSet");

        let lenient = ContourExtractor::with_params(ContourParams {
            errors: ContourErrors::Ignore,
            ..ContourParams::default()
        });
        assert!(lenient.extract(&masked, &gb).unwrap().is_empty());
    }
}
