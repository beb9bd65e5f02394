use crate::types::{AnnualContours, Certainty, ContourSegment, GeoBox, MaskClass};
use geo::{Area, BooleanOps, MultiLineString, MultiPolygon, Rect, Simplify};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Tags annual contours as good or uncertain using the all-time mask
pub struct ContourCertainty {
    /// Simplification tolerance for uncertainty polygons (metres)
    simplify_tolerance: f64,
}

impl ContourCertainty {
    pub fn new(simplify_tolerance: f64) -> Self {
        Self { simplify_tolerance }
    }

    /// Split every year's contour into good and uncertain pieces
    ///
    /// Pieces are ordered by year, then good before uncertain. Pieces left
    /// without a line of at least two vertices are dropped.
    pub fn classify(
        &self,
        contours: &AnnualContours,
        mask: &Array2<u8>,
        geobox: &GeoBox,
    ) -> Vec<ContourSegment> {
        let uncertain = self.uncertain_polygons(mask, geobox);
        log::info!(
            "Tagging contour certainty with {} uncertainty polygons",
            uncertain.0.len()
        );

        let mut segments = Vec::new();
        for (&year, lines) in contours {
            if uncertain.0.is_empty() {
                segments.push(ContourSegment {
                    year,
                    geometry: lines.clone(),
                    certainty: Certainty::Good,
                });
                continue;
            }
            let good = valid_lines(uncertain.clip(lines, true));
            let bad = valid_lines(uncertain.clip(lines, false));
            for (geometry, certainty) in [(good, Certainty::Good), (bad, Certainty::Uncertain)] {
                if !geometry.0.is_empty() {
                    segments.push(ContourSegment {
                        year,
                        geometry,
                        certainty,
                    });
                }
            }
        }
        segments
    }

    /// Simplified outline of the persistent noisy and low-observation classes
    pub fn uncertain_polygons(&self, mask: &Array2<u8>, geobox: &GeoBox) -> MultiPolygon<f64> {
        let marked = mask.mapv(|code| MaskClass::from_code(code).map_or(false, |c| c.is_uncertain()));
        let outline = vectorize(&marked, geobox);
        let simplified = outline.simplify(&self.simplify_tolerance);
        MultiPolygon::new(
            simplified
                .0
                .into_iter()
                .filter(|p| p.unsigned_area() > 0.0)
                .collect(),
        )
    }
}

/// Keep lines with at least two vertices
fn valid_lines(lines: MultiLineString<f64>) -> MultiLineString<f64> {
    MultiLineString::new(lines.0.into_iter().filter(|l| l.0.len() >= 2).collect())
}

/// Polygons covering the set pixels of `mask`, in map coordinates
///
/// Horizontal runs of set pixels are stacked into rectangles while they
/// keep the same column span, and the rectangles are merged by union.
pub fn vectorize(mask: &Array2<bool>, geobox: &GeoBox) -> MultiPolygon<f64> {
    let (rows, cols) = mask.dim();
    let mut rects: Vec<MultiPolygon<f64>> = Vec::new();
    // (first col, last col) -> first row
    let mut open: BTreeMap<(usize, usize), usize> = BTreeMap::new();

    let mut close = |span: (usize, usize), first_row: usize, end_row: usize| {
        let a = geobox.transform.pixel_to_map(span.0 as f64, first_row as f64);
        let b = geobox.transform.pixel_to_map(span.1 as f64 + 1.0, end_row as f64);
        rects.push(MultiPolygon::new(vec![Rect::new(a, b).to_polygon()]));
    };

    for r in 0..rows {
        let mut next = BTreeMap::new();
        let mut c = 0;
        while c < cols {
            if !mask[[r, c]] {
                c += 1;
                continue;
            }
            let start = c;
            while c < cols && mask[[r, c]] {
                c += 1;
            }
            let span = (start, c - 1);
            let first_row = open.remove(&span).unwrap_or(r);
            next.insert(span, first_row);
        }
        for (span, first_row) in std::mem::replace(&mut open, next) {
            close(span, first_row, r);
        }
    }
    for (span, first_row) in open {
        close(span, first_row, rows);
    }

    log::debug!("Vectorising {} pixel rectangles", rects.len());
    union_all(rects)
}

/// Pairwise union, halving the number of parts each round
fn union_all(mut parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    while parts.len() > 1 {
        parts = parts
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => a.union(b),
                [a] => a.clone(),
                _ => MultiPolygon::new(Vec::new()),
            })
            .collect();
    }
    parts.pop().unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_relative_eq;
    use geo::{line_string, EuclideanLength};

    fn geobox() -> GeoBox {
        GeoBox::new(
            "LOCAL",
            GeoTransform::from_gdal([0.0, 30.0, 0.0, 600.0, 0.0, -30.0]),
            20,
            20,
        )
    }

    #[test]
    fn test_vectorize_merges_block() {
        let mut mask = Array2::from_elem((20, 20), false);
        mask.slice_mut(ndarray::s![2..7, 3..8]).fill(true);
        mask.slice_mut(ndarray::s![4..6, 8..10]).fill(true);
        let polys = vectorize(&mask, &geobox());
        assert_eq!(polys.0.len(), 1);
        assert_relative_eq!(polys.unsigned_area(), (25.0 + 4.0) * 900.0, epsilon = 1e-6);
    }

    #[test]
    fn test_no_uncertain_pixels_all_good() {
        let mask = Array2::from_elem((20, 20), MaskClass::CoastalZone.code());
        let mut contours = AnnualContours::new();
        contours.insert(2000, MultiLineString::new(vec![line_string![(x: 0.0, y: 300.0), (x: 600.0, y: 300.0)]]));
        let segments = ContourCertainty::new(30.0).classify(&contours, &mask, &geobox());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].certainty, Certainty::Good);
    }

    #[test]
    fn test_contour_split_by_lowobs_block() {
        // Low-obs block covering x 150..450, y 210..390
        let mut mask = Array2::from_elem((20, 20), MaskClass::CoastalZone.code());
        mask.slice_mut(ndarray::s![7..13, 5..15]).fill(MaskClass::PersistentLowObs.code());
        let mut contours = AnnualContours::new();
        contours.insert(2000, MultiLineString::new(vec![line_string![(x: 0.0, y: 300.0), (x: 600.0, y: 300.0)]]));
        contours.insert(2001, MultiLineString::new(vec![line_string![(x: 0.0, y: 500.0), (x: 600.0, y: 500.0)]]));

        let segments = ContourCertainty::new(30.0).classify(&contours, &mask, &geobox());
        let summary: Vec<(i32, Certainty)> = segments.iter().map(|s| (s.year, s.certainty)).collect();
        assert_eq!(
            summary,
            vec![(2000, Certainty::Good), (2000, Certainty::Uncertain), (2001, Certainty::Good)]
        );
        assert_relative_eq!(segments[1].geometry.euclidean_length(), 300.0, epsilon = 1e-6);
        assert_relative_eq!(segments[0].geometry.euclidean_length(), 300.0, epsilon = 1e-6);
        assert_relative_eq!(segments[2].geometry.euclidean_length(), 600.0, epsilon = 1e-6);
    }
}
