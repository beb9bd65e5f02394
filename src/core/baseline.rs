use crate::types::{AnnualContours, BaselinePoint, CoastError, CoastResult};
use geo::{EuclideanLength, LineInterpolatePoint, MultiLineString};

/// Generate evenly spaced sample points along the baseline-year shoreline
///
/// The parts of the year's MultiLineString are walked in order as one curve.
/// Points are placed at `i * spacing` metres for every `i * spacing` below the
/// whole-metre curve length, and numbered from 0.
pub fn baseline_points(
    contours: &AnnualContours,
    baseline_year: i32,
    spacing: f64,
) -> CoastResult<Vec<BaselinePoint>> {
    if !(spacing > 0.0) {
        return Err(CoastError::Config(format!(
            "point spacing must be positive, got {}",
            spacing
        )));
    }
    let baseline = contours.get(&baseline_year).ok_or_else(|| {
        CoastError::EmptyBaseline(format!("no contour for baseline year {}", baseline_year))
    })?;

    let points = points_along(baseline, spacing);
    if points.is_empty() {
        return Err(CoastError::EmptyBaseline(format!(
            "baseline year {} contour is empty",
            baseline_year
        )));
    }
    log::info!(
        "Generated {} baseline points every {} m along {}",
        points.len(),
        spacing,
        baseline_year
    );
    Ok(points)
}

fn points_along(lines: &MultiLineString<f64>, spacing: f64) -> Vec<BaselinePoint> {
    let lengths: Vec<f64> = lines.0.iter().map(|l| l.euclidean_length()).collect();
    let total = lengths.iter().sum::<f64>().floor();

    let mut points = Vec::new();
    let mut part = 0usize;
    let mut part_start = 0.0;
    let mut i = 0usize;
    loop {
        let distance = i as f64 * spacing;
        if distance >= total {
            break;
        }
        while part + 1 < lengths.len() && distance > part_start + lengths[part] {
            part_start += lengths[part];
            part += 1;
        }
        let length = lengths[part];
        let fraction = if length > 0.0 {
            ((distance - part_start) / length).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(geometry) = lines.0[part].line_interpolate_point(fraction) {
            points.push(BaselinePoint { id: points.len(), geometry });
        }
        i += 1;
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::line_string;

    fn contours(lines: Vec<geo::LineString<f64>>) -> AnnualContours {
        let mut c = AnnualContours::new();
        c.insert(2020, MultiLineString::new(lines));
        c
    }

    #[test]
    fn test_points_every_spacing() {
        let c = contours(vec![line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)]]);
        let points = baseline_points(&c, 2020, 30.0).unwrap();
        assert_eq!(points.len(), 4);
        for (point, x) in points.iter().zip([0.0, 30.0, 60.0, 90.0]) {
            assert_relative_eq!(point.geometry.x(), x, epsilon = 1e-9);
            assert_relative_eq!(point.geometry.y(), 0.0, epsilon = 1e-9);
        }
        assert_eq!(points.iter().map(|p| p.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_length_excludes_endpoint() {
        let c = contours(vec![line_string![(x: 0.0, y: 0.0), (x: 90.0, y: 0.0)]]);
        let points = baseline_points(&c, 2020, 30.0).unwrap();
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn test_parts_walked_as_one_curve() {
        let c = contours(vec![
            line_string![(x: 0.0, y: 0.0), (x: 40.0, y: 0.0)],
            line_string![(x: 0.0, y: 100.0), (x: 0.0, y: 160.0)],
        ]);
        let points = baseline_points(&c, 2020, 30.0).unwrap();
        assert_eq!(points.len(), 4);
        // 60 m along the curve is 20 m into the second part
        assert_relative_eq!(points[2].geometry.y(), 120.0, epsilon = 1e-9);
        assert_relative_eq!(points[3].geometry.x(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(points[3].geometry.y(), 150.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_baseline_year() {
        let c = contours(vec![line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)]]);
        let err = baseline_points(&c, 2019, 30.0).unwrap_err();
        assert_eq!(err.kind(), "EmptyBaseline");
        let empty = contours(vec![]);
        assert_eq!(baseline_points(&empty, 2020, 30.0).unwrap_err().kind(), "EmptyBaseline");
    }
}
