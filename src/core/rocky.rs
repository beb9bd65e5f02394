use crate::io::vector::VectorFeature;
use crate::types::{BaselinePoint, CoastError, CoastResult};
use geo::{EuclideanDistance, Geometry, Point};

/// Smartline intertidal substrate classes treated as rocky
pub const ROCKY_SUBSTRATES: [&str; 15] = [
    "Bedrock breakdown debris (cobbles/boulders)",
    "Boulder (rock) beach",
    "Cliff (>5m) (undiff)",
    "Colluvium (talus) undiff",
    "Flat boulder deposit (rock) undiff",
    "Hard bedrock shore",
    "Hard bedrock shore inferred",
    "Hard rock cliff (>5m)",
    "Hard rocky shore platform",
    "Rocky shore (undiff)",
    "Rocky shore platform (undiff)",
    "Sloping hard rock shore",
    "Sloping rocky shore (undiff)",
    "Soft `bedrock\u{bf} cliff (>5m)",
    "Steep boulder talus",
];

pub const PRIMARY_SUBSTRATE: &str = "INTERTD1_V";
pub const SECONDARY_SUBSTRATE: &str = "INTERTD2_V";

/// Removes sample points that fall on rocky coastline
pub struct RockyShoreClipper {
    /// Influence distance around each Smartline feature (metres)
    buffer: f64,
}

impl RockyShoreClipper {
    pub fn new(buffer: f64) -> Self {
        Self { buffer }
    }

    /// Rocky iff the primary class is rocky and the secondary is rocky or unclassified
    pub fn is_rocky(primary: &str, secondary: &str) -> bool {
        ROCKY_SUBSTRATES.contains(&primary)
            && (secondary == "Unclassified" || ROCKY_SUBSTRATES.contains(&secondary))
    }

    /// Drop points inside the rocky-only influence zone
    ///
    /// A point is dropped when it lies within the buffer of a rocky feature
    /// and outside the buffer of every non-rocky feature. Returns `None` when
    /// the Smartline holds only rocky features.
    pub fn clip(
        &self,
        points: Vec<BaselinePoint>,
        smartline: &[VectorFeature],
    ) -> CoastResult<Option<Vec<BaselinePoint>>> {
        let mut rocky = Vec::new();
        let mut nonrocky = Vec::new();
        for feature in smartline {
            let primary = substrate(feature, PRIMARY_SUBSTRATE)?;
            let secondary = substrate(feature, SECONDARY_SUBSTRATE)?;
            if Self::is_rocky(primary, secondary) {
                rocky.push(&feature.geometry);
            } else {
                nonrocky.push(&feature.geometry);
            }
        }
        log::debug!(
            "Smartline: {} rocky and {} non-rocky features",
            rocky.len(),
            nonrocky.len()
        );

        match (rocky.is_empty(), nonrocky.is_empty()) {
            (false, false) => {
                let before = points.len();
                let kept: Vec<BaselinePoint> = points
                    .into_iter()
                    .filter(|p| {
                        let near_rocky = rocky.iter().any(|g| self.within(&p.geometry, g));
                        let near_other = nonrocky.iter().any(|g| self.within(&p.geometry, g));
                        !(near_rocky && !near_other)
                    })
                    .collect();
                log::info!("Removed {} points on rocky shores", before - kept.len());
                Ok(Some(kept))
            }
            (false, true) => {
                log::warn!("Study area coastline is entirely rocky");
                Ok(None)
            }
            _ => Ok(Some(points)),
        }
    }

    fn within(&self, point: &Point<f64>, geometry: &Geometry<f64>) -> bool {
        distance_to(point, geometry).map_or(false, |d| d <= self.buffer)
    }
}

fn substrate<'f>(feature: &'f VectorFeature, field: &str) -> CoastResult<&'f str> {
    feature.attribute(field).ok_or_else(|| CoastError::InvalidAttribute {
        layer: "smartline".to_string(),
        field: field.to_string(),
    })
}

/// Planar distance from a point to a geometry; `None` for empty collections
pub fn distance_to(point: &Point<f64>, geometry: &Geometry<f64>) -> Option<f64> {
    let d = match geometry {
        Geometry::Point(g) => point.euclidean_distance(g),
        Geometry::Line(g) => point.euclidean_distance(g),
        Geometry::LineString(g) => point.euclidean_distance(g),
        Geometry::Polygon(g) => point.euclidean_distance(g),
        Geometry::MultiPoint(g) => point.euclidean_distance(g),
        Geometry::MultiLineString(g) => point.euclidean_distance(g),
        Geometry::MultiPolygon(g) => point.euclidean_distance(g),
        Geometry::Rect(g) => point.euclidean_distance(&g.to_polygon()),
        Geometry::Triangle(g) => point.euclidean_distance(&g.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            return gc.0.iter().filter_map(|g| distance_to(point, g)).reduce(f64::min)
        }
    };
    d.is_finite().then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;
    use std::collections::HashMap;

    fn segment(x0: f64, x1: f64, primary: &str, secondary: &str) -> VectorFeature {
        let mut attributes = HashMap::new();
        attributes.insert(PRIMARY_SUBSTRATE.to_string(), primary.to_string());
        attributes.insert(SECONDARY_SUBSTRATE.to_string(), secondary.to_string());
        VectorFeature {
            geometry: Geometry::LineString(line_string![(x: x0, y: 0.0), (x: x1, y: 0.0)]),
            attributes,
        }
    }

    fn points() -> Vec<BaselinePoint> {
        (0..10)
            .map(|i| BaselinePoint {
                id: i,
                geometry: Point::new(i as f64 * 30.0 + 15.0, 10.0),
            })
            .collect()
    }

    #[test]
    fn test_rocky_classification() {
        assert!(RockyShoreClipper::is_rocky("Hard bedrock shore", "Unclassified"));
        assert!(RockyShoreClipper::is_rocky("Boulder (rock) beach", "Steep boulder talus"));
        assert!(!RockyShoreClipper::is_rocky("Hard bedrock shore", "Sandy beach"));
        assert!(!RockyShoreClipper::is_rocky("Unclassified", "Unclassified"));
    }

    #[test]
    fn test_rocky_half_removed() {
        let smartline = vec![
            segment(0.0, 150.0, "Sandy beach", "Unclassified"),
            segment(150.0, 300.0, "Hard rocky shore platform", "Unclassified"),
        ];
        let kept = RockyShoreClipper::new(50.0)
            .clip(points(), &smartline)
            .unwrap()
            .unwrap();
        // Points within 50 m of the sandy segment survive (x <= 195)
        let ids: Vec<usize> = kept.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_only_rocky_returns_none() {
        let smartline = vec![segment(0.0, 300.0, "Rocky shore (undiff)", "Unclassified")];
        assert!(RockyShoreClipper::new(50.0).clip(points(), &smartline).unwrap().is_none());
    }

    #[test]
    fn test_no_rocky_unchanged() {
        let smartline = vec![segment(0.0, 300.0, "Sandy beach", "Unclassified")];
        let kept = RockyShoreClipper::new(50.0).clip(points(), &smartline).unwrap().unwrap();
        assert_eq!(kept.len(), 10);
        let kept = RockyShoreClipper::new(50.0).clip(points(), &[]).unwrap().unwrap();
        assert_eq!(kept.len(), 10);
    }

    #[test]
    fn test_missing_substrate_column() {
        let mut feature = segment(0.0, 10.0, "Sandy beach", "Unclassified");
        feature.attributes.remove(SECONDARY_SUBSTRATE);
        let err = RockyShoreClipper::new(50.0).clip(points(), &[feature]).unwrap_err();
        assert_eq!(err.kind(), "InvalidAttribute");
    }
}
