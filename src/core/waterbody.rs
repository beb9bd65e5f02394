use crate::io::raster::rasterize_all_touched;
use crate::io::vector::VectorFeature;
use crate::types::{BoolMask, CoastError, CoastResult, GeoBox};
use geo::{BooleanOps, Geometry, MultiPolygon, Polygon};

/// Feature types that are always masked out of the water class
pub const MASKED_FEATURE_TYPES: [&str; 5] = [
    "Aquaculture Area",
    "Estuary",
    "Watercourse Area",
    "Salt Evaporator",
    "Settling Pond",
];

/// Builds the boolean waterbody exclusion mask for a study area
pub struct WaterbodyMasker<'a> {
    geobox: &'a GeoBox,
}

impl<'a> WaterbodyMasker<'a> {
    pub fn new(geobox: &'a GeoBox) -> Self {
        Self { geobox }
    }

    /// Rasterise the selected waterbodies after applying add/remove modifications
    ///
    /// Perennial lakes and the feature types in [`MASKED_FEATURE_TYPES`] are
    /// kept. Modification features tagged `remove` are cut out of the
    /// selection, features tagged `add` are burned in regardless.
    pub fn build(
        &self,
        waterbodies: &[VectorFeature],
        modifications: &[VectorFeature],
    ) -> CoastResult<BoolMask> {
        log::info!(
            "Building waterbody mask from {} waterbody and {} modification features",
            waterbodies.len(),
            modifications.len()
        );

        let mut selected = Vec::new();
        for feature in waterbodies {
            let feature_type = required(feature, "waterbodies", "FEATURETYPE")?;
            let perenniality = required(feature, "waterbodies", "PERENNIALITY")?;
            let keep = (feature_type == "Lake" && perenniality == "Perennial")
                || MASKED_FEATURE_TYPES.contains(&feature_type);
            if keep {
                selected.extend(polygons_of(&feature.geometry));
            }
        }

        let mut to_remove = Vec::new();
        let mut to_add = Vec::new();
        for feature in modifications {
            match required(feature, "waterbody modifications", "type")? {
                "remove" => to_remove.extend(polygons_of(&feature.geometry)),
                "add" => to_add.extend(polygons_of(&feature.geometry)),
                other => log::debug!("Ignoring modification feature of type '{}'", other),
            }
        }
        log::debug!(
            "Selected {} waterbody polygons, {} to remove, {} to add",
            selected.len(),
            to_remove.len(),
            to_add.len()
        );

        let mut waterbodies = MultiPolygon::new(selected);
        if !to_remove.is_empty() && !waterbodies.0.is_empty() {
            waterbodies = waterbodies.difference(&MultiPolygon::new(to_remove));
        }
        waterbodies.0.extend(to_add);

        let mask = rasterize_all_touched(&waterbodies, self.geobox)?;
        log::info!(
            "Waterbody mask covers {} pixels",
            mask.iter().filter(|&&v| v).count()
        );
        Ok(mask)
    }
}

fn required<'f>(feature: &'f VectorFeature, layer: &str, field: &str) -> CoastResult<&'f str> {
    feature.attribute(field).ok_or_else(|| CoastError::InvalidAttribute {
        layer: layer.to_string(),
        field: field.to_string(),
    })
}

/// Polygon parts of a geometry; other geometry types contribute nothing
pub fn polygons_of(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => vec![p.clone()],
        Geometry::MultiPolygon(mp) => mp.0.clone(),
        Geometry::Rect(r) => vec![r.to_polygon()],
        Geometry::GeometryCollection(gc) => gc.0.iter().flat_map(polygons_of).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use geo::polygon;
    use std::collections::HashMap;

    fn geobox() -> GeoBox {
        // 10 x 10 grid of 10 m pixels, origin (0, 100)
        GeoBox::new(
            "LOCAL",
            GeoTransform::from_gdal([0.0, 10.0, 0.0, 100.0, 0.0, -10.0]),
            10,
            10,
        )
    }

    fn feature(geometry: Polygon<f64>, attrs: &[(&str, &str)]) -> VectorFeature {
        VectorFeature {
            geometry: Geometry::Polygon(geometry),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]
    }

    #[test]
    fn test_all_touched_includes_partial_pixels() {
        // Covers x 12..38, y 52..78 -> cols 1..=3, rows 2..=4
        let mask = rasterize_all_touched(&MultiPolygon::new(vec![rect(12.0, 52.0, 38.0, 78.0)]), &geobox()).unwrap();
        for row in 0..10 {
            for col in 0..10 {
                let expected = (1..=3).contains(&col) && (2..=4).contains(&row);
                assert_eq!(mask[[row, col]], expected, "pixel ({}, {})", row, col);
            }
        }
    }

    #[test]
    fn test_tiny_polygon_inside_one_pixel() {
        let mask = rasterize_all_touched(&MultiPolygon::new(vec![rect(42.0, 42.0, 44.0, 44.0)]), &geobox()).unwrap();
        assert_eq!(mask.iter().filter(|&&v| v).count(), 1);
        assert!(mask[[5, 4]]);
    }

    #[test]
    fn test_polygon_hole_is_not_filled() {
        let outer = rect(0.0, 0.0, 100.0, 100.0);
        let hole = rect(35.0, 35.0, 65.0, 65.0);
        let poly = Polygon::new(outer.exterior().clone(), vec![hole.exterior().clone()]);
        let mask = rasterize_all_touched(&MultiPolygon::new(vec![poly]), &geobox()).unwrap();
        assert!(!mask[[5, 5]]);
        assert!(mask[[0, 0]]);
        // hole boundary pixels are touched
        assert!(mask[[3, 3]]);
    }

    #[test]
    fn test_feature_selection_and_modifications() {
        let waterbodies = vec![
            feature(rect(0.0, 0.0, 20.0, 20.0), &[("FEATURETYPE", "Lake"), ("PERENNIALITY", "Perennial")]),
            feature(rect(80.0, 80.0, 100.0, 100.0), &[("FEATURETYPE", "Lake"), ("PERENNIALITY", "Non Perennial")]),
            feature(rect(40.0, 0.0, 60.0, 20.0), &[("FEATURETYPE", "Estuary"), ("PERENNIALITY", "")]),
        ];
        let modifications = vec![
            feature(rect(40.0, 0.0, 60.0, 20.0), &[("type", "remove")]),
            feature(rect(80.0, 0.0, 100.0, 20.0), &[("type", "add")]),
        ];
        let gb = geobox();
        let mask = WaterbodyMasker::new(&gb).build(&waterbodies, &modifications).unwrap();
        assert!(mask[[9, 0]]); // perennial lake
        assert!(!mask[[0, 9]]); // non-perennial lake
        assert!(!mask[[9, 5]]); // removed estuary
        assert!(mask[[9, 9]]); // added feature
    }

    #[test]
    fn test_no_features_gives_empty_mask() {
        let gb = geobox();
        let mask = WaterbodyMasker::new(&gb).build(&[], &[]).unwrap();
        assert!(!mask.iter().any(|&v| v));
    }

    #[test]
    fn test_missing_attribute_is_reported() {
        let gb = geobox();
        let waterbodies = vec![feature(rect(0.0, 0.0, 20.0, 20.0), &[("FEATURETYPE", "Lake")])];
        let err = WaterbodyMasker::new(&gb).build(&waterbodies, &[]).unwrap_err();
        assert_eq!(err.kind(), "InvalidAttribute");
    }
}
