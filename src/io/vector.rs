use crate::types::{ClimateIndex, CoastError, CoastResult, GeoBox};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{FieldValue, LayerAccess, ToGdal};
use gdal::Dataset;
use geo::{BoundingRect, Coord, Geometry, Intersects, LineString, MultiPolygon, Point, Polygon, Rect};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Vector feature reprojected to the study area CRS, with attributes as text
#[derive(Debug, Clone)]
pub struct VectorFeature {
    pub geometry: Geometry<f64>,
    pub attributes: HashMap<String, String>,
}

impl VectorFeature {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }
}

/// Spatial reference with x/y axis order regardless of authority conventions
pub fn gis_order_srs(srs: SpatialRef) -> SpatialRef {
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    srs
}

/// Reader for the vector datasets consumed by the statistics stage
pub struct VectorReader;

impl VectorReader {
    /// Read all features of the first layer that intersect the GeoBox
    ///
    /// Geometries are reprojected to the GeoBox CRS. Every field named in
    /// `required_fields` must exist in the layer definition.
    pub fn read_features<P: AsRef<Path>>(
        path: P,
        geobox: &GeoBox,
        required_fields: &[&str],
    ) -> CoastResult<Vec<VectorFeature>> {
        let path = path.as_ref();
        log::info!("Reading vector features from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let mut layer = dataset.layer(0)?;
        let layer_name = layer.name();

        let field_names: Vec<String> = layer.defn().fields().map(|f| f.name()).collect();
        for field in required_fields {
            if !field_names.iter().any(|name| name == field) {
                return Err(CoastError::InvalidAttribute {
                    layer: layer_name,
                    field: field.to_string(),
                });
            }
        }

        let target = gis_order_srs(SpatialRef::from_wkt(&geobox.crs)?);
        let to_target = match layer.spatial_ref() {
            Some(source) => {
                let source = gis_order_srs(source);
                let forward = CoordTransform::new(&source, &target)?;
                let inverse = CoordTransform::new(&target, &source)?;

                // Restrict the read to the GeoBox footprint in layer coordinates
                let footprint = densified_bounds(geobox, 16).to_gdal()?.transform(&inverse)?;
                if let Some(rect) = geo::Geometry::try_from(&footprint)?.bounding_rect() {
                    layer.set_spatial_filter_rect(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
                }
                Some(forward)
            }
            None => {
                log::warn!("Layer '{}' has no spatial reference, assuming GeoBox CRS", layer_name);
                let b = geobox.bounds();
                layer.set_spatial_filter_rect(b.min_x, b.min_y, b.max_x, b.max_y);
                None
            }
        };

        let extent = geobox_rect(geobox);
        let mut features = Vec::new();
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let geometry = match &to_target {
                Some(ct) => geometry.transform(ct)?,
                None => geometry.clone(),
            };
            let geometry = geo::Geometry::try_from(&geometry)?;
            let overlaps = geometry
                .bounding_rect()
                .map_or(false, |rect| rect.intersects(&extent));
            if !overlaps {
                continue;
            }

            let mut attributes = HashMap::new();
            for name in &field_names {
                if let Some(value) = feature.field(name)? {
                    if let Some(text) = field_to_string(value) {
                        attributes.insert(name.clone(), text);
                    }
                }
            }
            features.push(VectorFeature { geometry, attributes });
        }

        log::debug!("Read {} features from layer '{}'", features.len(), layer_name);
        Ok(features)
    }

    /// Read point locations (e.g. ocean seed points); non-point features are skipped
    pub fn read_points<P: AsRef<Path>>(path: P, geobox: &GeoBox) -> CoastResult<Vec<Point<f64>>> {
        let features = Self::read_features(path, geobox, &[])?;
        let points = features
            .into_iter()
            .flat_map(|f| match f.geometry {
                Geometry::Point(p) => vec![p],
                Geometry::MultiPoint(mp) => mp.0,
                _ => Vec::new(),
            })
            .collect();
        Ok(points)
    }

    /// Polygon of one study area from the grid layer, selected by its `id`
    pub fn read_study_area<P: AsRef<Path>>(
        path: P,
        geobox: &GeoBox,
        study_area: &str,
    ) -> CoastResult<MultiPolygon<f64>> {
        let features = Self::read_features(path.as_ref(), geobox, &["id"])?;
        let polygons: Vec<Polygon<f64>> = features
            .iter()
            .filter(|f| f.attribute("id") == Some(study_area))
            .flat_map(|f| crate::core::waterbody::polygons_of(&f.geometry))
            .collect();
        if polygons.is_empty() {
            return Err(CoastError::Processing(format!(
                "study area {} not found in {}",
                study_area,
                path.as_ref().display()
            )));
        }
        Ok(MultiPolygon::new(polygons))
    }

    /// Read the climate index table (a `year` column plus one column per index)
    pub fn read_climate_indices<P: AsRef<Path>>(path: P) -> CoastResult<ClimateIndices> {
        let path = path.as_ref();
        log::info!("Reading climate indices from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let mut layer = dataset.layer(0)?;
        let layer_name = layer.name();
        let field_names: Vec<String> = layer.defn().fields().map(|f| f.name()).collect();
        if !field_names.iter().any(|n| n == "year") {
            return Err(CoastError::InvalidAttribute {
                layer: layer_name,
                field: "year".to_string(),
            });
        }
        let available: Vec<ClimateIndex> = ClimateIndex::ALL
            .into_iter()
            .filter(|ci| field_names.iter().any(|n| n == ci.column()))
            .collect();
        if available.len() < ClimateIndex::ALL.len() {
            log::warn!("Climate table lacks some indices; only {:?} available", available);
        }

        let mut indices = ClimateIndices::default();
        for feature in layer.features() {
            let year = feature
                .field("year")?
                .and_then(field_to_string)
                .and_then(|s| s.trim().parse::<f64>().ok());
            let Some(year) = year else {
                continue;
            };
            for ci in &available {
                let value = feature
                    .field(ci.column())?
                    .and_then(field_to_string)
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .unwrap_or(f64::NAN);
                indices.insert(year as i32, *ci, value);
            }
        }
        log::debug!("Read climate indices for {} years", indices.values.len());
        Ok(indices)
    }
}

fn field_to_string(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::StringValue(s) => Some(s),
        FieldValue::IntegerValue(i) => Some(i.to_string()),
        FieldValue::Integer64Value(i) => Some(i.to_string()),
        FieldValue::RealValue(r) => Some(r.to_string()),
        _ => None,
    }
}

/// GeoBox outline with `per_edge` vertices along each side
fn densified_bounds(geobox: &GeoBox, per_edge: usize) -> Polygon<f64> {
    let b = geobox.bounds();
    let n = per_edge.max(1);
    let mut coords = Vec::with_capacity(4 * n + 1);
    let corners = [
        Coord { x: b.min_x, y: b.min_y },
        Coord { x: b.max_x, y: b.min_y },
        Coord { x: b.max_x, y: b.max_y },
        Coord { x: b.min_x, y: b.max_y },
    ];
    for i in 0..4 {
        let (a, c) = (corners[i], corners[(i + 1) % 4]);
        for k in 0..n {
            let t = k as f64 / n as f64;
            coords.push(Coord {
                x: a.x + t * (c.x - a.x),
                y: a.y + t * (c.y - a.y),
            });
        }
    }
    coords.push(corners[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Annual climate index values
#[derive(Debug, Clone, Default)]
pub struct ClimateIndices {
    values: BTreeMap<i32, HashMap<ClimateIndex, f64>>,
}

impl ClimateIndices {
    pub fn insert(&mut self, year: i32, index: ClimateIndex, value: f64) {
        self.values.entry(year).or_default().insert(index, value);
    }

    pub fn get(&self, year: i32, index: ClimateIndex) -> f64 {
        self.values
            .get(&year)
            .and_then(|v| v.get(&index))
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// Values of one index for the given years; missing years are NaN
    pub fn series(&self, index: ClimateIndex, years: &[i32]) -> Vec<f64> {
        years.iter().map(|&y| self.get(y, index)).collect()
    }
}

/// Bounding rectangle of a GeoBox as a geo `Rect`
pub fn geobox_rect(geobox: &GeoBox) -> Rect<f64> {
    let b = geobox.bounds();
    Rect::new(Coord { x: b.min_x, y: b.min_y }, Coord { x: b.max_x, y: b.max_y })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;

    #[test]
    fn test_climate_series_fills_missing_years() {
        let mut ci = ClimateIndices::default();
        ci.insert(2000, ClimateIndex::Soi, 1.5);
        ci.insert(2002, ClimateIndex::Soi, -0.5);
        let s = ci.series(ClimateIndex::Soi, &[2000, 2001, 2002]);
        assert_eq!(s[0], 1.5);
        assert!(s[1].is_nan());
        assert_eq!(s[2], -0.5);
        assert!(ci.get(2000, ClimateIndex::Pdo).is_nan());
    }

    #[test]
    fn test_densified_bounds_is_closed() {
        let gb = GeoBox::new(
            "LOCAL",
            GeoTransform::from_gdal([0.0, 10.0, 0.0, 100.0, 0.0, -10.0]),
            10,
            10,
        );
        let poly = densified_bounds(&gb, 4);
        assert_eq!(poly.exterior().0.len(), 17);
        assert!(poly.exterior().is_closed());
        assert_eq!(geobox_rect(&gb).max(), Coord { x: 100.0, y: 100.0 });
    }
}
