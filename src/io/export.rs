use crate::core::movements::AnnualMovements;
use crate::io::vector::gis_order_srs;
use crate::types::{CoastResult, ContourSegment, Predictor};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Feature, FieldDefn, LayerAccess, ToGdal};
use gdal::{DriverManager, LayerOptions};
use geo::{BooleanOps, Geometry, Intersects, MultiLineString, MultiPolygon};
use std::path::{Path, PathBuf};

/// Attribute column type with OGR width and precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real { width: i32, precision: i32 },
    Text { width: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Attribute value; NaN reals are written as null
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i32),
    Real(f64),
    Text(String),
}

/// One output feature
#[derive(Debug, Clone)]
pub struct Record {
    pub geometry: Geometry<f64>,
    pub values: Vec<FieldValue>,
}

/// Output formats written for every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    /// GeoJSON in geographic coordinates
    GeoJson,
    /// ESRI Shapefile in the study area CRS
    Shapefile,
}

impl Format {
    fn driver(self) -> &'static str {
        match self {
            Format::GeoJson => "GeoJSON",
            Format::Shapefile => "ESRI Shapefile",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Format::GeoJson => "geojson",
            Format::Shapefile => "shp",
        }
    }

    fn sidecars(self) -> &'static [&'static str] {
        match self {
            Format::GeoJson => &["geojson"],
            Format::Shapefile => &["shp", "shx", "dbf", "prj", "cpg"],
        }
    }
}

/// Schema of the contour layer
pub fn contour_schema() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("year", FieldKind::Integer),
        FieldSpec::new("certainty", FieldKind::Text { width: 80 }),
    ]
}

/// Schema of the statistics layer: rates, significances, outliers, then one column per year
pub fn stats_schema(years: &[i32]) -> Vec<FieldSpec> {
    let rates = Predictor::ALL.iter().map(|p| {
        FieldSpec::new(format!("rate_{}", p.label()), FieldKind::Real { width: 8, precision: 2 })
    });
    let sigs = Predictor::ALL.iter().map(|p| {
        FieldSpec::new(format!("sig_{}", p.label()), FieldKind::Real { width: 8, precision: 3 })
    });
    let outliers = Predictor::ALL
        .iter()
        .map(|p| FieldSpec::new(format!("outl_{}", p.label()), FieldKind::Text { width: 80 }));
    let year_columns = years
        .iter()
        .map(|y| FieldSpec::new(y.to_string(), FieldKind::Real { width: 8, precision: 2 }));
    rates.chain(sigs).chain(outliers).chain(year_columns).collect()
}

/// Writes contour and statistics layers for one study area run
pub struct Exporter {
    vectors_dir: PathBuf,
    /// `{area}_{run}_{index}_{threshold}` part of every file name
    name_suffix: String,
    /// Study area CRS as WKT
    crs: String,
}

impl Exporter {
    /// Create `vectors/` and `vectors/shapefiles/` under the study area directory
    pub fn new<P: AsRef<Path>>(
        area_dir: P,
        study_area: &str,
        run_name: &str,
        output_suffix: &str,
        crs: impl Into<String>,
    ) -> CoastResult<Self> {
        let vectors_dir = area_dir.as_ref().join("vectors");
        std::fs::create_dir_all(vectors_dir.join("shapefiles"))?;
        Ok(Self {
            vectors_dir,
            name_suffix: format!("{}_{}_{}", study_area, run_name, output_suffix),
            crs: crs.into(),
        })
    }

    pub fn contours_path(&self, shapefile: bool) -> PathBuf {
        self.layer_path("contours", if shapefile { Format::Shapefile } else { Format::GeoJson })
    }

    pub fn stats_path(&self, shapefile: bool) -> PathBuf {
        self.layer_path("stats", if shapefile { Format::Shapefile } else { Format::GeoJson })
    }

    fn layer_path(&self, prefix: &str, format: Format) -> PathBuf {
        let dir = match format {
            Format::GeoJson => self.vectors_dir.clone(),
            Format::Shapefile => self.vectors_dir.join("shapefiles"),
        };
        dir.join(format!("{}_{}.{}", prefix, self.name_suffix, format.extension()))
    }

    /// Write one feature per (year, certainty), clipped to the study area
    pub fn write_contours(
        &self,
        segments: &[ContourSegment],
        study_area: &MultiPolygon<f64>,
    ) -> CoastResult<usize> {
        let records: Vec<Record> = segments
            .iter()
            .filter_map(|s| {
                let clipped = study_area.clip(&s.geometry, false);
                let lines = MultiLineString::new(
                    clipped.0.into_iter().filter(|l| l.0.len() >= 2).collect(),
                );
                (!lines.0.is_empty()).then(|| Record {
                    geometry: Geometry::MultiLineString(lines),
                    values: vec![
                        FieldValue::Integer(s.year),
                        FieldValue::Text(s.certainty.to_string()),
                    ],
                })
            })
            .collect();

        let schema = contour_schema();
        for format in [Format::GeoJson, Format::Shapefile] {
            let path = self.layer_path("contours", format);
            self.write_layer(
                &path,
                format,
                "contours",
                gdal_sys::OGRwkbGeometryType::wkbMultiLineString,
                &schema,
                &records,
            )?;
        }
        log::info!("Wrote {} contour features", records.len());
        Ok(records.len())
    }

    /// Write one feature per sample point inside the study area
    pub fn write_stats(
        &self,
        movements: &AnnualMovements,
        study_area: &MultiPolygon<f64>,
    ) -> CoastResult<usize> {
        let records: Vec<Record> = movements
            .rows
            .iter()
            .filter(|row| study_area.intersects(&row.point.geometry))
            .map(|row| {
                let stats = |p: &Predictor| row.stats.get(p);
                let rates = Predictor::ALL
                    .iter()
                    .map(|p| FieldValue::Real(stats(p).map_or(f64::NAN, |r| r.slope)));
                let sigs = Predictor::ALL
                    .iter()
                    .map(|p| FieldValue::Real(stats(p).map_or(f64::NAN, |r| r.pvalue)));
                let outliers = Predictor::ALL
                    .iter()
                    .map(|p| FieldValue::Text(stats(p).map(|r| r.outlier_label()).unwrap_or_default()));
                let distances = row.distances.iter().map(|&d| FieldValue::Real(d));
                Record {
                    geometry: Geometry::Point(row.point.geometry),
                    values: rates.chain(sigs).chain(outliers).chain(distances).collect(),
                }
            })
            .collect();

        let schema = stats_schema(&movements.years);
        for format in [Format::GeoJson, Format::Shapefile] {
            let path = self.layer_path("stats", format);
            self.write_layer(
                &path,
                format,
                "stats",
                gdal_sys::OGRwkbGeometryType::wkbPoint,
                &schema,
                &records,
            )?;
        }
        log::info!("Wrote {} statistics points", records.len());
        Ok(records.len())
    }

    fn write_layer(
        &self,
        path: &Path,
        format: Format,
        layer_name: &str,
        geometry_type: gdal_sys::OGRwkbGeometryType::Type,
        schema: &[FieldSpec],
        records: &[Record],
    ) -> CoastResult<()> {
        log::debug!("Writing {} features to: {}", records.len(), path.display());
        remove_existing(path, format)?;

        let source = gis_order_srs(SpatialRef::from_wkt(&self.crs)?);
        let (srs, transform) = match format {
            Format::GeoJson => {
                let wgs84 = gis_order_srs(SpatialRef::from_epsg(4326)?);
                let transform = CoordTransform::new(&source, &wgs84)?;
                (wgs84, Some(transform))
            }
            Format::Shapefile => (source, None),
        };

        let driver = DriverManager::get_driver_by_name(format.driver())?;
        let mut dataset = driver.create_vector_only(path)?;
        let layer = dataset.create_layer(LayerOptions {
            name: layer_name,
            srs: Some(&srs),
            ty: geometry_type,
            options: None,
        })?;

        for field in schema {
            let (field_type, width, precision) = match field.kind {
                FieldKind::Integer => (gdal_sys::OGRFieldType::OFTInteger, None, None),
                FieldKind::Real { width, precision } => {
                    (gdal_sys::OGRFieldType::OFTReal, Some(width), Some(precision))
                }
                FieldKind::Text { width } => (gdal_sys::OGRFieldType::OFTString, Some(width), None),
            };
            let defn = FieldDefn::new(&field.name, field_type)?;
            if let Some(width) = width {
                defn.set_width(width);
            }
            if let Some(precision) = precision {
                defn.set_precision(precision);
            }
            defn.add_to_layer(&layer)?;
        }

        let layer_defn = layer.defn();
        for record in records {
            let mut geometry = record.geometry.to_gdal()?;
            if let Some(transform) = &transform {
                geometry = geometry.transform(transform)?;
            }
            let mut feature = Feature::new(layer_defn)?;
            feature.set_geometry(geometry)?;
            for (field, value) in schema.iter().zip(&record.values) {
                match value {
                    FieldValue::Integer(v) => feature.set_field_integer(&field.name, *v)?,
                    FieldValue::Real(v) if v.is_nan() => {}
                    FieldValue::Real(v) => feature.set_field_double(&field.name, *v)?,
                    FieldValue::Text(v) => feature.set_field_string(&field.name, v)?,
                }
            }
            feature.create(&layer)?;
        }
        Ok(())
    }
}

fn remove_existing(path: &Path, format: Format) -> CoastResult<()> {
    for ext in format.sidecars() {
        let sidecar = path.with_extension(ext);
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_schema_order() {
        let schema = stats_schema(&[2000, 2001]);
        let names: Vec<&str> = schema.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "rate_time", "rate_SOI", "rate_IOD", "rate_SAM", "rate_IPO", "rate_PDO", "rate_tide",
                "sig_time", "sig_SOI", "sig_IOD", "sig_SAM", "sig_IPO", "sig_PDO", "sig_tide",
                "outl_time", "outl_SOI", "outl_IOD", "outl_SAM", "outl_IPO", "outl_PDO", "outl_tide",
                "2000", "2001",
            ]
        );
        assert_eq!(schema[0].kind, FieldKind::Real { width: 8, precision: 2 });
        assert_eq!(schema[7].kind, FieldKind::Real { width: 8, precision: 3 });
        assert_eq!(schema[14].kind, FieldKind::Text { width: 80 });
        assert!(!names.iter().any(|n| n.starts_with("incpt")));
    }

    #[test]
    fn test_output_names() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(dir.path(), "12", "v1", "mndwi_0.00", "LOCAL").unwrap();
        assert_eq!(
            exporter.contours_path(false),
            dir.path().join("vectors/contours_12_v1_mndwi_0.00.geojson")
        );
        assert_eq!(
            exporter.stats_path(true),
            dir.path().join("vectors/shapefiles/stats_12_v1_mndwi_0.00.shp")
        );
        assert!(dir.path().join("vectors/shapefiles").is_dir());
    }
}
