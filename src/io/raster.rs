use crate::types::{
    BoolMask, CoastError, CoastResult, GeoBox, GeoTransform, Measurement, YearBand, YearLayers,
    YearlyStack,
};
use gdal::raster::{rasterize, Buffer, RasterCreationOption, RasterizeOptions};
use gdal::vector::{Geometry as GdalGeometry, ToGdal};
use gdal::{Dataset, DriverManager};
use geo::MultiPolygon;
use ndarray::Array2;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Name of the categorical mask written next to the yearly rasters
pub const ALL_TIME_MASK_FILE: &str = "all_time_mask.tif";

/// Directory holding the yearly rasters of one study area run
pub fn study_area_dir<P: AsRef<Path>>(raster_root: P, study_area: &str, run_name: &str) -> PathBuf {
    raster_root.as_ref().join(format!("{}_{}", study_area, run_name))
}

/// Loads yearly water index composites for a study area
pub struct RasterStackLoader {
    water_index: String,
}

impl RasterStackLoader {
    pub fn new(water_index: impl Into<String>) -> Self {
        Self {
            water_index: water_index.into(),
        }
    }

    /// Load every year that has a complete set of measurements
    ///
    /// The first year of a run has no gap-fill composite and is skipped;
    /// every year with a gap-fill index must have all seven rasters.
    pub fn load<P: AsRef<Path>>(&self, dir: P, study_area: &str) -> CoastResult<YearlyStack> {
        let dir = dir.as_ref();
        log::info!("Loading yearly rasters from: {}", dir.display());

        let files = self.discover(dir)?;
        let index_years: Vec<i32> = files
            .keys()
            .filter(|(_, m)| *m == Measurement::Index)
            .map(|(y, _)| *y)
            .collect();
        if index_years.is_empty() {
            return Err(CoastError::MissingRasters(format!(
                "no {} rasters found for study area {} in {}",
                self.water_index,
                study_area,
                dir.display()
            )));
        }

        let years: Vec<i32> = files
            .keys()
            .filter(|(_, m)| *m == Measurement::GapfillIndex)
            .map(|(y, _)| *y)
            .collect();
        for year in index_years.iter().filter(|y| !years.contains(y)) {
            log::debug!("Skipping {}: no gap-fill composite", year);
        }

        let mut geobox: Option<GeoBox> = None;
        let mut stack = BTreeMap::new();
        for year in years {
            let mut bands: HashMap<Measurement, YearBand> = HashMap::new();
            for m in Measurement::ALL {
                let path = files.get(&(year, m)).ok_or_else(|| {
                    CoastError::MissingRasters(format!(
                        "study area {}: {}_{}.tif is missing",
                        study_area,
                        year,
                        m.file_suffix(&self.water_index)
                    ))
                })?;
                let (band, band_geobox) = read_band(path)?;
                match &geobox {
                    None => geobox = Some(band_geobox),
                    Some(expected) if !expected.matches(&band_geobox) => {
                        return Err(CoastError::GeoBoxMismatch(format!(
                            "{} does not match the grid of the first raster",
                            path.display()
                        )));
                    }
                    Some(_) => {}
                }
                bands.insert(m, band);
            }
            let mut take = |m: Measurement| bands.remove(&m).unwrap_or_default();
            stack.insert(
                year,
                YearLayers {
                    index: take(Measurement::Index),
                    gapfill_index: take(Measurement::GapfillIndex),
                    gapfill_tide: take(Measurement::GapfillTide),
                    gapfill_count: take(Measurement::GapfillCount),
                    stdev: take(Measurement::Stdev),
                    tide: take(Measurement::Tide),
                    count: take(Measurement::Count),
                },
            );
        }

        let geobox = geobox.ok_or_else(|| {
            CoastError::MissingRasters(format!(
                "no gap-filled {} rasters found for study area {}",
                self.water_index, study_area
            ))
        })?;
        log::info!(
            "Loaded {} years ({}x{} pixels)",
            stack.len(),
            geobox.width,
            geobox.height
        );
        YearlyStack::new(geobox, self.water_index.clone(), stack)
    }

    /// Map (year, measurement) to file path for every recognised raster in `dir`
    fn discover(&self, dir: &Path) -> CoastResult<HashMap<(i32, Measurement), PathBuf>> {
        let pattern = Regex::new(r"^(\d{4})_(.+)\.tif$")
            .map_err(|e| CoastError::Processing(format!("Invalid file pattern: {}", e)))?;
        let suffixes: Vec<(String, Measurement)> = Measurement::ALL
            .iter()
            .map(|m| (m.file_suffix(&self.water_index), *m))
            .collect();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoastError::MissingRasters(format!(
                    "directory {} does not exist",
                    dir.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = pattern.captures(name) else {
                continue;
            };
            let Ok(year) = caps[1].parse::<i32>() else {
                continue;
            };
            if let Some((_, m)) = suffixes.iter().find(|(s, _)| s == &caps[2]) {
                files.insert((year, *m), path.clone());
            }
        }
        log::debug!("Found {} matching rasters", files.len());
        Ok(files)
    }
}

/// Read band 1 of a raster as f32 with nodata converted to NaN
pub fn read_band<P: AsRef<Path>>(path: P) -> CoastResult<(YearBand, GeoBox)> {
    let dataset = Dataset::open(path.as_ref())?;
    let geobox = dataset_geobox(&dataset)?;
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let mut array = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| CoastError::Processing(format!("Failed to reshape raster data: {}", e)))?;
    if let Some(nd) = nodata {
        let nd = nd as f32;
        array.mapv_inplace(|v| if v == nd { f32::NAN } else { v });
    }
    Ok((array, geobox))
}

fn dataset_geobox(dataset: &Dataset) -> CoastResult<GeoBox> {
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    Ok(GeoBox::new(dataset.projection(), transform, width, height))
}

/// Write a single-band f32 GeoTIFF with NaN nodata
pub fn write_band<P: AsRef<Path>>(path: P, data: &Array2<f32>, geobox: &GeoBox) -> CoastResult<()> {
    let (height, width) = data.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<f32, _>(path.as_ref(), width as _, height as _, 1)?;
    dataset.set_geo_transform(&geobox.transform.to_gdal())?;
    dataset.set_projection(&geobox.crs)?;

    let mut band = dataset.rasterband(1)?;
    band.set_no_data_value(Some(f64::NAN))?;
    let buffer = Buffer::new((width, height), data.iter().copied().collect());
    band.write((0, 0), (width, height), &buffer)?;
    Ok(())
}

/// Write the categorical all-time mask as a tiled, compressed Byte GeoTIFF
///
/// Class codes are 0 to 5, so an unsigned Byte band stores them unchanged.
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array2<u8>, geobox: &GeoBox) -> CoastResult<()> {
    log::info!("Writing all-time mask to: {}", path.as_ref().display());
    let (height, width) = mask.dim();
    let options = [
        RasterCreationOption { key: "TILED", value: "YES" },
        RasterCreationOption { key: "BLOCKXSIZE", value: "256" },
        RasterCreationOption { key: "BLOCKYSIZE", value: "256" },
        RasterCreationOption { key: "COMPRESS", value: "DEFLATE" },
    ];
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<u8, _>(
        path.as_ref(),
        width as _,
        height as _,
        1,
        &options,
    )?;
    dataset.set_geo_transform(&geobox.transform.to_gdal())?;
    dataset.set_projection(&geobox.crs)?;

    let mut band = dataset.rasterband(1)?;
    let buffer = Buffer::new((width, height), mask.iter().copied().collect());
    band.write((0, 0), (width, height), &buffer)?;
    Ok(())
}

/// Read the categorical all-time mask written by [`write_mask`]
pub fn read_mask<P: AsRef<Path>>(path: P) -> CoastResult<(Array2<u8>, GeoBox)> {
    log::debug!("Reading all-time mask from: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let geobox = dataset_geobox(&dataset)?;
    let (width, height) = dataset.raster_size();
    let band = dataset.rasterband(1)?;
    let data = band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    let mask = Array2::from_shape_vec((height, width), data.data)
        .map_err(|e| CoastError::Processing(format!("Failed to reshape mask data: {}", e)))?;
    Ok((mask, geobox))
}

/// Burn polygons into a boolean mask on the GeoBox grid
///
/// Uses GDAL's all-touched rule: a pixel is set when any part of its square
/// touches a polygon, holes included. Polygons must be in the GeoBox CRS.
pub fn rasterize_all_touched(polygons: &MultiPolygon<f64>, geobox: &GeoBox) -> CoastResult<BoolMask> {
    let (height, width) = geobox.shape();
    let mut mask = Array2::from_elem((height, width), false);
    if polygons.0.is_empty() || width == 0 || height == 0 {
        return Ok(mask);
    }

    let geometries = polygons
        .0
        .iter()
        .map(|p| p.to_gdal())
        .collect::<Result<Vec<GdalGeometry>, _>>()?;
    let burn_values = vec![1.0; geometries.len()];

    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<u8, _>("", width as _, height as _, 1)?;
    dataset.set_geo_transform(&geobox.transform.to_gdal())?;

    let options = RasterizeOptions {
        all_touched: true,
        ..Default::default()
    };
    rasterize(&mut dataset, &[1], &geometries, &burn_values, Some(options))?;

    let band = dataset.rasterband(1)?;
    let data = band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    for (cell, value) in mask.iter_mut().zip(data.data) {
        *cell = value != 0;
    }
    log::debug!(
        "Rasterised {} polygons onto {}x{} grid",
        geometries.len(),
        width,
        height
    );
    Ok(mask)
}
