use crate::core::morphology::{
    binary_dilation, binary_erosion, binary_opening, label_regions, StructuringElement,
};
use crate::types::{
    BoolMask, CoastError, CoastResult, GeoBox, MaskClass, YearBand, YearlyStack,
};
use geo::Point;
use ndarray::{Array2, Zip};
use std::collections::{BTreeMap, HashSet};

/// Contour preprocessing parameters
#[derive(Debug, Clone)]
pub struct PreprocessParams {
    /// Water index value separating water from land
    pub threshold: f32,
    /// Half-width of the coastal buffer in pixels
    pub buffer_pixels: usize,
    pub stdev_threshold: f32,
    pub lowobs_threshold: f32,
    /// Fraction of valid years above which a pixel is persistently poor
    pub persistent_fraction: f32,
    pub gapfill_min_count: f32,
    /// Fraction of years a pixel must be water to count as all-time ocean
    pub all_time_water_fraction: f32,
    pub persistent_erosion_radius: usize,
    pub ocean_opening_radius: usize,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            buffer_pixels: 33,            // ~1 km at 30 m pixels
            stdev_threshold: 0.25,
            lowobs_threshold: 5.0,
            persistent_fraction: 0.5,
            gapfill_min_count: 5.0,
            all_time_water_fraction: 0.9,
            persistent_erosion_radius: 2,
            ocean_opening_radius: 3,
        }
    }
}

/// Everything later stages need from preprocessing
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    /// Stack with low-observation pixels replaced by gap-fill values
    pub filled: YearlyStack,
    /// Per-year index restricted to ocean-connected water inside the coastal buffer
    pub masked_index: BTreeMap<i32, YearBand>,
    pub all_time_ocean: BoolMask,
    pub coastal_buffer: BoolMask,
    /// Categorical mask, values are [`MaskClass`] codes
    pub all_time_mask: Array2<u8>,
}

/// Prepares yearly water index rasters for contour extraction
pub struct ContourPreprocessor {
    params: PreprocessParams,
}

impl ContourPreprocessor {
    /// Create a new preprocessor with default parameters
    pub fn new() -> Self {
        Self {
            params: PreprocessParams::default(),
        }
    }

    /// Create a preprocessor with custom parameters
    pub fn with_params(params: PreprocessParams) -> Self {
        Self { params }
    }

    /// Run all preprocessing steps on a raw stack
    pub fn process(
        &self,
        stack: &YearlyStack,
        waterbodies: &BoolMask,
        ocean_seeds: &[Point<f64>],
    ) -> CoastResult<PreprocessOutput> {
        log::info!("Preprocessing {} years for contour extraction", stack.len());
        log::debug!("Preprocess parameters: {:?}", self.params);

        let shape = stack.geobox.shape();
        if waterbodies.dim() != shape {
            return Err(CoastError::GeoBoxMismatch(format!(
                "waterbody mask has shape {:?}, expected {:?}",
                waterbodies.dim(),
                shape
            )));
        }

        let nodata: BTreeMap<i32, BoolMask> = stack
            .iter()
            .map(|(&year, layers)| (year, layers.index.mapv(f32::is_nan)))
            .collect();

        let p = &self.params;
        let erosion = StructuringElement::Disk(p.persistent_erosion_radius);
        let noisy = self.persistent_fraction(stack, &nodata, |l, r, c| l.stdev[[r, c]] > p.stdev_threshold);
        let persistent_stdev = binary_erosion(&noisy, erosion);
        let lowobs = self.persistent_fraction(stack, &nodata, |l, r, c| l.count[[r, c]] < p.lowobs_threshold);
        let persistent_lowobs = binary_erosion(&lowobs, erosion);
        log::debug!(
            "Persistent noisy pixels: {}, persistent low-obs pixels: {}",
            count_set(&persistent_stdev),
            count_set(&persistent_lowobs)
        );

        let filled = stack.gapfilled(p.gapfill_min_count);

        let thresholded: BTreeMap<i32, YearBand> = filled
            .iter()
            .map(|(&year, layers)| {
                let mut t = Array2::<f32>::zeros(shape);
                Zip::from(&mut t)
                    .and(&layers.index)
                    .and(&nodata[&year])
                    .and(waterbodies)
                    .for_each(|out, &index, &missing, &waterbody| {
                        *out = if waterbody {
                            0.0
                        } else if missing {
                            f32::NAN
                        } else if index > p.threshold {
                            1.0
                        } else {
                            0.0
                        };
                    });
                (year, t)
            })
            .collect();

        let all_time = all_time_water(&thresholded, shape, p.all_time_water_fraction);
        let all_time = binary_opening(&all_time, StructuringElement::Disk(p.ocean_opening_radius));
        let all_time_ocean = mask_ocean(&all_time, ocean_seeds, &filled.geobox)
            .ok_or(CoastError::NoOceanConnectivity)?;

        let disk = StructuringElement::Disk(p.buffer_pixels);
        let buffer_ocean = binary_dilation(&all_time_ocean, disk);
        let buffer_land = binary_dilation(&all_time_ocean.mapv(|v| !v), disk);
        let coastal_buffer = &buffer_ocean & &buffer_land;
        log::debug!("Coastal buffer covers {} pixels", count_set(&coastal_buffer));

        let annual = self.annual_masks(&thresholded, ocean_seeds, &filled.geobox);

        let mut masked_index = BTreeMap::new();
        for (&year, layers) in filled.iter() {
            let annual_mask = &annual[&year];
            let mut masked = layers.index.clone();
            Zip::from(&mut masked)
                .and(annual_mask)
                .and(&coastal_buffer)
                .and(waterbodies)
                .for_each(|v, &water, &buffer, &waterbody| {
                    if !(water && buffer && !waterbody) {
                        *v = f32::NAN;
                    }
                });
            masked_index.insert(year, masked);
        }

        let mut all_time_mask = Array2::<u8>::zeros(shape);
        Zip::from(&mut all_time_mask)
            .and(&buffer_land)
            .and(&buffer_ocean)
            .and(&coastal_buffer)
            .and(waterbodies)
            .for_each(|class, &land, &ocean, &buffer, &waterbody| {
                if land && !buffer {
                    *class = MaskClass::LandBuffer.code();
                }
                if ocean && !buffer {
                    *class = MaskClass::OceanBuffer.code();
                }
                if waterbody && buffer {
                    *class = MaskClass::Waterbody.code();
                }
            });
        Zip::from(&mut all_time_mask)
            .and(&persistent_stdev)
            .and(&persistent_lowobs)
            .and(&coastal_buffer)
            .for_each(|class, &noisy, &lowobs, &buffer| {
                if noisy && buffer {
                    *class = MaskClass::PersistentNoisy.code();
                }
                if lowobs && buffer {
                    *class = MaskClass::PersistentLowObs.code();
                }
            });

        log::info!("Preprocessing complete");
        Ok(PreprocessOutput {
            filled,
            masked_index,
            all_time_ocean,
            coastal_buffer,
            all_time_mask,
        })
    }

    /// Pixels where `flag` holds in more than the persistent fraction of valid years
    fn persistent_fraction<F>(
        &self,
        stack: &YearlyStack,
        nodata: &BTreeMap<i32, BoolMask>,
        flag: F,
    ) -> BoolMask
    where
        F: Fn(&crate::types::YearLayers, usize, usize) -> bool,
    {
        let (rows, cols) = stack.geobox.shape();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let mut valid = 0usize;
            let mut flagged = 0usize;
            for (year, layers) in stack.iter() {
                if nodata[year][[r, c]] {
                    continue;
                }
                valid += 1;
                if flag(layers, r, c) {
                    flagged += 1;
                }
            }
            valid > 0 && (flagged as f32 / valid as f32) > self.params.persistent_fraction
        })
    }

    #[cfg(feature = "parallel")]
    fn annual_masks(
        &self,
        thresholded: &BTreeMap<i32, YearBand>,
        seeds: &[Point<f64>],
        geobox: &GeoBox,
    ) -> BTreeMap<i32, BoolMask> {
        use rayon::prelude::*;

        let years: Vec<(&i32, &YearBand)> = thresholded.iter().collect();
        years
            .into_par_iter()
            .map(|(&year, t)| (year, annual_ocean(year, t, seeds, geobox)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn annual_masks(
        &self,
        thresholded: &BTreeMap<i32, YearBand>,
        seeds: &[Point<f64>],
        geobox: &GeoBox,
    ) -> BTreeMap<i32, BoolMask> {
        thresholded
            .iter()
            .map(|(&year, t)| (year, annual_ocean(year, t, seeds, geobox)))
            .collect()
    }
}

impl Default for ContourPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn annual_ocean(year: i32, thresholded: &YearBand, seeds: &[Point<f64>], geobox: &GeoBox) -> BoolMask {
    let water = thresholded.mapv(|v| v == 1.0);
    mask_ocean(&water, seeds, geobox).unwrap_or_else(|| {
        log::warn!("{}: no ocean seed point falls in a water region, year left empty", year);
        Array2::from_elem(water.dim(), false)
    })
}

/// NaN-skipping mean of the thresholded years compared against `fraction`
fn all_time_water(thresholded: &BTreeMap<i32, YearBand>, shape: (usize, usize), fraction: f32) -> BoolMask {
    let mut sum = Array2::<f32>::zeros(shape);
    let mut valid = Array2::<f32>::zeros(shape);
    for t in thresholded.values() {
        Zip::from(&mut sum).and(&mut valid).and(t).for_each(|s, n, &v| {
            if !v.is_nan() {
                *s += v;
                *n += 1.0;
            }
        });
    }
    Zip::from(&sum)
        .and(&valid)
        .map_collect(|&s, &n| n > 0.0 && s / n > fraction)
}

/// Keep the 4-connected water regions that contain an ocean seed point, grown by one pixel
///
/// Returns `None` when no seed point lands on a water region.
pub fn mask_ocean(water: &BoolMask, seeds: &[Point<f64>], geobox: &GeoBox) -> Option<BoolMask> {
    let (labels, count) = label_regions(water);
    if count == 0 {
        return None;
    }
    let ocean_labels: HashSet<u32> = seeds
        .iter()
        .filter_map(|p| geobox.nearest_pixel(p.x(), p.y()))
        .map(|(r, c)| labels[[r, c]])
        .filter(|&label| label != 0)
        .collect();
    if ocean_labels.is_empty() {
        return None;
    }
    let ocean = labels.mapv(|label| ocean_labels.contains(&label));
    Some(binary_dilation(&ocean, StructuringElement::Square(1)))
}

fn count_set(mask: &BoolMask) -> usize {
    mask.iter().filter(|&&v| v).count()
}
