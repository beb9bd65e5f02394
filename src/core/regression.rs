use crate::core::movements::{round_to, AnnualMovements, PointRow};
use crate::io::vector::ClimateIndices;
use crate::types::{CoastError, CoastResult, Predictor};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Scale factor making the MAD a consistent estimator of the standard deviation
const MAD_SCALE: f64 = 0.6745;
const TINY: f64 = 1.0e-20;

/// Regression parameters
#[derive(Debug, Clone)]
pub struct RegressionParams {
    /// Modified z-score above which an observation is an outlier
    pub mad_threshold: f64,
}

impl Default for RegressionParams {
    fn default() -> Self {
        Self { mad_threshold: 3.5 }
    }
}

/// Outcome of one robust regression
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    pub slope: f64,
    pub intercept: f64,
    pub pvalue: f64,
    /// Labels of observations excluded as outliers, in input order
    pub outliers: Vec<String>,
}

impl RegressionResult {
    fn undefined(outliers: Vec<String>) -> Self {
        Self {
            slope: f64::NAN,
            intercept: f64::NAN,
            pvalue: f64::NAN,
            outliers,
        }
    }

    /// Outlier labels joined by single spaces
    pub fn outlier_label(&self) -> String {
        self.outliers.join(" ")
    }
}

/// Boolean outlier flags by modified z-score of each row's distance to the median
///
/// Rows are points in n dimensions. When the median distance is zero every
/// row with a non-zero distance is an outlier.
pub fn outlier_mad(rows: &[Vec<f64>], thresh: f64) -> Vec<bool> {
    if rows.is_empty() {
        return Vec::new();
    }
    let dims = rows[0].len();
    let medians: Vec<f64> = (0..dims)
        .map(|d| median(rows.iter().map(|r| r[d]).collect()))
        .collect();
    let distances: Vec<f64> = rows
        .iter()
        .map(|r| {
            r.iter()
                .zip(&medians)
                .map(|(v, m)| (v - m).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .collect();
    let mad = median(distances.clone());

    distances
        .into_iter()
        .map(|d| {
            if mad == 0.0 {
                d > 0.0
            } else {
                MAD_SCALE * d / mad > thresh
            }
        })
        .collect()
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Ordinary least squares fit with a two-sided p-value for the slope
///
/// Returns `(slope, intercept, pvalue)`; all NaN with fewer than two
/// observations or constant x.
pub fn linregress(x: &[f64], y: &[f64]) -> (f64, f64, f64) {
    let n = x.len().min(y.len());
    if n < 2 {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (xi, yi) in x[..n].iter().zip(&y[..n]) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 {
        return (f64::NAN, f64::NAN, f64::NAN);
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let pvalue = if n == 2 {
        if y[0] == y[1] {
            1.0
        } else {
            0.0
        }
    } else {
        let r = if syy == 0.0 {
            0.0
        } else {
            (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
        };
        let df = nf - 2.0;
        let t = r * (df / ((1.0 - r + TINY) * (1.0 + r + TINY))).sqrt();
        match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => 2.0 * dist.sf(t.abs()),
            Err(_) => f64::NAN,
        }
    };
    (slope, intercept, pvalue)
}

/// Runs robust regressions of annual movements against each predictor
pub struct RegressionEngine {
    params: RegressionParams,
}

impl RegressionEngine {
    pub fn new() -> Self {
        Self {
            params: RegressionParams::default(),
        }
    }

    pub fn with_params(params: RegressionParams) -> Self {
        Self { params }
    }

    /// Regress `y` on `x` after dropping NaN rows, optional detrending and outliers
    ///
    /// `detrend` holds `(slope, intercept)` subtracted from `y` before outlier
    /// detection. Slope, intercept and p-value are rounded to 3 decimals.
    pub fn regress(
        &self,
        y: &[f64],
        x: &[f64],
        labels: &[String],
        detrend: Option<(f64, f64)>,
    ) -> CoastResult<RegressionResult> {
        if y.len() != x.len() || y.len() != labels.len() {
            return Err(CoastError::Processing(format!(
                "regression inputs differ in length: y {}, x {}, labels {}",
                y.len(),
                x.len(),
                labels.len()
            )));
        }

        let mut rows = Vec::new();
        let mut valid_labels = Vec::new();
        for ((&yi, &xi), label) in y.iter().zip(x).zip(labels) {
            if xi.is_nan() || yi.is_nan() {
                continue;
            }
            let yi = match detrend {
                Some((a, b)) => yi - (a * xi + b),
                None => yi,
            };
            rows.push(vec![xi, yi]);
            valid_labels.push(label.clone());
        }

        let flags = outlier_mad(&rows, self.params.mad_threshold);
        let mut xs = Vec::with_capacity(rows.len());
        let mut ys = Vec::with_capacity(rows.len());
        let mut outliers = Vec::new();
        for ((row, label), outlier) in rows.iter().zip(valid_labels).zip(flags) {
            if outlier {
                outliers.push(label);
            } else {
                xs.push(row[0]);
                ys.push(row[1]);
            }
        }

        if xs.len() < 2 {
            return Ok(RegressionResult::undefined(outliers));
        }
        let (slope, intercept, pvalue) = linregress(&xs, &ys);
        Ok(RegressionResult {
            slope: round_to(slope, 3),
            intercept: round_to(intercept, 3),
            pvalue: round_to(pvalue, 3),
            outliers,
        })
    }

    /// Fill `stats` of every row for all predictors
    pub fn calculate_regressions(
        &self,
        movements: &mut AnnualMovements,
        climate: &ClimateIndices,
    ) -> CoastResult<()> {
        log::info!(
            "Running regressions for {} points against {} predictors",
            movements.rows.len(),
            Predictor::ALL.len()
        );
        let years = movements.years.clone();
        let labels: Vec<String> = years.iter().map(|y| y.to_string()).collect();
        let time: Vec<f64> = years.iter().map(|&y| y as f64).collect();
        let climate_series: Vec<(Predictor, Vec<f64>)> = Predictor::ALL
            .iter()
            .filter_map(|p| match p {
                Predictor::Climate(ci) => Some((*p, climate.series(*ci, &years))),
                _ => None,
            })
            .collect();

        let inputs = RegressionInputs {
            labels: &labels,
            time: &time,
            climate: &climate_series,
        };
        self.regress_rows(&mut movements.rows, &inputs)
    }

    #[cfg(feature = "parallel")]
    fn regress_rows(&self, rows: &mut [PointRow], inputs: &RegressionInputs) -> CoastResult<()> {
        use rayon::prelude::*;

        rows.par_iter_mut()
            .try_for_each(|row| self.regress_row(row, inputs))
    }

    #[cfg(not(feature = "parallel"))]
    fn regress_rows(&self, rows: &mut [PointRow], inputs: &RegressionInputs) -> CoastResult<()> {
        rows.iter_mut()
            .try_for_each(|row| self.regress_row(row, inputs))
    }

    fn regress_row(&self, row: &mut PointRow, inputs: &RegressionInputs) -> CoastResult<()> {
        for predictor in Predictor::ALL {
            let x: &[f64] = match predictor {
                Predictor::Time => inputs.time,
                Predictor::Tide => &row.tides,
                Predictor::Climate(_) => inputs
                    .climate
                    .iter()
                    .find(|(p, _)| *p == predictor)
                    .map(|(_, s)| s.as_slice())
                    .unwrap_or(&[]),
            };
            let result = if x.len() == row.distances.len() {
                self.regress(&row.distances, x, inputs.labels, None)?
            } else {
                RegressionResult::undefined(Vec::new())
            };
            row.stats.insert(predictor, result);
        }
        Ok(())
    }
}

impl Default for RegressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct RegressionInputs<'a> {
    labels: &'a [String],
    time: &'a [f64],
    climate: &'a [(Predictor, Vec<f64>)],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaselinePoint, ClimateIndex};
    use approx::assert_relative_eq;
    use geo::Point;
    use std::collections::BTreeMap;

    fn labels(years: &[i32]) -> Vec<String> {
        years.iter().map(|y| y.to_string()).collect()
    }

    #[test]
    fn test_outlier_mad_flags_spike() {
        let rows: Vec<Vec<f64>> = [(2001.0, 0.0), (2002.0, 0.0), (2003.0, 100.0), (2004.0, 0.0), (2005.0, 0.0)]
            .iter()
            .map(|&(x, y)| vec![x, y])
            .collect();
        assert_eq!(outlier_mad(&rows, 3.5), vec![false, false, true, false, false]);
    }

    #[test]
    fn test_outlier_mad_zero_deviation() {
        let rows = vec![vec![1.0], vec![1.0], vec![1.0], vec![2.0]];
        assert_eq!(outlier_mad(&rows, 3.5), vec![false, false, false, true]);
    }

    #[test]
    fn test_linregress_recovers_slope() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 2.5 * v + 10.0 + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let (slope, intercept, p) = linregress(&x, &y);
        assert_relative_eq!(slope, 2.5, epsilon = 0.01);
        assert_relative_eq!(intercept, 10.0, epsilon = 0.5);
        assert!(p < 0.05);
    }

    #[test]
    fn test_linregress_matches_reference() {
        // scipy.stats.linregress([1, 2, 3, 4, 5], [2, 4, 5, 4, 5])
        let (slope, intercept, p) = linregress(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0]);
        assert_relative_eq!(slope, 0.6, epsilon = 1e-12);
        assert_relative_eq!(intercept, 2.2, epsilon = 1e-12);
        assert_relative_eq!(p, 0.1240, epsilon = 1e-3);
    }

    #[test]
    fn test_linregress_degenerate_inputs() {
        assert!(linregress(&[1.0], &[1.0]).0.is_nan());
        assert!(linregress(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).2.is_nan());
        assert_eq!(linregress(&[1.0, 2.0], &[5.0, 5.0]).2, 1.0);
        assert_eq!(linregress(&[1.0, 2.0], &[5.0, 6.0]).2, 0.0);
    }

    #[test]
    fn test_regress_drops_nan_and_reports_outliers() {
        let years = [2001, 2002, 2003, 2004, 2005, 2006];
        let x: Vec<f64> = years.iter().map(|&y| y as f64).collect();
        let y = vec![0.0, 0.0, 100.0, f64::NAN, 0.0, 0.0];
        let result = RegressionEngine::new().regress(&y, &x, &labels(&years), None).unwrap();
        assert_eq!(result.outlier_label(), "2003");
        assert_eq!(result.slope, 0.0);
    }

    #[test]
    fn test_regress_detrends_before_outlier_test() {
        let years = [2001, 2002, 2003, 2004, 2005];
        let x: Vec<f64> = years.iter().map(|&y| y as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 25.0 * (v - 2001.0)).collect();
        let result = RegressionEngine::new()
            .regress(&y, &x, &labels(&years), Some((25.0, -25.0 * 2001.0)))
            .unwrap();
        assert!(result.outliers.is_empty());
        assert_eq!(result.slope, 0.0);
    }

    #[test]
    fn test_too_few_rows_gives_nan() {
        let result = RegressionEngine::new()
            .regress(&[1.0, f64::NAN], &[2000.0, 2001.0], &labels(&[2000, 2001]), None)
            .unwrap();
        assert!(result.slope.is_nan());
        assert!(result.pvalue.is_nan());
        assert_eq!(result.outlier_label(), "");
    }

    #[test]
    fn test_calculate_regressions_fills_all_predictors() {
        let years = vec![2000, 2001, 2002, 2003];
        let mut climate = ClimateIndices::default();
        for (i, &year) in years.iter().enumerate() {
            climate.insert(year, ClimateIndex::Soi, i as f64);
        }
        let mut movements = AnnualMovements {
            years: years.clone(),
            rows: vec![PointRow {
                point: BaselinePoint { id: 0, geometry: Point::new(0.0, 0.0) },
                distances: vec![-75.0, -50.0, -25.0, 0.0],
                nearest: vec![None; 4],
                tides: vec![0.1, 0.2, 0.1, 0.2],
                stats: BTreeMap::new(),
            }],
        };
        RegressionEngine::new()
            .calculate_regressions(&mut movements, &climate)
            .unwrap();
        let stats = &movements.rows[0].stats;
        assert_eq!(stats.len(), Predictor::ALL.len());
        assert_eq!(stats[&Predictor::Time].slope, 25.0);
        assert_eq!(stats[&Predictor::Climate(ClimateIndex::Soi)].slope, 25.0);
        assert!(stats[&Predictor::Climate(ClimateIndex::Pdo)].slope.is_nan());
    }
}
