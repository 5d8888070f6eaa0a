/// A simple statistics module with some utility functions such as calculation of percentiles.
use crate::core::units::minutes_to_hours;
use statrs::statistics::{Data, OrderStatistics, Statistics};

pub fn percentile(numbers: &[f64], percentile: usize) -> f64 {
    let mut data = Data::new(numbers.to_vec());

    data.percentile(percentile)
}

/// Headline figures for one schedule column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSummary {
    pub mean: f64,
    pub peak: f64,
    pub median: f64,
    pub percentile_95: f64,
    /// Hours at peak that would give the same annual total.
    pub equivalent_full_load_hours: f64,
}

pub fn summarize(values: &[f64], step_minutes: u32) -> ColumnSummary {
    if values.is_empty() {
        return ColumnSummary {
            mean: 0.,
            peak: 0.,
            median: 0.,
            percentile_95: 0.,
            equivalent_full_load_hours: 0.,
        };
    }
    let peak = values.iter().copied().fold(f64::MIN, f64::max);
    let total_hours = values.iter().sum::<f64>() * minutes_to_hours(step_minutes);

    ColumnSummary {
        mean: values.mean(),
        peak,
        median: percentile(values, 50),
        percentile_95: percentile(values, 95),
        equivalent_full_load_hours: if peak > 0. { total_hours / peak } else { 0. },
    }
}
