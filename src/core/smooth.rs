use crate::core::aggregate::ScheduleColumn;
use crate::core::units::{HOURS_PER_DAY, MONTHS_PER_YEAR};
use crate::errors::DataLoadError;
use crate::simulation_time::DayType;
use csv::Reader;
use indexmap::IndexMap;
use serde::Deserialize;
use std::io::Read;
use strum::IntoEnumIterator;

const HOURS: usize = HOURS_PER_DAY as usize;
const MONTHS: usize = MONTHS_PER_YEAR as usize;

#[derive(Debug, Deserialize)]
struct HourlyRecord {
    column: ScheduleColumn,
    hour: usize,
    weekday: f64,
    weekend: f64,
}

#[derive(Debug, Deserialize)]
struct MonthlyRecord {
    column: ScheduleColumn,
    month: usize,
    multiplier: f64,
}

#[derive(Clone, Debug)]
struct HourlyProfile {
    weekday: [f64; HOURS],
    weekend: [f64; HOURS],
}

/// Population-averaged deterministic profiles: an hourly weekday/weekend shape per column, scaled by
/// a monthly multiplier.
#[derive(Clone, Debug)]
pub struct SmoothProfiles {
    hourly: IndexMap<ScheduleColumn, HourlyProfile>,
    monthly: IndexMap<ScheduleColumn, [f64; MONTHS]>,
}

impl SmoothProfiles {
    pub const HOURLY_TABLE_NAME: &'static str = "smooth_hourly_profiles";
    pub const MONTHLY_TABLE_NAME: &'static str = "smooth_monthly_multipliers";

    pub fn load(hourly: impl Read, monthly: impl Read) -> Result<Self, DataLoadError> {
        let hourly_error = |message: String| DataLoadError::new(Self::HOURLY_TABLE_NAME, message);
        let monthly_error = |message: String| DataLoadError::new(Self::MONTHLY_TABLE_NAME, message);
        let check_value = |value: f64| value.is_finite() && value >= 0.;

        let mut hourly_values: IndexMap<(ScheduleColumn, usize), (f64, f64)> = Default::default();
        for (line, record) in Reader::from_reader(hourly)
            .deserialize::<HourlyRecord>()
            .enumerate()
        {
            let record = record.map_err(|e| hourly_error(format!("row {}: {e}", line + 1)))?;
            if record.hour >= HOURS {
                return Err(hourly_error(format!(
                    "row {}: hour {} is outside 0-23",
                    line + 1,
                    record.hour
                )));
            }
            if !check_value(record.weekday) || !check_value(record.weekend) {
                return Err(hourly_error(format!(
                    "row {}: profile values must be finite and non-negative",
                    line + 1
                )));
            }
            if hourly_values
                .insert((record.column, record.hour), (record.weekday, record.weekend))
                .is_some()
            {
                return Err(hourly_error(format!(
                    "duplicate entry for {} hour {}",
                    record.column, record.hour
                )));
            }
        }

        let mut monthly_values: IndexMap<(ScheduleColumn, usize), f64> = Default::default();
        for (line, record) in Reader::from_reader(monthly)
            .deserialize::<MonthlyRecord>()
            .enumerate()
        {
            let record = record.map_err(|e| monthly_error(format!("row {}: {e}", line + 1)))?;
            if !(1..=MONTHS).contains(&record.month) {
                return Err(monthly_error(format!(
                    "row {}: month {} is outside 1-12",
                    line + 1,
                    record.month
                )));
            }
            if !check_value(record.multiplier) {
                return Err(monthly_error(format!(
                    "row {}: multipliers must be finite and non-negative",
                    line + 1
                )));
            }
            if monthly_values
                .insert((record.column, record.month - 1), record.multiplier)
                .is_some()
            {
                return Err(monthly_error(format!(
                    "duplicate entry for {} month {}",
                    record.column, record.month
                )));
            }
        }

        let mut hourly = IndexMap::new();
        let mut monthly = IndexMap::new();
        for column in ScheduleColumn::iter() {
            let mut profile = HourlyProfile {
                weekday: [0.; HOURS],
                weekend: [0.; HOURS],
            };
            for hour in 0..HOURS {
                let (weekday, weekend) =
                    hourly_values.get(&(column, hour)).ok_or_else(|| {
                        hourly_error(format!("missing entry for {column} hour {hour}"))
                    })?;
                profile.weekday[hour] = *weekday;
                profile.weekend[hour] = *weekend;
            }
            hourly.insert(column, profile);

            let mut multipliers = [0.; MONTHS];
            for (month, multiplier) in multipliers.iter_mut().enumerate() {
                *multiplier = *monthly_values.get(&(column, month)).ok_or_else(|| {
                    monthly_error(format!("missing entry for {column} month {}", month + 1))
                })?;
            }
            monthly.insert(column, multipliers);
        }

        Ok(Self { hourly, monthly })
    }

    pub fn value(
        &self,
        column: ScheduleColumn,
        day_type: DayType,
        month_index: usize,
        hour: usize,
    ) -> f64 {
        let profile = &self.hourly[&column];
        let hourly = match day_type {
            DayType::Weekday => profile.weekday[hour],
            DayType::Weekend => profile.weekend[hour],
        };

        hourly * self.monthly[&column][month_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::{BUNDLED_SMOOTH_HOURLY_FILE, BUNDLED_SMOOTH_MONTHLY_FILE};
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::io::Cursor;

    #[fixture]
    fn profiles() -> SmoothProfiles {
        SmoothProfiles::load(
            Cursor::new(BUNDLED_SMOOTH_HOURLY_FILE),
            Cursor::new(BUNDLED_SMOOTH_MONTHLY_FILE),
        )
        .unwrap()
    }

    #[rstest]
    fn should_cover_every_column(profiles: SmoothProfiles) {
        for column in ScheduleColumn::iter() {
            let total = (0..24)
                .map(|hour| profiles.value(column, DayType::Weekday, 0, hour))
                .sum::<f64>();
            assert!(total > 0., "{column} has an empty profile");
        }
    }

    #[rstest]
    fn should_scale_by_monthly_multiplier() {
        let hourly = "column,hour,weekday,weekend\n".to_string()
            + &ScheduleColumn::iter()
                .flat_map(|column| (0..24).map(move |hour| format!("{column},{hour},0.5,0.25\n")))
                .collect::<String>();
        let monthly = "column,month,multiplier\n".to_string()
            + &ScheduleColumn::iter()
                .flat_map(|column| (1..=12).map(move |month| format!("{column},{month},{}\n", month as f64 / 10.)))
                .collect::<String>();
        let profiles = SmoothProfiles::load(Cursor::new(hourly), Cursor::new(monthly)).unwrap();

        assert_eq!(
            profiles.value(ScheduleColumn::LightingExterior, DayType::Weekday, 9, 3),
            0.5
        );
        assert_eq!(
            profiles.value(ScheduleColumn::LightingExterior, DayType::Weekend, 1, 3),
            0.25 * 0.2
        );
    }

    #[rstest]
    fn should_fail_on_incomplete_profiles() {
        let hourly = "column,hour,weekday,weekend\noccupants,0,1,1\n";
        let error = SmoothProfiles::load(
            Cursor::new(hourly),
            Cursor::new(BUNDLED_SMOOTH_MONTHLY_FILE),
        )
        .unwrap_err();
        assert_eq!(error.table, "smooth_hourly_profiles");
        assert!(error.message.contains("missing entry for occupants hour 1"));
    }

    #[rstest]
    fn should_fail_on_unknown_column() {
        let hourly = "column,hour,weekday,weekend\nswimming_pool,0,1,1\n";
        let error = SmoothProfiles::load(
            Cursor::new(hourly),
            Cursor::new(BUNDLED_SMOOTH_MONTHLY_FILE),
        )
        .unwrap_err();
        assert!(error.message.starts_with("row 1"), "{}", error.message);
    }
}
