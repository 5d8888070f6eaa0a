use crate::core::units::{MINUTES_PER_DAY, MINUTES_PER_HOUR};
use crate::errors::ConfigurationError;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use strum_macros::{Display, EnumIter};

/// Which family of transition tables/start weights applies on a given day.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
}

/// The days of the simulated calendar year, each classified by day type.
#[derive(Clone, Debug)]
pub struct SimulationCalendar {
    year: i32,
    dates: Vec<NaiveDate>,
    day_types: Vec<DayType>,
}

impl SimulationCalendar {
    pub fn new(year: i32, holidays_as_weekends: bool) -> Result<Self, ConfigurationError> {
        let first_day = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| {
            ConfigurationError::new("simulation_year", format!("{year} is not a usable year"))
        })?;
        let dates = first_day
            .iter_days()
            .take_while(|date| date.year() == year)
            .collect::<Vec<_>>();
        let holidays = if holidays_as_weekends {
            federal_holidays(year)
        } else {
            vec![]
        };
        let day_types = dates
            .iter()
            .map(|date| match date.weekday() {
                Weekday::Sat | Weekday::Sun => DayType::Weekend,
                _ if holidays.contains(date) => DayType::Weekend,
                _ => DayType::Weekday,
            })
            .collect();

        Ok(Self {
            year,
            dates,
            day_types,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn is_leap_year(&self) -> bool {
        self.dates.len() == 366
    }

    pub fn days_in_year(&self) -> usize {
        self.dates.len()
    }

    pub fn minutes_in_year(&self) -> u32 {
        self.days_in_year() as u32 * MINUTES_PER_DAY
    }

    pub fn date(&self, day: usize) -> NaiveDate {
        self.dates[day]
    }

    pub fn day_type(&self, day: usize) -> DayType {
        self.day_types[day]
    }

    /// Zero-based month index (0 = January) of the given day of the year.
    pub fn month_index(&self, day: usize) -> usize {
        self.dates[day].month0() as usize
    }
}

/// US federal holidays on their actual (not observed) dates.
fn federal_holidays(year: i32) -> Vec<NaiveDate> {
    let nth_weekday = |month: u32, weekday: Weekday, n: u8| {
        NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
    };
    let last_monday_in_may = nth_weekday(5, Weekday::Mon, 5).or(nth_weekday(5, Weekday::Mon, 4));

    [
        NaiveDate::from_ymd_opt(year, 1, 1),
        last_monday_in_may,
        NaiveDate::from_ymd_opt(year, 7, 4),
        nth_weekday(9, Weekday::Mon, 1),
        nth_weekday(11, Weekday::Thu, 4),
        NaiveDate::from_ymd_opt(year, 12, 25),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// The output time grid: the calendar year divided into fixed steps of whole minutes.
#[derive(Clone, Copy, Debug)]
pub struct SimulationTime {
    step_minutes: u32,
    days: usize,
}

impl SimulationTime {
    pub fn new(calendar: &SimulationCalendar, step_minutes: u32) -> Self {
        Self {
            step_minutes,
            days: calendar.days_in_year(),
        }
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    pub fn steps_per_day(&self) -> usize {
        (MINUTES_PER_DAY / self.step_minutes) as usize
    }

    pub fn total_steps(&self) -> usize {
        self.days * self.steps_per_day()
    }

    pub fn iter(&self) -> SimulationTimeIterator {
        SimulationTimeIterator {
            current_index: 0,
            simulation_time: *self,
        }
    }
}

pub struct SimulationTimeIterator {
    current_index: usize,
    simulation_time: SimulationTime,
}

impl Iterator for SimulationTimeIterator {
    type Item = SimulationTimeIteration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.simulation_time.total_steps() {
            return None;
        }
        let step_minutes = self.simulation_time.step_minutes;
        let iteration = SimulationTimeIteration {
            index: self.current_index,
            start_minute: self.current_index as u32 * step_minutes,
            step_minutes,
        };
        self.current_index += 1;

        Some(iteration)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SimulationTimeIteration {
    pub index: usize,
    /// Minute of the year at which this step starts.
    pub start_minute: u32,
    pub step_minutes: u32,
}

impl SimulationTimeIteration {
    pub fn end_minute(&self) -> u32 {
        self.start_minute + self.step_minutes
    }

    pub fn day(&self) -> usize {
        (self.start_minute / MINUTES_PER_DAY) as usize
    }

    pub fn minute_of_day(&self) -> u32 {
        self.start_minute % MINUTES_PER_DAY
    }

    pub fn hour_of_day(&self) -> u32 {
        self.minute_of_day() / MINUTES_PER_HOUR
    }
}
