use crate::errors::ConfigurationError;
use crate::simulation_time::SimulationCalendar;
use chrono::{Datelike, Month, NaiveDate};
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        // validated against a leap year so that 29th February is accepted
        NaiveDate::from_ymd_opt(2000, month, day).map(|_| Self { month, day })
    }

    fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

/// An inclusive range of days in the year given by month and day, e.g. "Dec 15 - Jan 15".
/// A range whose end precedes its beginning wraps across the end of the year.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DateRange {
    begin: MonthDay,
    end: MonthDay,
}

impl DateRange {
    pub fn new(begin: MonthDay, end: MonthDay) -> Self {
        Self { begin, end }
    }

    pub fn all_year() -> Self {
        Self {
            begin: MonthDay { month: 1, day: 1 },
            end: MonthDay { month: 12, day: 31 },
        }
    }

    /// Parse a range such as "Dec 15 - Jan 15" or "October 1 - May 31". The field name is only
    /// used to report a failure.
    pub fn parse(value: &str, field: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| {
            ConfigurationError::new(
                field,
                format!("'{value}' is not a valid date range ({reason}); expected a form like 'Dec 15 - Jan 15'"),
            )
        };

        let (begin, end) = value
            .split_once('-')
            .ok_or_else(|| invalid("missing '-' separator"))?;
        let parse_month_day = |text: &str| -> Result<MonthDay, ConfigurationError> {
            let mut parts = text.split_whitespace();
            let (Some(month), Some(day), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(invalid("each side needs a month and a day"));
            };
            let month = month
                .parse::<Month>()
                .map_err(|_| invalid(&format!("unknown month '{month}'")))?;
            let day = day
                .parse::<u32>()
                .map_err(|_| invalid(&format!("'{day}' is not a day of the month")))?;
            MonthDay::new(month.number_from_month(), day)
                .ok_or_else(|| invalid(&format!("{} has no day {day}", month.name())))
        };

        Ok(Self {
            begin: parse_month_day(begin)?,
            end: parse_month_day(end)?,
        })
    }

    pub fn wraps_year(&self) -> bool {
        self.end < self.begin
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        let month_day = MonthDay::of(date);
        if self.wraps_year() {
            month_day >= self.begin || month_day <= self.end
        } else {
            month_day >= self.begin && month_day <= self.end
        }
    }

    /// Which days of the simulated year fall inside this range.
    pub fn day_mask(&self, calendar: &SimulationCalendar) -> Vec<bool> {
        (0..calendar.days_in_year())
            .map(|day| self.contains(calendar.date(day)))
            .collect()
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let month_name = |month: u32| {
            Month::try_from(month as u8)
                .map(|month| &month.name()[..3])
                .unwrap_or("???")
        };
        write!(
            f,
            "{} {} - {} {}",
            month_name(self.begin.month),
            self.begin.day,
            month_name(self.end.month),
            self.end.day
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2007, month, day).unwrap()
    }

    #[rstest]
    fn should_parse_wrapping_range() {
        let range = DateRange::parse("Dec 15 - Jan 15", "vacancy_period").unwrap();
        assert!(range.wraps_year());
        assert!(range.contains(date(12, 15)));
        assert!(range.contains(date(12, 31)));
        assert!(range.contains(date(1, 1)));
        assert!(range.contains(date(1, 15)));
        assert!(!range.contains(date(1, 16)));
        assert!(!range.contains(date(12, 14)));
        assert_eq!(range.to_string(), "Dec 15 - Jan 15");
    }

    #[rstest]
    #[case("Jun 1 - Aug 31")]
    #[case("june 1-august 31")]
    #[case("June 1 -   Aug 31")]
    fn should_parse_ranges_leniently(#[case] value: &str) {
        let range = DateRange::parse(value, "cooling_season").unwrap();
        assert!(!range.wraps_year());
        assert_eq!(
            range,
            DateRange::new(MonthDay::new(6, 1).unwrap(), MonthDay::new(8, 31).unwrap())
        );
    }

    #[rstest]
    fn should_handle_single_day_range() {
        let range = DateRange::parse("Jul 4 - Jul 4", "vacancy_period").unwrap();
        assert!(range.contains(date(7, 4)));
        assert!(!range.contains(date(7, 5)));
        assert!(!range.contains(date(7, 3)));
    }

    #[rstest]
    #[case("")]
    #[case("Dec 15")]
    #[case("Foo 1 - Jan 2")]
    #[case("Feb 30 - Mar 1")]
    #[case("Dec fifteen - Jan 15")]
    #[case("Dec 15 2007 - Jan 15")]
    fn should_reject_unparseable_ranges(#[case] value: &str) {
        let error = DateRange::parse(value, "vacancy_period").unwrap_err();
        assert_eq!(error.field, "vacancy_period");
    }

    #[rstest]
    fn should_accept_leap_day() {
        assert!(DateRange::parse("Feb 29 - Mar 1", "vacancy_period").is_ok());
    }

    #[rstest]
    fn should_build_day_mask_over_year_end() {
        let calendar = SimulationCalendar::new(2007, false).unwrap();
        let mask = DateRange::parse("Dec 15 - Jan 15", "vacancy_period")
            .unwrap()
            .day_mask(&calendar);
        assert_eq!(mask.len(), 365);
        assert_eq!(mask.iter().filter(|vacant| **vacant).count(), 15 + 17);
        assert!(mask[0] && mask[14] && !mask[15]);
        assert!(mask[348] && !mask[347]);
    }
}
