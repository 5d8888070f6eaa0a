use crate::core::aggregate::{stamp_interval, ScheduleSet};
use crate::core::date_range::DateRange;
use crate::core::occupancy::OccupancySeries;
use crate::core::units::{
    COOLING_SETPOINT_OFF_SEASON_F, HEATING_SETPOINT_OFF_SEASON_F, MINUTES_PER_DAY,
    MINUTES_PER_HOUR, NATIVE_STEPS_PER_DAY, NATIVE_STEP_MINUTES,
};
use crate::simulation_time::{SimulationCalendar, SimulationTime};
use serde::Deserialize;
use strum_macros::Display;
use tracing::warn;

/// Clock hours counted as night for smooth schedules: 22:00 up to (not including) 07:00.
pub const SMOOTH_NIGHT_START_HOUR: u32 = 22;
pub const SMOOTH_NIGHT_END_HOUR: u32 = 7;

/// What to do when the heating setpoint ends up above the cooling setpoint while both are in
/// season.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictPolicy {
    /// Set both to their mean.
    #[default]
    Average,
    /// Write the values as configured.
    Keep,
}

/// Whether smooth schedules carry unoccupied-offset columns (always zero, since nobody is ever
/// away in a smooth schedule) when offset columns are written.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SmoothUnoccupiedColumns {
    #[default]
    Absent,
    Zero,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetpointSettings {
    pub heating_setpoint: f64,
    pub cooling_setpoint: f64,
    pub heating_night_offset: f64,
    pub heating_unoccupied_offset: f64,
    pub cooling_night_offset: f64,
    pub cooling_unoccupied_offset: f64,
    pub heating_season: DateRange,
    pub cooling_season: DateRange,
    pub conflict_policy: ConflictPolicy,
    pub write_offset_columns: bool,
    pub smooth_unoccupied_columns: SmoothUnoccupiedColumns,
}

/// Where night and unoccupied periods come from.
#[derive(Clone, Copy, Debug)]
pub enum SetpointMode<'a> {
    /// Fixed clock-hour nights, never unoccupied.
    Smooth,
    /// Nights when everyone at home sleeps, unoccupied when nobody is home.
    Stochastic(&'a OccupancySeries),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetpointSeries {
    pub heating: Vec<f64>,
    pub cooling: Vec<f64>,
    pub heating_night_offset: Vec<f64>,
    pub heating_unoccupied_offset: Option<Vec<f64>>,
    pub cooling_night_offset: Vec<f64>,
    pub cooling_unoccupied_offset: Option<Vec<f64>>,
    /// Output steps where heating exceeded cooling with both in season.
    pub conflicts: usize,
}

impl SetpointSeries {
    pub fn into_schedules(self, step_minutes: u32, write_offset_columns: bool) -> ScheduleSet {
        let mut schedules = ScheduleSet::new(step_minutes);
        schedules.insert("heating_setpoint", self.heating);
        schedules.insert("cooling_setpoint", self.cooling);
        if write_offset_columns {
            schedules.insert("heating_night_offset", self.heating_night_offset);
            if let Some(values) = self.heating_unoccupied_offset {
                schedules.insert("heating_unoccupied_offset", values);
            }
            schedules.insert("cooling_night_offset", self.cooling_night_offset);
            if let Some(values) = self.cooling_unoccupied_offset {
                schedules.insert("cooling_unoccupied_offset", values);
            }
        }
        schedules
    }
}

/// Builds heating and cooling setpoint series at the output timestep.
#[derive(Debug)]
pub struct SetpointSynthesizer<'a> {
    calendar: &'a SimulationCalendar,
    simulation_time: SimulationTime,
    settings: &'a SetpointSettings,
}

impl<'a> SetpointSynthesizer<'a> {
    pub fn new(
        calendar: &'a SimulationCalendar,
        simulation_time: SimulationTime,
        settings: &'a SetpointSettings,
    ) -> Self {
        Self {
            calendar,
            simulation_time,
            settings,
        }
    }

    /// Fraction of each output step that is night.
    fn night_fractions(&self, mode: SetpointMode) -> Vec<f64> {
        let mut fractions = vec![0.; self.simulation_time.total_steps()];
        let step_minutes = self.simulation_time.step_minutes();
        match mode {
            SetpointMode::Smooth => {
                for day in 0..self.calendar.days_in_year() as u32 {
                    let midnight = day * MINUTES_PER_DAY;
                    stamp_interval(
                        &mut fractions,
                        step_minutes,
                        midnight,
                        midnight + SMOOTH_NIGHT_END_HOUR * MINUTES_PER_HOUR,
                        1.,
                    );
                    stamp_interval(
                        &mut fractions,
                        step_minutes,
                        midnight + SMOOTH_NIGHT_START_HOUR * MINUTES_PER_HOUR,
                        midnight + MINUTES_PER_DAY,
                        1.,
                    );
                }
            }
            SetpointMode::Stochastic(occupancy) => {
                self.stamp_native_flags(&mut fractions, |step| occupancy.is_night(step))
            }
        }
        fractions
    }

    /// Fraction of each output step with nobody home.
    fn unoccupied_fractions(&self, mode: SetpointMode) -> Vec<f64> {
        let mut fractions = vec![0.; self.simulation_time.total_steps()];
        if let SetpointMode::Stochastic(occupancy) = mode {
            self.stamp_native_flags(&mut fractions, |step| occupancy.is_unoccupied(step));
        }
        fractions
    }

    fn stamp_native_flags(&self, fractions: &mut [f64], flag: impl Fn(usize) -> bool) {
        let step_minutes = self.simulation_time.step_minutes();
        for step in 0..self.calendar.days_in_year() * NATIVE_STEPS_PER_DAY {
            if flag(step) {
                let start = step as u32 * NATIVE_STEP_MINUTES;
                stamp_interval(fractions, step_minutes, start, start + NATIVE_STEP_MINUTES, 1.);
            }
        }
    }

    pub fn synthesize(&self, mode: SetpointMode) -> SetpointSeries {
        let settings = self.settings;
        let night = self.night_fractions(mode);
        let unoccupied = self.unoccupied_fractions(mode);
        let heating_days = settings.heating_season.day_mask(self.calendar);
        let cooling_days = settings.cooling_season.day_mask(self.calendar);

        let total_steps = self.simulation_time.total_steps();
        let mut series = SetpointSeries {
            heating: Vec::with_capacity(total_steps),
            cooling: Vec::with_capacity(total_steps),
            heating_night_offset: Vec::with_capacity(total_steps),
            heating_unoccupied_offset: Some(Vec::with_capacity(total_steps)),
            cooling_night_offset: Vec::with_capacity(total_steps),
            cooling_unoccupied_offset: Some(Vec::with_capacity(total_steps)),
            conflicts: 0,
        };
        let mut heating_unoccupied = Vec::with_capacity(total_steps);
        let mut cooling_unoccupied = Vec::with_capacity(total_steps);

        for step in self.simulation_time.iter() {
            let (i, day) = (step.index, step.day());
            let (heating_on, cooling_on) = (heating_days[day], cooling_days[day]);

            let heating_night = if heating_on {
                settings.heating_night_offset * night[i]
            } else {
                0.
            };
            let heating_away = if heating_on {
                settings.heating_unoccupied_offset * unoccupied[i]
            } else {
                0.
            };
            let cooling_night = if cooling_on {
                settings.cooling_night_offset * night[i]
            } else {
                0.
            };
            let cooling_away = if cooling_on {
                settings.cooling_unoccupied_offset * unoccupied[i]
            } else {
                0.
            };

            let mut heating = if heating_on {
                settings.heating_setpoint - heating_night - heating_away
            } else {
                HEATING_SETPOINT_OFF_SEASON_F
            };
            let mut cooling = if cooling_on {
                settings.cooling_setpoint + cooling_night + cooling_away
            } else {
                COOLING_SETPOINT_OFF_SEASON_F
            };
            if heating_on && cooling_on && heating > cooling {
                series.conflicts += 1;
                if settings.conflict_policy == ConflictPolicy::Average {
                    let mean = (heating + cooling) / 2.;
                    heating = mean;
                    cooling = mean;
                }
            }

            series.heating.push(heating);
            series.cooling.push(cooling);
            series.heating_night_offset.push(heating_night);
            series.cooling_night_offset.push(cooling_night);
            heating_unoccupied.push(heating_away);
            cooling_unoccupied.push(cooling_away);
        }

        let unoccupied_columns = match mode {
            SetpointMode::Stochastic(_) => true,
            SetpointMode::Smooth => {
                settings.smooth_unoccupied_columns == SmoothUnoccupiedColumns::Zero
            }
        };
        series.heating_unoccupied_offset = unoccupied_columns.then_some(heating_unoccupied);
        series.cooling_unoccupied_offset = unoccupied_columns.then_some(cooling_unoccupied);

        if series.conflicts > 0 {
            warn!(
                conflicts = series.conflicts,
                policy = %settings.conflict_policy,
                "Heating setpoint exceeded cooling setpoint while both were in season"
            );
        }

        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::CalibrationResources;
    use crate::core::markov::OccupantState;
    use crate::core::occupancy::ActivitySimulator;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use rstest::*;

    #[fixture]
    fn calendar() -> SimulationCalendar {
        SimulationCalendar::new(2007, false).unwrap()
    }

    #[fixture]
    fn settings() -> SetpointSettings {
        SetpointSettings {
            heating_setpoint: 68.,
            cooling_setpoint: 78.,
            heating_night_offset: 0.,
            heating_unoccupied_offset: 0.,
            cooling_night_offset: 0.,
            cooling_unoccupied_offset: 0.,
            heating_season: DateRange::all_year(),
            cooling_season: DateRange::all_year(),
            conflict_policy: ConflictPolicy::Average,
            write_offset_columns: false,
            smooth_unoccupied_columns: SmoothUnoccupiedColumns::Absent,
        }
    }

    #[rstest]
    fn smooth_night_offset_applies_between_10pm_and_7am(
        calendar: SimulationCalendar,
        mut settings: SetpointSettings,
    ) {
        settings.heating_night_offset = 5.;
        settings.heating_season = DateRange::parse("Oct 1 - Apr 30", "heating_season").unwrap();
        let heating_days = settings.heating_season.day_mask(&calendar);
        let simulation_time = SimulationTime::new(&calendar, 60);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Smooth);

        for step in simulation_time.iter() {
            let hour = step.hour_of_day();
            let expected = match (heating_days[step.day()], !(7..22).contains(&hour)) {
                (false, _) => HEATING_SETPOINT_OFF_SEASON_F,
                (true, true) => 63.,
                (true, false) => 68.,
            };
            assert_eq!(series.heating[step.index], expected, "hour {hour} of day {}", step.day());
            assert_eq!(series.cooling[step.index], 78.);
        }
        assert_eq!(series.heating_unoccupied_offset, None);
    }

    #[rstest]
    fn smooth_night_is_weighted_in_partial_steps(
        calendar: SimulationCalendar,
        mut settings: SetpointSettings,
    ) {
        // steps are clock aligned, so every step is fully day or fully night
        settings.cooling_night_offset = 4.;
        let simulation_time = SimulationTime::new(&calendar, 30);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Smooth);
        assert_eq!(series.cooling[13], 82.);
        assert_eq!(series.cooling[14], 78.);
        assert_eq!(series.cooling[43], 78.);
        assert_eq!(series.cooling[44], 82.);
    }

    #[rstest]
    fn off_season_uses_sentinels(calendar: SimulationCalendar, mut settings: SetpointSettings) {
        settings.heating_season = DateRange::parse("Oct 1 - May 31", "heating_season").unwrap();
        settings.cooling_season = DateRange::parse("Jun 1 - Sep 30", "cooling_season").unwrap();
        let simulation_time = SimulationTime::new(&calendar, 60);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Smooth);

        // 1st January, then 1st July
        assert_eq!(series.heating[0], 68.);
        assert_eq!(series.cooling[0], COOLING_SETPOINT_OFF_SEASON_F);
        assert_eq!(series.heating[181 * 24], HEATING_SETPOINT_OFF_SEASON_F);
        assert_eq!(series.cooling[181 * 24], 78.);
        assert_eq!(series.conflicts, 0);
    }

    #[rstest]
    #[case(ConflictPolicy::Average, 74., 74.)]
    #[case(ConflictPolicy::Keep, 76., 72.)]
    fn conflicting_setpoints_follow_policy(
        calendar: SimulationCalendar,
        mut settings: SetpointSettings,
        #[case] policy: ConflictPolicy,
        #[case] heating: f64,
        #[case] cooling: f64,
    ) {
        settings.heating_setpoint = 76.;
        settings.cooling_setpoint = 72.;
        settings.conflict_policy = policy;
        let simulation_time = SimulationTime::new(&calendar, 60);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Smooth);

        assert_eq!(series.conflicts, 8760);
        assert_eq!(series.heating[100], heating);
        assert_eq!(series.cooling[100], cooling);
    }

    #[rstest]
    fn stochastic_offsets_follow_occupancy(
        calendar: SimulationCalendar,
        mut settings: SetpointSettings,
    ) {
        settings.heating_night_offset = 4.;
        settings.heating_unoccupied_offset = 6.;
        settings.cooling_unoccupied_offset = 3.;
        let resources = CalibrationResources::bundled().unwrap();
        let occupancy = ActivitySimulator::new(&resources.transitions, &calendar, vec![false; 365])
            .simulate(2, &mut Pcg64::seed_from_u64(42));
        let simulation_time = SimulationTime::new(&calendar, 15);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Stochastic(&occupancy));

        let heating_unoccupied = series.heating_unoccupied_offset.as_ref().unwrap();
        for step in 0..simulation_time.total_steps() {
            let everyone_away = occupancy.count_in_state(step, OccupantState::Away) == 2;
            let nobody_active = occupancy.count_in_state(step, OccupantState::Active) == 0;
            let expected = match (everyone_away, nobody_active) {
                (true, _) => 62.,
                (false, true) => 64.,
                (false, false) => 68.,
            };
            assert_eq!(series.heating[step], expected);
            assert_eq!(heating_unoccupied[step], if everyone_away { 6. } else { 0. });
            assert!(series.heating[step] <= series.cooling[step]);
        }
        assert!(series.heating.iter().any(|value| *value == 62.));
        assert!(series.heating.iter().any(|value| *value == 64.));
    }

    #[rstest]
    fn should_emit_offset_columns_when_asked(
        calendar: SimulationCalendar,
        mut settings: SetpointSettings,
    ) {
        settings.smooth_unoccupied_columns = SmoothUnoccupiedColumns::Zero;
        let simulation_time = SimulationTime::new(&calendar, 60);
        let series = SetpointSynthesizer::new(&calendar, simulation_time, &settings)
            .synthesize(SetpointMode::Smooth);
        let schedules = series.clone().into_schedules(60, true);
        assert_eq!(
            schedules.column_names().collect::<Vec<_>>(),
            vec![
                "heating_setpoint",
                "cooling_setpoint",
                "heating_night_offset",
                "heating_unoccupied_offset",
                "cooling_night_offset",
                "cooling_unoccupied_offset"
            ]
        );
        assert!(schedules
            .column("heating_unoccupied_offset")
            .unwrap()
            .iter()
            .all(|value| *value == 0.));
        assert_eq!(series.into_schedules(60, false).len(), 2);
        assert_relative_eq!(schedules.column("heating_setpoint").unwrap()[0], 68.);
    }
}
