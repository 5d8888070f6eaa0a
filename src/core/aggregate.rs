use crate::core::calibration::EventEndUse;
use crate::core::events::EndUseEvent;
use crate::core::markov::OccupantState;
use crate::core::occupancy::OccupancySeries;
use crate::core::smooth::SmoothProfiles;
use crate::core::units::{
    MINUTES_PER_DAY, MINUTES_PER_HOUR, NATIVE_STEPS_PER_DAY, NATIVE_STEPS_PER_HOUR,
    NATIVE_STEP_MINUTES,
};
use crate::simulation_time::{SimulationCalendar, SimulationTime};
use indexmap::IndexMap;
use serde::Deserialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Share of the interior lighting profile that is on regardless of whether anybody is active.
pub const LIGHTING_INTERIOR_BASELINE: f64 = 0.3;
/// Share of miscellaneous plug loads that is on regardless of whether anybody is home.
pub const PLUG_LOADS_OTHER_BASELINE: f64 = 0.5;

/// The end-use columns of the schedule file, in the order they are written.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumIter, EnumString, Eq, Hash, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleColumn {
    Occupants,
    LightingInterior,
    LightingExterior,
    CookingRange,
    PlugLoadsOther,
    PlugLoadsTv,
    Dishwasher,
    ClothesWasher,
    ClothesDryer,
    HotWaterDishwasher,
    HotWaterClothesWasher,
    HotWaterFixtures,
}

impl ScheduleColumn {
    /// Columns that are all zero when nobody lives in the home.
    pub fn is_occupancy_gated(self) -> bool {
        !matches!(
            self,
            Self::LightingInterior | Self::LightingExterior | Self::PlugLoadsOther
        )
    }

    /// The event end uses stamped into this column.
    pub fn event_end_uses(self) -> &'static [EventEndUse] {
        match self {
            Self::CookingRange => &[EventEndUse::CookingRange],
            Self::Dishwasher => &[EventEndUse::Dishwasher],
            Self::ClothesWasher => &[EventEndUse::ClothesWasher],
            Self::ClothesDryer => &[EventEndUse::ClothesDryer],
            Self::HotWaterDishwasher => &[EventEndUse::HotWaterDishwasher],
            Self::HotWaterClothesWasher => &[EventEndUse::HotWaterClothesWasher],
            Self::HotWaterFixtures => &[EventEndUse::Shower, EventEndUse::Bath, EventEndUse::Sink],
            _ => &[],
        }
    }
}

/// Named schedule columns at the output timestep, in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScheduleSet {
    step_minutes: u32,
    columns: IndexMap<String, Vec<f64>>,
}

impl ScheduleSet {
    pub fn new(step_minutes: u32) -> Self {
        Self {
            step_minutes,
            columns: Default::default(),
        }
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.columns.insert(name.into(), values);
    }

    pub fn extend(&mut self, other: ScheduleSet) {
        self.columns.extend(other.columns);
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Add `value` held over [start_minute, end_minute) into the bins of `series`, weighted by how much
/// of each bin the interval covers. Stamping a value over a whole bin adds exactly that value.
pub fn stamp_interval(
    series: &mut [f64],
    bin_minutes: u32,
    start_minute: u32,
    end_minute: u32,
    value: f64,
) {
    if end_minute <= start_minute || series.is_empty() {
        return;
    }
    let first_bin = (start_minute / bin_minutes) as usize;
    let last_bin = (((end_minute - 1) / bin_minutes) as usize).min(series.len() - 1);
    for bin in first_bin..=last_bin {
        let bin_start = bin as u32 * bin_minutes;
        let overlap = end_minute.min(bin_start + bin_minutes) - start_minute.max(bin_start);
        series[bin] += value * overlap as f64 / bin_minutes as f64;
    }
}

/// Divide by the largest value so the peak is 1. All-zero series stay zero.
pub fn normalize_by_peak(values: &mut [f64]) {
    let peak = values.iter().copied().fold(0., f64::max);
    if peak > 0. {
        values.iter_mut().for_each(|value| *value /= peak);
    }
}

/// Turns native-resolution occupancy, sampled events and smooth profiles into output-resolution
/// schedule columns.
#[derive(Debug)]
pub struct Aggregator<'a> {
    calendar: &'a SimulationCalendar,
    smooth: &'a SmoothProfiles,
    simulation_time: SimulationTime,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        calendar: &'a SimulationCalendar,
        smooth: &'a SmoothProfiles,
        simulation_time: SimulationTime,
    ) -> Self {
        Self {
            calendar,
            smooth,
            simulation_time,
        }
    }

    fn empty_series(&self) -> Vec<f64> {
        vec![0.; self.simulation_time.total_steps()]
    }

    /// Stamp a per-native-step quantity onto the output grid.
    fn stamp_native(&self, value_at_step: impl Fn(usize) -> f64) -> Vec<f64> {
        let mut series = self.empty_series();
        let step_minutes = self.simulation_time.step_minutes();
        for step in 0..self.calendar.days_in_year() * NATIVE_STEPS_PER_DAY {
            let start = step as u32 * NATIVE_STEP_MINUTES;
            stamp_interval(
                &mut series,
                step_minutes,
                start,
                start + NATIVE_STEP_MINUTES,
                value_at_step(step),
            );
        }
        series
    }

    /// The smooth profile value of a column at a native step.
    fn smooth_at_native_step(&self, column: ScheduleColumn, step: usize) -> f64 {
        let day = step / NATIVE_STEPS_PER_DAY;
        self.smooth.value(
            column,
            self.calendar.day_type(day),
            self.calendar.month_index(day),
            (step % NATIVE_STEPS_PER_DAY) / NATIVE_STEPS_PER_HOUR,
        )
    }

    fn smooth_series(&self, column: ScheduleColumn) -> Vec<f64> {
        let mut series = self.empty_series();
        let step_minutes = self.simulation_time.step_minutes();
        for day in 0..self.calendar.days_in_year() {
            let day_type = self.calendar.day_type(day);
            let month = self.calendar.month_index(day);
            for hour in 0..24 {
                let start = day as u32 * MINUTES_PER_DAY + hour as u32 * MINUTES_PER_HOUR;
                stamp_interval(
                    &mut series,
                    step_minutes,
                    start,
                    start + MINUTES_PER_HOUR,
                    self.smooth.value(column, day_type, month, hour),
                );
            }
        }
        series
    }

    fn event_series(
        &self,
        column: ScheduleColumn,
        events: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
    ) -> Vec<f64> {
        let mut series = self.empty_series();
        let step_minutes = self.simulation_time.step_minutes();
        for event in column
            .event_end_uses()
            .iter()
            .filter_map(|end_use| events.get(end_use))
            .flatten()
        {
            stamp_interval(
                &mut series,
                step_minutes,
                event.start_minute,
                event.end_minute(),
                event.magnitude,
            );
        }
        series
    }

    /// Occupancy-driven ("stochastic") schedules.
    pub fn aggregate(
        &self,
        occupancy: &OccupancySeries,
        events: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
    ) -> ScheduleSet {
        let home_fraction = |step: usize| {
            occupancy.state_fraction(step, OccupantState::Sleeping)
                + occupancy.state_fraction(step, OccupantState::Active)
        };
        let active_fraction = |step: usize| occupancy.state_fraction(step, OccupantState::Active);

        let mut schedules = ScheduleSet::new(self.simulation_time.step_minutes());
        for column in ScheduleColumn::iter() {
            let mut values = match column {
                ScheduleColumn::Occupants => self.stamp_native(home_fraction),
                ScheduleColumn::LightingInterior => self.stamp_native(|step| {
                    self.smooth_at_native_step(column, step)
                        * (LIGHTING_INTERIOR_BASELINE
                            + (1. - LIGHTING_INTERIOR_BASELINE) * active_fraction(step))
                }),
                ScheduleColumn::LightingExterior => self.smooth_series(column),
                ScheduleColumn::PlugLoadsOther => self.stamp_native(|step| {
                    self.smooth_at_native_step(column, step)
                        * (PLUG_LOADS_OTHER_BASELINE
                            + (1. - PLUG_LOADS_OTHER_BASELINE) * home_fraction(step))
                }),
                ScheduleColumn::PlugLoadsTv => self.stamp_native(|step| {
                    self.smooth_at_native_step(column, step) * active_fraction(step)
                }),
                _ => self.event_series(column, events),
            };
            if column != ScheduleColumn::Occupants {
                normalize_by_peak(&mut values);
            }
            schedules.insert(column.to_string(), values);
        }

        schedules
    }

    /// Deterministic population-averaged ("smooth") schedules. Occupancy-gated columns are zero
    /// on vacant days.
    pub fn aggregate_smooth(&self, occupant_count: usize, vacant_days: &[bool]) -> ScheduleSet {
        let mut schedules = ScheduleSet::new(self.simulation_time.step_minutes());
        for column in ScheduleColumn::iter() {
            let mut values = if occupant_count == 0 && column.is_occupancy_gated() {
                self.empty_series()
            } else {
                self.smooth_series(column)
            };
            if column.is_occupancy_gated() {
                for step in self.simulation_time.iter() {
                    if vacant_days.get(step.day()).copied().unwrap_or(false) {
                        values[step.index] = 0.;
                    }
                }
            }
            match column {
                ScheduleColumn::Occupants => {
                    values.iter_mut().for_each(|value| *value = value.clamp(0., 1.))
                }
                _ => normalize_by_peak(&mut values),
            }
            schedules.insert(column.to_string(), values);
        }

        schedules
    }

    /// Household fractions in each activity state.
    pub fn state_fraction_columns(&self, occupancy: &OccupancySeries) -> ScheduleSet {
        let mut schedules = ScheduleSet::new(self.simulation_time.step_minutes());
        for state in OccupantState::iter() {
            schedules.insert(
                state.to_string(),
                self.stamp_native(|step| occupancy.state_fraction(step, state)),
            );
        }
        schedules
    }
}
