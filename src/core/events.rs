use crate::core::calibration::{EndUseCalibration, EventCalibrationSet, EventEndUse, EventTrigger};
use crate::core::occupancy::OccupancySeries;
use crate::core::units::{MINUTES_PER_DAY, NATIVE_STEPS_PER_DAY, NATIVE_STEPS_PER_HOUR, NATIVE_STEP_MINUTES};
use crate::simulation_time::SimulationCalendar;
use indexmap::IndexMap;
use rand::distr::weighted::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MAX_PLACEMENT_RETRIES: usize = 10;

/// Fixtures one occupant can only use one at a time.
pub const EXCLUSIVE_FIXTURES: [EventEndUse; 2] = [EventEndUse::Shower, EventEndUse::Bath];

/// One use of an appliance or fixture.
#[derive(Clone, Debug, PartialEq)]
pub struct EndUseEvent {
    pub end_use: EventEndUse,
    /// The occupant who started it (or who started the event it follows from).
    pub occupant: Option<usize>,
    /// Minute of the year the event starts at.
    pub start_minute: u32,
    pub duration_minutes: u32,
    /// W for appliances, gal/min for hot water.
    pub magnitude: f64,
}

impl EndUseEvent {
    pub fn end_minute(&self) -> u32 {
        self.start_minute + self.duration_minutes
    }

    pub fn day(&self) -> usize {
        (self.start_minute / MINUTES_PER_DAY) as usize
    }
}

/// An event that could not be placed without overlapping another event of its end use. The event
/// is dropped and the run carries on.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("Dropped a {end_use} event on day {day}: no free slot found after {attempts} attempts")]
pub struct SamplingRetryExhausted {
    pub end_use: EventEndUse,
    pub day: usize,
    pub attempts: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerSettings {
    /// Further attempts after the first before an overlapping event is dropped.
    pub max_placement_retries: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            max_placement_retries: DEFAULT_MAX_PLACEMENT_RETRIES,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SampledEvents {
    pub events: Vec<EndUseEvent>,
    pub warnings: Vec<SamplingRetryExhausted>,
}

/// Half-open minute intervals already taken, by events of one end use or by one occupant's
/// exclusive fixtures.
#[derive(Debug, Default)]
struct PlacedIntervals {
    intervals: BTreeMap<u32, u32>,
}

impl PlacedIntervals {
    /// The end of an interval overlapping [start, end), if there is one. Intervals never overlap
    /// each other, so only the last one starting before `end` can overlap.
    fn conflict(&self, start: u32, end: u32) -> Option<u32> {
        self.intervals
            .range(..end)
            .next_back()
            .and_then(|(_, placed_end)| (*placed_end > start).then_some(*placed_end))
    }

    fn insert(&mut self, start: u32, end: u32) {
        self.intervals.insert(start, end);
    }
}

/// Samples the discrete end-use events of a household from its occupancy and the calibration of
/// its region.
#[derive(Debug)]
pub struct EventSampler<'a> {
    calibration: &'a EventCalibrationSet,
    calendar: &'a SimulationCalendar,
    settings: SamplerSettings,
}

impl<'a> EventSampler<'a> {
    pub fn new(
        calibration: &'a EventCalibrationSet,
        calendar: &'a SimulationCalendar,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            calibration,
            calendar,
            settings,
        }
    }

    /// Sample every end use, parents before the end uses that depend on them.
    pub fn sample_all(
        &self,
        occupancy: &OccupancySeries,
        rng: &mut impl Rng,
    ) -> (
        IndexMap<EventEndUse, Vec<EndUseEvent>>,
        Vec<SamplingRetryExhausted>,
    ) {
        let mut sampled = IndexMap::new();
        let mut warnings = vec![];
        for calibration in self.calibration.iter() {
            let SampledEvents {
                events,
                warnings: end_use_warnings,
            } = self.sample_events(calibration.end_use, occupancy, &sampled, rng);
            debug!(
                end_use = %calibration.end_use,
                count = events.len(),
                dropped = end_use_warnings.len(),
                "Sampled end-use events"
            );
            sampled.insert(calibration.end_use, events);
            warnings.extend(end_use_warnings);
        }

        (sampled, warnings)
    }

    /// Sample the events of one end use, ordered by start and never overlapping each other.
    /// Dependent end uses read their parent's events from `sampled`.
    pub fn sample_events(
        &self,
        end_use: EventEndUse,
        occupancy: &OccupancySeries,
        sampled: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
        rng: &mut impl Rng,
    ) -> SampledEvents {
        if occupancy.occupant_count() == 0 {
            return Default::default();
        }
        let calibration = self.calibration.get(end_use);

        let mut sampled_events = match calibration.trigger {
            EventTrigger::Occupancy => {
                self.sample_occupancy_triggered(calibration, occupancy, sampled, rng)
            }
            EventTrigger::After(parent) | EventTrigger::With(parent) => {
                let parent_events = sampled.get(&parent).map(Vec::as_slice).unwrap_or_default();
                self.sample_dependent(calibration, parent_events, occupancy, rng)
            }
        };
        sampled_events.events.sort_by_key(|event| event.start_minute);

        for warning in &sampled_events.warnings {
            warn!(
                end_use = %warning.end_use,
                day = warning.day,
                attempts = warning.attempts,
                "{warning}"
            );
        }

        sampled_events
    }

    /// Per occupant, the time already taken by exclusive fixtures other than `end_use`. All
    /// empty unless `end_use` is itself an exclusive fixture.
    fn occupant_fixture_intervals(
        &self,
        end_use: EventEndUse,
        occupant_count: usize,
        sampled: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
    ) -> Vec<PlacedIntervals> {
        let mut occupant_placed = (0..occupant_count)
            .map(|_| PlacedIntervals::default())
            .collect::<Vec<_>>();
        if !EXCLUSIVE_FIXTURES.contains(&end_use) {
            return occupant_placed;
        }
        let others = EXCLUSIVE_FIXTURES
            .iter()
            .filter(|fixture| **fixture != end_use)
            .filter_map(|fixture| sampled.get(fixture))
            .flatten();
        for event in others {
            if let Some(placed) = event.occupant.and_then(|o| occupant_placed.get_mut(o)) {
                placed.insert(event.start_minute, event.end_minute());
            }
        }
        occupant_placed
    }

    fn sample_occupancy_triggered(
        &self,
        calibration: &EndUseCalibration,
        occupancy: &OccupancySeries,
        sampled: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
        rng: &mut impl Rng,
    ) -> SampledEvents {
        let mut result = SampledEvents::default();
        let Some(start_weights) = &calibration.start_weights else {
            return result;
        };
        let target = calibration.annual_target(occupancy.occupant_count());
        let mut remaining_days = occupancy.non_vacant_days();
        let mut placed = PlacedIntervals::default();
        let mut occupant_placed = self.occupant_fixture_intervals(
            calibration.end_use,
            occupancy.occupant_count(),
            sampled,
        );
        let attempts = self.settings.max_placement_retries + 1;

        for day in 0..occupancy.days() {
            if occupancy.is_vacant_day(day) {
                continue;
            }
            // spread what is left of the annual target over what is left of the year
            let lambda = (target - result.events.len() as f64) / remaining_days as f64;
            remaining_days -= 1;
            let count = match Poisson::new(lambda) {
                Ok(poisson) => poisson.sample(rng) as usize,
                Err(_) => 0,
            };
            if count == 0 {
                continue;
            }

            let day_type = self.calendar.day_type(day);
            let first_step = day * NATIVE_STEPS_PER_DAY;
            let weights = (0..NATIVE_STEPS_PER_DAY)
                .map(|step| {
                    start_weights.weight(day_type, step / NATIVE_STEPS_PER_HOUR)
                        * occupancy.active_occupants(first_step + step).count() as f64
                })
                .collect::<Vec<_>>();
            let Ok(start_steps) = WeightedIndex::new(&weights) else {
                debug!(end_use = %calibration.end_use, day, "Nobody active to start events");
                continue;
            };

            for _ in 0..count {
                let event = (0..attempts).find_map(|_| {
                    let step = first_step + start_steps.sample(rng);
                    let active = occupancy.active_occupants(step).collect::<Vec<_>>();
                    let occupant = active[rng.random_range(0..active.len())];
                    let start_minute = step as u32 * NATIVE_STEP_MINUTES
                        + rng.random_range(0..NATIVE_STEP_MINUTES);
                    let event = self.build_event(calibration, Some(occupant), start_minute, rng);
                    let (start, end) = (event.start_minute, event.end_minute());
                    (placed.conflict(start, end).is_none()
                        && occupant_placed[occupant].conflict(start, end).is_none())
                    .then_some((occupant, event))
                });
                match event {
                    Some((occupant, event)) => {
                        placed.insert(event.start_minute, event.end_minute());
                        occupant_placed[occupant].insert(event.start_minute, event.end_minute());
                        result.events.push(event);
                    }
                    None => result.warnings.push(SamplingRetryExhausted {
                        end_use: calibration.end_use,
                        day,
                        attempts,
                    }),
                }
            }
        }

        result
    }

    fn sample_dependent(
        &self,
        calibration: &EndUseCalibration,
        parent_events: &[EndUseEvent],
        occupancy: &OccupancySeries,
        rng: &mut impl Rng,
    ) -> SampledEvents {
        let mut result = SampledEvents::default();
        let mut placed = PlacedIntervals::default();
        let attempts = self.settings.max_placement_retries + 1;
        let minutes_in_year = self.calendar.minutes_in_year();

        for parent in parent_events {
            if !rng.random_bool(calibration.follow_probability) {
                continue;
            }
            let anchor = match calibration.trigger {
                EventTrigger::After(_) => parent.end_minute(),
                _ => parent.start_minute,
            };
            let mut start_minute =
                anchor + rng.random_range(0..=calibration.follow_delay_max_minutes);
            let mut event = None;
            for _ in 0..attempts {
                if start_minute >= minutes_in_year {
                    break;
                }
                let candidate =
                    self.build_event(calibration, parent.occupant, start_minute, rng);
                match placed.conflict(candidate.start_minute, candidate.end_minute()) {
                    // shift to the end of the event in the way and try again
                    Some(conflict_end) => start_minute = conflict_end,
                    None => {
                        event = Some(candidate);
                        break;
                    }
                }
            }

            match event {
                Some(event) if occupancy.is_vacant_day(event.day()) => {
                    debug!(end_use = %calibration.end_use, day = event.day(), "Dropped event starting in vacancy");
                }
                Some(event) => {
                    placed.insert(event.start_minute, event.end_minute());
                    result.events.push(event);
                }
                None if start_minute >= minutes_in_year => {}
                None => result.warnings.push(SamplingRetryExhausted {
                    end_use: calibration.end_use,
                    day: (start_minute / MINUTES_PER_DAY) as usize,
                    attempts,
                }),
            }
        }

        result
    }

    /// Draw duration and magnitude for an event starting at the given minute, truncated at the end
    /// of the year.
    fn build_event(
        &self,
        calibration: &EndUseCalibration,
        occupant: Option<usize>,
        start_minute: u32,
        rng: &mut impl Rng,
    ) -> EndUseEvent {
        let duration = calibration
            .durations
            .sample(rng)
            .min(self.calendar.minutes_in_year() - start_minute);

        EndUseEvent {
            end_use: calibration.end_use,
            occupant,
            start_minute,
            duration_minutes: duration,
            magnitude: calibration.magnitude.sample(rng),
        }
    }
}
