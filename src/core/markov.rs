use crate::errors::DataLoadError;
use crate::simulation_time::DayType;
use csv::Reader;
use indexmap::IndexMap;
use rand::Rng;
use serde::Deserialize;
use std::io::Read;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter};

/// The time-of-day bins the transition tables are tabulated in (hourly).
pub const TIME_BINS_PER_DAY: usize = 24;
pub const DEFAULT_PROBABILITY_TOLERANCE: f64 = 1e-3;

const STATIONARY_MAX_ITERATIONS: usize = 1000;
const STATIONARY_CONVERGENCE: f64 = 1e-12;

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumCountMacro, EnumIter, Eq, Hash, PartialEq,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OccupantState {
    Sleeping,
    Active,
    Away,
}

impl OccupantState {
    const ALL: [OccupantState; OccupantState::COUNT] = [Self::Sleeping, Self::Active, Self::Away];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn is_home(self) -> bool {
        !matches!(self, Self::Away)
    }
}

/// A discrete distribution over the next occupant state, held as a cumulative distribution so that
/// a single uniform draw picks the next state.
#[derive(Clone, Debug, PartialEq)]
pub struct NextStateDistribution {
    cumulative: [f64; OccupantState::COUNT],
}

impl NextStateDistribution {
    pub fn from_probabilities(
        probabilities: [f64; OccupantState::COUNT],
        tolerance: f64,
    ) -> Result<Self, String> {
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.) {
            return Err(format!("probability {bad} is not a finite non-negative number"));
        }
        let total = probabilities.iter().sum::<f64>();
        if !is_close!(total, 1., abs_tol = tolerance) {
            return Err(format!(
                "probabilities sum to {total}, which is not within {tolerance} of 1"
            ));
        }

        let mut cumulative = [0.; OccupantState::COUNT];
        let mut running_total = 0.;
        for (i, probability) in probabilities.iter().enumerate() {
            running_total += probability / total;
            cumulative[i] = running_total;
        }
        cumulative[OccupantState::COUNT - 1] = 1.;

        Ok(Self { cumulative })
    }

    /// Inverse-CDF lookup for a uniform draw in [0, 1).
    pub fn sample(&self, uniform_draw: f64) -> OccupantState {
        let idx = self.cumulative.partition_point(|&c| c <= uniform_draw);
        OccupantState::ALL[idx.min(OccupantState::COUNT - 1)]
    }

    pub fn probability(&self, state: OccupantState) -> f64 {
        let idx = state.index();
        match idx {
            0 => self.cumulative[0],
            _ => self.cumulative[idx] - self.cumulative[idx - 1],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransitionRecord {
    occupants: usize,
    day_type: DayType,
    hour: usize,
    current_state: OccupantState,
    sleeping: f64,
    active: f64,
    away: f64,
}

/// Transition tables for one household-size bucket and day type: a distribution over the next state
/// for every hourly bin and current state.
#[derive(Clone, Debug)]
struct TransitionTable {
    bins: Vec<[NextStateDistribution; OccupantState::COUNT]>,
}

/// Time-inhomogeneous Markov chain over occupant activity states, tabulated by household size
/// (bucketed, with the largest bucket standing for "that many or more"), day type and hour of day.
#[derive(Clone, Debug)]
pub struct TransitionModel {
    tables: IndexMap<(usize, DayType), TransitionTable>,
    max_bucket: usize,
    max_row_deviation: f64,
}

impl TransitionModel {
    pub const TABLE_NAME: &'static str = "occupancy_transitions";

    pub fn load(reader: impl Read, tolerance: f64) -> Result<Self, DataLoadError> {
        let error = |message: String| DataLoadError::new(Self::TABLE_NAME, message);

        let mut entries: IndexMap<(usize, DayType, usize, OccupantState), NextStateDistribution> =
            Default::default();
        let mut max_row_deviation: f64 = 0.;
        let mut csv_reader = Reader::from_reader(reader);
        for (line, record) in csv_reader.deserialize::<TransitionRecord>().enumerate() {
            let record = record.map_err(|e| error(format!("row {}: {e}", line + 1)))?;
            if record.occupants == 0 {
                return Err(error(format!(
                    "row {}: household size buckets start at 1 occupant",
                    line + 1
                )));
            }
            if record.hour >= TIME_BINS_PER_DAY {
                return Err(error(format!(
                    "row {}: hour {} is outside 0-23",
                    line + 1,
                    record.hour
                )));
            }
            let distribution = NextStateDistribution::from_probabilities(
                [record.sleeping, record.active, record.away],
                tolerance,
            )
            .map_err(|message| {
                error(format!(
                    "{} occupants, {}, hour {}, from {}: {message}",
                    record.occupants, record.day_type, record.hour, record.current_state
                ))
            })?;
            max_row_deviation = max_row_deviation
                .max((record.sleeping + record.active + record.away - 1.).abs());
            let key = (
                record.occupants,
                record.day_type,
                record.hour,
                record.current_state,
            );
            if entries.insert(key, distribution).is_some() {
                return Err(error(format!(
                    "duplicate entry for {} occupants, {}, hour {}, from {}",
                    key.0, key.1, key.2, key.3
                )));
            }
        }

        let max_bucket = entries
            .keys()
            .map(|(bucket, ..)| *bucket)
            .max()
            .ok_or_else(|| error("the table has no rows".to_string()))?;

        let mut tables: IndexMap<(usize, DayType), TransitionTable> = Default::default();
        for bucket in 1..=max_bucket {
            for day_type in DayType::iter() {
                let bins = (0..TIME_BINS_PER_DAY)
                    .map(|hour| {
                        let mut row = Vec::with_capacity(OccupantState::COUNT);
                        for state in OccupantState::iter() {
                            let distribution = entries
                                .get(&(bucket, day_type, hour, state))
                                .ok_or_else(|| {
                                    error(format!(
                                        "missing entry for {bucket} occupants, {day_type}, hour {hour}, from {state}"
                                    ))
                                })?;
                            row.push(distribution.clone());
                        }
                        row.try_into().map_err(|_| {
                            error("could not assemble a transition table row".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                tables.insert((bucket, day_type), TransitionTable { bins });
            }
        }

        Ok(Self {
            tables,
            max_bucket,
            max_row_deviation,
        })
    }

    pub fn max_bucket(&self) -> usize {
        self.max_bucket
    }

    /// The furthest any row of the loaded table was from summing to exactly one.
    pub fn max_row_deviation(&self) -> f64 {
        self.max_row_deviation
    }

    /// The table bucket used for a household of the given size; households larger than the largest
    /// tabulated bucket reuse it.
    pub fn occupant_bucket(&self, occupant_count: usize) -> usize {
        occupant_count.clamp(1, self.max_bucket)
    }

    pub fn distribution(
        &self,
        occupant_count: usize,
        day_type: DayType,
        time_bin: usize,
        current_state: OccupantState,
    ) -> &NextStateDistribution {
        &self.tables[&(self.occupant_bucket(occupant_count), day_type)].bins
            [time_bin % TIME_BINS_PER_DAY][current_state.index()]
    }

    pub fn sample_next_state(
        &self,
        current_state: OccupantState,
        day_type: DayType,
        time_bin: usize,
        occupant_count: usize,
        rng: &mut impl Rng,
    ) -> OccupantState {
        let uniform_draw = rng.random::<f64>();
        self.distribution(occupant_count, day_type, time_bin, current_state)
            .sample(uniform_draw)
    }

    /// The distribution the chain would settle into if the given bin's transitions applied forever,
    /// found by power iteration.
    pub fn stationary_distribution(
        &self,
        occupant_count: usize,
        day_type: DayType,
        time_bin: usize,
    ) -> [f64; OccupantState::COUNT] {
        let mut distribution = [1. / OccupantState::COUNT as f64; OccupantState::COUNT];
        for _ in 0..STATIONARY_MAX_ITERATIONS {
            let mut next = [0.; OccupantState::COUNT];
            for from in OccupantState::iter() {
                let row = self.distribution(occupant_count, day_type, time_bin, from);
                for to in OccupantState::iter() {
                    next[to.index()] += distribution[from.index()] * row.probability(to);
                }
            }
            let change = next
                .iter()
                .zip(distribution.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0., f64::max);
            distribution = next;
            if change < STATIONARY_CONVERGENCE {
                break;
            }
        }

        distribution
    }

    pub fn sample_initial_state(
        &self,
        occupant_count: usize,
        day_type: DayType,
        time_bin: usize,
        rng: &mut impl Rng,
    ) -> OccupantState {
        let stationary = self.stationary_distribution(occupant_count, day_type, time_bin);
        // the stationary distribution of a valid table always sums to one
        match NextStateDistribution::from_probabilities(stationary, DEFAULT_PROBABILITY_TOLERANCE) {
            Ok(distribution) => distribution.sample(rng.random::<f64>()),
            Err(_) => OccupantState::Sleeping,
        }
    }
}
