use crate::core::location::CensusRegion;
use crate::core::markov::{TransitionModel, DEFAULT_PROBABILITY_TOLERANCE};
use crate::core::smooth::SmoothProfiles;
use crate::core::units::HOURS_PER_DAY;
use crate::errors::DataLoadError;
use crate::simulation_time::DayType;
use csv::Reader;
use indexmap::IndexMap;
use rand::distr::weighted::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

pub const TRANSITIONS_FILE_NAME: &str = "occupancy_transitions.csv";
pub const EVENTS_FILE_NAME: &str = "end_use_events.csv";
pub const DURATIONS_FILE_NAME: &str = "end_use_durations.csv";
pub const START_HOURS_FILE_NAME: &str = "end_use_start_hours.csv";
pub const SMOOTH_HOURLY_FILE_NAME: &str = "smooth_hourly_profiles.csv";
pub const SMOOTH_MONTHLY_FILE_NAME: &str = "smooth_monthly_multipliers.csv";

pub(crate) static BUNDLED_TRANSITIONS_FILE: &str = include_str!("data/occupancy_transitions.csv");
pub(crate) static BUNDLED_EVENTS_FILE: &str = include_str!("data/end_use_events.csv");
pub(crate) static BUNDLED_DURATIONS_FILE: &str = include_str!("data/end_use_durations.csv");
pub(crate) static BUNDLED_START_HOURS_FILE: &str = include_str!("data/end_use_start_hours.csv");
pub(crate) static BUNDLED_SMOOTH_HOURLY_FILE: &str =
    include_str!("data/smooth_hourly_profiles.csv");
pub(crate) static BUNDLED_SMOOTH_MONTHLY_FILE: &str =
    include_str!("data/smooth_monthly_multipliers.csv");

const HOURS: usize = HOURS_PER_DAY as usize;

/// End uses that are modelled as discrete sampled events.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventEndUse {
    CookingRange,
    Dishwasher,
    ClothesWasher,
    ClothesDryer,
    HotWaterDishwasher,
    HotWaterClothesWasher,
    Shower,
    Bath,
    Sink,
}

/// What causes an event of an end use to happen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventTrigger {
    /// Started by an active occupant.
    Occupancy,
    /// Follows on from the end of an event of another end use (e.g. dryer after washer).
    After(EventEndUse),
    /// Happens alongside an event of another end use (e.g. the hot water a dishwasher draws).
    With(EventEndUse),
}

impl EventTrigger {
    pub fn parent(&self) -> Option<EventEndUse> {
        match self {
            Self::Occupancy => None,
            Self::After(parent) | Self::With(parent) => Some(*parent),
        }
    }
}

impl FromStr for EventTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_parent = |parent: &str| {
            EventEndUse::from_str(parent).map_err(|_| format!("unknown end use '{parent}'"))
        };
        match s.split_once(':') {
            None if s == "occupancy" => Ok(Self::Occupancy),
            Some(("after", parent)) => Ok(Self::After(parse_parent(parent)?)),
            Some(("with", parent)) => Ok(Self::With(parse_parent(parent)?)),
            _ => Err(format!(
                "unknown trigger '{s}'; expected 'occupancy', 'after:<end_use>' or 'with:<end_use>'"
            )),
        }
    }
}

/// Event magnitude (W, or gal/min for hot water), normally distributed and clamped to a range.
#[derive(Clone, Copy, Debug)]
pub struct MagnitudeDistribution {
    normal: Normal<f64>,
    min: f64,
    max: f64,
}

impl MagnitudeDistribution {
    pub fn new(mean: f64, std_dev: f64, min: f64, max: f64) -> Result<Self, String> {
        if !(min.is_finite() && max.is_finite()) || min < 0. || min > max {
            return Err(format!("magnitude range [{min}, {max}] is not valid"));
        }
        let normal = Normal::new(mean, std_dev)
            .map_err(|e| format!("magnitude distribution N({mean}, {std_dev}): {e}"))?;

        Ok(Self { normal, min, max })
    }

    pub fn mean(&self) -> f64 {
        self.normal.mean()
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        self.normal.sample(rng).clamp(self.min, self.max)
    }
}

/// Discrete distribution of event durations in whole minutes.
#[derive(Clone, Debug)]
pub struct DurationDistribution {
    durations: Vec<u32>,
    probabilities: Vec<f64>,
    index: WeightedIndex<f64>,
}

impl DurationDistribution {
    pub fn new(outcomes: Vec<(u32, f64)>, tolerance: f64) -> Result<Self, String> {
        if let Some((duration, _)) = outcomes.iter().find(|(duration, _)| *duration == 0) {
            return Err(format!("duration {duration} must be at least one minute"));
        }
        let total = outcomes.iter().map(|(_, p)| p).sum::<f64>();
        if !is_close!(total, 1., abs_tol = tolerance) {
            return Err(format!(
                "duration probabilities sum to {total}, which is not within {tolerance} of 1"
            ));
        }
        let (durations, probabilities): (Vec<u32>, Vec<f64>) = outcomes.into_iter().unzip();
        let index = WeightedIndex::new(&probabilities).map_err(|e| e.to_string())?;

        Ok(Self {
            durations,
            probabilities,
            index,
        })
    }

    pub fn sample(&self, rng: &mut impl Rng) -> u32 {
        self.durations[self.index.sample(rng)]
    }

    pub fn mean(&self) -> f64 {
        let total = self.probabilities.iter().sum::<f64>();
        self.durations
            .iter()
            .zip(self.probabilities.iter())
            .map(|(duration, probability)| *duration as f64 * probability)
            .sum::<f64>()
            / total
    }
}

/// Relative likelihood of an occupancy-triggered event starting in each clock hour.
#[derive(Clone, Debug)]
pub struct StartWeights {
    weekday: [f64; HOURS],
    weekend: [f64; HOURS],
}

impl StartWeights {
    pub fn weight(&self, day_type: DayType, hour: usize) -> f64 {
        match day_type {
            DayType::Weekday => self.weekday[hour],
            DayType::Weekend => self.weekend[hour],
        }
    }
}

/// Everything needed to sample the events of one end use for a household in one region.
#[derive(Clone, Debug)]
pub struct EndUseCalibration {
    pub end_use: EventEndUse,
    pub trigger: EventTrigger,
    pub events_per_year_base: f64,
    pub events_per_year_per_occupant: f64,
    pub follow_probability: f64,
    pub follow_delay_max_minutes: u32,
    pub magnitude: MagnitudeDistribution,
    pub durations: DurationDistribution,
    pub start_weights: Option<StartWeights>,
}

impl EndUseCalibration {
    /// Expected number of events in a full, unvacated year.
    pub fn annual_target(&self, occupant_count: usize) -> f64 {
        self.events_per_year_base + self.events_per_year_per_occupant * occupant_count as f64
    }
}

/// The calibration for every end use, resolved for one region, in an order where every end use
/// comes after the end use it depends on.
#[derive(Clone, Debug)]
pub struct EventCalibrationSet {
    end_uses: IndexMap<EventEndUse, EndUseCalibration>,
}

impl EventCalibrationSet {
    pub fn get(&self, end_use: EventEndUse) -> &EndUseCalibration {
        &self.end_uses[&end_use]
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndUseCalibration> {
        self.end_uses.values()
    }
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    end_use: EventEndUse,
    region: String,
    trigger: String,
    events_per_year_base: f64,
    events_per_year_per_occupant: f64,
    follow_probability: f64,
    follow_delay_max_minutes: u32,
    magnitude_mean: f64,
    magnitude_std_dev: f64,
    magnitude_min: f64,
    magnitude_max: f64,
}

#[derive(Debug, Deserialize)]
struct DurationRecord {
    end_use: EventEndUse,
    duration_minutes: u32,
    probability: f64,
}

#[derive(Debug, Deserialize)]
struct StartHourRecord {
    end_use: EventEndUse,
    hour: usize,
    weekday: f64,
    weekend: f64,
}

#[derive(Clone, Debug)]
struct EventParameters {
    trigger: EventTrigger,
    events_per_year_base: f64,
    events_per_year_per_occupant: f64,
    follow_probability: f64,
    follow_delay_max_minutes: u32,
    magnitude: MagnitudeDistribution,
}

/// All event calibration tables: national rows (`all`), regional overrides, duration distributions
/// and start-hour weights.
#[derive(Clone, Debug)]
pub struct EventCalibrationTables {
    national: IndexMap<EventEndUse, EventParameters>,
    regional: IndexMap<(EventEndUse, CensusRegion), EventParameters>,
    durations: IndexMap<EventEndUse, DurationDistribution>,
    start_weights: IndexMap<EventEndUse, StartWeights>,
    max_probability_deviation: f64,
}

impl EventCalibrationTables {
    pub const EVENTS_TABLE_NAME: &'static str = "end_use_events";
    pub const DURATIONS_TABLE_NAME: &'static str = "end_use_durations";
    pub const START_HOURS_TABLE_NAME: &'static str = "end_use_start_hours";

    pub fn load(
        events: impl Read,
        durations: impl Read,
        start_hours: impl Read,
        tolerance: f64,
    ) -> Result<Self, DataLoadError> {
        let (national, regional) = Self::load_events(events)?;
        let (durations, max_probability_deviation) = Self::load_durations(durations, tolerance)?;
        let start_weights = Self::load_start_hours(start_hours)?;

        let events_error = |message: String| DataLoadError::new(Self::EVENTS_TABLE_NAME, message);
        for end_use in EventEndUse::iter() {
            let parameters = national.get(&end_use).ok_or_else(|| {
                events_error(format!("missing national ('all') row for {end_use}"))
            })?;
            if !durations.contains_key(&end_use) {
                return Err(DataLoadError::new(
                    Self::DURATIONS_TABLE_NAME,
                    format!("missing durations for {end_use}"),
                ));
            }
            for parameters in std::iter::once(parameters).chain(
                regional
                    .iter()
                    .filter(|((regional_end_use, _), _)| *regional_end_use == end_use)
                    .map(|(_, parameters)| parameters),
            ) {
                match parameters.trigger.parent() {
                    None if !start_weights.contains_key(&end_use) => {
                        return Err(DataLoadError::new(
                            Self::START_HOURS_TABLE_NAME,
                            format!("missing start hours for occupancy-triggered end use {end_use}"),
                        ))
                    }
                    None => {}
                    Some(parent) => {
                        let parent_is_occupancy_triggered = national
                            .get(&parent)
                            .is_some_and(|parent| parent.trigger == EventTrigger::Occupancy);
                        if parent == end_use || !parent_is_occupancy_triggered {
                            return Err(events_error(format!(
                                "{end_use} depends on {parent}, which is not an occupancy-triggered end use"
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            national,
            regional,
            durations,
            start_weights,
            max_probability_deviation,
        })
    }

    #[allow(clippy::type_complexity)]
    fn load_events(
        reader: impl Read,
    ) -> Result<
        (
            IndexMap<EventEndUse, EventParameters>,
            IndexMap<(EventEndUse, CensusRegion), EventParameters>,
        ),
        DataLoadError,
    > {
        let error = |message: String| DataLoadError::new(Self::EVENTS_TABLE_NAME, message);
        let mut national = IndexMap::new();
        let mut regional = IndexMap::new();

        for (line, record) in Reader::from_reader(reader)
            .deserialize::<EventRecord>()
            .enumerate()
        {
            let row = line + 1;
            let record = record.map_err(|e| error(format!("row {row}: {e}")))?;
            let trigger = EventTrigger::from_str(&record.trigger)
                .map_err(|message| error(format!("row {row}: {message}")))?;
            if !(0. ..=1.).contains(&record.follow_probability) {
                return Err(error(format!(
                    "row {row}: follow probability {} is outside [0, 1]",
                    record.follow_probability
                )));
            }
            if record.events_per_year_base < 0. || record.events_per_year_per_occupant < 0. {
                return Err(error(format!(
                    "row {row}: annual event counts must not be negative"
                )));
            }
            let magnitude = MagnitudeDistribution::new(
                record.magnitude_mean,
                record.magnitude_std_dev,
                record.magnitude_min,
                record.magnitude_max,
            )
            .map_err(|message| error(format!("row {row}: {message}")))?;
            let parameters = EventParameters {
                trigger,
                events_per_year_base: record.events_per_year_base,
                events_per_year_per_occupant: record.events_per_year_per_occupant,
                follow_probability: record.follow_probability,
                follow_delay_max_minutes: record.follow_delay_max_minutes,
                magnitude,
            };

            let duplicate = match record.region.as_str() {
                "all" => national.insert(record.end_use, parameters).is_some(),
                region => {
                    let region = CensusRegion::from_str(region).map_err(|_| {
                        error(format!("row {row}: unknown region '{region}'"))
                    })?;
                    regional
                        .insert((record.end_use, region), parameters)
                        .is_some()
                }
            };
            if duplicate {
                return Err(error(format!(
                    "duplicate entry for {} in region {}",
                    record.end_use, record.region
                )));
            }
        }

        Ok((national, regional))
    }

    fn load_durations(
        reader: impl Read,
        tolerance: f64,
    ) -> Result<(IndexMap<EventEndUse, DurationDistribution>, f64), DataLoadError> {
        let error = |message: String| DataLoadError::new(Self::DURATIONS_TABLE_NAME, message);
        let mut outcomes: IndexMap<EventEndUse, Vec<(u32, f64)>> = IndexMap::new();
        for (line, record) in Reader::from_reader(reader)
            .deserialize::<DurationRecord>()
            .enumerate()
        {
            let record = record.map_err(|e| error(format!("row {}: {e}", line + 1)))?;
            if !record.probability.is_finite() || record.probability < 0. {
                return Err(error(format!(
                    "row {}: probability {} is not a finite non-negative number",
                    line + 1,
                    record.probability
                )));
            }
            outcomes
                .entry(record.end_use)
                .or_default()
                .push((record.duration_minutes, record.probability));
        }

        let mut max_deviation: f64 = 0.;
        let mut durations = IndexMap::new();
        for (end_use, outcomes) in outcomes {
            max_deviation =
                max_deviation.max((outcomes.iter().map(|(_, p)| p).sum::<f64>() - 1.).abs());
            let distribution = DurationDistribution::new(outcomes, tolerance)
                .map_err(|message| error(format!("{end_use}: {message}")))?;
            durations.insert(end_use, distribution);
        }

        Ok((durations, max_deviation))
    }

    fn load_start_hours(
        reader: impl Read,
    ) -> Result<IndexMap<EventEndUse, StartWeights>, DataLoadError> {
        let error = |message: String| DataLoadError::new(Self::START_HOURS_TABLE_NAME, message);
        let mut values: IndexMap<EventEndUse, Vec<Option<(f64, f64)>>> = IndexMap::new();
        for (line, record) in Reader::from_reader(reader)
            .deserialize::<StartHourRecord>()
            .enumerate()
        {
            let record = record.map_err(|e| error(format!("row {}: {e}", line + 1)))?;
            if record.hour >= HOURS {
                return Err(error(format!(
                    "row {}: hour {} is outside 0-23",
                    line + 1,
                    record.hour
                )));
            }
            let valid = |weight: f64| weight.is_finite() && weight >= 0.;
            if !valid(record.weekday) || !valid(record.weekend) {
                return Err(error(format!(
                    "row {}: start weights must be finite and non-negative",
                    line + 1
                )));
            }
            let hours = values
                .entry(record.end_use)
                .or_insert_with(|| vec![None; HOURS]);
            if hours[record.hour]
                .replace((record.weekday, record.weekend))
                .is_some()
            {
                return Err(error(format!(
                    "duplicate entry for {} hour {}",
                    record.end_use, record.hour
                )));
            }
        }

        values
            .into_iter()
            .map(|(end_use, hours)| {
                let mut weights = StartWeights {
                    weekday: [0.; HOURS],
                    weekend: [0.; HOURS],
                };
                for (hour, value) in hours.into_iter().enumerate() {
                    let (weekday, weekend) = value.ok_or_else(|| {
                        error(format!("missing entry for {end_use} hour {hour}"))
                    })?;
                    weights.weekday[hour] = weekday;
                    weights.weekend[hour] = weekend;
                }
                Ok((end_use, weights))
            })
            .collect()
    }

    /// The furthest any duration distribution was from summing to exactly one.
    pub fn max_probability_deviation(&self) -> f64 {
        self.max_probability_deviation
    }

    /// Resolve the tables for a region: regional rows replace national ones where present.
    pub fn for_region(&self, region: Option<CensusRegion>) -> EventCalibrationSet {
        let parameters_for = |end_use: EventEndUse| {
            region
                .and_then(|region| self.regional.get(&(end_use, region)))
                .unwrap_or(&self.national[&end_use])
        };

        let (independent, dependent): (Vec<_>, Vec<_>) = EventEndUse::iter()
            .partition(|end_use| parameters_for(*end_use).trigger == EventTrigger::Occupancy);
        let end_uses = independent
            .into_iter()
            .chain(dependent)
            .map(|end_use| {
                let parameters = parameters_for(end_use);
                let calibration = EndUseCalibration {
                    end_use,
                    trigger: parameters.trigger,
                    events_per_year_base: parameters.events_per_year_base,
                    events_per_year_per_occupant: parameters.events_per_year_per_occupant,
                    follow_probability: parameters.follow_probability,
                    follow_delay_max_minutes: parameters.follow_delay_max_minutes,
                    magnitude: parameters.magnitude,
                    durations: self.durations[&end_use].clone(),
                    start_weights: self.start_weights.get(&end_use).cloned(),
                };
                (end_use, calibration)
            })
            .collect();

        EventCalibrationSet { end_uses }
    }
}

/// Every calibration table a run needs. Loaded once and shared read-only between households.
#[derive(Clone, Debug)]
pub struct CalibrationResources {
    pub transitions: TransitionModel,
    pub events: EventCalibrationTables,
    pub smooth: SmoothProfiles,
}

static BUNDLED_RESOURCES: LazyLock<Result<CalibrationResources, DataLoadError>> =
    LazyLock::new(|| {
        CalibrationResources::load_from_readers(
            Cursor::new(BUNDLED_TRANSITIONS_FILE),
            Cursor::new(BUNDLED_EVENTS_FILE),
            Cursor::new(BUNDLED_DURATIONS_FILE),
            Cursor::new(BUNDLED_START_HOURS_FILE),
            Cursor::new(BUNDLED_SMOOTH_HOURLY_FILE),
            Cursor::new(BUNDLED_SMOOTH_MONTHLY_FILE),
            DEFAULT_PROBABILITY_TOLERANCE,
        )
    });

impl CalibrationResources {
    /// The tables compiled into the crate.
    pub fn bundled() -> Result<&'static Self, DataLoadError> {
        BUNDLED_RESOURCES.as_ref().map_err(Clone::clone)
    }

    /// Load tables from a directory holding files with the same names and layout as the bundled
    /// ones.
    pub fn load_from_directory(directory: &Path, tolerance: f64) -> Result<Self, DataLoadError> {
        let open = |file_name: &str| {
            File::open(directory.join(file_name))
                .map(BufReader::new)
                .map_err(|e| {
                    DataLoadError::new(
                        file_name.trim_end_matches(".csv"),
                        format!("could not open {}: {e}", directory.join(file_name).display()),
                    )
                })
        };

        Self::load_from_readers(
            open(TRANSITIONS_FILE_NAME)?,
            open(EVENTS_FILE_NAME)?,
            open(DURATIONS_FILE_NAME)?,
            open(START_HOURS_FILE_NAME)?,
            open(SMOOTH_HOURLY_FILE_NAME)?,
            open(SMOOTH_MONTHLY_FILE_NAME)?,
            tolerance,
        )
    }

    pub fn load_from_readers(
        transitions: impl Read,
        events: impl Read,
        durations: impl Read,
        start_hours: impl Read,
        smooth_hourly: impl Read,
        smooth_monthly: impl Read,
        tolerance: f64,
    ) -> Result<Self, DataLoadError> {
        Ok(Self {
            transitions: TransitionModel::load(transitions, tolerance)?,
            events: EventCalibrationTables::load(events, durations, start_hours, tolerance)?,
            smooth: SmoothProfiles::load(smooth_hourly, smooth_monthly)?,
        })
    }

    /// Check the loaded tables against a (possibly stricter) per-run probability tolerance.
    pub fn check_tolerance(&self, tolerance: f64) -> Result<(), DataLoadError> {
        if self.transitions.max_row_deviation() > tolerance {
            return Err(DataLoadError::new(
                TransitionModel::TABLE_NAME,
                format!(
                    "a row sums to within {} of 1, outside the requested tolerance {tolerance}",
                    self.transitions.max_row_deviation()
                ),
            ));
        }
        if self.events.max_probability_deviation() > tolerance {
            return Err(DataLoadError::new(
                EventCalibrationTables::DURATIONS_TABLE_NAME,
                format!(
                    "a distribution sums to within {} of 1, outside the requested tolerance {tolerance}",
                    self.events.max_probability_deviation()
                ),
            ));
        }

        Ok(())
    }
}
