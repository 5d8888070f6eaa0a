use crate::core::date_range::DateRange;
use crate::core::events::{SamplerSettings, DEFAULT_MAX_PLACEMENT_RETRIES};
use crate::core::export::DEFAULT_DECIMAL_PLACES;
use crate::core::location::CensusRegion;
use crate::core::markov::DEFAULT_PROBABILITY_TOLERANCE;
use crate::core::setpoints::{ConflictPolicy, SetpointSettings, SmoothUnoccupiedColumns};
use crate::core::units::{DEFAULT_SIMULATION_YEAR, MINUTES_PER_HOUR};
use crate::errors::{ConfigurationError, ScheduleError};
use crate::read_weather_file::WeatherHeader;
use serde::{Deserialize, Deserializer};
use serde_valid::Validate;
use std::io::{BufReader, Read};

pub const MAX_DECIMAL_PLACES: usize = 10;

/// A value that may be given explicitly or left to be worked out, written as `"auto"` in the
/// input.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Defaultable<T> {
    #[default]
    Default,
    Value(T),
}

impl<T> Defaultable<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Default => None,
            Self::Value(value) => Some(value),
        }
    }
}

#[derive(Deserialize)]
enum AutoKeyword {
    #[serde(rename = "auto")]
    Auto,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefaultableRepr<T> {
    Auto(AutoKeyword),
    Value(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Defaultable<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match DefaultableRepr::<T>::deserialize(deserializer)? {
            DefaultableRepr::Auto(AutoKeyword::Auto) => Self::Default,
            DefaultableRepr::Value(value) => Self::Value(value),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Occupancy simulated per household with sampled events.
    #[default]
    Stochastic,
    /// Deterministic population-averaged profiles.
    Smooth,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct SetpointInput {
    pub heating_setpoint: f64,
    pub cooling_setpoint: f64,
    #[serde(default)]
    #[validate(minimum = 0.)]
    pub heating_night_offset: f64,
    #[serde(default)]
    #[validate(minimum = 0.)]
    pub heating_unoccupied_offset: f64,
    #[serde(default)]
    #[validate(minimum = 0.)]
    pub cooling_night_offset: f64,
    #[serde(default)]
    #[validate(minimum = 0.)]
    pub cooling_unoccupied_offset: f64,
    #[serde(default)]
    pub heating_season: Defaultable<String>,
    #[serde(default)]
    pub cooling_season: Defaultable<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub write_offset_columns: bool,
    #[serde(default)]
    pub smooth_unoccupied_columns: SmoothUnoccupiedColumns,
}

impl SetpointInput {
    fn resolve(&self) -> Result<SetpointSettings, ConfigurationError> {
        self.validate()
            .map_err(|errors| ConfigurationError::new("setpoints", errors.to_string()))?;
        let season = |value: &Defaultable<String>, field: &str| match value {
            Defaultable::Default => Ok(DateRange::all_year()),
            Defaultable::Value(range) => DateRange::parse(range, field),
        };

        Ok(SetpointSettings {
            heating_setpoint: self.heating_setpoint,
            cooling_setpoint: self.cooling_setpoint,
            heating_night_offset: self.heating_night_offset,
            heating_unoccupied_offset: self.heating_unoccupied_offset,
            cooling_night_offset: self.cooling_night_offset,
            cooling_unoccupied_offset: self.cooling_unoccupied_offset,
            heating_season: season(&self.heating_season, "setpoints.heating_season")?,
            cooling_season: season(&self.cooling_season, "setpoints.cooling_season")?,
            conflict_policy: self.conflict_policy,
            write_offset_columns: self.write_offset_columns,
            smooth_unoccupied_columns: self.smooth_unoccupied_columns,
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct SamplerInput {
    #[serde(default = "default_max_placement_retries")]
    #[validate(maximum = 1000)]
    pub max_placement_retries: usize,
    #[serde(default = "default_probability_tolerance")]
    #[validate(exclusive_minimum = 0.)]
    #[validate(maximum = 0.05)]
    pub probability_tolerance: f64,
}

fn default_max_placement_retries() -> usize {
    DEFAULT_MAX_PLACEMENT_RETRIES
}

fn default_probability_tolerance() -> f64 {
    DEFAULT_PROBABILITY_TOLERANCE
}

impl Default for SamplerInput {
    fn default() -> Self {
        Self {
            max_placement_retries: default_max_placement_retries(),
            probability_tolerance: default_probability_tolerance(),
        }
    }
}

fn default_timestep_minutes() -> u32 {
    MINUTES_PER_HOUR
}

/// The household and run description, as given in the JSON input.
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct ScheduleInput {
    #[serde(default)]
    pub simulation_year: Defaultable<i32>,
    #[serde(default = "default_timestep_minutes")]
    #[validate(minimum = 1)]
    #[validate(maximum = 60)]
    pub timestep_minutes: u32,
    pub number_of_occupants: i64,
    #[serde(default)]
    pub state_code: Defaultable<String>,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub vacancy_period: Option<String>,
    #[serde(default)]
    pub schedules_type: ScheduleType,
    #[serde(default)]
    pub holidays_as_weekends: bool,
    #[serde(default)]
    pub setpoints: Option<SetpointInput>,
    #[serde(default)]
    pub sampler: SamplerInput,
    #[serde(default)]
    pub decimal_places: Defaultable<usize>,
}

/// A fully validated run configuration for one household.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleConfig {
    pub simulation_year: i32,
    pub timestep_minutes: u32,
    pub number_of_occupants: usize,
    pub state_code: Option<String>,
    pub region: Option<CensusRegion>,
    pub random_seed: Option<u64>,
    pub vacancy_period: Option<DateRange>,
    pub schedules_type: ScheduleType,
    pub holidays_as_weekends: bool,
    pub setpoints: Option<SetpointSettings>,
    pub sampler: SamplerSettings,
    pub probability_tolerance: f64,
    pub decimal_places: usize,
}

impl ScheduleInput {
    pub fn init_with_json(json: impl Read) -> Result<Self, ScheduleError> {
        let reader = BufReader::new(json);

        serde_json::from_reader(reader).map_err(|e| ScheduleError::InvalidRequest(e.into()))
    }

    /// Check every value and fill in everything left to `"auto"`, from the weather file where one
    /// is given.
    pub fn resolve(
        &self,
        weather: Option<&WeatherHeader>,
    ) -> Result<ScheduleConfig, ConfigurationError> {
        self.validate()
            .map_err(|errors| ConfigurationError::new("input", errors.to_string()))?;
        self.sampler
            .validate()
            .map_err(|errors| ConfigurationError::new("sampler", errors.to_string()))?;

        let simulation_year = match self.simulation_year {
            Defaultable::Value(year) => year,
            Defaultable::Default => weather
                .and_then(WeatherHeader::actual_year)
                .unwrap_or(DEFAULT_SIMULATION_YEAR),
        };
        if !(1600..=9999).contains(&simulation_year) {
            return Err(ConfigurationError::new(
                "simulation_year",
                format!("{simulation_year} is outside the supported range 1600-9999"),
            ));
        }

        if MINUTES_PER_HOUR % self.timestep_minutes != 0 {
            return Err(ConfigurationError::new(
                "timestep_minutes",
                format!(
                    "{} does not divide an hour evenly; use one of 1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30 or 60",
                    self.timestep_minutes
                ),
            ));
        }

        let number_of_occupants = usize::try_from(self.number_of_occupants).map_err(|_| {
            ConfigurationError::new(
                "number_of_occupants",
                format!("{} is negative", self.number_of_occupants),
            )
        })?;

        let (state_code, region) = match &self.state_code {
            Defaultable::Value(code) => {
                let region = CensusRegion::from_state_code(code).ok_or_else(|| {
                    ConfigurationError::new(
                        "state_code",
                        format!("'{code}' is not a two-letter US state code"),
                    )
                })?;
                (Some(code.to_ascii_uppercase()), Some(region))
            }
            Defaultable::Default => {
                let code = weather.and_then(|weather| weather.state_code.clone());
                let region = code.as_deref().and_then(CensusRegion::from_state_code);
                (code, region)
            }
        };

        let vacancy_period = self
            .vacancy_period
            .as_deref()
            .map(|period| DateRange::parse(period, "vacancy_period"))
            .transpose()?;

        let decimal_places = match self.decimal_places {
            Defaultable::Default => DEFAULT_DECIMAL_PLACES,
            Defaultable::Value(places) if places <= MAX_DECIMAL_PLACES => places,
            Defaultable::Value(places) => {
                return Err(ConfigurationError::new(
                    "decimal_places",
                    format!("{places} is more than the maximum of {MAX_DECIMAL_PLACES}"),
                ))
            }
        };

        Ok(ScheduleConfig {
            simulation_year,
            timestep_minutes: self.timestep_minutes,
            number_of_occupants,
            state_code,
            region,
            random_seed: self.random_seed,
            vacancy_period,
            schedules_type: self.schedules_type,
            holidays_as_weekends: self.holidays_as_weekends,
            setpoints: self
                .setpoints
                .as_ref()
                .map(SetpointInput::resolve)
                .transpose()?,
            sampler: SamplerSettings {
                max_placement_retries: self.sampler.max_placement_retries,
            },
            probability_tolerance: self.sampler.probability_tolerance,
            decimal_places,
        })
    }
}
