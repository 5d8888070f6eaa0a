pub mod core;
pub mod errors;
pub mod input;
pub mod output;
pub mod read_weather_file;
pub mod simulation_time;
pub mod statistics;

#[macro_use]
extern crate is_close;

use crate::core::aggregate::{Aggregator, ScheduleSet};
use crate::core::calibration::{CalibrationResources, EventEndUse};
use crate::core::events::{EndUseEvent, EventSampler, SamplingRetryExhausted};
use crate::core::export::{commit, stage_event_log, stage_schedules, validate_row_count};
use crate::core::occupancy::{ActivitySimulator, OccupancySeries};
use crate::core::setpoints::{SetpointMode, SetpointSynthesizer};
use crate::core::units::MINUTES_PER_HOUR;
pub use crate::errors::{ConfigurationError, DataLoadError, ScheduleError};
use crate::input::{ScheduleConfig, ScheduleInput, ScheduleType};
use crate::output::Output;
use crate::read_weather_file::WeatherHeader;
use crate::simulation_time::{SimulationCalendar, SimulationTime};
use crate::statistics::{summarize, ColumnSummary};
use bitflags::bitflags;
use indexmap::IndexMap;
use rand::SeedableRng;
use rand_mt::Mt64;
use rand_pcg::Pcg64;
use rayon::prelude::*;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

pub const SCHEDULES_LOCATION_KEY: &str = "schedules";
pub const EVENTS_LOCATION_KEY: &str = "events";

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ScheduleFlags: u8 {
        /// Add household `sleeping`, `active` and `away` fraction columns to stochastic schedules.
        const DEBUG_COLUMNS = 0b1;
        /// Write every sampled event to a second CSV.
        const EVENT_LOG = 0b10;
    }
}

/// Everything generated for one household, before anything is written.
#[derive(Clone, Debug)]
pub struct GeneratedSchedules {
    pub schedules: ScheduleSet,
    pub events: IndexMap<EventEndUse, Vec<EndUseEvent>>,
    pub occupancy: Option<OccupancySeries>,
    pub warnings: Vec<SamplingRetryExhausted>,
    pub setpoint_conflicts: usize,
    pub random_seed: u64,
}

/// What a run wrote and a summary of what it generated.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub schedules_path: Option<PathBuf>,
    pub event_log_path: Option<PathBuf>,
    pub rows: usize,
    pub columns: Vec<String>,
    pub event_counts: IndexMap<EventEndUse, usize>,
    pub warnings: Vec<SamplingRetryExhausted>,
    pub setpoint_conflicts: usize,
    pub summaries: IndexMap<String, ColumnSummary>,
    /// The seed the run used, whether given or drawn, so that the run can be repeated.
    pub random_seed: u64,
}

/// Generate the full year of schedules for one household. The same configuration with the same
/// seed always produces the same schedules.
#[instrument(skip_all, fields(occupants = config.number_of_occupants, year = config.simulation_year))]
pub fn generate_schedules(
    config: &ScheduleConfig,
    resources: &CalibrationResources,
    flags: ScheduleFlags,
) -> Result<GeneratedSchedules, ScheduleError> {
    if config.timestep_minutes == 0 || MINUTES_PER_HOUR % config.timestep_minutes != 0 {
        return Err(ConfigurationError::new(
            "timestep_minutes",
            format!("{} does not divide an hour evenly", config.timestep_minutes),
        )
        .into());
    }
    resources.check_tolerance(config.probability_tolerance)?;

    let calendar = SimulationCalendar::new(config.simulation_year, config.holidays_as_weekends)?;
    let simulation_time = SimulationTime::new(&calendar, config.timestep_minutes);
    let vacant_days = match config.vacancy_period {
        Some(period) => period.day_mask(&calendar),
        None => vec![false; calendar.days_in_year()],
    };
    let random_seed = config.random_seed.unwrap_or_else(rand::random);
    let mut rng = Pcg64::seed_from_u64(random_seed);
    debug!(random_seed, schedules_type = ?config.schedules_type, "Generating schedules");

    let aggregator = Aggregator::new(&calendar, &resources.smooth, simulation_time);
    let (mut schedules, events, warnings, occupancy) = match config.schedules_type {
        ScheduleType::Stochastic => {
            let occupancy = ActivitySimulator::new(&resources.transitions, &calendar, vacant_days)
                .simulate(config.number_of_occupants, &mut rng);
            let calibration = resources.events.for_region(config.region);
            let (events, warnings) = EventSampler::new(&calibration, &calendar, config.sampler)
                .sample_all(&occupancy, &mut rng);
            let schedules = aggregator.aggregate(&occupancy, &events);

            (schedules, events, warnings, Some(occupancy))
        }
        ScheduleType::Smooth => (
            aggregator.aggregate_smooth(config.number_of_occupants, &vacant_days),
            IndexMap::new(),
            vec![],
            None,
        ),
    };

    let mut setpoint_conflicts = 0;
    if let Some(settings) = &config.setpoints {
        let mode = match &occupancy {
            Some(occupancy) => SetpointMode::Stochastic(occupancy),
            None => SetpointMode::Smooth,
        };
        let series = SetpointSynthesizer::new(&calendar, simulation_time, settings).synthesize(mode);
        setpoint_conflicts = series.conflicts;
        schedules.extend(
            series.into_schedules(simulation_time.step_minutes(), settings.write_offset_columns),
        );
    }

    if flags.contains(ScheduleFlags::DEBUG_COLUMNS) {
        match &occupancy {
            Some(occupancy) => schedules.extend(aggregator.state_fraction_columns(occupancy)),
            None => warn!("Debug columns are only written for stochastic schedules"),
        }
    }

    validate_row_count(&schedules, simulation_time.total_steps())?;

    Ok(GeneratedSchedules {
        schedules,
        events,
        occupancy,
        warnings,
        setpoint_conflicts,
        random_seed,
    })
}

/// Generate one household's schedules and write them to the output, under
/// [`SCHEDULES_LOCATION_KEY`] (and [`EVENTS_LOCATION_KEY`] for the event log).
pub fn generate_to_output(
    config: &ScheduleConfig,
    resources: &CalibrationResources,
    output: &impl Output,
    flags: ScheduleFlags,
) -> Result<RunResult, ScheduleError> {
    let generated = generate_schedules(config, resources, flags)?;
    let rows = generated
        .schedules
        .columns()
        .next()
        .map_or(0, |(_, values)| values.len());

    // both files are written in full before either is committed
    let schedules_writer = stage_schedules(
        &generated.schedules,
        rows,
        config.decimal_places,
        output,
        SCHEDULES_LOCATION_KEY,
    )?;
    let event_log_writer = if flags.contains(ScheduleFlags::EVENT_LOG) {
        stage_event_log(&generated.events, output, EVENTS_LOCATION_KEY)?
    } else {
        None
    };
    let schedules_path = commit(output, SCHEDULES_LOCATION_KEY, schedules_writer)?;
    let event_log_path = match commit(output, EVENTS_LOCATION_KEY, event_log_writer) {
        Ok(path) => path,
        Err(e) => {
            if let Err(discard_error) = output.discard(SCHEDULES_LOCATION_KEY) {
                warn!("Could not remove schedules after the event log failed: {discard_error}");
            }
            return Err(e);
        }
    };

    let step_minutes = generated.schedules.step_minutes();
    let summaries = generated
        .schedules
        .columns()
        .map(|(name, values)| (name.to_string(), summarize(values, step_minutes)))
        .collect::<IndexMap<_, _>>();
    let event_counts = generated
        .events
        .iter()
        .map(|(end_use, events)| (*end_use, events.len()))
        .collect::<IndexMap<_, _>>();

    info!(
        rows,
        columns = generated.schedules.len(),
        events = event_counts.values().sum::<usize>(),
        dropped_events = generated.warnings.len(),
        setpoint_conflicts = generated.setpoint_conflicts,
        random_seed = generated.random_seed,
        "Schedules generated"
    );

    Ok(RunResult {
        schedules_path,
        event_log_path,
        rows,
        columns: generated
            .schedules
            .column_names()
            .map(str::to_string)
            .collect(),
        event_counts,
        warnings: generated.warnings,
        setpoint_conflicts: generated.setpoint_conflicts,
        summaries,
        random_seed: generated.random_seed,
    })
}

/// Read a JSON household description, resolve it against the weather file header if there is
/// one, then generate and write the schedules.
pub fn run_schedule_generation(
    input: impl Read,
    weather: Option<&WeatherHeader>,
    resources: &CalibrationResources,
    output: &impl Output,
    flags: ScheduleFlags,
) -> Result<RunResult, ScheduleError> {
    let config = ScheduleInput::init_with_json(input)?.resolve(weather)?;

    generate_to_output(&config, resources, output, flags)
}

/// One household of a batch, with the output its files go to.
#[derive(Debug)]
pub struct BatchHousehold<O: Output> {
    pub config: ScheduleConfig,
    pub output: O,
}

/// Generate a batch of independent households in parallel. Households without a seed of their
/// own get one from a stream seeded with `batch_seed`, so a batch with a batch seed is repeatable
/// as a whole.
pub fn run_batch<O: Output>(
    households: &[BatchHousehold<O>],
    resources: &CalibrationResources,
    flags: ScheduleFlags,
    batch_seed: Option<u64>,
) -> Vec<Result<RunResult, ScheduleError>> {
    let mut seeds = batch_seed.map(Mt64::new);
    let configs = households
        .iter()
        .map(|household| {
            let mut config = household.config.clone();
            if config.random_seed.is_none() {
                config.random_seed = seeds.as_mut().map(Mt64::next_u64);
            }
            config
        })
        .collect::<Vec<_>>();

    configs
        .into_par_iter()
        .zip(households.par_iter())
        .map(|(config, household)| {
            generate_to_output(&config, resources, &household.output, flags)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calibration::{
        BUNDLED_DURATIONS_FILE, BUNDLED_EVENTS_FILE, BUNDLED_SMOOTH_HOURLY_FILE,
        BUNDLED_SMOOTH_MONTHLY_FILE, BUNDLED_START_HOURS_FILE, BUNDLED_TRANSITIONS_FILE,
    };
    use crate::core::markov::{TransitionModel, DEFAULT_PROBABILITY_TOLERANCE};
    use crate::output::{FileOutput, MemoryOutput, SinkOutput};
    use pretty_assertions::{assert_eq, assert_ne};
    use rstest::*;
    use serde_json::json;
    use std::fs;
    use std::io::Cursor;

    fn config(value: serde_json::Value) -> ScheduleConfig {
        serde_json::from_value::<ScheduleInput>(value)
            .unwrap()
            .resolve(None)
            .unwrap()
    }

    #[fixture]
    fn resources() -> &'static CalibrationResources {
        CalibrationResources::bundled().unwrap()
    }

    #[rstest]
    fn reported_seed_should_reproduce_the_run(resources: &CalibrationResources) {
        let config = config(json!({"number_of_occupants": 2, "timestep_minutes": 60}));
        assert_eq!(config.random_seed, None);
        let first_output = MemoryOutput::default();
        let first =
            generate_to_output(&config, resources, &first_output, ScheduleFlags::EVENT_LOG)
                .unwrap();

        let mut repeat = config.clone();
        repeat.random_seed = Some(first.random_seed);
        let second_output = MemoryOutput::default();
        generate_to_output(&repeat, resources, &second_output, ScheduleFlags::EVENT_LOG).unwrap();

        assert_eq!(first.rows, 8760);
        for key in [SCHEDULES_LOCATION_KEY, EVENTS_LOCATION_KEY] {
            assert!(first_output.contents(key).is_some());
            assert!(first_output.contents(key) == second_output.contents(key), "{key}");
        }
    }

    #[rstest]
    fn sink_output_should_write_nothing(resources: &CalibrationResources) {
        let config = config(json!({"number_of_occupants": 1, "schedules_type": "smooth"}));
        let result =
            generate_to_output(&config, resources, &SinkOutput, ScheduleFlags::EVENT_LOG).unwrap();
        assert_eq!(result.schedules_path, None);
        assert_eq!(result.event_log_path, None);
    }

    #[rstest]
    fn should_add_debug_columns_and_event_log(resources: &CalibrationResources) {
        let config = config(json!({"number_of_occupants": 2, "random_seed": 7}));
        let output = MemoryOutput::default();
        let result = generate_to_output(
            &config,
            resources,
            &output,
            ScheduleFlags::DEBUG_COLUMNS | ScheduleFlags::EVENT_LOG,
        )
        .unwrap();

        assert_eq!(
            &result.columns[12..],
            &["sleeping".to_string(), "active".to_string(), "away".to_string()]
        );
        assert_eq!(
            output.location_keys(),
            vec!["schedules".to_string(), "events".to_string()]
        );
        let log = output.contents("events").unwrap();
        assert_eq!(
            log.lines().count() - 1,
            result.event_counts.values().sum::<usize>()
        );
    }

    #[rstest]
    fn should_fail_when_tolerance_is_tighter_than_tables() {
        // one row sums to 1.0005, inside the loading tolerance of 1e-3
        let transitions = BUNDLED_TRANSITIONS_FILE.replacen(
            "1,weekday,0,sleeping,0.987400,",
            "1,weekday,0,sleeping,0.987900,",
            1,
        );
        assert_ne!(transitions, BUNDLED_TRANSITIONS_FILE);
        let resources = CalibrationResources::load_from_readers(
            Cursor::new(transitions),
            Cursor::new(BUNDLED_EVENTS_FILE),
            Cursor::new(BUNDLED_DURATIONS_FILE),
            Cursor::new(BUNDLED_START_HOURS_FILE),
            Cursor::new(BUNDLED_SMOOTH_HOURLY_FILE),
            Cursor::new(BUNDLED_SMOOTH_MONTHLY_FILE),
            DEFAULT_PROBABILITY_TOLERANCE,
        )
        .unwrap();
        let mut config = config(json!({"number_of_occupants": 2, "random_seed": 7}));
        assert!(generate_schedules(&config, &resources, ScheduleFlags::empty()).is_ok());

        config.probability_tolerance = 1e-4;
        match generate_schedules(&config, &resources, ScheduleFlags::empty()) {
            Err(ScheduleError::DataLoad(error)) => {
                assert_eq!(error.table, TransitionModel::TABLE_NAME)
            }
            other => panic!("expected a data load error, got {other:?}"),
        }
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    fn should_refuse_timestep_that_does_not_divide_an_hour(
        resources: &CalibrationResources,
        #[case] timestep_minutes: u32,
    ) {
        let mut config = config(json!({"number_of_occupants": 1, "schedules_type": "smooth"}));
        config.timestep_minutes = timestep_minutes;
        assert!(matches!(
            generate_schedules(&config, resources, ScheduleFlags::empty()),
            Err(ScheduleError::Configuration(_))
        ));
    }

    #[rstest]
    fn failed_event_log_should_leave_no_schedules_file(resources: &CalibrationResources) {
        let directory = tempfile::tempdir().unwrap();
        // a directory where the event log's temporary file would go
        fs::create_dir(directory.path().join(".house__events.csv.partial")).unwrap();
        let output = FileOutput::new(directory.path().to_path_buf(), "house__{}.csv".to_string());

        let result = run_schedule_generation(
            Cursor::new(r#"{"number_of_occupants": 1, "random_seed": 3}"#),
            None,
            resources,
            &output,
            ScheduleFlags::EVENT_LOG,
        );
        assert!(matches!(result, Err(ScheduleError::Io { .. })));
        assert!(!directory.path().join("house__schedules.csv").exists());
        assert!(!directory.path().join(".house__schedules.csv.partial").exists());
    }

    /// Keeps everything in memory but cannot commit the event log.
    #[derive(Debug, Default)]
    struct EventLogFailingOutput(MemoryOutput);

    impl Output for EventLogFailingOutput {
        type Writer = Vec<u8>;

        fn writer_for_location_key(&self, location_key: &str) -> anyhow::Result<Self::Writer> {
            self.0.writer_for_location_key(location_key)
        }

        fn finish(
            &self,
            location_key: &str,
            writer: Self::Writer,
        ) -> anyhow::Result<Option<PathBuf>> {
            if location_key == EVENTS_LOCATION_KEY {
                anyhow::bail!("disk full");
            }
            self.0.finish(location_key, writer)
        }

        fn discard(&self, location_key: &str) -> anyhow::Result<()> {
            self.0.discard(location_key)
        }
    }

    #[rstest]
    fn failed_event_log_commit_should_discard_schedules(resources: &CalibrationResources) {
        let config = config(json!({"number_of_occupants": 1, "random_seed": 3}));
        let output = EventLogFailingOutput::default();

        let result = generate_to_output(&config, resources, &output, ScheduleFlags::EVENT_LOG);
        assert!(matches!(result, Err(ScheduleError::Io { .. })));
        assert_eq!(output.0.contents(SCHEDULES_LOCATION_KEY), None);
        assert!(output.0.location_keys().is_empty());

        // without the event log there is nothing to fail
        generate_to_output(&config, resources, &output, ScheduleFlags::empty()).unwrap();
        assert!(output.0.contents(SCHEDULES_LOCATION_KEY).is_some());
    }

    #[rstest]
    fn batch_should_be_repeatable_with_batch_seed(resources: &CalibrationResources) {
        let households = || {
            (0..3)
                .map(|occupants| BatchHousehold {
                    config: config(json!({"number_of_occupants": occupants, "timestep_minutes": 60})),
                    output: MemoryOutput::default(),
                })
                .collect::<Vec<_>>()
        };
        let first = households();
        let second = households();

        let first_results = run_batch(&first, resources, ScheduleFlags::empty(), Some(2024));
        let second_results = run_batch(&second, resources, ScheduleFlags::empty(), Some(2024));

        let seeds = |results: &[Result<RunResult, ScheduleError>]| {
            results
                .iter()
                .map(|result| result.as_ref().unwrap().random_seed)
                .collect::<Vec<_>>()
        };
        assert_eq!(seeds(&first_results), seeds(&second_results));
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.output.contents("schedules"), b.output.contents("schedules"));
        }
    }
}
