use anyhow::{anyhow, Context};
use clap::Parser;
use indexmap::IndexMap;
use resched::core::calibration::CalibrationResources;
use resched::core::markov::DEFAULT_PROBABILITY_TOLERANCE;
use resched::input::ScheduleInput;
use resched::output::FileOutput;
use resched::read_weather_file::{weather_header_from_epw, WeatherHeader};
use resched::{run_batch, BatchHousehold, ScheduleFlags, SCHEDULES_LOCATION_KEY};
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Default, Debug)]
#[clap(author, version, about, long_about = None)]
struct ReschedArgs {
    #[arg(required = true, help = "Household description files in .json format")]
    input_files: Vec<PathBuf>,
    #[arg(long, short, help = "Path to weather file in .epw format")]
    epw_file: Option<PathBuf>,
    #[arg(
        long,
        short,
        help = "Directory to write schedules to (defaults to each input file's directory)"
    )]
    output_dir: Option<PathBuf>,
    #[arg(
        long,
        short,
        help = "Directory of calibration tables to use instead of the bundled ones"
    )]
    calibration_dir: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Add sleeping, active and away fraction columns"
    )]
    debug_columns: bool,
    #[arg(
        long,
        default_value_t = false,
        help = "Also write every sampled event to a CSV"
    )]
    event_log: bool,
    #[arg(long, help = "Seed for households that do not give one of their own")]
    batch_seed: Option<u64>,
    #[clap(long, default_value_t = false, help = "Whether to log out spans")]
    log_spans: bool,
}

impl From<&ReschedArgs> for ScheduleFlags {
    fn from(args: &ReschedArgs) -> Self {
        let mut flags = ScheduleFlags::empty();
        if args.debug_columns {
            flags.insert(ScheduleFlags::DEBUG_COLUMNS);
        }
        if args.event_log {
            flags.insert(ScheduleFlags::EVENT_LOG);
        }
        flags
    }
}

fn file_output_for(input_file: &Path, output_dir: Option<&Path>) -> anyhow::Result<FileOutput> {
    let stem = input_file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("Cannot name output after {}", input_file.display()))?;
    let directory = match output_dir {
        Some(directory) => directory.to_path_buf(),
        None => input_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    Ok(FileOutput::new(directory, format!("{stem}__{{}}.csv")))
}

/// Fail if two input files would write to the same schedules file, as happens for `a/house.json`
/// and `b/house.json` with a shared output directory.
fn check_distinct_outputs<'a>(
    outputs: impl IntoIterator<Item = (&'a Path, &'a FileOutput)>,
) -> anyhow::Result<()> {
    let mut seen: IndexMap<PathBuf, &Path> = Default::default();
    for (input_file, output) in outputs {
        let path = output.path_for_location_key(SCHEDULES_LOCATION_KEY)?;
        if let Some(earlier) = seen.get(&path) {
            return Err(anyhow!(
                "{} and {} would both write {}",
                earlier.display(),
                input_file.display(),
                path.display()
            ));
        }
        seen.insert(path, input_file);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = ReschedArgs::parse();

    // set up basic tracing
    let tracing_subscriber = {
        let mut builder = tracing_subscriber::fmt::fmt().with_max_level(tracing::Level::DEBUG);

        if args.log_spans {
            builder = builder.with_span_events(FmtSpan::CLOSE);
        }

        builder.finish()
    };
    tracing::subscriber::set_global_default(tracing_subscriber)
        .context("setting tracing subscriber failed")?;

    let weather: Option<WeatherHeader> = match &args.epw_file {
        Some(file) => Some(weather_header_from_epw(BufReader::new(
            File::open(file).with_context(|| format!("Could not open {}", file.display()))?,
        ))?),
        None => None,
    };

    let loaded_resources;
    let resources = match &args.calibration_dir {
        Some(directory) => {
            loaded_resources =
                CalibrationResources::load_from_directory(directory, DEFAULT_PROBABILITY_TOLERANCE)?;
            &loaded_resources
        }
        None => CalibrationResources::bundled()?,
    };

    if let Some(directory) = &args.output_dir {
        fs::create_dir_all(directory)?;
    }

    let households = args
        .input_files
        .iter()
        .map(|input_file| -> anyhow::Result<BatchHousehold<FileOutput>> {
            let json = File::open(input_file)
                .with_context(|| format!("Could not open {}", input_file.display()))?;
            let config = ScheduleInput::init_with_json(json)?.resolve(weather.as_ref())?;

            Ok(BatchHousehold {
                config,
                output: file_output_for(input_file, args.output_dir.as_deref())?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    check_distinct_outputs(
        args.input_files
            .iter()
            .map(PathBuf::as_path)
            .zip(households.iter().map(|household| &household.output)),
    )?;

    let results = run_batch(&households, resources, (&args).into(), args.batch_seed);

    let mut failures = 0;
    for (input_file, result) in args.input_files.iter().zip(results) {
        match result {
            Ok(result) => {
                for path in result.schedules_path.iter().chain(&result.event_log_path) {
                    println!("wrote {}", path.display());
                }
                debug!(
                    input_file = %input_file.display(),
                    random_seed = result.random_seed,
                    "Household complete"
                );
            }
            Err(e) => {
                error!(input_file = %input_file.display(), "{e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!(
            "{failures} of {} households failed",
            args.input_files.len()
        ));
    }

    Ok(())
}
