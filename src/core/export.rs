use crate::core::aggregate::ScheduleSet;
use crate::core::calibration::EventEndUse;
use crate::core::events::EndUseEvent;
use crate::errors::ScheduleError;
use crate::output::Output;
use anyhow::anyhow;
use csv::WriterBuilder;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_DECIMAL_PLACES: usize = 5;

/// Fixed-point formatting with trailing zeros (and a trailing point) removed, so that `0.50000`
/// is written as `0.5` and `1.00000` as `1`.
pub fn format_value(value: f64, decimal_places: usize) -> String {
    let formatted = format!("{value:.decimal_places$}");
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };

    match trimmed {
        "-0" => "0".to_string(),
        _ => trimmed.to_string(),
    }
}

/// Check that every column has exactly the expected number of rows.
pub fn validate_row_count(schedules: &ScheduleSet, expected_rows: usize) -> Result<(), ScheduleError> {
    for (name, values) in schedules.columns() {
        if values.len() != expected_rows {
            return Err(ScheduleError::RowCount {
                column: name.to_string(),
                expected: expected_rows,
                actual: values.len(),
            });
        }
    }
    Ok(())
}

fn into_writer<O: Output>(
    csv_writer: csv::Writer<O::Writer>,
    location_key: &str,
) -> Result<O::Writer, ScheduleError> {
    csv_writer
        .into_inner()
        .map_err(|e| ScheduleError::io(location_key, anyhow!("{}", e.error())))
}

/// Finish a staged writer so that its content appears at the location. `None` (from a no-op
/// output) commits nothing.
pub fn commit<O: Output>(
    output: &O,
    location_key: &str,
    writer: Option<O::Writer>,
) -> Result<Option<PathBuf>, ScheduleError> {
    match writer {
        Some(writer) => output
            .finish(location_key, writer)
            .map_err(|e| ScheduleError::io(location_key, e)),
        None => Ok(None),
    }
}

/// Write the schedules as CSV: a header of column names, then one row per output step. Nothing is
/// written unless every column has the expected number of rows.
pub fn export<O: Output>(
    schedules: &ScheduleSet,
    expected_rows: usize,
    decimal_places: usize,
    output: &O,
    location_key: &str,
) -> Result<Option<PathBuf>, ScheduleError> {
    let writer = stage_schedules(schedules, expected_rows, decimal_places, output, location_key)?;
    commit(output, location_key, writer)
}

/// Write the schedules CSV without committing it, returning the writer to hand to [`commit`].
pub fn stage_schedules<O: Output>(
    schedules: &ScheduleSet,
    expected_rows: usize,
    decimal_places: usize,
    output: &O,
    location_key: &str,
) -> Result<Option<O::Writer>, ScheduleError> {
    validate_row_count(schedules, expected_rows)?;
    if output.is_noop() {
        return Ok(None);
    }
    debug!(location_key, rows = expected_rows, columns = schedules.len(), "Writing schedules");

    let io_error = |e: csv::Error| ScheduleError::io(location_key, e.into());
    let writer = output
        .writer_for_location_key(location_key)
        .map_err(|e| ScheduleError::io(location_key, e))?;
    let mut csv_writer = WriterBuilder::new().from_writer(writer);
    csv_writer
        .write_record(schedules.column_names())
        .map_err(io_error)?;

    let columns = schedules.columns().map(|(_, values)| values).collect_vec();
    for row in 0..expected_rows {
        csv_writer
            .write_record(
                columns
                    .iter()
                    .map(|values| format_value(values[row], decimal_places)),
            )
            .map_err(io_error)?;
    }

    into_writer::<O>(csv_writer, location_key).map(Some)
}

#[derive(Debug, Serialize)]
struct EventLogRow {
    end_use: String,
    occupant: Option<usize>,
    start_minute: u32,
    duration_minutes: u32,
    magnitude: f64,
}

/// Write every sampled event, in start order, as
/// `end_use,occupant,start_minute,duration_minutes,magnitude`.
pub fn export_event_log<O: Output>(
    events: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
    output: &O,
    location_key: &str,
) -> Result<Option<PathBuf>, ScheduleError> {
    let writer = stage_event_log(events, output, location_key)?;
    commit(output, location_key, writer)
}

/// Write the event log without committing it, returning the writer to hand to [`commit`].
pub fn stage_event_log<O: Output>(
    events: &IndexMap<EventEndUse, Vec<EndUseEvent>>,
    output: &O,
    location_key: &str,
) -> Result<Option<O::Writer>, ScheduleError> {
    if output.is_noop() {
        return Ok(None);
    }
    let writer = output
        .writer_for_location_key(location_key)
        .map_err(|e| ScheduleError::io(location_key, e))?;
    let mut csv_writer = WriterBuilder::new().from_writer(writer);

    let rows = events
        .values()
        .flatten()
        .sorted_by_key(|event| (event.start_minute, event.end_use));
    let mut written = 0;
    for event in rows {
        csv_writer
            .serialize(EventLogRow {
                end_use: event.end_use.to_string(),
                occupant: event.occupant,
                start_minute: event.start_minute,
                duration_minutes: event.duration_minutes,
                magnitude: event.magnitude,
            })
            .map_err(|e| ScheduleError::io(location_key, e.into()))?;
        written += 1;
    }
    if written == 0 {
        // serialize writes the header with the first row, so an empty log needs it explicitly
        csv_writer
            .write_record([
                "end_use",
                "occupant",
                "start_minute",
                "duration_minutes",
                "magnitude",
            ])
            .map_err(|e| ScheduleError::io(location_key, e.into()))?;
    }
    csv_writer
        .flush()
        .map_err(|e| ScheduleError::io(location_key, e.into()))?;

    into_writer::<O>(csv_writer, location_key).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{FileOutput, MemoryOutput};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn schedules() -> ScheduleSet {
        let mut schedules = ScheduleSet::new(60);
        schedules.insert("occupants", vec![1., 0.5, 0.]);
        schedules.insert("heating_setpoint", vec![68., 63.25, -100.]);
        schedules
    }

    #[rstest]
    #[case(0.5, 5, "0.5")]
    #[case(1., 5, "1")]
    #[case(0., 5, "0")]
    #[case(0.123456789, 5, "0.12346")]
    #[case(0.000001, 5, "0")]
    #[case(-0.000001, 5, "0")]
    #[case(-100., 5, "-100")]
    #[case(63.26, 1, "63.3")]
    #[case(200., 0, "200")]
    fn should_format_values(#[case] value: f64, #[case] places: usize, #[case] expected: &str) {
        assert_eq!(format_value(value, places), expected);
    }

    #[rstest]
    fn should_write_header_and_rows() {
        let output = MemoryOutput::default();
        let path = export(&schedules(), 3, 5, &output, "schedules").unwrap();
        assert_eq!(path, None);
        assert_eq!(
            output.contents("schedules").unwrap(),
            "occupants,heating_setpoint\n1,68\n0.5,63.25\n0,-100\n"
        );
    }

    #[rstest]
    fn should_refuse_wrong_row_count() {
        let output = MemoryOutput::default();
        let error = export(&schedules(), 4, 5, &output, "schedules").unwrap_err();
        assert!(matches!(
            error,
            ScheduleError::RowCount {
                expected: 4,
                actual: 3,
                ..
            }
        ));
        assert_eq!(output.contents("schedules"), None);
    }

    #[rstest]
    fn should_report_unwritable_location() {
        let directory = tempfile::tempdir().unwrap();
        let output = FileOutput::new(directory.path().join("missing"), "{}.csv".to_string());
        let error = export(&schedules(), 3, 5, &output, "schedules").unwrap_err();
        assert!(matches!(error, ScheduleError::Io { .. }));
    }

    #[rstest]
    fn staged_schedules_should_only_appear_once_committed() {
        let output = MemoryOutput::default();
        let writer = stage_schedules(&schedules(), 3, 5, &output, "schedules").unwrap();
        assert_eq!(output.contents("schedules"), None);

        commit(&output, "schedules", writer).unwrap();
        assert!(output.contents("schedules").is_some());
    }

    #[rstest]
    fn should_write_event_log_in_start_order() {
        let event = |end_use, start_minute| EndUseEvent {
            end_use,
            occupant: Some(1),
            start_minute,
            duration_minutes: 10,
            magnitude: 2.5,
        };
        let mut events = IndexMap::new();
        events.insert(EventEndUse::Shower, vec![event(EventEndUse::Shower, 500)]);
        events.insert(EventEndUse::Sink, vec![event(EventEndUse::Sink, 20)]);

        let output = MemoryOutput::default();
        export_event_log(&events, &output, "events").unwrap();
        assert_eq!(
            output.contents("events").unwrap(),
            "end_use,occupant,start_minute,duration_minutes,magnitude\n\
             sink,1,20,10,2.5\n\
             shower,1,500,10,2.5\n"
        );
    }

    #[rstest]
    fn should_write_header_for_empty_event_log() {
        let output = MemoryOutput::default();
        export_event_log(&IndexMap::new(), &output, "events").unwrap();
        assert_eq!(
            output.contents("events").unwrap(),
            "end_use,occupant,start_minute,duration_minutes,magnitude\n"
        );
    }
}
