use crate::errors::ConfigurationError;
use csv::ReaderBuilder as CsvReaderBuilder;
use itertools::Itertools;
use std::io::Read;

const COLUMN_STATE: usize = 2;
const COLUMN_LATITUDE: usize = 6;
const COLUMN_LONGITUDE: usize = 7;
const COLUMN_YEAR: usize = 0;
const FIRST_DATA_ROW: usize = 8;

/// Whether a weather file holds one actual year or a typical year stitched together from several.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WeatherYear {
    /// Actual meteorological year.
    Actual(i32),
    /// Typical meteorological year.
    Typical,
}

/// The parts of an EPW weather file that schedule generation needs.
#[derive(Clone, Debug, PartialEq)]
pub struct WeatherHeader {
    pub state_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub weather_year: WeatherYear,
}

impl WeatherHeader {
    /// The calendar year of an actual-year file.
    pub fn actual_year(&self) -> Option<i32> {
        match self.weather_year {
            WeatherYear::Actual(year) => Some(year),
            WeatherYear::Typical => None,
        }
    }
}

pub fn weather_header_from_epw(file: impl Read) -> Result<WeatherHeader, ConfigurationError> {
    let error = |message: String| ConfigurationError::new("epw_file", message);
    let mut reader = CsvReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(file);

    let mut location = None;
    let mut years = vec![];
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| error(format!("line {}: {e}", i + 1)))?;
        let field = |column: usize| {
            record
                .get(column)
                .map(str::trim)
                .ok_or_else(|| error(format!("line {} has no column {column}", i + 1)))
        };
        if i == 0 {
            if field(0)? != "LOCATION" {
                return Err(error("the first line is not a LOCATION record".to_string()));
            }
            let parse_coordinate = |column: usize| -> Result<f64, ConfigurationError> {
                let value = field(column)?;
                value
                    .parse()
                    .map_err(|_| error(format!("'{value}' is not a valid coordinate")))
            };
            let state = field(COLUMN_STATE)?;
            let state_code = (state.len() == 2 && state.chars().all(|c| c.is_ascii_alphabetic()))
                .then(|| state.to_ascii_uppercase());
            location = Some((
                state_code,
                parse_coordinate(COLUMN_LATITUDE)?,
                parse_coordinate(COLUMN_LONGITUDE)?,
            ));
        } else if i >= FIRST_DATA_ROW {
            let year = field(COLUMN_YEAR)?;
            years.push(
                year.parse::<i32>()
                    .map_err(|_| error(format!("line {}: '{year}' is not a year", i + 1)))?,
            );
        }
    }

    let (state_code, latitude, longitude) =
        location.ok_or_else(|| error("the file is empty".to_string()))?;
    let weather_year = match years.into_iter().unique().collect_vec().as_slice() {
        [] => return Err(error("the file has no weather data".to_string())),
        [year] => WeatherYear::Actual(*year),
        _ => WeatherYear::Typical,
    };

    Ok(WeatherHeader {
        state_code,
        latitude,
        longitude,
        weather_year,
    })
}
