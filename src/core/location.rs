use serde::Deserialize;
use strum_macros::{Display, EnumString};

/// US census regions, used to pick regional rows of the event calibration tables.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CensusRegion {
    Northeast,
    Midwest,
    South,
    West,
}

impl CensusRegion {
    pub fn from_state_code(state_code: &str) -> Option<Self> {
        let region = match state_code.to_ascii_uppercase().as_str() {
            "CT" | "ME" | "MA" | "NH" | "RI" | "VT" | "NJ" | "NY" | "PA" => Self::Northeast,
            "IL" | "IN" | "MI" | "OH" | "WI" | "IA" | "KS" | "MN" | "MO" | "NE" | "ND" | "SD" => {
                Self::Midwest
            }
            "DE" | "DC" | "FL" | "GA" | "MD" | "NC" | "SC" | "VA" | "WV" | "AL" | "KY" | "MS"
            | "TN" | "AR" | "LA" | "OK" | "TX" => Self::South,
            "AZ" | "CO" | "ID" | "MT" | "NV" | "NM" | "UT" | "WY" | "AK" | "CA" | "HI" | "OR"
            | "WA" => Self::West,
            _ => return None,
        };

        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    #[case("CO", Some(CensusRegion::West))]
    #[case("ny", Some(CensusRegion::Northeast))]
    #[case("TX", Some(CensusRegion::South))]
    #[case("MN", Some(CensusRegion::Midwest))]
    #[case("DC", Some(CensusRegion::South))]
    #[case("ZZ", None)]
    #[case("", None)]
    fn should_map_state_codes_to_regions(
        #[case] state_code: &str,
        #[case] expected: Option<CensusRegion>,
    ) {
        assert_eq!(CensusRegion::from_state_code(state_code), expected);
    }
}
