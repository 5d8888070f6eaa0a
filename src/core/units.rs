pub const MINUTES_PER_HOUR: u32 = 60;
pub const HOURS_PER_DAY: u32 = 24;
pub const MINUTES_PER_DAY: u32 = MINUTES_PER_HOUR * HOURS_PER_DAY;
pub const MONTHS_PER_YEAR: u32 = 12;

/// Resolution of the occupant activity Markov chain.
pub const NATIVE_STEP_MINUTES: u32 = 15;
pub const NATIVE_STEPS_PER_DAY: usize = (MINUTES_PER_DAY / NATIVE_STEP_MINUTES) as usize;
pub const NATIVE_STEPS_PER_HOUR: usize = (MINUTES_PER_HOUR / NATIVE_STEP_MINUTES) as usize;

/// The year used for TMY weather (and when no weather is supplied at all).
pub const DEFAULT_SIMULATION_YEAR: i32 = 2007;

/// Setpoints written outside of the heating/cooling season, far enough out that the system never runs.
pub const HEATING_SETPOINT_OFF_SEASON_F: f64 = -100.;
pub const COOLING_SETPOINT_OFF_SEASON_F: f64 = 200.;

pub fn minutes_to_hours(minutes: u32) -> f64 {
    minutes as f64 / MINUTES_PER_HOUR as f64
}
