pub mod aggregate;
pub mod calibration;
pub mod date_range;
pub mod events;
pub mod export;
pub mod location;
pub mod markov;
pub mod occupancy;
pub mod setpoints;
pub mod smooth;
pub mod units;
