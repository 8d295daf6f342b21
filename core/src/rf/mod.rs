pub mod datapoint;
pub mod stats;

pub use datapoint::{attenuation_corrected, gamma_to_impedance, group_delay, Datapoint};
pub use stats::StatsHelper;
