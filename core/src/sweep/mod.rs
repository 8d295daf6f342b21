pub mod plan;
pub mod properties;
pub mod units;

pub use plan::{Frequencies, SweepPlan};
pub use properties::{AnalysisMode, Averaging, SweepMode, SweepProperties};
pub use units::{format_frequency, parse_frequency, FrequencyInput, FrequencyUnit};
