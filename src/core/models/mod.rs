pub mod cost;
pub mod snapshot;
pub mod usage;
