pub mod build;
pub mod units;
