//! Match Pandora surface/partial-column observations with gridded GEOS-CF model output.
pub mod error;
pub mod utils;
pub mod units;
pub mod interpolation;
pub mod column;
pub mod logging;
pub mod config;
pub mod readers;
pub mod gridded;
pub mod matching;
pub mod sites;
pub mod writers;

#[cfg(test)]
pub(crate) mod test_utils;
