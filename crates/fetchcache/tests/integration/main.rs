// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod batch;
pub mod coalescing;
pub mod errors;
pub mod freshness;
pub mod takeover;
pub mod utils;

pub use utils::*;
