//! Domain types and pure logic for the bus delay prediction engine.
//!
//! Nothing here performs I/O. Persistence and catalog lookups are expressed
//! as traits in [`store`] and implemented by the engine and db crates.

pub mod accuracy;
pub mod alert;
pub mod error;
pub mod observation;
pub mod prediction;
pub mod reporting;
pub mod stats;
pub mod store;
pub mod target;
pub mod types;
