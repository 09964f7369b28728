//! # Reporting
//!
//! Flat-file output of a run: the per-step result table and the specs
//! artifact describing the host.

pub mod sink;
pub mod specs;

pub use sink::{CsvResultSink, ResultFiles, ResultRow, ResultSink, CSV_HEADER};
pub use specs::{render_specs, write_specs};
