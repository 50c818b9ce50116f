//! Run reports written next to the storage file.
//!
//! - [`json`]: writes the [`RunSummary`](crate::coordinator::RunSummary) of
//!   a finished run for other tooling to pick up.

pub mod json;
