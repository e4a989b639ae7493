//! Background tasks for the probe.
//!
//! # Tasks
//!
//! - `repeating` - Cancellable delay-then-period schedule used for partition
//!   refreshes and beacon rounds

pub mod repeating;

pub use repeating::RepeatingTask;
