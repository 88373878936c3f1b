//! Row types for the tables owned by this crate.

pub mod power_log;
pub mod sd_job;
pub mod sd_task;
pub mod user;
