//! davsync library
//!
//! Resumable bulk upload of a local tree to one or more WebDAV endpoints.
//! Small files are packed into tar archives, every unit is admitted through
//! an adaptive control window, and completed work is journaled so an
//! interrupted run picks up where it stopped.

pub mod config;
pub mod crawl;
pub mod logger;
pub mod pack;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod unit;
pub mod window;
pub mod worker;
