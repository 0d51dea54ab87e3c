//! ltfs-manager Library
//!
//! Discovers tape drives, classifies them against a quirk table, and mounts,
//! unmounts, formats and diagnoses LTFS volumes by driving the external
//! `ltfs`, `mkltfs`, `mt` and `sg_inq` tools under per-device locks.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod display;
pub mod drive;
pub mod error;
pub mod inventory;
pub mod logger;
pub mod mount;
pub mod runner;
pub mod service;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export key types for easier use
pub use cancel::CancelFlag;
pub use config::Config;
pub use error::{LtfsError, Result};
pub use service::TapeService;
