#![cfg_attr(not(test), no_std)]

//! Control core for object-table based capacitive touch controllers.
//!
//! The crate discovers the device object table, keeps the device
//! configuration in sync with a shipped blob, routes the message stream to
//! the contact tracker and runs the anti-touch calibration heuristics.
//! Hardware access goes through the traits in [`platform`].

pub mod calibration;
pub mod commands;
pub mod config;
pub mod config_sync;
pub mod controller;
pub mod error;
pub mod objects;
pub mod platform;
pub mod router;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use calibration::{AreaMetrics, CalibrationAction, CalibrationEngine, CalibrationPhase};
pub use config::{active_config, DriverConfig};
pub use config_sync::{ConfigBlob, ConfigImage, PowerProfile, SyncOutcome};
pub use controller::{AttachReport, Controller, DrainReport};
pub use error::{Error, Result};
pub use objects::{ObjectDirectory, ObjectKind};
pub use platform::{BusOps, DelayOps, EventSink, PendingSignal};
pub use router::{Message, Route};
pub use tracker::{ContactBatch, ContactTracker};
