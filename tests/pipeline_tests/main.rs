//! Tests for the write pipeline
//!
//! These tests drive a full `WalDevice` over instrumented memory devices and
//! verify:
//! - Write, discard and flush acknowledgement and read-back
//! - Overlap serialization and pending shadow reads
//! - Log and data device failure handling
//! - Admission backpressure

#[path = "../common/mod.rs"]
mod common;

mod failure_tests;

use std::sync::Arc;

use common::{small_config, TestDevice};
use walblock::{Config, WalDevice};

/// Data device size used by most tests
pub const DATA_SECTORS: u64 = 4096;

/// Log device size used by most tests; the ring covers all of it
pub const LOG_SECTORS: u64 = 4096;

/// Open a device over fresh instrumented log and data devices.
pub fn open_device(config: Config) -> (Arc<TestDevice>, Arc<TestDevice>, WalDevice) {
    let log = TestDevice::new(LOG_SECTORS);
    let data = TestDevice::new(DATA_SECTORS);
    let device = WalDevice::open(config, log.clone(), data.clone()).unwrap();
    (log, data, device)
}

pub fn open_default() -> (Arc<TestDevice>, Arc<TestDevice>, WalDevice) {
    open_device(small_config())
}
