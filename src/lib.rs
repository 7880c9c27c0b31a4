//! # walblock
//!
//! The write path of a write-ahead-logged block device:
//! - Logpack batching into a ring buffer on the log device
//! - Overlap serialization of intersecting writes on the data device
//! - A pending shadow index serving reads of not yet applied writes
//! - Admission backpressure on pending sectors
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WalDevice                            │
//! │        submit_write / discard / flush / submit_read         │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ admission (backpressure)     │
//!                ▼                              ▼
//!   ┌────────────────────────┐         ┌─────────────────┐
//!   │  submit ─► log ─► wait │         │    read pool    │
//!   │   (LogpackBuilder)     │         │ Fast | Through  │
//!   └──────┬──────────┬──────┘         └───┬─────────┬───┘
//!          │          │ insert             │ copy    │
//!          ▼          ▼                    ▼         │
//!   ┌───────────┐ ┌─────────────┐ ┌──────────────┐   │
//!   │ log ring  │ │OverlapIndex │ │ PendingIndex │   │
//!   │ (device)  │ └──────┬──────┘ └──────────────┘   │
//!   └───────────┘        │ eligible                  │
//!                        ▼                           ▼
//!                ┌──────────────┐           ┌─────────────┐
//!                │  data pool   │──────────►│ data device │
//!                │  (+ GC)      │           └─────────────┘
//!                └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod device;
pub mod io;
pub mod logpack;
pub mod index;
pub mod backpressure;
pub mod pipeline;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, WalError};
pub use config::{Config, ReadStrategyKind};
pub use device::{BlockDevice, FileDevice, MemoryDevice};
pub use engine::{DeviceStats, WalDevice};
pub use io::{WriteFlags, WriteState};

// =============================================================================
// Constants
// =============================================================================

/// Logical sector size in bytes; every offset and length is in sectors
pub const SECTOR_SIZE: usize = 512;

/// Current version of walblock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
