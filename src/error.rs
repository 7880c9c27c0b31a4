//! Error types for walblock
//!
//! Provides a unified error type for the write path, the read path and
//! device configuration.

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for walblock operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log device write failed for logpack lsid={lsid}: {reason}")]
    LogIo { lsid: u64, reason: String },

    #[error("data device I/O failed at sector {sector}: {reason}")]
    DataIo { sector: u64, reason: String },

    // -------------------------------------------------------------------------
    // Device State Errors
    // -------------------------------------------------------------------------
    #[error("device is read-only after a device failure")]
    ReadOnly,

    #[error("device is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("request out of range: sector={sector} sectors={sectors} capacity={capacity}")]
    OutOfRange {
        sector: u64,
        sectors: u64,
        capacity: u64,
    },

    #[error("buffer of {len} bytes is not a multiple of the {unit}-byte sector")]
    Misaligned { len: usize, unit: usize },

    #[error("request of {sectors} sectors does not fit in a logpack (limit {limit})")]
    TooLarge { sectors: u64, limit: u64 },

    #[error("empty request: only a flush may carry no sectors")]
    EmptyRequest,

    // -------------------------------------------------------------------------
    // Buffer Errors
    // -------------------------------------------------------------------------
    #[error("buffer allocation of {0} bytes failed")]
    Alloc(usize),

    // -------------------------------------------------------------------------
    // Log Format Errors
    // -------------------------------------------------------------------------
    #[error("logpack corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("completion dropped before it was signalled: {0}")]
    Disconnected(String),
}

impl WalError {
    /// Short copy of an error for fan-out to every member of a failed pack.
    ///
    /// `std::io::Error` is not `Clone`, so I/O errors are flattened to their
    /// display form.
    pub fn duplicate(&self) -> WalError {
        match self {
            WalError::Io(e) => WalError::Io(std::io::Error::new(e.kind(), e.to_string())),
            WalError::LogIo { lsid, reason } => WalError::LogIo {
                lsid: *lsid,
                reason: reason.clone(),
            },
            WalError::DataIo { sector, reason } => WalError::DataIo {
                sector: *sector,
                reason: reason.clone(),
            },
            WalError::ReadOnly => WalError::ReadOnly,
            WalError::Closed => WalError::Closed,
            WalError::OutOfRange {
                sector,
                sectors,
                capacity,
            } => WalError::OutOfRange {
                sector: *sector,
                sectors: *sectors,
                capacity: *capacity,
            },
            WalError::Misaligned { len, unit } => WalError::Misaligned {
                len: *len,
                unit: *unit,
            },
            WalError::TooLarge { sectors, limit } => WalError::TooLarge {
                sectors: *sectors,
                limit: *limit,
            },
            WalError::EmptyRequest => WalError::EmptyRequest,
            WalError::Alloc(n) => WalError::Alloc(*n),
            WalError::Corruption(s) => WalError::Corruption(s.clone()),
            WalError::Config(s) => WalError::Config(s.clone()),
            WalError::Disconnected(s) => WalError::Disconnected(s.clone()),
        }
    }
}
