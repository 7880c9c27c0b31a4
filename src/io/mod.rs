//! I/O Request Module
//!
//! Request types and the plumbing they travel with.
//!
//! ## Responsibilities
//! - `WriteIo` / `ReadIo`: one client request each
//! - `IoFragment`: sector-aligned byte range for one device, splittable
//! - `Completion` / `Latch`: bounded-wait hand-off between pipeline stages
//! - Block buffer allocation and salted checksums

mod buffer;
mod completion;
mod fragment;
mod read;
mod write;

pub use buffer::{checksum, BlockAllocator, HeapAllocator};
pub use completion::{completion, Completer, Completion, Latch};
pub use fragment::{FragmentBuf, FragmentList, FragmentState, IoFragment, Target};
pub use read::ReadIo;
pub use write::{WriteFlags, WriteIo, WriteKind, WriteState};
