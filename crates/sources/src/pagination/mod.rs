//! Reusable planners for the pagination idioms adapters follow.

pub mod archive;
pub mod backward;
pub mod block;
pub mod forward;

pub use archive::{detect_header, extract_csv_rows, ArchiveFile, ArchivePlan};
pub use backward::BackwardCursor;
pub use block::{BlockClock, BlockLocator, BlockRef};
pub use forward::ForwardChunks;
