mod fetcher;
mod registry;

pub use fetcher::{FetchError, Snapshot, SnapshotFetcher, SnapshotSource};
pub use registry::CameraRegistry;
