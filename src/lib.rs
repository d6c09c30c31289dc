pub mod checkpoint;
pub mod config;
pub mod coordinate;
pub mod grid;
pub mod journal;
pub mod locator;
pub mod progress;
pub mod retailers;
pub mod scanner;
pub mod stores;
pub mod utils;

pub use checkpoint::{CheckpointStore, Precision};
pub use coordinate::Coordinate;
pub use grid::{Grid, Region, Step};
pub use retailers::Retailer;
pub use scanner::{FailurePolicy, GridScanner, ScanJob, ScanOutcome, StoreLookup};
pub use stores::{DiscoveredStore, LocatedStore, StoreSet};
