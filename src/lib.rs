pub mod config;
pub mod core;
pub mod credentials;
pub mod error;
pub mod location;
pub mod logging;
pub mod storage;

pub use config::{FileConfig, StorageOptions, SyncConfig};
pub use core::{
    Action, Entry, Listing, ObjectLister, SyncEngine, SyncPhase, SyncReport, TransferOutcome,
    TransferPool, TransferResult,
};
pub use error::{SyncError, TransferError};
pub use location::Location;
