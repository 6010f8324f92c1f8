pub mod engine;
pub mod lister;
pub mod planner;
pub mod pool;

pub use engine::{SyncEngine, SyncPhase, SyncReport};
pub use lister::{Entry, Listing, ObjectLister};
pub use planner::{plan, Action, ActionSummary};
pub use pool::{execute, TransferOutcome, TransferPool, TransferResult};
