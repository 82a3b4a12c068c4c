pub mod dispatcher;
pub mod scan;
pub mod worker;

pub use dispatcher::{DispatchError, Dispatcher};
pub use scan::{scan_due_users, spawn_scan_loop, ScanError};
pub use worker::{RetryPolicy, WorkflowWorker};
