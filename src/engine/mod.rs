//! Download execution engine
//!
//! - [`TaskExecutor`]: claim (PENDING→DOWNLOADING under the row lock),
//!   download without any lock held, finalize to SUCCESS or FAILED
//! - [`BatchDispatcher`]: runs every PENDING task on a bounded pool
//! - [`RecoverySweep`]: requeues DOWNLOADING and FAILED tasks
//! - [`DownloadTaskCreatedHandler`]: event-channel entry point
//! - [`spawn_periodic`]: interval scheduler for the sweep and dispatcher

pub mod consumer;
pub mod dispatcher;
pub mod executor;
pub mod scheduler;
pub mod sweep;

pub use consumer::DownloadTaskCreatedHandler;
pub use dispatcher::{BatchDispatcher, DispatchStats};
pub use executor::{ClaimOutcome, ExecutionOutcome, TaskExecutor};
pub use scheduler::{ScheduledJob, spawn_periodic};
pub use sweep::RecoverySweep;
