//! Background task management and execution.
//!
//! This subsystem accepts work requests, serializes them for durability,
//! distributes them across three priority lanes in the key-value store,
//! executes them with bounded per-lane concurrency, and applies a fixed
//! retry policy on failure.
//!
//! # Architecture
//!
//! - [`Task`] records are persisted as JSON under `task:<id>` and
//!   mirrored in the manager's in-process read-through cache.
//! - [`TaskRegistry`] maps stable handler keys to statically registered
//!   handlers; lookups fail closed.
//! - [`TaskManager`] owns the task lifecycle: create, get, cancel,
//!   progress, list, sweep, execute.
//! - [`TaskDispatcher`] runs one consumer loop per lane; execution is
//!   fire-and-forget relative to the loop, bounded by a per-lane
//!   semaphore.
//!
//! # Failure model
//!
//! Handler resolution failure and handler errors are indistinguishable:
//! both consume a retry attempt. When retries exhaust, the task stays
//! failed; there is no dead-letter queue and no transient/permanent
//! distinction.

pub mod dispatcher;
pub mod manager;
pub mod registry;
pub mod spawn;
pub mod task;

pub use dispatcher::{DispatcherConfig, TaskDispatcher, run_lane};
pub use manager::TaskManager;
pub use registry::{TaskContext, TaskRegistry};
pub use spawn::{spawn_cancellable_task, spawn_managed_task};
pub use task::{HandlerRef, Task, TaskPriority, TaskRequest, TaskStatus};
