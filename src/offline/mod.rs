//! Offline subsystem.
//!
//! # Data Flow
//! ```text
//! Executor: no response after retries (or while offline)
//!     → queue.rs (enqueue, bounded FIFO)
//!
//! connectivity.rs: offline → online edge
//!     → ResilientClient::drain_offline_queue
//!     → queue.rs (replay per service, requeue or drop)
//! ```

pub mod connectivity;
pub mod queue;

pub use connectivity::{run_replay_loop, ConnectivityMonitor};
pub use queue::{DrainReport, OfflineQueue, QueuedRequest, ReplayOutcome};
