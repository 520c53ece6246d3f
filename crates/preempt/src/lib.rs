//! Cooperative preemption of slow-path analysis.
//!
//! Three thread roles share one [`PreemptionManager`]:
//! * worker threads hold [`PreemptionManager::lock_preemption`] while running slow-path work and
//!   periodically [`PreemptionGuard::bump`] it,
//! * the message-processing thread offers one urgent [`Task`] at a time through
//!   [`PreemptionManager::try_schedule`],
//! * the typecheck-coordinator thread runs that task in the exclusive window through
//!   [`PreemptionManager::try_run_scheduled`].
//!
//! [`TypecheckEpochs`] tracks slow-path generations so that work preempted by an edit can notice
//! it went stale once it regains its shared acquisition.
#![warn(missing_docs)]

mod epoch;
mod manager;
mod role;
mod task;

pub use epoch::{Epoch, EpochTracker, TypecheckEpochs, TypecheckingStatus};
pub use manager::{PreemptionGuard, PreemptionManager};
pub use role::ThreadRole;
pub use task::{FnTask, SharedTask, Task};
