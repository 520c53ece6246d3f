//! Typecheck coordination for the analysis server.
//!
//! The message-processing thread hands work to a [`TypecheckerCoordinator`]. While a cancelable
//! slow path runs, short preemptible work is slipped in between worker slices through the
//! coordinator's [`PreemptionManager`](kestrel_preempt::PreemptionManager) instead of waiting for
//! the slow path to finish.
//!
//! * [`ServerConfig`]: TOML-backed settings, including the [`SlowPathConfig`] for workers.
//! * [`PreemptionPolicy`]: decides which messages may preempt a slow path.
//! * [`PendingQueue`]: inbound messages waiting for the typechecker.
#![warn(missing_docs)]

mod config;
mod coordinator;
mod policy;
mod queue;

pub use config::ServerConfig;
pub use coordinator::{QueuePreemption, RunMode, SlowPathContext, SlowPathHandle, TypecheckerCoordinator};
pub use kestrel_worker::SlowPathConfig;
pub use policy::{MethodAllowList, NeverPreempt, PreemptionPolicy};
pub use queue::PendingQueue;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The typechecker thread exited before the work completed.
	#[error("typechecker coordinator is not running")]
	CoordinatorStopped,
	/// The dedicated typechecker thread was already started.
	#[error("typechecker thread already started")]
	AlreadyStarted,
	/// The dedicated typechecker thread could not be spawned.
	#[error("failed to spawn typechecker thread: {0}")]
	ThreadSpawn(#[source] std::io::Error),
	/// The configuration file is not valid TOML or has the wrong shape.
	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),
	/// The configuration file could not be read.
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
	/// Slow-path work panicked. The typechecker thread keeps running.
	#[error("slow path panicked: {0}")]
	SlowPathPanicked(String),
	/// Slow-path work failed or was canceled.
	#[error(transparent)]
	Slow(#[from] kestrel_worker::Error),
}
