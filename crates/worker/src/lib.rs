//! Thread plumbing for the slow path.
//!
//! * [`spawn_named_thread`] / [`spawn_scoped_named`]: named OS threads tagged with a [`ThreadClass`].
//! * [`run_preemptible`]: fans a batch of slow-path work out over scoped workers that hold the
//!   preemption gate in shared mode, yield it at bounded intervals and abandon stale epochs, while
//!   the calling coordinator thread services pending preemption tasks.
#![warn(missing_docs)]

mod class;
mod slow_path;
mod spawn;

pub use class::ThreadClass;
use kestrel_preempt::Epoch;
pub use slow_path::{SlowPathConfig, run_preemptible};
pub use spawn::{spawn_named_thread, spawn_scoped_named};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The epoch of the slow path was superseded before its work finished.
	#[error("slow path for epoch {epoch} was canceled")]
	Canceled {
		/// Epoch the abandoned work was started under.
		epoch: Epoch,
	},
	/// A worker thread could not be spawned.
	#[error("failed to spawn worker thread: {0}")]
	Spawn(#[from] std::io::Error),
}
