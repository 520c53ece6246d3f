//! Preemptible fan-out of slow-path work.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use kestrel_preempt::{Epoch, EpochTracker, PreemptionManager};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Error, Result, ThreadClass, spawn_scoped_named};


/// Tuning for [`run_preemptible`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowPathConfig {
	/// Number of worker threads. Zero runs the work inline on the coordinator thread.
	#[serde(default = "default_worker_threads")]
	pub worker_threads: usize,
	/// Items a worker processes before yielding its shared acquisition.
	#[serde(default = "default_yield_every")]
	pub yield_every: usize,
	/// Longest the coordinator sleeps between checks for pending preemption tasks.
	#[serde(default = "default_block_interval_ms")]
	pub block_interval_ms: u64,
}

fn default_worker_threads() -> usize {
	std::thread::available_parallelism()
		.map_or(1, NonZeroUsize::get)
		.saturating_sub(1)
		.max(1)
}

fn default_yield_every() -> usize {
	16
}

fn default_block_interval_ms() -> u64 {
	50
}

impl Default for SlowPathConfig {
	fn default() -> Self {
		Self {
			worker_threads: default_worker_threads(),
			yield_every: default_yield_every(),
			block_interval_ms: default_block_interval_ms(),
		}
	}
}

impl SlowPathConfig {
	/// Coordinator wake-up interval.
	pub fn block_interval(&self) -> Duration {
		Duration::from_millis(self.block_interval_ms.max(1))
	}

	fn batch_len(&self) -> usize {
		self.yield_every.max(1)
	}
}

/// Completion counter the coordinator sleeps on.
#[derive(Default)]
struct Finished {
	count: Mutex<usize>,
	cv: Condvar,
}

/// Bumps [`Finished`] when a worker exits, including by panic.
struct FinishOnDrop<'a>(&'a Finished);

impl Drop for FinishOnDrop<'_> {
	fn drop(&mut self) {
		*self.0.count.lock() += 1;
		self.0.cv.notify_all();
	}
}

/// Applies `work` to every item while allowing preemption.
///
/// Must be called from the typecheck-coordinator thread of `manager`: between checks on the
/// workers it runs any pending preemption task. Workers take the gate in shared mode, release and
/// retake it every [`SlowPathConfig::yield_every`] items, and stop once `epoch` is stale according
/// to `epochs`.
///
/// Returns the results in item order, or [`Error::Canceled`] if the epoch was superseded before
/// every item was processed. A panic in `work` is propagated once all workers have stopped.
pub fn run_preemptible<I, R, F>(
	manager: &PreemptionManager,
	epochs: &dyn EpochTracker,
	epoch: Epoch,
	config: &SlowPathConfig,
	items: Vec<I>,
	work: F,
) -> Result<Vec<R>>
where
	I: Sync,
	R: Send,
	F: Fn(&I) -> R + Sync,
{
	debug!(epoch, items = items.len(), workers = config.worker_threads, "slow path fan-out");
	if config.worker_threads == 0 || items.len() <= 1 {
		return run_inline(manager, epochs, epoch, config, &items, &work);
	}
	run_on_workers(manager, epochs, epoch, config, &items, &work)
}

fn run_inline<I, R>(
	manager: &PreemptionManager,
	epochs: &dyn EpochTracker,
	epoch: Epoch,
	config: &SlowPathConfig,
	items: &[I],
	work: &(dyn Fn(&I) -> R + Sync),
) -> Result<Vec<R>> {
	let mut results = Vec::with_capacity(items.len());
	for batch in items.chunks(config.batch_len()) {
		manager.try_run_scheduled();
		if epochs.is_canceled(epoch) {
			debug!(epoch, done = results.len(), "inline slow path abandoned");
			return Err(Error::Canceled { epoch });
		}
		let _shared = manager.lock_preemption();
		results.extend(batch.iter().map(work));
	}
	Ok(results)
}

fn run_on_workers<I, R>(
	manager: &PreemptionManager,
	epochs: &dyn EpochTracker,
	epoch: Epoch,
	config: &SlowPathConfig,
	items: &[I],
	work: &(dyn Fn(&I) -> R + Sync),
) -> Result<Vec<R>>
where
	I: Sync,
	R: Send,
{
	let next = AtomicUsize::new(0);
	let aborted = AtomicBool::new(false);
	let finished = Finished::default();
	let worker_count = config.worker_threads.min(items.len());
	let batch_len = config.batch_len();

	let worker = || {
		let _finish = FinishOnDrop(&finished);
		let mut out = Vec::new();
		let mut shared = manager.lock_preemption();
		let mut since_yield = 0;
		loop {
			if aborted.load(Ordering::Relaxed) {
				break;
			}
			let index = next.fetch_add(1, Ordering::Relaxed);
			let Some(item) = items.get(index) else {
				break;
			};
			out.push((index, work(item)));
			since_yield += 1;
			if since_yield >= batch_len {
				since_yield = 0;
				shared.bump();
				if epochs.is_canceled(epoch) {
					trace!(epoch, worker_class = ThreadClass::SlowPathWorker.as_str(), "worker observed stale epoch");
					aborted.store(true, Ordering::Relaxed);
					break;
				}
			}
		}
		out
	};

	let joined = std::thread::scope(|scope| {
		let mut handles = Vec::with_capacity(worker_count);
		let mut spawn_error = None;
		for n in 0..worker_count {
			match spawn_scoped_named(scope, ThreadClass::SlowPathWorker, format!("slow-path-{n}"), worker) {
				Ok(handle) => handles.push(handle),
				Err(err) => {
					aborted.store(true, Ordering::Relaxed);
					spawn_error = Some(err);
					break;
				}
			}
		}

		let spawned = handles.len();
		loop {
			manager.try_run_scheduled();
			let mut count = finished.count.lock();
			if *count >= spawned {
				break;
			}
			finished.cv.wait_for(&mut count, config.block_interval());
		}

		let results: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
		(results, spawn_error)
	});

	let (joined, spawn_error) = joined;
	if let Some(err) = spawn_error {
		return Err(Error::Spawn(err));
	}
	let mut indexed = Vec::with_capacity(items.len());
	for result in joined {
		match result {
			Ok(part) => indexed.extend(part),
			Err(panic) => std::panic::resume_unwind(panic),
		}
	}
	if aborted.load(Ordering::Relaxed) || indexed.len() < items.len() {
		debug!(epoch, done = indexed.len(), "slow path abandoned");
		return Err(Error::Canceled { epoch });
	}
	indexed.sort_unstable_by_key(|(index, _)| *index);
	Ok(indexed.into_iter().map(|(_, result)| result).collect())
}
