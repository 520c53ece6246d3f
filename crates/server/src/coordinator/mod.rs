//! Serializes typechecker work and lets short tasks preempt the slow path.
//!
//! Every task runs on the typechecker thread in submission order, except preemptible tasks issued
//! while a cancelable slow path is running: those are handed to the [`PreemptionManager`] and run
//! the next time the slow path yields.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use kestrel_lsp::{InboundMessage, Timer};
use kestrel_preempt::{Epoch, EpochTracker, FnTask, PreemptionManager, SharedTask, Task, TypecheckEpochs};
use kestrel_worker::{SlowPathConfig, ThreadClass, run_preemptible, spawn_named_thread};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::policy::PreemptionPolicy;
use crate::queue::PendingQueue;
use crate::{Error, Result, ServerConfig};

#[cfg(test)]
mod tests;

/// Name of the timer measuring how long a preempting task waits for the slow path to yield.
const PREEMPT_TIMER: &str = "latency.preempt_slow_path";

/// Name of the timer measuring how long a slow path that replaces a canceled one waits to start.
const CANCEL_TIMER: &str = "latency.cancel_slow_path";

/// How a task submitted with [`TypecheckerCoordinator::sync_run`] is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
	/// Always queue behind earlier work, including a running slow path.
	Blocking,
	/// Preempt a running, non-canceled slow path when possible.
	Preemptible,
}

type Job = Box<dyn FnOnce() + Send>;

enum Command {
	Run(Job),
	Terminate,
}

struct Shared {
	manager: PreemptionManager,
	epochs: TypecheckEpochs,
	slow_path: SlowPathConfig,
}

/// Owns the typechecker thread and the preemption state shared with it.
///
/// Without [`Self::start_typechecker_thread`] tasks run inline on the calling thread, which then
/// acts as the typechecker thread. All submissions must come from the message-processing thread.
pub struct TypecheckerCoordinator {
	shared: Arc<Shared>,
	enable_preemption: bool,
	commands: Option<mpsc::UnboundedSender<Command>>,
	thread: Option<JoinHandle<()>>,
	stopped: bool,
}

impl TypecheckerCoordinator {
	/// Creates an inline coordinator.
	pub fn new(config: &ServerConfig) -> Self {
		Self::with_manager(config, PreemptionManager::new())
	}

	/// Creates an inline coordinator around an existing manager.
	pub fn with_manager(config: &ServerConfig, manager: PreemptionManager) -> Self {
		Self {
			shared: Arc::new(Shared {
				manager,
				epochs: TypecheckEpochs::new(),
				slow_path: config.slow_path.clone(),
			}),
			enable_preemption: config.enable_preemption,
			commands: None,
			thread: None,
			stopped: false,
		}
	}

	/// Moves task execution onto a dedicated thread named `typechecker`.
	pub fn start_typechecker_thread(&mut self) -> Result<()> {
		if self.stopped {
			return Err(Error::CoordinatorStopped);
		}
		if self.commands.is_some() {
			return Err(Error::AlreadyStarted);
		}
		let (tx, rx) = mpsc::unbounded_channel();
		let shared = Arc::clone(&self.shared);
		let thread = spawn_named_thread(ThreadClass::Typechecker, "typechecker", move || command_loop(&shared, rx))
			.map_err(Error::ThreadSpawn)?;
		self.commands = Some(tx);
		self.thread = Some(thread);
		Ok(())
	}

	/// Returns true once tasks run on a dedicated thread.
	pub fn is_dedicated(&self) -> bool {
		self.commands.is_some()
	}

	/// The preemption manager shared with the typechecker thread.
	pub fn manager(&self) -> &PreemptionManager {
		&self.shared.manager
	}

	/// Slow-path epochs shared with the typechecker thread.
	pub fn epochs(&self) -> &TypecheckEpochs {
		&self.shared.epochs
	}

	fn dispatch(&self, job: Job) -> Result<()> {
		if self.stopped {
			return Err(Error::CoordinatorStopped);
		}
		match &self.commands {
			Some(commands) => commands.send(Command::Run(job)).map_err(|_| Error::CoordinatorStopped),
			None => {
				job();
				Ok(())
			}
		}
	}

	fn may_preempt(&self) -> bool {
		self.enable_preemption && self.is_dedicated()
	}

	/// Installs `task` as the preemption task if a non-canceled slow path is running.
	///
	/// The decision is taken under the epoch lock so the slow path cannot finish in between; once
	/// installed, the task runs either at a worker yield or in the drain after the slow path.
	fn schedule_preemption(&self, task: SharedTask) -> bool {
		self.shared.epochs.with_epoch_lock(|status| {
			status.slow_path_running && !status.slow_path_canceled && self.shared.manager.try_schedule(task)
		})
	}

	/// Runs `f` on the typechecker thread and blocks until it returns.
	pub fn sync_run<R, F>(&self, mode: RunMode, f: F) -> Result<R>
	where
		R: Send + 'static,
		F: FnOnce() -> R + Send + 'static,
	{
		let (result_tx, result_rx) = oneshot::channel();
		if mode == RunMode::Preemptible && self.may_preempt() {
			let (started_tx, started_rx) = oneshot::channel();
			let task = Arc::new(FnTask::new(move || {
				let _ = started_tx.send(());
				let _ = result_tx.send(f());
			}));
			let mut timer = Timer::start(PREEMPT_TIMER);
			if self.schedule_preemption(task.clone()) {
				let started = started_rx.blocking_recv();
				timer.stop();
				started.map_err(|_| Error::CoordinatorStopped)?;
			} else {
				timer.cancel();
				self.dispatch(Box::new(move || task.run()))?;
			}
		} else {
			self.dispatch(Box::new(move || {
				let _ = result_tx.send(f());
			}))?;
		}
		result_rx.blocking_recv().map_err(|_| Error::CoordinatorStopped)
	}

	/// Queues a cancelable slow path for `epoch` and blocks until it has started.
	///
	/// `work` runs on the typechecker thread and should fan out through
	/// [`SlowPathContext::run`] so preemption tasks get serviced. Any preemption task scheduled
	/// before the slow path finishes runs before the next queued task, even if `work` panics.
	///
	/// When a slow path was canceled with [`TypecheckEpochs::try_cancel_slow_path`], the time
	/// from that cancellation until this one starts is reported as `latency.cancel_slow_path`, see
	/// [`SlowPathHandle::cancel_latency`].
	pub fn typecheck_on_slow_path<R, F>(&self, epoch: Epoch, work: F) -> Result<SlowPathHandle<R>>
	where
		R: Send + 'static,
		F: FnOnce(&SlowPathContext<'_>) -> kestrel_worker::Result<R> + Send + 'static,
	{
		let (started_tx, started_rx) = oneshot::channel();
		let (result_tx, result_rx) = oneshot::channel();
		let shared = Arc::clone(&self.shared);
		self.dispatch(Box::new(move || {
			shared.epochs.start_slow_path(epoch);
			let cancel_latency = shared
				.epochs
				.take_canceled_at()
				.and_then(|canceled_at| Timer::started_at(CANCEL_TIMER, canceled_at).stop());
			let _ = started_tx.send(cancel_latency);
			let ctx = SlowPathContext {
				shared: &shared,
				epoch,
			};
			let result = std::panic::catch_unwind(AssertUnwindSafe(|| work(&ctx)));
			let committed = shared.epochs.finish_slow_path(epoch);
			if shared.manager.try_run_scheduled() {
				debug!(epoch, "drained preemption task after slow path");
			}
			let outcome: Result<R> = match result {
				Ok(Ok(value)) if committed => Ok(value),
				Ok(Ok(_)) => Err(kestrel_worker::Error::Canceled { epoch }.into()),
				Ok(Err(err)) => Err(err.into()),
				Err(panic) => {
					let message = panic_message(&*panic);
					warn!(epoch, %message, "slow path panicked");
					Err(Error::SlowPathPanicked(message))
				}
			};
			let _ = result_tx.send(outcome);
		}))?;
		let cancel_latency = started_rx.blocking_recv().map_err(|_| Error::CoordinatorStopped)?;
		Ok(SlowPathHandle {
			epoch,
			cancel_latency,
			result: result_rx,
		})
	}

	/// Schedules a task that handles every preemptible message at the head of `queue` while the
	/// slow path is paused.
	///
	/// Returns `None` without scheduling when preemption is disabled, no cancelable slow path is
	/// running, the head of the queue is not preemptible, or another preemption task is pending.
	pub fn try_preempt_queue<H>(
		&self,
		queue: Arc<PendingQueue>,
		policy: Arc<dyn PreemptionPolicy>,
		mut handler: H,
	) -> Option<QueuePreemption>
	where
		H: FnMut(InboundMessage) + Send + 'static,
	{
		if !self.may_preempt() || !queue.front_matches(|msg| policy.can_preempt(msg)) {
			return None;
		}
		let (started_tx, started_rx) = oneshot::channel();
		let (finished_tx, finished_rx) = oneshot::channel();
		let task = FnTask::shared(move || {
			let _ = started_tx.send(());
			let mut handled = 0;
			while let Some(msg) = queue.pop_front_if(|msg| policy.can_preempt(msg)) {
				handler(msg);
				handled += 1;
			}
			debug!(handled, "queue preemption complete");
			let _ = finished_tx.send(handled);
		});
		self.schedule_preemption(task).then(|| QueuePreemption {
			started: Some(started_rx),
			finished: finished_rx,
		})
	}

	/// Stops the typechecker thread after the tasks already queued, then joins it.
	///
	/// Later submissions fail with [`Error::CoordinatorStopped`].
	pub fn shutdown(&mut self) -> Result<()> {
		self.stopped = true;
		let Some(commands) = self.commands.take() else {
			return Ok(());
		};
		let _ = commands.send(Command::Terminate);
		drop(commands);
		if let Some(thread) = self.thread.take() {
			thread.join().map_err(|_| Error::CoordinatorStopped)?;
		}
		debug!("typechecker coordinator shut down");
		Ok(())
	}
}

impl Drop for TypecheckerCoordinator {
	fn drop(&mut self) {
		if let Err(err) = self.shutdown() {
			warn!(error = %err, "typechecker thread ended abnormally");
		}
	}
}

impl std::fmt::Debug for TypecheckerCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TypecheckerCoordinator")
			.field("dedicated", &self.is_dedicated())
			.field("enable_preemption", &self.enable_preemption)
			.field("manager", &self.shared.manager)
			.finish_non_exhaustive()
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_owned()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_owned()
	}
}

fn command_loop(shared: &Shared, mut commands: mpsc::UnboundedReceiver<Command>) {
	// Inline use may have bound the coordinator role to the message thread.
	shared.manager.take_coordinator_role();
	debug!("typechecker thread started");
	while let Some(command) = commands.blocking_recv() {
		match command {
			Command::Run(job) => job(),
			Command::Terminate => break,
		}
	}
	debug!("typechecker thread exiting");
}

/// View of the coordinator handed to slow-path work.
pub struct SlowPathContext<'a> {
	shared: &'a Shared,
	epoch: Epoch,
}

impl SlowPathContext<'_> {
	/// Epoch this slow path runs under.
	pub fn epoch(&self) -> Epoch {
		self.epoch
	}

	/// Returns true once a newer epoch superseded this slow path.
	pub fn is_canceled(&self) -> bool {
		self.shared.epochs.is_canceled(self.epoch)
	}

	/// Fans `items` out over preemptible workers, see [`run_preemptible`].
	pub fn run<I, R, F>(&self, items: Vec<I>, work: F) -> kestrel_worker::Result<Vec<R>>
	where
		I: Sync,
		R: Send,
		F: Fn(&I) -> R + Sync,
	{
		run_preemptible(
			&self.shared.manager,
			&self.shared.epochs,
			self.epoch,
			&self.shared.slow_path,
			items,
			work,
		)
	}

	/// Runs a pending preemption task now, if any. For work that does not fan out through
	/// [`Self::run`].
	pub fn yield_to_preemption(&self) -> bool {
		self.shared.manager.try_run_scheduled()
	}
}

/// A slow path that has started on the typechecker thread.
#[derive(Debug)]
pub struct SlowPathHandle<R> {
	epoch: Epoch,
	cancel_latency: Option<Duration>,
	result: oneshot::Receiver<Result<R>>,
}

impl<R> SlowPathHandle<R> {
	/// Epoch of the slow path.
	pub fn epoch(&self) -> Epoch {
		self.epoch
	}

	/// How long this slow path waited for a canceled predecessor before starting. `None` when
	/// it did not replace a canceled slow path.
	pub fn cancel_latency(&self) -> Option<Duration> {
		self.cancel_latency
	}

	/// Blocks until the slow path finishes.
	///
	/// Fails with [`kestrel_worker::Error::Canceled`] if the epoch was superseded, even when the
	/// work itself completed, and with [`Error::SlowPathPanicked`] if the work panicked.
	pub fn wait(self) -> Result<R> {
		self.result.blocking_recv().map_err(|_| Error::CoordinatorStopped)?
	}
}

/// A queue-draining preemption task that was scheduled.
#[derive(Debug)]
pub struct QueuePreemption {
	started: Option<oneshot::Receiver<()>>,
	finished: oneshot::Receiver<usize>,
}

impl QueuePreemption {
	/// Blocks until the task begins running.
	pub fn wait_started(&mut self) -> Result<()> {
		match self.started.take() {
			Some(started) => started.blocking_recv().map_err(|_| Error::CoordinatorStopped),
			None => Ok(()),
		}
	}

	/// Blocks until the task finishes, returning the number of messages it handled.
	pub fn wait(self) -> Result<usize> {
		self.finished.blocking_recv().map_err(|_| Error::CoordinatorStopped)
	}
}
