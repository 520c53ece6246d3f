use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kestrel_lsp::{InboundMessage, MessageId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use super::*;
use crate::{MethodAllowList, SlowPathConfig};

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> ServerConfig {
	ServerConfig {
		slow_path: SlowPathConfig {
			worker_threads: 2,
			yield_every: 1,
			block_interval_ms: 5,
		},
		..ServerConfig::default()
	}
}

fn dedicated() -> TypecheckerCoordinator {
	init_tracing();
	let mut coordinator = TypecheckerCoordinator::new(&config());
	coordinator.start_typechecker_thread().unwrap();
	coordinator
}

/// Starts a slow path over `items` items that each take a millisecond until `release` is set.
fn start_slow_path(
	coordinator: &TypecheckerCoordinator,
	items: u32,
	release: &Arc<AtomicBool>,
) -> SlowPathHandle<usize> {
	let epoch = coordinator.epochs().advance_epoch();
	let release = Arc::clone(release);
	coordinator
		.typecheck_on_slow_path(epoch, move |ctx: &SlowPathContext<'_>| {
			let out = ctx.run((0..items).collect(), |_: &u32| {
				if !release.load(Ordering::Acquire) {
					std::thread::sleep(Duration::from_millis(1));
				}
			})?;
			Ok(out.len())
		})
		.unwrap()
}

fn request(id: i32, method: &str) -> InboundMessage {
	InboundMessage::from_client(&format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"{method}"}}"#))
}

#[test]
fn inline_runs_on_caller() {
	let coordinator = TypecheckerCoordinator::new(&config());
	let caller = std::thread::current().id();
	let ran_on = coordinator
		.sync_run(RunMode::Preemptible, || std::thread::current().id())
		.unwrap();
	assert_eq!(ran_on, caller);
	assert!(!coordinator.is_dedicated());
}

#[test]
fn inline_slow_path_completes_before_returning() {
	let coordinator = TypecheckerCoordinator::new(&config());
	let handle = coordinator
		.typecheck_on_slow_path(3, |ctx: &SlowPathContext<'_>| {
			assert_eq!(ctx.epoch(), 3);
			ctx.run(vec![1, 2, 3], |n: &i32| n * 10)
		})
		.unwrap();

	let status = coordinator.epochs().status();
	assert!(!status.slow_path_running);
	assert_eq!(status.last_committed, Some(3));
	assert_eq!(handle.wait().unwrap(), vec![10, 20, 30]);
}

#[test]
fn dedicated_thread_runs_tasks_in_order() {
	let mut coordinator = dedicated();
	assert!(matches!(coordinator.start_typechecker_thread(), Err(Error::AlreadyStarted)));

	let seen = Arc::new(Mutex::new(Vec::new()));
	for n in 0..5 {
		let seen = Arc::clone(&seen);
		let name = coordinator
			.sync_run(RunMode::Blocking, move || {
				seen.lock().push(n);
				std::thread::current().name().map(str::to_owned)
			})
			.unwrap();
		assert_eq!(name.as_deref(), Some("typechecker"));
	}
	assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn preemptible_task_runs_while_slow_path_is_paused() {
	let coordinator = dedicated();
	let release = Arc::new(AtomicBool::new(false));
	let handle = start_slow_path(&coordinator, 20_000, &release);
	let epoch = handle.epoch();
	assert!(coordinator.epochs().status().slow_path_running);

	let answer = coordinator.sync_run(RunMode::Preemptible, || 42).unwrap();

	assert_eq!(answer, 42);
	assert!(coordinator.epochs().status().slow_path_running);
	assert!(!coordinator.manager().has_pending());
	release.store(true, Ordering::Release);
	assert_eq!(handle.wait().unwrap(), 20_000);
	assert_eq!(coordinator.epochs().status().last_committed, Some(epoch));
}

#[test]
fn blocking_task_queues_behind_slow_path() {
	let coordinator = dedicated();
	let release = Arc::new(AtomicBool::new(false));
	let handle = start_slow_path(&coordinator, 100, &release);

	coordinator.sync_run(RunMode::Blocking, || ()).unwrap();

	assert!(!coordinator.epochs().status().slow_path_running);
	assert_eq!(handle.wait().unwrap(), 100);
}

#[test]
fn canceled_slow_path_is_not_preempted_and_reports_cancellation() {
	let coordinator = dedicated();
	let release = Arc::new(AtomicBool::new(false));
	let handle = start_slow_path(&coordinator, 20_000, &release);
	let epoch = handle.epoch();

	assert!(coordinator.epochs().try_cancel_slow_path(epoch + 1));
	assert!(!coordinator.epochs().try_cancel_slow_path(epoch + 2));

	coordinator.sync_run(RunMode::Preemptible, || ()).unwrap();
	assert!(!coordinator.epochs().status().slow_path_running);

	let err = handle.wait().unwrap_err();
	assert!(matches!(err, Error::Slow(kestrel_worker::Error::Canceled { epoch: e }) if e == epoch));
	assert_eq!(coordinator.epochs().status().last_committed, None);
}

#[test]
fn disabled_preemption_always_queues() {
	init_tracing();
	let mut coordinator = TypecheckerCoordinator::new(&ServerConfig {
		enable_preemption: false,
		..config()
	});
	coordinator.start_typechecker_thread().unwrap();
	let release = Arc::new(AtomicBool::new(false));
	let handle = start_slow_path(&coordinator, 100, &release);

	coordinator.sync_run(RunMode::Preemptible, || ()).unwrap();

	assert!(!coordinator.epochs().status().slow_path_running);
	handle.wait().unwrap();
}

#[test]
fn queue_preemption_drains_preemptible_head() {
	let coordinator = dedicated();
	let queue = Arc::new(PendingQueue::new());
	let policy: Arc<dyn PreemptionPolicy> = Arc::new(MethodAllowList::new(["textDocument/hover"]));
	let handled = Arc::new(Mutex::new(Vec::new()));
	let handler = {
		let handled = Arc::clone(&handled);
		move |msg: InboundMessage| handled.lock().push(msg.id().cloned())
	};

	queue.push(request(1, "textDocument/hover"));
	assert!(
		coordinator
			.try_preempt_queue(Arc::clone(&queue), Arc::clone(&policy), handler.clone())
			.is_none(),
		"no slow path is running"
	);

	queue.push(request(2, "textDocument/hover"));
	queue.push(request(3, "textDocument/rename"));
	queue.push(request(4, "textDocument/hover"));

	let release = Arc::new(AtomicBool::new(false));
	let handle = start_slow_path(&coordinator, 20_000, &release);

	let mut preemption = coordinator
		.try_preempt_queue(Arc::clone(&queue), Arc::clone(&policy), handler)
		.unwrap();
	preemption.wait_started().unwrap();
	assert_eq!(preemption.wait().unwrap(), 2);

	assert_eq!(
		*handled.lock(),
		vec![Some(MessageId::Int(1)), Some(MessageId::Int(2))]
	);
	assert_eq!(queue.len(), 2);
	assert!(coordinator.epochs().status().slow_path_running);

	release.store(true, Ordering::Release);
	handle.wait().unwrap();
}

#[test]
fn queue_preemption_requires_preemptible_head() {
	let coordinator = dedicated();
	let queue = Arc::new(PendingQueue::new());
	queue.push(request(1, "textDocument/rename"));
	let release = Arc::new(AtomicBool::new(true));
	let handle = start_slow_path(&coordinator, 1_000, &release);

	let policy: Arc<dyn PreemptionPolicy> = Arc::new(MethodAllowList::new(["textDocument/hover"]));
	assert!(coordinator.try_preempt_queue(queue, policy, |_| {}).is_none());
	handle.wait().unwrap();
}

#[test]
fn shutdown_stops_accepting_work() {
	let mut coordinator = dedicated();
	coordinator.sync_run(RunMode::Blocking, || ()).unwrap();
	coordinator.shutdown().unwrap();
	coordinator.shutdown().unwrap();

	assert!(matches!(coordinator.sync_run(RunMode::Blocking, || ()), Err(Error::CoordinatorStopped)));
	assert!(matches!(coordinator.start_typechecker_thread(), Err(Error::CoordinatorStopped)));
}

#[test]
fn typechecker_thread_takes_over_after_inline_slow_path() {
	init_tracing();
	let mut coordinator = TypecheckerCoordinator::new(&config());
	let inline = coordinator
		.typecheck_on_slow_path(1, |ctx: &SlowPathContext<'_>| ctx.run(vec![1, 2, 3], |n: &u32| n + 1))
		.unwrap();
	assert_eq!(inline.wait().unwrap(), vec![2, 3, 4]);

	coordinator.start_typechecker_thread().unwrap();
	let dedicated = coordinator
		.typecheck_on_slow_path(2, |ctx: &SlowPathContext<'_>| ctx.run(vec![1, 2, 3], |n: &u32| n * 2))
		.unwrap();
	assert_eq!(dedicated.wait().unwrap(), vec![2, 4, 6]);

	let name = coordinator
		.sync_run(RunMode::Blocking, || std::thread::current().name().map(str::to_owned))
		.unwrap();
	assert_eq!(name.as_deref(), Some("typechecker"));
}

#[test]
fn panicking_slow_path_still_runs_accepted_preemption() {
	let coordinator = dedicated();
	let go = Arc::new(AtomicBool::new(false));
	let epoch = coordinator.epochs().advance_epoch();
	let handle = {
		let go = Arc::clone(&go);
		coordinator
			.typecheck_on_slow_path(epoch, move |_: &SlowPathContext<'_>| -> kestrel_worker::Result<()> {
				while !go.load(Ordering::Acquire) {
					std::thread::sleep(Duration::from_millis(1));
				}
				panic!("slow path exploded");
			})
			.unwrap()
	};

	let answer = std::thread::scope(|s| {
		s.spawn(|| {
			while !coordinator.manager().has_pending() {
				std::thread::sleep(Duration::from_millis(1));
			}
			go.store(true, Ordering::Release);
		});
		coordinator.sync_run(RunMode::Preemptible, || 7)
	});

	assert_eq!(answer.unwrap(), 7);
	assert!(matches!(handle.wait(), Err(Error::SlowPathPanicked(msg)) if msg.contains("exploded")));
	assert!(!coordinator.epochs().status().slow_path_running);
	assert_eq!(coordinator.sync_run(RunMode::Blocking, || "alive").unwrap(), "alive");
}

#[test]
fn replacing_canceled_slow_path_reports_cancel_latency() {
	let coordinator = dedicated();
	let release = Arc::new(AtomicBool::new(false));
	let first = start_slow_path(&coordinator, 20_000, &release);
	assert_eq!(first.cancel_latency(), None);

	let next = first.epoch() + 1;
	assert!(coordinator.epochs().try_cancel_slow_path(next));
	let second = coordinator
		.typecheck_on_slow_path(next, |_: &SlowPathContext<'_>| Ok(()))
		.unwrap();

	assert!(second.cancel_latency().is_some());
	assert!(matches!(first.wait(), Err(Error::Slow(kestrel_worker::Error::Canceled { .. }))));
	second.wait().unwrap();
	assert_eq!(coordinator.epochs().status().last_committed, Some(next));
}
