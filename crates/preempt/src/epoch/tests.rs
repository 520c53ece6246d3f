use pretty_assertions::assert_eq;

use super::*;

#[test]
fn fresh_tracker_is_idle() {
	let epochs = TypecheckEpochs::new();
	assert_eq!(
		epochs.status(),
		TypecheckingStatus {
			slow_path_running: false,
			slow_path_canceled: false,
			running_epoch: None,
			current_epoch: 0,
			last_committed: None,
		}
	);
	assert!(!epochs.is_canceled(0));
}

#[test]
fn advancing_marks_older_epochs_stale() {
	let epochs = TypecheckEpochs::new();
	epochs.start_slow_path(1);
	assert!(!epochs.is_canceled(1));

	assert_eq!(epochs.advance_epoch(), 2);
	assert!(epochs.is_canceled(1));
	assert!(!epochs.is_canceled(2));
	assert!(epochs.was_typechecking_canceled());
	assert!(!epochs.finish_slow_path(1));
}

#[test]
fn cancel_requires_running_newer_epoch() {
	let epochs = TypecheckEpochs::new();
	assert!(!epochs.try_cancel_slow_path(3), "nothing running");

	epochs.start_slow_path(3);
	assert!(!epochs.try_cancel_slow_path(3), "not newer");
	assert!(epochs.try_cancel_slow_path(4));
	assert!(!epochs.try_cancel_slow_path(5), "already canceled");

	let status = epochs.status();
	assert!(status.slow_path_running);
	assert!(status.slow_path_canceled);
	assert_eq!(status.current_epoch, 4);
	assert!(epochs.is_canceled(3));

	assert!(!epochs.finish_slow_path(3));
	assert_eq!(epochs.status().last_committed, None);
}

#[test]
fn uncanceled_slow_path_commits() {
	let epochs = TypecheckEpochs::new();
	epochs.start_slow_path(7);
	let observed = epochs.with_epoch_lock(|status| status.running_epoch);
	assert_eq!(observed, Some(7));
	assert!(epochs.finish_slow_path(7));

	let status = epochs.status();
	assert!(!status.slow_path_running);
	assert_eq!(status.last_committed, Some(7));
	assert_eq!(epochs.current_epoch(), 7);
}

#[test]
fn superseded_start_is_born_canceled() {
	let epochs = TypecheckEpochs::new();
	epochs.advance_epoch();
	epochs.advance_epoch();
	epochs.start_slow_path(1);
	assert!(epochs.was_typechecking_canceled());
	assert!(epochs.is_canceled(1));
}

#[test]
fn successful_cancel_is_taken_once() {
	let epochs = TypecheckEpochs::new();
	epochs.start_slow_path(1);
	assert!(!epochs.try_cancel_slow_path(1));
	assert_eq!(epochs.take_canceled_at(), None);

	let before = Instant::now();
	assert!(epochs.try_cancel_slow_path(2));
	let canceled_at = epochs.take_canceled_at().unwrap();
	assert!(canceled_at >= before);
	assert_eq!(epochs.take_canceled_at(), None);
}
