//! Latency instrumentation attached to inbound messages.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Marker following one physical message through time traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

impl FlowId {
	/// Allocates a process-unique flow id.
	pub fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw id.
	pub const fn get(self) -> u64 {
		self.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
	Running,
	Canceled,
	Reported,
}

/// Named latency timer.
///
/// Reports its elapsed time through `tracing` when stopped or dropped while running. A canceled
/// timer reports nothing.
#[derive(Debug)]
pub struct Timer {
	name: Cow<'static, str>,
	started: Instant,
	state: TimerState,
}

impl Timer {
	/// Starts a timer now.
	pub fn start(name: impl Into<Cow<'static, str>>) -> Self {
		Self::started_at(name, Instant::now())
	}

	/// Starts a timer with an explicit start instant.
	pub fn started_at(name: impl Into<Cow<'static, str>>, started: Instant) -> Self {
		Self {
			name: name.into(),
			started,
			state: TimerState::Running,
		}
	}

	/// Timer name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Instant the timer started.
	pub fn started(&self) -> Instant {
		self.started
	}

	/// Time since start.
	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	/// Returns true until the timer is stopped or canceled.
	pub fn is_running(&self) -> bool {
		self.state == TimerState::Running
	}

	/// Returns true if the timer was canceled.
	pub fn is_canceled(&self) -> bool {
		self.state == TimerState::Canceled
	}

	/// Stops the timer without reporting.
	pub fn cancel(&mut self) {
		if self.is_running() {
			self.state = TimerState::Canceled;
		}
	}

	/// Stops the timer and reports the elapsed time. Returns `None` if it was already stopped.
	pub fn stop(&mut self) -> Option<Duration> {
		if !self.is_running() {
			return None;
		}
		let elapsed = self.elapsed();
		self.state = TimerState::Reported;
		tracing::debug!(
			target: "kestrel::latency",
			timer = %self.name,
			elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
			"timer"
		);
		Some(elapsed)
	}
}

impl Drop for Timer {
	fn drop(&mut self) {
		self.stop();
	}
}
