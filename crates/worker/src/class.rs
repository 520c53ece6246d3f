/// Execution classes of the server's threads, used for naming and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadClass {
	/// The dedicated typecheck-coordinator thread.
	Typechecker,
	/// Slow-path workers reading shared analysis state.
	SlowPathWorker,
	/// The message-processing thread.
	MessageProcessing,
}

impl ThreadClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Typechecker => "typechecker",
			Self::SlowPathWorker => "slow_path_worker",
			Self::MessageProcessing => "message_processing",
		}
	}
}
