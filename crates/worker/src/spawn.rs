use std::thread::{JoinHandle, Scope, ScopedJoinHandle};

use crate::ThreadClass;

/// Spawns a dedicated named OS thread with shared thread classification metadata.
pub fn spawn_named_thread<F, R>(class: ThreadClass, name: impl Into<String>, f: F) -> std::io::Result<JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(thread_class = class.as_str(), "worker.spawn_named_thread");
	std::thread::Builder::new().name(name.into()).spawn(f)
}

/// Spawns a named thread borrowing from `scope`.
pub fn spawn_scoped_named<'scope, 'env, F, R>(
	scope: &'scope Scope<'scope, 'env>,
	class: ThreadClass,
	name: impl Into<String>,
	f: F,
) -> std::io::Result<ScopedJoinHandle<'scope, R>>
where
	F: FnOnce() -> R + Send + 'scope,
	R: Send + 'scope,
{
	tracing::trace!(thread_class = class.as_str(), "worker.spawn_scoped_named");
	std::thread::Builder::new().name(name.into()).spawn_scoped(scope, f)
}
