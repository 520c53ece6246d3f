//! Server settings.

use std::path::Path;
use std::sync::Arc;

use kestrel_worker::SlowPathConfig;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::policy::{MethodAllowList, NeverPreempt, PreemptionPolicy};

/// Settings for the typecheck coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
	/// Allow messages to preempt a running slow path.
	#[serde(default = "default_enable_preemption")]
	pub enable_preemption: bool,
	/// Methods allowed to preempt. Empty means none.
	#[serde(default)]
	pub preemptible_methods: Vec<String>,
	/// Slow-path worker tuning.
	#[serde(default)]
	pub slow_path: SlowPathConfig,
}

fn default_enable_preemption() -> bool {
	true
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			enable_preemption: default_enable_preemption(),
			preemptible_methods: Vec::new(),
			slow_path: SlowPathConfig::default(),
		}
	}
}

impl ServerConfig {
	/// Parses settings from TOML text. Missing keys take their defaults.
	pub fn from_toml_str(raw: &str) -> Result<Self> {
		Ok(toml::from_str(raw)?)
	}

	/// Reads settings from a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let raw = std::fs::read_to_string(path.as_ref())?;
		let config = Self::from_toml_str(&raw)?;
		tracing::debug!(path = %path.as_ref().display(), ?config, "loaded server config");
		Ok(config)
	}

	/// Builds the preemption policy these settings describe.
	pub fn policy(&self) -> Arc<dyn PreemptionPolicy> {
		if self.enable_preemption {
			Arc::new(MethodAllowList::new(self.preemptible_methods.iter().cloned()))
		} else {
			Arc::new(NeverPreempt)
		}
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use kestrel_lsp::InboundMessage;
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::Error;

	#[test]
	fn empty_document_uses_defaults() {
		let config = ServerConfig::from_toml_str("").unwrap();
		assert_eq!(config, ServerConfig::default());
		assert!(config.enable_preemption);
		assert!(config.preemptible_methods.is_empty());
	}

	#[test]
	fn parses_nested_slow_path_table() {
		let config = ServerConfig::from_toml_str(
			r#"
			preemptible_methods = ["textDocument/hover"]

			[slow_path]
			worker_threads = 0
			yield_every = 8
			"#,
		)
		.unwrap();
		assert_eq!(config.preemptible_methods, vec!["textDocument/hover".to_owned()]);
		assert_eq!(config.slow_path.worker_threads, 0);
		assert_eq!(config.slow_path.yield_every, 8);
		assert_eq!(config.slow_path.block_interval_ms, SlowPathConfig::default().block_interval_ms);
	}

	#[test]
	fn rejects_wrong_types() {
		let err = ServerConfig::from_toml_str("enable_preemption = 3").unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn loads_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "enable_preemption = false").unwrap();
		let config = ServerConfig::load(file.path()).unwrap();
		assert!(!config.enable_preemption);

		let missing = ServerConfig::load(file.path().with_extension("missing"));
		assert!(matches!(missing, Err(Error::Io(_))));
	}

	#[test]
	fn disabled_preemption_ignores_allow_list() {
		let hover = InboundMessage::from_client(r#"{"jsonrpc":"2.0","id":1,"method":"textDocument/hover"}"#);
		let mut config = ServerConfig {
			preemptible_methods: vec!["textDocument/hover".into()],
			..ServerConfig::default()
		};
		assert!(config.policy().can_preempt(&hover));
		config.enable_preemption = false;
		assert!(!config.policy().can_preempt(&hover));
	}
}
