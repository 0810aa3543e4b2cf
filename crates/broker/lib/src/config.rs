//! Registry configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock quota policy: 256 normal forms per bundle, 512 normal forms overall
//! and 256 temporary forms shared by all callers.

use std::path::{Path, PathBuf};

use form_broker_proto::paths::default_db_path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Admission ceilings.
	pub quota: QuotaConfig,
	/// Durable store settings.
	pub storage: StorageConfig,
	/// Lifecycle reactor settings.
	pub lifecycle: LifecycleConfig,
}

/// Admission ceilings enforced by the quota guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
	/// Live normal forms per provider bundle.
	pub per_bundle_normal: usize,
	/// Live normal forms across all bundles.
	pub global_normal: usize,
	/// Live temporary forms across all callers.
	pub global_temporary: usize,
}

impl Default for QuotaConfig {
	fn default() -> Self {
		Self {
			per_bundle_normal: 256,
			global_normal: 512,
			global_temporary: 256,
		}
	}
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
	/// Store directory; falls back to [`default_db_path`].
	pub path: Option<PathBuf>,
	/// LMDB map size in MiB.
	pub map_size_mb: usize,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			path: None,
			map_size_mb: 64,
		}
	}
}

/// Lifecycle reactor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
	/// Bound of the reactor's command channel.
	pub channel_capacity: usize,
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			channel_capacity: 256,
		}
	}
}

impl RegistryConfig {
	/// Reads and validates a configuration file.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Io`] if the file cannot be read, and the errors
	/// of [`RegistryConfig::from_toml`] otherwise.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml(&text)
	}

	/// Parses and validates a configuration document.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys and
	/// [`ConfigError::Invalid`] when a value breaks a constraint.
	pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks cross-field constraints.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Invalid`] if a cap or the channel capacity is
	/// zero, or if the per-bundle cap exceeds the global normal cap.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let q = &self.quota;
		for (name, value) in [
			("quota.per_bundle_normal", q.per_bundle_normal),
			("quota.global_normal", q.global_normal),
			("quota.global_temporary", q.global_temporary),
			("storage.map_size_mb", self.storage.map_size_mb),
			("lifecycle.channel_capacity", self.lifecycle.channel_capacity),
		] {
			if value == 0 {
				return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
			}
		}
		if q.per_bundle_normal > q.global_normal {
			return Err(ConfigError::Invalid(format!(
				"quota.per_bundle_normal ({}) exceeds quota.global_normal ({})",
				q.per_bundle_normal, q.global_normal
			)));
		}
		Ok(())
	}

	/// Store directory, with the default applied.
	#[must_use]
	pub fn db_path(&self) -> PathBuf {
		self.storage.path.clone().unwrap_or_else(default_db_path)
	}
}
