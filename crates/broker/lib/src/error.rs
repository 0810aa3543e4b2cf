//! Error types for registry operations and configuration loading.

use std::fmt;
use std::path::PathBuf;

use form_broker_proto::{CallerUid, ErrorCode, FormId};
use thiserror::Error;

use crate::storage::StorageError;

/// Which quota ceiling refused an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaKind {
	/// Normal forms of a single provider bundle.
	BundleNormal,
	/// Normal forms across all bundles.
	GlobalNormal,
	/// Temporary forms across all callers.
	GlobalTemporary,
}

impl fmt::Display for QuotaKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::BundleNormal => "per-bundle normal form cap",
			Self::GlobalNormal => "global normal form cap",
			Self::GlobalTemporary => "global temporary form cap",
		};
		f.write_str(s)
	}
}

/// Errors returned by [`crate::FormRegistry`] operations.
///
/// Every variant is a synchronous, non-fatal result. None of them leave a
/// partially applied mutation behind.
#[derive(Debug, Error)]
pub enum FormError {
	/// Malformed id, empty identity field or unknown host binding.
	#[error("invalid parameter: {0}")]
	InvalidParam(&'static str),

	/// The caller does not hold the targeted form.
	#[error("caller {uid} does not own form {form_id}")]
	NotOwner {
		/// Targeted form.
		form_id: FormId,
		/// Caller identity.
		uid: CallerUid,
	},

	/// An explicit id was supplied whose stored identity disagrees with the request.
	#[error("form {form_id} does not match the requested provider or dimension")]
	ConfigMismatch {
		/// Targeted form.
		form_id: FormId,
	},

	/// No live or persisted record exists for the id.
	#[error("form {0} not found")]
	NotFound(FormId),

	/// The quota guard refused admission.
	#[error("quota exceeded: {0}")]
	QuotaExceeded(QuotaKind),

	/// The durable store rejected a write; nothing was applied.
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
}

impl FormError {
	/// Wire classification of this error.
	#[must_use]
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::InvalidParam(_) => ErrorCode::InvalidParam,
			Self::NotOwner { .. } => ErrorCode::NotOwner,
			Self::ConfigMismatch { .. } => ErrorCode::ConfigMismatch,
			Self::NotFound(_) => ErrorCode::NotFound,
			Self::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
			Self::Storage(_) => ErrorCode::Storage,
		}
	}
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, FormError>;

/// Errors that can occur when loading the registry configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading the configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or types.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value parsed but violates a registry constraint.
	#[error("invalid configuration: {0}")]
	Invalid(String),
}
