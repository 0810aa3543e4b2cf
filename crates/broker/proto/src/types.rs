//! Data types shared between the form registry and its collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Globally unique form identifier.
///
/// The high 32 bits carry the broker session key, the low 32 bits a
/// monotonically increasing sequence. Zero means "no id yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormId(pub u64);

impl FormId {
	/// The absent id; `AddForm` with this id allocates a new one.
	pub const NONE: FormId = FormId(0);

	/// Builds an id from a session key and a sequence number.
	#[must_use]
	pub const fn compose(session_key: u32, seq: u32) -> Self {
		Self(((session_key as u64) << 32) | seq as u64)
	}

	/// Session key half of the id.
	#[must_use]
	pub const fn high(self) -> u32 {
		(self.0 >> 32) as u32
	}

	/// Sequence half of the id.
	#[must_use]
	pub const fn low(self) -> u32 {
		self.0 as u32
	}

	/// Returns true for the absent id.
	#[must_use]
	pub const fn is_none(self) -> bool {
		self.0 == 0
	}
}

impl fmt::Display for FormId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Authenticated identity of the application issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallerUid(pub i32);

impl fmt::Display for CallerUid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Opaque identity of a host binding.
///
/// The transport maps its connection handles onto these tokens; the registry
/// only compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostToken(pub u64);

impl fmt::Display for HostToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "host#{}", self.0)
	}
}

/// Secondary index key identifying the provider of a form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
	/// Provider bundle name.
	pub bundle_name: String,
	/// Provider module name.
	pub module_name: String,
	/// Provider ability name.
	pub ability_name: String,
}

impl ProviderKey {
	/// Creates a key from its three components.
	pub fn new(
		bundle_name: impl Into<String>,
		module_name: impl Into<String>,
		ability_name: impl Into<String>,
	) -> Self {
		Self {
			bundle_name: bundle_name.into(),
			module_name: module_name.into(),
			ability_name: ability_name.into(),
		}
	}
}

impl fmt::Display for ProviderKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}/{}/{}",
			self.bundle_name, self.module_name, self.ability_name
		)
	}
}

/// Request spec supplied by a host when adding a form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSpec {
	/// Provider bundle name.
	pub bundle_name: String,
	/// Provider module name.
	pub module_name: String,
	/// Provider ability name.
	pub ability_name: String,
	/// Form name within the provider.
	pub form_name: String,
	/// Layout/dimension selector.
	pub specification_id: i32,
	/// Temporary forms have a single owner and use the global temporary pool.
	pub temporary: bool,
	/// Whether the provider asked for periodic updates.
	pub update_enabled: bool,
	/// Update interval in configuration units (30 minutes each); 0 selects
	/// `scheduled_update_time` instead.
	pub update_duration: i32,
	/// Daily update time as `"HH:MM"`.
	pub scheduled_update_time: String,
	/// Whether the provider wants visibility notifications.
	pub visible_notify: bool,
}

impl FormSpec {
	/// Creates a spec with no update schedule.
	pub fn new(key: &ProviderKey, form_name: impl Into<String>, specification_id: i32) -> Self {
		Self {
			bundle_name: key.bundle_name.clone(),
			module_name: key.module_name.clone(),
			ability_name: key.ability_name.clone(),
			form_name: form_name.into(),
			specification_id,
			temporary: false,
			update_enabled: false,
			update_duration: 0,
			scheduled_update_time: String::new(),
			visible_notify: false,
		}
	}

	/// Marks the spec as temporary.
	#[must_use]
	pub fn temporary(mut self, temporary: bool) -> Self {
		self.temporary = temporary;
		self
	}

	/// Provider key of this spec.
	#[must_use]
	pub fn provider_key(&self) -> ProviderKey {
		ProviderKey::new(&self.bundle_name, &self.module_name, &self.ability_name)
	}
}

/// Form description returned to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormJsInfo {
	/// Form id.
	pub form_id: FormId,
	/// Provider bundle name.
	pub bundle_name: String,
	/// Provider module name.
	pub module_name: String,
	/// Provider ability name.
	pub ability_name: String,
	/// Form name within the provider.
	pub form_name: String,
	/// Layout/dimension selector.
	pub specification_id: i32,
	/// Temporary flag at the time of the call.
	pub temporary: bool,
	/// Cached content snapshot, if the provider already supplied one.
	pub data: Option<String>,
}

/// Durable mirror of a form record's identity fields and owner set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFormEntry {
	/// Form id.
	pub form_id: FormId,
	/// Provider bundle name.
	pub bundle_name: String,
	/// Provider module name.
	pub module_name: String,
	/// Provider ability name.
	pub ability_name: String,
	/// Form name within the provider.
	pub form_name: String,
	/// Layout/dimension selector.
	pub specification_id: i32,
	/// Temporary flag.
	pub temporary: bool,
	/// Owners, sorted ascending.
	pub owner_uids: Vec<CallerUid>,
}

impl PersistedFormEntry {
	/// Provider key of this entry.
	#[must_use]
	pub fn provider_key(&self) -> ProviderKey {
		ProviderKey::new(&self.bundle_name, &self.module_name, &self.ability_name)
	}

	/// Returns true if `uid` is among the persisted owners.
	#[must_use]
	pub fn has_owner(&self, uid: CallerUid) -> bool {
		self.owner_uids.binary_search(&uid).is_ok()
	}

	/// Returns true if the identity fields match `spec` exactly.
	#[must_use]
	pub fn matches(&self, spec: &FormSpec) -> bool {
		self.bundle_name == spec.bundle_name
			&& self.module_name == spec.module_name
			&& self.ability_name == spec.ability_name
			&& self.form_name == spec.form_name
			&& self.specification_id == spec.specification_id
	}
}

/// Refresh schedule derived from a form's update configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshSchedule {
	/// No periodic refresh.
	#[default]
	Disabled,
	/// Refresh every `millis` milliseconds.
	Interval {
		/// Period in milliseconds.
		millis: u64,
	},
	/// Refresh once a day at the given wall-clock time.
	DailyAt {
		/// Hour, `0..=23`.
		hour: u8,
		/// Minute, `0..=59`.
		minute: u8,
	},
}

impl RefreshSchedule {
	/// Returns true unless the schedule is [`RefreshSchedule::Disabled`].
	#[must_use]
	pub fn is_enabled(self) -> bool {
		!matches!(self, Self::Disabled)
	}
}

/// Metadata pushed by a provider for one of its forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUpdate {
	/// Provider version changed; cached snapshots are stale.
	pub version_upgrade: Option<bool>,
	/// The form needs a refresh on next visibility.
	pub need_refresh: Option<bool>,
	/// Provider enabled or disabled periodic updates.
	pub enable_update: Option<bool>,
	/// New refresh schedule.
	pub schedule: Option<RefreshSchedule>,
	/// New content snapshot.
	pub data: Option<String>,
}

/// External signals consumed by the lifecycle reactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
	/// A provider package was uninstalled.
	ProviderRemoved(ProviderKey),
	/// A provider package had its data cleared.
	ProviderDataCleared(ProviderKey),
	/// A host connection was lost.
	HostProcessDied(HostToken),
	/// A host application had its data reset.
	HostDataCleared(CallerUid),
}

/// Wire-level error classification reported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
	/// Malformed id or empty identity fields.
	InvalidParam,
	/// The caller does not hold the targeted form.
	NotOwner,
	/// The supplied id's stored identity disagrees with the request.
	ConfigMismatch,
	/// No live or persisted record for the id.
	NotFound,
	/// Admission refused by the quota guard.
	QuotaExceeded,
	/// The durable store rejected a write.
	Storage,
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::InvalidParam => "invalid parameter",
			Self::NotOwner => "caller does not own the form",
			Self::ConfigMismatch => "form identity mismatch",
			Self::NotFound => "form not found",
			Self::QuotaExceeded => "form quota exceeded",
			Self::Storage => "durable store failure",
		};
		f.write_str(s)
	}
}
