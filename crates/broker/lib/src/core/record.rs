//! Live form records and refresh-schedule parsing.

use std::collections::BTreeSet;

use form_broker_proto::{
	CallerUid, FormId, FormJsInfo, FormSpec, PersistedFormEntry, ProviderKey, RefreshSchedule,
};

/// Smallest update interval, in configuration units.
pub(crate) const MIN_CONFIG_DURATION: i32 = 1;
/// Largest update interval, in configuration units (seven days).
pub(crate) const MAX_CONFIG_DURATION: i32 = 2 * 24 * 7;
/// Length of one configuration unit in milliseconds (thirty minutes).
pub(crate) const CONFIG_DURATION_MS: u64 = 30 * 60 * 1000;

/// Derives the refresh schedule requested by a spec.
///
/// A positive `update_duration` wins and is clamped to seven days at most;
/// otherwise a well-formed `"HH:MM"` selects a daily timer. Anything else,
/// including `update_enabled == false`, disables periodic refresh.
#[must_use]
pub fn parse_schedule(spec: &FormSpec) -> RefreshSchedule {
	if !spec.update_enabled {
		return RefreshSchedule::Disabled;
	}
	if spec.update_duration > 0 {
		let units = spec
			.update_duration
			.clamp(MIN_CONFIG_DURATION, MAX_CONFIG_DURATION);
		return RefreshSchedule::Interval {
			millis: units as u64 * CONFIG_DURATION_MS,
		};
	}
	parse_daily(&spec.scheduled_update_time).unwrap_or(RefreshSchedule::Disabled)
}

fn parse_daily(text: &str) -> Option<RefreshSchedule> {
	let (hour, minute) = text.trim().split_once(':')?;
	let hour: u8 = hour.trim().parse().ok()?;
	let minute: u8 = minute.trim().parse().ok()?;
	(hour <= 23 && minute <= 59).then_some(RefreshSchedule::DailyAt { hour, minute })
}

/// One live form.
///
/// Owned exclusively by the registry state; the host table refers to it by id
/// only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormRecord {
	pub form_id: FormId,
	pub key: ProviderKey,
	pub form_name: String,
	pub specification_id: i32,
	pub temporary: bool,
	pub owner_uids: BTreeSet<CallerUid>,
	pub need_refresh: bool,
	pub version_upgrade: bool,
	pub enable_update: bool,
	pub schedule: RefreshSchedule,
	pub visible_notify: bool,
	/// Whether the scheduler currently holds a timer for this form.
	pub timer_armed: bool,
}

impl FormRecord {
	pub fn from_spec(form_id: FormId, spec: &FormSpec, owner: CallerUid) -> Self {
		let schedule = parse_schedule(spec);
		Self {
			form_id,
			key: spec.provider_key(),
			form_name: spec.form_name.clone(),
			specification_id: spec.specification_id,
			temporary: spec.temporary,
			owner_uids: BTreeSet::from([owner]),
			need_refresh: false,
			version_upgrade: false,
			enable_update: schedule.is_enabled(),
			schedule,
			visible_notify: spec.visible_notify,
			timer_armed: false,
		}
	}

	/// Rebuilds a live record from its persisted entry.
	///
	/// Identity and owners come from the entry; update settings come from the
	/// spec of the request that brought the form back, if any.
	pub fn from_persisted(entry: &PersistedFormEntry, spec: Option<&FormSpec>) -> Self {
		let schedule = spec.map(parse_schedule).unwrap_or_default();
		Self {
			form_id: entry.form_id,
			key: entry.provider_key(),
			form_name: entry.form_name.clone(),
			specification_id: entry.specification_id,
			temporary: entry.temporary,
			owner_uids: entry.owner_uids.iter().copied().collect(),
			need_refresh: true,
			version_upgrade: false,
			enable_update: schedule.is_enabled(),
			schedule,
			visible_notify: spec.is_some_and(|s| s.visible_notify),
			timer_armed: false,
		}
	}

	/// Durable form of this record with an explicit owner set.
	pub fn persisted_with(&self, owners: &BTreeSet<CallerUid>) -> PersistedFormEntry {
		PersistedFormEntry {
			form_id: self.form_id,
			bundle_name: self.key.bundle_name.clone(),
			module_name: self.key.module_name.clone(),
			ability_name: self.key.ability_name.clone(),
			form_name: self.form_name.clone(),
			specification_id: self.specification_id,
			temporary: self.temporary,
			owner_uids: owners.iter().copied().collect(),
		}
	}

	pub fn to_persisted(&self) -> PersistedFormEntry {
		self.persisted_with(&self.owner_uids)
	}

	pub fn matches(&self, spec: &FormSpec) -> bool {
		self.key.bundle_name == spec.bundle_name
			&& self.key.module_name == spec.module_name
			&& self.key.ability_name == spec.ability_name
			&& self.form_name == spec.form_name
			&& self.specification_id == spec.specification_id
	}

	/// Spec equivalent of this record, used for provider acquisition.
	pub fn spec(&self) -> FormSpec {
		let mut spec = FormSpec::new(&self.key, &self.form_name, self.specification_id);
		spec.temporary = self.temporary;
		spec.update_enabled = self.enable_update;
		spec.visible_notify = self.visible_notify;
		match self.schedule {
			RefreshSchedule::Interval { millis } => {
				spec.update_duration = (millis / CONFIG_DURATION_MS) as i32;
			}
			RefreshSchedule::DailyAt { hour, minute } => {
				spec.scheduled_update_time = format!("{hour:02}:{minute:02}");
			}
			RefreshSchedule::Disabled => {}
		}
		spec
	}

	pub fn js_info(&self, data: Option<String>) -> FormJsInfo {
		FormJsInfo {
			form_id: self.form_id,
			bundle_name: self.key.bundle_name.clone(),
			module_name: self.key.module_name.clone(),
			ability_name: self.key.ability_name.clone(),
			form_name: self.form_name.clone(),
			specification_id: self.specification_id,
			temporary: self.temporary,
			data,
		}
	}

	/// Whether a periodic timer should run given the number of active subscribers.
	pub fn wants_timer(&self, subscribers: usize) -> bool {
		self.enable_update && self.schedule.is_enabled() && subscribers > 0
	}
}
