//! Read-only diagnostic views.
//!
//! Views are plain serializable snapshots taken under the registry lock; they
//! never hold references into registry state.

use form_broker_proto::{
	CallerUid, FormId, HostToken, PersistedFormEntry, ProviderKey, RefreshSchedule,
};
use serde::Serialize;

use super::record::FormRecord;
use super::{FormRegistry, QuotaUsage, RegistryState};
use crate::error::{FormError, Result};

/// Diagnostic view of one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormView {
	/// Form id.
	pub form_id: FormId,
	/// Provider that created the form.
	pub provider: ProviderKey,
	/// Form name within the provider.
	pub form_name: String,
	/// Dimension.
	pub specification_id: i32,
	/// Counts against the temporary pool.
	pub temporary: bool,
	/// Owner uids, sorted.
	pub owner_uids: Vec<CallerUid>,
	/// False for forms only known to the durable mirror.
	pub live: bool,
	/// Content must be refreshed from the provider.
	pub need_refresh: bool,
	/// The provider was upgraded since the content was produced.
	pub version_upgrade: bool,
	/// Periodic refresh is enabled.
	pub enable_update: bool,
	/// Periodic refresh schedule.
	pub schedule: RefreshSchedule,
	/// A content snapshot is cached.
	pub has_snapshot: bool,
	/// Hosts currently holding the form, sorted.
	pub hosts: Vec<HostToken>,
}

/// Refresh timer held for a live form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerView {
	/// Form id.
	pub form_id: FormId,
	/// Armed schedule.
	pub schedule: RefreshSchedule,
	/// Hosts with an active subscription.
	pub subscribers: usize,
}

/// Subscription flags of one form on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostFormView {
	/// Form id.
	pub form_id: FormId,
	/// Live updates are delivered.
	pub subscribed: bool,
	/// Last reported visibility.
	pub visible: bool,
	/// An update was missed while hidden or released.
	pub need_refresh: bool,
}

/// Diagnostic view of one host binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostView {
	/// Host binding.
	pub token: HostToken,
	/// Caller identity bound to the host.
	pub uid: CallerUid,
	/// Held forms, ordered by id.
	pub forms: Vec<HostFormView>,
}

impl FormRegistry {
	/// Dumps one live or persisted form.
	///
	/// # Errors
	///
	/// [`FormError::NotFound`] if the id is unknown.
	pub fn dump_by_id(&self, form_id: FormId) -> Result<FormView> {
		let state = self.state.lock();
		let form_id = state.resolve(form_id);
		state
			.view(form_id)
			.ok_or(FormError::NotFound(form_id))
	}

	/// Dumps every live and persisted form of a provider bundle, ordered by id.
	pub fn dump_by_bundle(&self, bundle: &str) -> Vec<FormView> {
		let state = self.state.lock();
		state.views(|key| key.bundle_name == bundle)
	}

	/// Dumps every live and persisted form, ordered by id.
	pub fn dump_all(&self) -> Vec<FormView> {
		self.state.lock().views(|_| true)
	}

	/// Lists the armed refresh timers, ordered by form id.
	pub fn dump_timer_state(&self) -> Vec<TimerView> {
		let state = self.state.lock();
		let mut timers: Vec<TimerView> = state
			.records
			.values()
			.filter(|r| r.timer_armed)
			.map(|r| TimerView {
				form_id: r.form_id,
				schedule: r.schedule,
				subscribers: state.hosts.subscribers(r.form_id),
			})
			.collect();
		timers.sort_by_key(|t| t.form_id);
		timers
	}

	/// Lists every host binding, ordered by token.
	pub fn dump_hosts(&self) -> Vec<HostView> {
		let state = self.state.lock();
		let mut hosts: Vec<HostView> = state
			.hosts
			.iter()
			.map(|h| HostView {
				token: h.token,
				uid: h.uid,
				forms: h
					.forms
					.iter()
					.map(|(form_id, f)| HostFormView {
						form_id: *form_id,
						subscribed: f.subscribed,
						visible: f.visible,
						need_refresh: f.need_refresh,
					})
					.collect(),
			})
			.collect();
		hosts.sort_by_key(|h| h.token);
		hosts
	}

	/// Current quota counters.
	pub fn quota_usage(&self) -> QuotaUsage {
		self.state.lock().quota.usage()
	}

	/// Number of persisted forms created by one module of a provider bundle.
	pub fn count_by_module(&self, bundle: &str, module: &str) -> usize {
		self.state.lock().mirror.count_by_module(bundle, module)
	}

	/// Number of live records.
	pub fn live_count(&self) -> usize {
		self.state.lock().records.len()
	}
}

impl RegistryState {
	fn view(&self, form_id: FormId) -> Option<FormView> {
		match self.records.get(&form_id) {
			Some(record) => Some(self.live_view(record)),
			None => self.mirror.get(form_id).map(|e| self.persisted_view(e)),
		}
	}

	fn views(&self, filter: impl Fn(&ProviderKey) -> bool) -> Vec<FormView> {
		let mut views: Vec<FormView> = self
			.records
			.values()
			.filter(|r| filter(&r.key))
			.map(|r| self.live_view(r))
			.collect();
		views.extend(
			self.mirror
				.load_all()
				.filter(|e| !self.records.contains_key(&e.form_id))
				.filter(|e| filter(&e.provider_key()))
				.map(|e| self.persisted_view(e)),
		);
		views.sort_by_key(|v| v.form_id);
		views
	}

	fn live_view(&self, record: &FormRecord) -> FormView {
		FormView {
			form_id: record.form_id,
			provider: record.key.clone(),
			form_name: record.form_name.clone(),
			specification_id: record.specification_id,
			temporary: record.temporary,
			owner_uids: record.owner_uids.iter().copied().collect(),
			live: true,
			need_refresh: record.need_refresh,
			version_upgrade: record.version_upgrade,
			enable_update: record.enable_update,
			schedule: record.schedule,
			has_snapshot: self.mirror.snapshot(record.form_id).is_some(),
			hosts: self.hosts.holders(record.form_id).collect(),
		}
	}

	fn persisted_view(&self, entry: &PersistedFormEntry) -> FormView {
		FormView {
			form_id: entry.form_id,
			provider: entry.provider_key(),
			form_name: entry.form_name.clone(),
			specification_id: entry.specification_id,
			temporary: entry.temporary,
			owner_uids: entry.owner_uids.clone(),
			live: false,
			need_refresh: true,
			version_upgrade: false,
			enable_update: false,
			schedule: RefreshSchedule::Disabled,
			has_snapshot: self.mirror.snapshot(entry.form_id).is_some(),
			hosts: Vec::new(),
		}
	}
}
