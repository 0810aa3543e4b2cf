//! Collaborator boundary of the registry.
//!
//! The registry decides *when* a provider is called, a timer armed or a host
//! notified; the implementations behind these traits decide *how*. Calls are
//! never made while the registry lock is held: mutations record [`Effect`]s
//! and [`Collaborators::dispatch`] runs them once the critical section ends.

use std::sync::Arc;

use form_broker_proto::{FormId, FormJsInfo, FormSpec, HostToken, ProviderKey, RefreshSchedule};

/// Remote provider entry points.
pub trait ProviderClient: Send + Sync + 'static {
	/// Asks the provider to produce content for a newly live form.
	fn acquire(&self, key: &ProviderKey, form_id: FormId, spec: &FormSpec);

	/// Tells the provider that the last owner of a form went away.
	fn notify_delete(&self, key: &ProviderKey, form_id: FormId);

	/// Asks the provider to refresh the content of a live form.
	fn refresh(&self, key: &ProviderKey, form_id: FormId);
}

/// External timer facility driving periodic refreshes.
pub trait RefreshScheduler: Send + Sync + 'static {
	/// Arms (or re-arms) the refresh timer of a form.
	fn add_timer(&self, form_id: FormId, schedule: RefreshSchedule);

	/// Cancels the refresh timer of a form.
	fn remove_timer(&self, form_id: FormId);
}

/// Push channel towards hosts.
pub trait HostNotifier: Send + Sync + 'static {
	/// Delivers fresh form content to a host.
	fn on_update(&self, token: HostToken, info: &FormJsInfo);

	/// Tells a host that forms it displayed were removed with their provider.
	fn on_uninstall(&self, token: HostToken, form_ids: &[FormId]);
}

/// Transport-side liveness tracking of host bindings.
///
/// Watching arms the death hook; once it fires the transport reports the
/// loss through a [`DeathRecipient`].
pub trait LivenessMonitor: Send + Sync + 'static {
	/// Starts watching a host binding.
	fn watch(&self, token: HostToken);

	/// Stops watching a host binding.
	fn unwatch(&self, token: HostToken);
}

/// Bundle metadata lookup used by startup reconciliation.
pub trait ProviderDirectory: Send + Sync + 'static {
	/// Returns true if the provider is still installed.
	fn provider_exists(&self, key: &ProviderKey) -> bool;
}

/// Peer-liveness notification, invoked by whatever transport is in use.
pub trait DeathRecipient: Send + Sync {
	/// The peer behind `token` is gone.
	fn on_death(&self, token: HostToken);
}

/// Collaborator calls recorded inside the registry's critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
	Acquire {
		key: ProviderKey,
		form_id: FormId,
		spec: FormSpec,
	},
	NotifyDelete {
		key: ProviderKey,
		form_id: FormId,
	},
	Refresh {
		key: ProviderKey,
		form_id: FormId,
	},
	AddTimer {
		form_id: FormId,
		schedule: RefreshSchedule,
	},
	RemoveTimer(FormId),
	PushUpdate {
		token: HostToken,
		info: FormJsInfo,
	},
	Uninstalled {
		token: HostToken,
		form_ids: Vec<FormId>,
	},
	Watch(HostToken),
	Unwatch(HostToken),
}

/// The set of collaborators a registry talks to.
#[derive(Clone)]
pub struct Collaborators {
	/// Provider RPC client.
	pub provider: Arc<dyn ProviderClient>,
	/// Refresh timer facility.
	pub scheduler: Arc<dyn RefreshScheduler>,
	/// Host push channel.
	pub hosts: Arc<dyn HostNotifier>,
	/// Host liveness tracking.
	pub liveness: Arc<dyn LivenessMonitor>,
	/// Bundle metadata lookup.
	pub directory: Arc<dyn ProviderDirectory>,
}

impl Collaborators {
	/// Collaborators that accept every call and do nothing.
	///
	/// The directory reports every provider as installed, so reconciliation
	/// only drops ownerless entries.
	#[must_use]
	pub fn detached() -> Self {
		let detached = Arc::new(Detached);
		Self {
			provider: detached.clone(),
			scheduler: detached.clone(),
			hosts: detached.clone(),
			liveness: detached.clone(),
			directory: detached,
		}
	}

	pub(crate) fn dispatch(&self, effects: Vec<Effect>) {
		for effect in effects {
			match effect {
				Effect::Acquire { key, form_id, spec } => {
					self.provider.acquire(&key, form_id, &spec);
				}
				Effect::NotifyDelete { key, form_id } => self.provider.notify_delete(&key, form_id),
				Effect::Refresh { key, form_id } => self.provider.refresh(&key, form_id),
				Effect::AddTimer { form_id, schedule } => {
					self.scheduler.add_timer(form_id, schedule);
				}
				Effect::RemoveTimer(form_id) => self.scheduler.remove_timer(form_id),
				Effect::PushUpdate { token, info } => self.hosts.on_update(token, &info),
				Effect::Uninstalled { token, form_ids } => {
					self.hosts.on_uninstall(token, &form_ids);
				}
				Effect::Watch(token) => self.liveness.watch(token),
				Effect::Unwatch(token) => self.liveness.unwatch(token),
			}
		}
	}
}

impl Default for Collaborators {
	fn default() -> Self {
		Self::detached()
	}
}

impl std::fmt::Debug for Collaborators {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Collaborators").finish_non_exhaustive()
	}
}

struct Detached;

impl ProviderClient for Detached {
	fn acquire(&self, _key: &ProviderKey, _form_id: FormId, _spec: &FormSpec) {}
	fn notify_delete(&self, _key: &ProviderKey, _form_id: FormId) {}
	fn refresh(&self, _key: &ProviderKey, _form_id: FormId) {}
}

impl RefreshScheduler for Detached {
	fn add_timer(&self, _form_id: FormId, _schedule: RefreshSchedule) {}
	fn remove_timer(&self, _form_id: FormId) {}
}

impl HostNotifier for Detached {
	fn on_update(&self, _token: HostToken, _info: &FormJsInfo) {}
	fn on_uninstall(&self, _token: HostToken, _form_ids: &[FormId]) {}
}

impl LivenessMonitor for Detached {
	fn watch(&self, _token: HostToken) {}
	fn unwatch(&self, _token: HostToken) {}
}

impl ProviderDirectory for Detached {
	fn provider_exists(&self, _key: &ProviderKey) -> bool {
		true
	}
}
