//! Form registry architecture and shared state.
//!
//! # Purpose
//!
//! The registry is the authority on which forms exist, who holds them, and
//! whether admitting another one would exceed a quota. It survives host and
//! provider process deaths without leaking records, keeps a durable mirror in
//! step with its live tables so state survives broker restarts, and reclaims
//! forms deterministically when an owner disappears, is uninstalled, or lets
//! go of a form.
//!
//! # Mental model
//!
//! A single [`FormRegistry`] guards one `RegistryState` behind one mutex. The
//! state holds the record table (by id, plus a provider-key index), the host
//! table (per binding, ids only), the quota counters, the id allocator and the
//! [`PersistentCacheMirror`]. Every operation is one critical section: it
//! validates, writes the durable store, then mutates the live tables. Calls to
//! providers, timers, hosts and the liveness monitor are recorded while the
//! lock is held and dispatched after it is released.
//!
//! # Key types
//!
//! | Type | Role |
//! | --- | --- |
//! | [`FormRegistry`] | Public entry point; owns the state mutex and collaborators. |
//! | [`IdAllocator`] | Session-keyed monotonic id generator. |
//! | [`QuotaGuard`] | Per-bundle and global admission counters. |
//! | [`PersistentCacheMirror`] | Write-through mirror of the durable store. |
//! | `HostTable` | Host binding to form id edges with subscription flags. |
//! | [`crate::services::lifecycle::LifecycleService`] | Reactor applying external lifecycle events. |
//!
//! # Invariants
//!
//! - Ownership Symmetry: a host holding a form implies the host's uid is an owner of that form.
//!   - Enforced in: `RegistryState::remove_owner`, `RegistryState::attach_owner`
//!   - Tested by: `core::tests::props::ownership_stays_symmetric`,
//!     `core::tests::host_death::death_keeps_form_held_by_same_uid_elsewhere`
//!   - Failure symptom: hosts receive updates for forms that were already purged.
//!
//! - Purge On Empty: the operation that removes the last owner purges the record, its
//!   persisted entry, its quota slot and its timer.
//!   - Enforced in: `RegistryState::remove_owner`, `RegistryState::purge_live`
//!   - Tested by: `core::tests::scenarios::scenario_a_shared_normal_form`
//!   - Failure symptom: quota slowly fills with unreachable forms.
//!
//! - Temporary Single Owner: a temporary record never has more than one owner uid.
//!   - Enforced in: `RegistryState::attach_owner`, `RegistryState::materialize`
//!   - Tested by: `core::tests::scenarios::temporary_form_rejects_second_owner`
//!   - Failure symptom: promotion or death of one host strands another.
//!
//! - Quota Matches Records: counters always equal the number of live records per kind and bundle.
//!   - Enforced in: `RegistryState::create`, `RegistryState::purge_live`, `QuotaGuard::promote`
//!   - Tested by: `core::tests::props::ownership_stays_symmetric`,
//!     `core::tests::promotion::refused_cast_leaves_record_untouched`
//!   - Failure symptom: admissions refused while the registry is nearly empty.
//!
//! - Durable First: the mirror is written before any live mutation and a failed write aborts
//!   the operation.
//!   - Enforced in: [`PersistentCacheMirror`], `RegistryState::remove_owner`
//!   - Tested by: `core::tests::persistence::storage_failure_aborts_add`,
//!     `core::tests::persistence::storage_failure_aborts_delete`
//!   - Failure symptom: forms acknowledged to a host are missing after a restart.
//!
//! - Unique Ids: no id is handed out twice under a session key, across restarts included.
//!   - Enforced in: [`IdAllocator`], `RegistryState::next_id`
//!   - Tested by: `core::tests::persistence::ids_are_not_reused_after_restart`,
//!     `core::tests::props::ids_are_unique`
//!   - Failure symptom: a host receives another host's form content.
//!
//! # Data flow
//!
//! 1. Transport -> Registry: `add_form`, `delete_form`, `release_form`, ... with an
//!    authenticated caller uid and host token.
//! 2. Registry -> Store: the durable write for the change, then the live tables.
//! 3. Registry -> Collaborators: recorded effects (acquire, notify delete, timers, pushes,
//!    liveness watches) after the lock is released.
//! 4. Event source -> Reactor -> Registry: provider removal, data clears and host deaths
//!    replay the same removal primitive explicit deletes use.
//!
//! # Lifecycle
//!
//! - Open: [`FormRegistry::open`] loads the mirror, recovers the allocator and drops persisted
//!   entries that have no owner or whose provider is gone. Persisted forms stay mirror-only
//!   until a host adds or requests them again.
//! - Live: records are created by `add_form` with a zero id and destroyed when their last owner
//!   goes away.
//! - Shutdown: nothing to flush; every acknowledged change is already durable.
//!
//! # Concurrency & ordering
//!
//! Operations on the same form are serialized by the state mutex. The lock is never held
//! across an await or a collaborator call. Operations on different forms have no ordering
//! guarantee relative to each other.
//!
//! # Failure modes & recovery
//!
//! - Storage failure on a caller operation: [`crate::FormError::Storage`], nothing applied.
//! - Storage failure in an event handler: logged, the affected form is skipped.
//! - Host/record divergence: `debug_assert!` in debug builds; the stray edge is dropped and
//!   logged in release builds.

mod cleanup;
mod dump;
mod forms;
mod host;
mod id_alloc;
mod mirror;
mod quota;
mod record;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub use dump::{FormView, HostFormView, HostView, TimerView};
use form_broker_proto::{CallerUid, FormId, HostToken, ProviderKey};
pub use id_alloc::IdAllocator;
use id_alloc::{META_SEQ_HIGH_WATER, META_SESSION_KEY, fresh_session_key};
pub use mirror::PersistentCacheMirror;
use parking_lot::Mutex;
pub use quota::{QuotaGuard, QuotaUsage};
pub use record::parse_schedule;
use record::FormRecord;
use tracing::{debug, error, info, trace, warn};

use self::host::HostTable;
use crate::collab::{Collaborators, DeathRecipient, Effect};
use crate::config::QuotaConfig;
use crate::error::FormError;
use crate::storage::{FormStorage, StorageError};

/// Authoritative registry of live forms.
pub struct FormRegistry {
	state: Mutex<RegistryState>,
	collab: Collaborators,
}

pub(crate) struct RegistryState {
	records: HashMap<FormId, FormRecord>,
	by_provider: HashMap<ProviderKey, BTreeSet<FormId>>,
	hosts: HostTable,
	quota: QuotaGuard,
	ids: IdAllocator,
	mirror: PersistentCacheMirror,
}

/// Why an owner is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
	Caller,
	HostDied,
	ProviderGone,
	HostDataCleared,
	Cleared,
}

impl Cause {
	/// The provider is told about purges it did not cause itself.
	fn notifies_provider(self) -> bool {
		matches!(self, Self::Caller | Self::HostDied | Self::HostDataCleared)
	}
}

/// Which host edges an owner removal detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unbind {
	/// Only the given binding; the uid stays an owner while another of its hosts holds the form.
	Host(HostToken),
	/// Every binding of the uid.
	AllOfUid,
}

impl FormRegistry {
	/// Opens the registry on top of a durable store.
	///
	/// Loads every persisted entry into the mirror, recovers the id allocator
	/// and discards entries that have no owner or whose provider the
	/// directory no longer knows.
	///
	/// # Errors
	///
	/// Returns the backend error if the initial scan or the first session key
	/// write fails.
	pub fn open(
		limits: QuotaConfig,
		storage: Arc<dyn FormStorage>,
		collab: Collaborators,
	) -> Result<Self, StorageError> {
		let mut mirror = PersistentCacheMirror::load(storage)?;

		let session_key = match mirror.storage().load_meta(META_SESSION_KEY)? {
			Some(key) if key != 0 && key <= u64::from(u32::MAX) => key as u32,
			_ => {
				let key = fresh_session_key();
				mirror
					.storage()
					.save_meta(META_SESSION_KEY, u64::from(key))?;
				key
			}
		};
		let high_water = mirror.storage().load_meta(META_SEQ_HIGH_WATER)?;
		let ids = IdAllocator::recover(
			session_key,
			high_water,
			mirror.load_all().map(|e| e.form_id),
		);

		let stale: Vec<FormId> = mirror
			.load_all()
			.filter(|e| {
				e.owner_uids.is_empty() || !collab.directory.provider_exists(&e.provider_key())
			})
			.map(|e| e.form_id)
			.collect();
		let mut discarded = 0usize;
		for form_id in stale {
			match mirror.delete(form_id) {
				Ok(()) => discarded += 1,
				Err(err) => warn!(form_id = %form_id, error = %err, "failed to discard stale form"),
			}
		}

		info!(
			forms = mirror.len(),
			discarded,
			session_key,
			"form registry rehydrated"
		);

		Ok(Self {
			state: Mutex::new(RegistryState {
				records: HashMap::new(),
				by_provider: HashMap::new(),
				hosts: HostTable::default(),
				quota: QuotaGuard::new(limits),
				ids,
				mirror,
			}),
			collab,
		})
	}

	/// Collaborators this registry dispatches to.
	pub fn collaborators(&self) -> &Collaborators {
		&self.collab
	}

	/// Runs one critical section and dispatches its effects after unlocking.
	fn run<T>(&self, f: impl FnOnce(&mut RegistryState, &mut Vec<Effect>) -> T) -> T {
		let mut effects = Vec::new();
		let out = {
			let mut state = self.state.lock();
			f(&mut state, &mut effects)
		};
		self.collab.dispatch(effects);
		out
	}
}

impl DeathRecipient for FormRegistry {
	fn on_death(&self, token: HostToken) {
		self.handle_host_died(token);
	}
}

impl RegistryState {
	/// Resolves ids whose session half was truncated by the host.
	///
	/// Live records win over forms only known to the mirror.
	fn resolve(&self, form_id: FormId) -> FormId {
		if form_id.is_none() || form_id.high() != 0 {
			return form_id;
		}
		let same_low = |id: &FormId| id.low() == form_id.low();
		self.records
			.keys()
			.copied()
			.filter(same_low)
			.min()
			.or_else(|| {
				self.mirror
					.load_all()
					.map(|e| e.form_id)
					.find(same_low)
			})
			.unwrap_or(form_id)
	}

	fn check_host(&self, token: HostToken, uid: CallerUid) -> Result<(), FormError> {
		match self.hosts.uid_of(token) {
			Some(bound) if bound != uid => Err(FormError::InvalidParam(
				"host token is bound to another caller",
			)),
			_ => Ok(()),
		}
	}

	fn next_id(&mut self) -> FormId {
		let key_before = self.ids.session_key();
		let mut form_id = self.ids.allocate();
		while self.records.contains_key(&form_id) || self.mirror.contains(form_id) {
			form_id = self.ids.allocate();
		}

		let storage = self.mirror.storage();
		if self.ids.session_key() != key_before
			&& let Err(err) = storage.save_meta(META_SESSION_KEY, u64::from(self.ids.session_key()))
		{
			warn!(error = %err, "failed to persist rotated session key");
		}
		if let Err(err) = storage.save_meta(META_SEQ_HIGH_WATER, u64::from(self.ids.high_water())) {
			warn!(error = %err, "failed to persist form id high-water mark");
		}
		form_id
	}

	fn insert_record(&mut self, record: FormRecord) {
		self.by_provider
			.entry(record.key.clone())
			.or_default()
			.insert(record.form_id);
		self.records.insert(record.form_id, record);
	}

	fn bind_host(
		&mut self,
		token: HostToken,
		form_id: FormId,
		uid: CallerUid,
		effects: &mut Vec<Effect>,
	) {
		let bound = self.hosts.bind(token, form_id, uid);
		if bound.new_host {
			effects.push(Effect::Watch(token));
		}
		if !bound.new_edge {
			trace!(token = %token, form_id = %form_id, "host already holds form");
		}
		self.sync_timer(form_id, effects);
	}

	fn unbind_host(&mut self, token: HostToken, form_id: FormId, effects: &mut Vec<Effect>) {
		if self.hosts.unbind(token, form_id) {
			effects.push(Effect::Unwatch(token));
		}
	}

	/// Arms or cancels the refresh timer to match the record and its subscribers.
	fn sync_timer(&mut self, form_id: FormId, effects: &mut Vec<Effect>) {
		let subscribers = self.hosts.subscribers(form_id);
		let Some(record) = self.records.get_mut(&form_id) else {
			return;
		};
		let wanted = record.wants_timer(subscribers);
		if wanted && !record.timer_armed {
			record.timer_armed = true;
			effects.push(Effect::AddTimer {
				form_id,
				schedule: record.schedule,
			});
		} else if !wanted && record.timer_armed {
			record.timer_armed = false;
			effects.push(Effect::RemoveTimer(form_id));
		}
	}

	/// Removes `uid` as an owner of a live form and detaches its host edges.
	///
	/// This is the single removal primitive behind explicit deletes, host
	/// death, provider removal and app-data resets. A missing record counts as
	/// already removed. Returns true if the form was purged.
	fn remove_owner(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		unbind: Unbind,
		cause: Cause,
		effects: &mut Vec<Effect>,
	) -> Result<bool, StorageError> {
		let Some(record) = self.records.get(&form_id) else {
			if let Unbind::Host(token) = unbind
				&& self.hosts.holds(token, form_id)
			{
				debug_assert!(false, "{token} holds form {form_id} without a live record");
				error!(token = %token, form_id = %form_id, "dropping host edge to missing form");
				self.unbind_host(token, form_id, effects);
			}
			return Ok(false);
		};

		let keeps_owner = match unbind {
			Unbind::Host(token) => self.hosts.uid_holds_elsewhere(form_id, uid, Some(token)),
			Unbind::AllOfUid => false,
		};
		let drops_owner = record.owner_uids.contains(&uid) && !keeps_owner;
		let purge = drops_owner && record.owner_uids.len() == 1;

		if purge {
			self.mirror.delete(form_id)?;
		} else if drops_owner {
			let mut owners = record.owner_uids.clone();
			owners.remove(&uid);
			self.mirror.put(record.persisted_with(&owners))?;
		}

		match unbind {
			Unbind::Host(token) => self.unbind_host(token, form_id, effects),
			Unbind::AllOfUid => {
				let tokens: Vec<HostToken> = self
					.hosts
					.holders(form_id)
					.filter(|t| self.hosts.uid_of(*t) == Some(uid))
					.collect();
				for token in tokens {
					self.unbind_host(token, form_id, effects);
				}
			}
		}

		if purge {
			self.purge_live(form_id, cause, effects);
		} else {
			if drops_owner && let Some(record) = self.records.get_mut(&form_id) {
				record.owner_uids.remove(&uid);
			}
			self.sync_timer(form_id, effects);
			debug!(form_id = %form_id, uid = %uid, ?cause, dropped = drops_owner, "form owner detached");
		}
		Ok(purge)
	}

	/// Drops a live record whose durable entry is already gone.
	fn purge_live(&mut self, form_id: FormId, cause: Cause, effects: &mut Vec<Effect>) {
		let Some(record) = self.records.remove(&form_id) else {
			return;
		};
		if let Some(ids) = self.by_provider.get_mut(&record.key) {
			ids.remove(&form_id);
			if ids.is_empty() {
				self.by_provider.remove(&record.key);
			}
		}
		self.quota
			.release(&record.key.bundle_name, record.temporary);

		let stray: Vec<HostToken> = self.hosts.holders(form_id).collect();
		if !stray.is_empty() {
			debug_assert!(false, "purged form {form_id} still held by {stray:?}");
			error!(form_id = %form_id, hosts = ?stray, "dropping host edges of purged form");
			for token in stray {
				self.unbind_host(token, form_id, effects);
			}
		}

		if record.timer_armed {
			effects.push(Effect::RemoveTimer(form_id));
		}
		if cause.notifies_provider() {
			effects.push(Effect::NotifyDelete {
				key: record.key.clone(),
				form_id,
			});
		}
		debug!(
			form_id = %form_id,
			bundle = %record.key.bundle_name,
			temporary = record.temporary,
			?cause,
			"form purged"
		);
	}

	/// Removes `uid` from a form that is only known to the mirror.
	fn remove_persisted_owner(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		cause: Cause,
		effects: &mut Vec<Effect>,
	) -> Result<bool, FormError> {
		let Some(entry) = self.mirror.get(form_id) else {
			return Err(FormError::NotFound(form_id));
		};
		if !entry.has_owner(uid) {
			return Err(FormError::NotOwner { form_id, uid });
		}
		let mut entry = entry.clone();
		entry.owner_uids.retain(|owner| *owner != uid);

		if entry.owner_uids.is_empty() {
			self.mirror.delete(form_id)?;
			if cause.notifies_provider() {
				effects.push(Effect::NotifyDelete {
					key: entry.provider_key(),
					form_id,
				});
			}
			debug!(form_id = %form_id, uid = %uid, ?cause, "persisted form purged");
			return Ok(true);
		}
		self.mirror.put(entry)?;
		Ok(false)
	}
}
