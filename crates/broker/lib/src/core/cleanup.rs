//! Broker-initiated removals driven by lifecycle events.
//!
//! Every handler replays [`RegistryState::remove_owner`] and treats records
//! that are already gone as done. Errors are logged, never returned.

use std::collections::BTreeMap;

use form_broker_proto::{CallerUid, FormId, HostToken, LifecycleEvent, ProviderKey};
use tracing::{debug, info, warn};

use super::{Cause, FormRegistry, RegistryState, Unbind};
use crate::collab::Effect;

impl FormRegistry {
	/// Applies one lifecycle event.
	pub fn handle_event(&self, event: &LifecycleEvent) {
		match event {
			LifecycleEvent::ProviderRemoved(key) => self.handle_provider_removed(key),
			LifecycleEvent::ProviderDataCleared(key) => self.handle_provider_data_cleared(key),
			LifecycleEvent::HostProcessDied(token) => self.handle_host_died(*token),
			LifecycleEvent::HostDataCleared(uid) => self.handle_host_data_cleared(*uid),
		}
	}

	/// Purges every form created by an uninstalled provider.
	pub fn handle_provider_removed(&self, key: &ProviderKey) {
		let removed = self.run(|state, effects| state.delete_by_provider(key, effects));
		info!(provider = %key, removed, "provider removed");
	}

	/// Purges every form of a provider whose data was wiped.
	pub fn handle_provider_data_cleared(&self, key: &ProviderKey) {
		let removed = self.run(|state, effects| state.delete_by_provider(key, effects));
		info!(provider = %key, removed, "provider data cleared");
	}

	/// Replays an explicit delete for every form the dead host held.
	///
	/// Idempotent: a second call for the same token finds no host record.
	pub fn handle_host_died(&self, token: HostToken) {
		self.run(|state, effects| state.host_died(token, effects));
	}

	/// Removes `uid` from every live and persisted form and drops its hosts.
	pub fn handle_host_data_cleared(&self, uid: CallerUid) {
		let purged = self.run(|state, effects| state.host_data_cleared(uid, effects));
		info!(uid = %uid, purged, "host data cleared");
	}
}

impl RegistryState {
	fn delete_by_provider(&mut self, key: &ProviderKey, effects: &mut Vec<Effect>) -> usize {
		let live: Vec<FormId> = self
			.by_provider
			.get(key)
			.map(|ids| ids.iter().copied().collect())
			.unwrap_or_default();

		let mut uninstalled: BTreeMap<HostToken, Vec<FormId>> = BTreeMap::new();
		let mut removed = 0usize;
		'forms: for form_id in live {
			let Some(record) = self.records.get(&form_id) else {
				continue;
			};
			let owners: Vec<CallerUid> = record.owner_uids.iter().copied().collect();
			let holders: Vec<HostToken> = self.hosts.holders(form_id).collect();
			for uid in owners {
				match self.remove_owner(form_id, uid, Unbind::AllOfUid, Cause::ProviderGone, effects) {
					Ok(true) => removed += 1,
					Ok(false) => {}
					Err(err) => {
						warn!(form_id = %form_id, provider = %key, error = %err, "failed to purge form of removed provider");
						continue 'forms;
					}
				}
			}
			for token in holders {
				uninstalled.entry(token).or_default().push(form_id);
			}
		}

		let persisted: Vec<FormId> = self
			.mirror
			.find_by_provider(key)
			.iter()
			.map(|e| e.form_id)
			.filter(|id| !self.records.contains_key(id))
			.collect();
		for form_id in persisted {
			match self.mirror.delete(form_id) {
				Ok(()) => removed += 1,
				Err(err) => {
					warn!(form_id = %form_id, provider = %key, error = %err, "failed to purge persisted form");
				}
			}
		}

		for (token, form_ids) in uninstalled {
			effects.push(Effect::Uninstalled { token, form_ids });
		}
		removed
	}

	fn host_died(&mut self, token: HostToken, effects: &mut Vec<Effect>) {
		let Some(host) = self.hosts.get(token) else {
			debug!(token = %token, "death of unknown host ignored");
			return;
		};
		let uid = host.uid;
		let forms: Vec<FormId> = host.forms.keys().copied().collect();

		let mut purged = 0usize;
		for form_id in &forms {
			match self.remove_owner(*form_id, uid, Unbind::Host(token), Cause::HostDied, effects) {
				Ok(true) => purged += 1,
				Ok(false) => {}
				Err(err) => {
					warn!(form_id = %form_id, token = %token, error = %err, "failed to release form of dead host");
				}
			}
		}
		if self.hosts.remove(token).is_some() {
			effects.push(Effect::Unwatch(token));
		}
		info!(token = %token, uid = %uid, forms = forms.len(), purged, "host died");
	}

	fn host_data_cleared(&mut self, uid: CallerUid, effects: &mut Vec<Effect>) -> usize {
		let mut live: Vec<FormId> = self
			.records
			.values()
			.filter(|r| r.owner_uids.contains(&uid))
			.map(|r| r.form_id)
			.collect();
		live.sort();

		let mut purged = 0usize;
		for form_id in live {
			match self.remove_owner(form_id, uid, Unbind::AllOfUid, Cause::HostDataCleared, effects) {
				Ok(true) => purged += 1,
				Ok(false) => {}
				Err(err) => {
					warn!(form_id = %form_id, uid = %uid, error = %err, "failed to drop owner of cleared host data");
				}
			}
		}

		let persisted: Vec<FormId> = self
			.mirror
			.load_all()
			.filter(|e| e.has_owner(uid) && !self.records.contains_key(&e.form_id))
			.map(|e| e.form_id)
			.collect();
		for form_id in persisted {
			match self.remove_persisted_owner(form_id, uid, Cause::HostDataCleared, effects) {
				Ok(true) => purged += 1,
				Ok(false) => {}
				Err(err) => {
					warn!(form_id = %form_id, uid = %uid, error = %err, "failed to drop persisted owner");
				}
			}
		}

		for token in self.hosts.tokens_of_uid(uid) {
			self.hosts.remove(token);
			effects.push(Effect::Unwatch(token));
		}
		purged
	}
}
