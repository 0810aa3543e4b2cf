//! Caller-facing form operations.

use form_broker_proto::{CallerUid, FormId, FormJsInfo, FormSpec, HostToken, ProviderUpdate};
use tracing::{debug, info, warn};

use super::record::FormRecord;
use super::{Cause, FormRegistry, RegistryState, Unbind};
use crate::collab::Effect;
use crate::error::{FormError, Result};

impl FormRegistry {
	/// Adds a form for `uid` on host `token`.
	///
	/// With a zero `form_id` a new record is created after quota admission.
	/// With an existing id the caller becomes an additional owner (no quota
	/// charge), provided `spec` matches the stored identity. A persisted id
	/// that is not live yet is brought back and charged like a new record.
	/// An id unknown to both tables gets a brand-new record under a fresh id;
	/// freed ids are never reused.
	///
	/// # Errors
	///
	/// - [`FormError::InvalidParam`] for empty identity fields or a host token bound to another uid.
	/// - [`FormError::QuotaExceeded`] when admission is refused.
	/// - [`FormError::ConfigMismatch`] when `spec` disagrees with the stored identity.
	/// - [`FormError::NotOwner`] when adding a second owner to a temporary form.
	/// - [`FormError::Storage`] when the durable write fails.
	pub fn add_form(
		&self,
		form_id: FormId,
		spec: &FormSpec,
		uid: CallerUid,
		token: HostToken,
	) -> Result<FormJsInfo> {
		self.run(|state, effects| state.add_form(form_id, spec, uid, token, effects))
	}

	/// Removes `uid` as an owner and unlinks the form from `token`.
	///
	/// The record is purged once no owner remains.
	///
	/// # Errors
	///
	/// [`FormError::InvalidParam`] if `token` is bound to another uid,
	/// [`FormError::NotOwner`] if `uid` does not hold the form through `token`,
	/// [`FormError::NotFound`] if the id is unknown, [`FormError::Storage`] if
	/// the durable write fails.
	pub fn delete_form(&self, form_id: FormId, uid: CallerUid, token: HostToken) -> Result<()> {
		self.run(|state, effects| state.delete_form(form_id, uid, token, effects))
	}

	/// Stops live updates of a form to `token` without giving up ownership.
	///
	/// Quota and owners are untouched. With `purge_cached_snapshot` the cached
	/// content is evicted from memory and the store as well.
	///
	/// # Errors
	///
	/// [`FormError::InvalidParam`] if `token` is bound to another uid,
	/// [`FormError::NotOwner`] if a live form is not held through `token`,
	/// [`FormError::NotFound`] or [`FormError::Storage`].
	pub fn release_form(
		&self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
		purge_cached_snapshot: bool,
	) -> Result<()> {
		self.run(|state, effects| {
			state.release_form(form_id, uid, token, purge_cached_snapshot, effects)
		})
	}

	/// Promotes a temporary form to a normal one.
	///
	/// # Errors
	///
	/// [`FormError::QuotaExceeded`] leaves the form temporary and the counters
	/// unchanged. Also [`FormError::NotOwner`], [`FormError::NotFound`],
	/// [`FormError::InvalidParam`] for a form that is not temporary, and
	/// [`FormError::Storage`].
	pub fn cast_temp_form(&self, form_id: FormId, uid: CallerUid) -> Result<()> {
		self.run(|state, _| state.cast_temp_form(form_id, uid))
	}

	/// Applies provider-pushed metadata and content.
	///
	/// The provider may race with a deletion, so an unknown id is logged and
	/// ignored.
	pub fn update_form_record(&self, form_id: FormId, update: ProviderUpdate) {
		self.run(|state, effects| state.update_form_record(form_id, update, effects));
	}

	/// Re-binds `token` to an existing form and asks the provider for fresh content.
	///
	/// Admission follows [`FormRegistry::add_form`] with an existing id.
	///
	/// # Errors
	///
	/// Same as [`FormRegistry::add_form`], minus identity validation.
	pub fn request_form(
		&self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
	) -> Result<FormJsInfo> {
		self.run(|state, effects| state.request_form(form_id, uid, token, effects))
	}

	/// Records host visibility of forms.
	///
	/// Forms turning visible that missed an update get their cached snapshot
	/// pushed. Returns the forms that need a provider refresh instead.
	///
	/// # Errors
	///
	/// [`FormError::InvalidParam`] if `token` holds no form.
	pub fn notify_visibility(
		&self,
		form_ids: &[FormId],
		token: HostToken,
		visible: bool,
	) -> Result<Vec<FormId>> {
		self.run(|state, effects| state.notify_visibility(form_ids, token, visible, effects))
	}

	/// Creates `count` identical forms at once.
	///
	/// Admission is decided for the whole batch against the same caps as
	/// single adds; either every form is created or none.
	///
	/// # Errors
	///
	/// Same as [`FormRegistry::add_form`] with a zero id.
	pub fn batch_add_for_records(
		&self,
		spec: &FormSpec,
		uid: CallerUid,
		token: HostToken,
		count: usize,
	) -> Result<Vec<FormId>> {
		self.run(|state, effects| state.batch_add(spec, uid, token, count, effects))
	}

	/// Removes every live and persisted form and every host binding.
	///
	/// # Errors
	///
	/// [`FormError::Storage`] if a durable delete fails; forms removed before
	/// the failure stay removed.
	pub fn clear_all(&self) -> Result<()> {
		self.run(|state, effects| state.clear_all(effects))
	}
}

fn validate_spec(spec: &FormSpec) -> Result<()> {
	if spec.bundle_name.is_empty()
		|| spec.module_name.is_empty()
		|| spec.ability_name.is_empty()
		|| spec.form_name.is_empty()
	{
		return Err(FormError::InvalidParam("empty provider or form name"));
	}
	Ok(())
}

impl RegistryState {
	fn add_form(
		&mut self,
		form_id: FormId,
		spec: &FormSpec,
		uid: CallerUid,
		token: HostToken,
		effects: &mut Vec<Effect>,
	) -> Result<FormJsInfo> {
		validate_spec(spec)?;
		self.check_host(token, uid)?;

		if form_id.is_none() {
			return self.create(spec, uid, token, effects);
		}
		let form_id = self.resolve(form_id);
		if let Some(record) = self.records.get(&form_id) {
			if !record.matches(spec) {
				return Err(FormError::ConfigMismatch { form_id });
			}
			return self.attach_owner(form_id, uid, token, false, effects);
		}
		if let Some(entry) = self.mirror.get(form_id) {
			if !entry.matches(spec) {
				return Err(FormError::ConfigMismatch { form_id });
			}
			return self.materialize(form_id, Some(spec), uid, token, effects);
		}
		debug!(form_id = %form_id, uid = %uid, "unknown form id, creating a new form");
		self.create(spec, uid, token, effects)
	}

	pub(super) fn create(
		&mut self,
		spec: &FormSpec,
		uid: CallerUid,
		token: HostToken,
		effects: &mut Vec<Effect>,
	) -> Result<FormJsInfo> {
		self.quota
			.try_admit(&spec.bundle_name, spec.temporary)
			.map_err(FormError::QuotaExceeded)?;

		let form_id = self.next_id();
		let record = FormRecord::from_spec(form_id, spec, uid);
		if let Err(err) = self.mirror.put(record.to_persisted()) {
			self.quota.release(&spec.bundle_name, spec.temporary);
			return Err(err.into());
		}

		let info = record.js_info(None);
		self.insert_record(record);
		self.bind_host(token, form_id, uid, effects);
		effects.push(Effect::Acquire {
			key: spec.provider_key(),
			form_id,
			spec: spec.clone(),
		});
		debug!(
			form_id = %form_id,
			uid = %uid,
			bundle = %spec.bundle_name,
			temporary = spec.temporary,
			"form created"
		);
		Ok(info)
	}

	/// Adds `uid` (bound to `token`) to a live record.
	fn attach_owner(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
		force_refresh: bool,
		effects: &mut Vec<Effect>,
	) -> Result<FormJsInfo> {
		let Some(record) = self.records.get(&form_id) else {
			return Err(FormError::NotFound(form_id));
		};
		let new_owner = !record.owner_uids.contains(&uid);
		if new_owner {
			if record.temporary {
				return Err(FormError::NotOwner { form_id, uid });
			}
			let mut owners = record.owner_uids.clone();
			owners.insert(uid);
			self.mirror.put(record.persisted_with(&owners))?;
		}

		if let Some(record) = self.records.get_mut(&form_id) {
			record.owner_uids.insert(uid);
		}
		self.bind_host(token, form_id, uid, effects);

		let Some(record) = self.records.get(&form_id) else {
			return Err(FormError::NotFound(form_id));
		};
		let snapshot = self.mirror.snapshot(form_id).map(str::to_string);
		if force_refresh || snapshot.is_none() {
			effects.push(Effect::Refresh {
				key: record.key.clone(),
				form_id,
			});
		}
		debug!(form_id = %form_id, uid = %uid, token = %token, new_owner, "form attached");
		Ok(record.js_info(snapshot))
	}

	/// Brings a mirror-only form back to life for `uid`.
	fn materialize(
		&mut self,
		form_id: FormId,
		spec: Option<&FormSpec>,
		uid: CallerUid,
		token: HostToken,
		effects: &mut Vec<Effect>,
	) -> Result<FormJsInfo> {
		let Some(entry) = self.mirror.get(form_id) else {
			return Err(FormError::NotFound(form_id));
		};
		if entry.temporary && !entry.owner_uids.is_empty() && !entry.has_owner(uid) {
			return Err(FormError::NotOwner { form_id, uid });
		}
		let mut record = FormRecord::from_persisted(entry, spec);
		let added = record.owner_uids.insert(uid);

		self.quota
			.try_admit(&record.key.bundle_name, record.temporary)
			.map_err(FormError::QuotaExceeded)?;
		if added && let Err(err) = self.mirror.put(record.to_persisted()) {
			self.quota
				.release(&record.key.bundle_name, record.temporary);
			return Err(err.into());
		}

		let key = record.key.clone();
		let acquire_spec = spec.cloned().unwrap_or_else(|| record.spec());
		let info = record.js_info(self.mirror.snapshot(form_id).map(str::to_string));
		self.insert_record(record);
		self.bind_host(token, form_id, uid, effects);
		effects.push(Effect::Acquire {
			key,
			form_id,
			spec: acquire_spec,
		});
		info!(form_id = %form_id, uid = %uid, "persisted form restored");
		Ok(info)
	}

	fn delete_form(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
		effects: &mut Vec<Effect>,
	) -> Result<()> {
		if form_id.is_none() {
			return Err(FormError::InvalidParam("form id is zero"));
		}
		self.check_host(token, uid)?;
		let form_id = self.resolve(form_id);
		if let Some(record) = self.records.get(&form_id) {
			if !record.owner_uids.contains(&uid) {
				return Err(FormError::NotOwner { form_id, uid });
			}
			// Owners restored from the mirror may hold the form on no host yet.
			if !self.hosts.holds(token, form_id)
				&& self.hosts.uid_holds_elsewhere(form_id, uid, None)
			{
				return Err(FormError::NotOwner { form_id, uid });
			}
			self.remove_owner(form_id, uid, Unbind::Host(token), Cause::Caller, effects)?;
			return Ok(());
		}
		self.remove_persisted_owner(form_id, uid, Cause::Caller, effects)?;
		Ok(())
	}

	fn release_form(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
		purge_cached_snapshot: bool,
		effects: &mut Vec<Effect>,
	) -> Result<()> {
		if form_id.is_none() {
			return Err(FormError::InvalidParam("form id is zero"));
		}
		self.check_host(token, uid)?;
		let form_id = self.resolve(form_id);
		let owned = match self.records.get(&form_id) {
			Some(record) => record.owner_uids.contains(&uid) && self.hosts.holds(token, form_id),
			None => match self.mirror.get(form_id) {
				Some(entry) => entry.has_owner(uid),
				None => return Err(FormError::NotFound(form_id)),
			},
		};
		if !owned {
			return Err(FormError::NotOwner { form_id, uid });
		}

		if purge_cached_snapshot {
			self.mirror.evict_snapshot(form_id)?;
		}
		if let Some(form) = self.hosts.form_mut(token, form_id) {
			form.subscribed = false;
		}
		self.sync_timer(form_id, effects);
		debug!(form_id = %form_id, uid = %uid, token = %token, purge_cached_snapshot, "form released");
		Ok(())
	}

	fn cast_temp_form(&mut self, form_id: FormId, uid: CallerUid) -> Result<()> {
		let form_id = self.resolve(form_id);
		let Some(record) = self.records.get(&form_id) else {
			return Err(FormError::NotFound(form_id));
		};
		if !record.temporary {
			return Err(FormError::InvalidParam("form is not temporary"));
		}
		if !record.owner_uids.contains(&uid) {
			return Err(FormError::NotOwner { form_id, uid });
		}
		let bundle = record.key.bundle_name.clone();
		let mut entry = record.to_persisted();
		entry.temporary = false;

		self.quota
			.promote(&bundle)
			.map_err(FormError::QuotaExceeded)?;
		if let Err(err) = self.mirror.put(entry) {
			self.quota.release(&bundle, false);
			if self.quota.try_admit(&bundle, true).is_err() {
				warn!(form_id = %form_id, "could not restore temporary slot after failed cast");
			}
			return Err(err.into());
		}

		if let Some(record) = self.records.get_mut(&form_id) {
			record.temporary = false;
		}
		info!(form_id = %form_id, uid = %uid, bundle = %bundle, "temporary form promoted");
		Ok(())
	}

	fn update_form_record(
		&mut self,
		form_id: FormId,
		update: ProviderUpdate,
		effects: &mut Vec<Effect>,
	) {
		let form_id = self.resolve(form_id);
		let Some(record) = self.records.get_mut(&form_id) else {
			warn!(form_id = %form_id, "provider update for unknown form ignored");
			return;
		};

		if let Some(upgrade) = update.version_upgrade {
			record.version_upgrade = upgrade;
		}
		if let Some(need) = update.need_refresh {
			record.need_refresh = need;
		}
		let mut rearm = false;
		if let Some(enable) = update.enable_update
			&& record.enable_update != enable
		{
			record.enable_update = enable;
			rearm = true;
		}
		if let Some(schedule) = update.schedule
			&& record.schedule != schedule
		{
			record.schedule = schedule;
			rearm = true;
		}
		if rearm && record.timer_armed {
			record.timer_armed = false;
			effects.push(Effect::RemoveTimer(form_id));
		}

		let Some(data) = update.data else {
			self.sync_timer(form_id, effects);
			return;
		};
		record.need_refresh = update.need_refresh.unwrap_or(false);
		record.version_upgrade = update.version_upgrade.unwrap_or(false);
		let info = record.js_info(Some(data.clone()));
		self.sync_timer(form_id, effects);

		if let Err(err) = self.mirror.put_snapshot(form_id, data) {
			warn!(form_id = %form_id, error = %err, "failed to persist form snapshot");
		}

		let holders: Vec<HostToken> = self.hosts.holders(form_id).collect();
		let mut pushed = 0usize;
		for token in holders {
			let Some(form) = self.hosts.form_mut(token, form_id) else {
				continue;
			};
			if form.subscribed && form.visible {
				form.need_refresh = false;
				pushed += 1;
				effects.push(Effect::PushUpdate {
					token,
					info: info.clone(),
				});
			} else {
				form.need_refresh = true;
			}
		}
		debug!(form_id = %form_id, pushed, "form content updated");
	}

	fn request_form(
		&mut self,
		form_id: FormId,
		uid: CallerUid,
		token: HostToken,
		effects: &mut Vec<Effect>,
	) -> Result<FormJsInfo> {
		if form_id.is_none() {
			return Err(FormError::InvalidParam("form id is zero"));
		}
		self.check_host(token, uid)?;
		let form_id = self.resolve(form_id);

		if self.records.contains_key(&form_id) {
			return self.attach_owner(form_id, uid, token, true, effects);
		}
		if self.mirror.contains(form_id) {
			return self.materialize(form_id, None, uid, token, effects);
		}
		Err(FormError::NotFound(form_id))
	}

	fn notify_visibility(
		&mut self,
		form_ids: &[FormId],
		token: HostToken,
		visible: bool,
		effects: &mut Vec<Effect>,
	) -> Result<Vec<FormId>> {
		if self.hosts.get(token).is_none() {
			return Err(FormError::InvalidParam("unknown host token"));
		}

		let mut needs_refresh = Vec::new();
		for raw in form_ids {
			let form_id = self.resolve(*raw);
			let Some(record) = self.records.get(&form_id) else {
				continue;
			};
			let snapshot = self.mirror.snapshot(form_id);
			let stale = record.version_upgrade || record.need_refresh || snapshot.is_none();
			let Some(form) = self.hosts.form_mut(token, form_id) else {
				continue;
			};
			form.visible = visible;
			if !visible || !form.subscribed {
				continue;
			}
			if stale {
				form.need_refresh = false;
				needs_refresh.push(form_id);
				effects.push(Effect::Refresh {
					key: record.key.clone(),
					form_id,
				});
			} else if form.need_refresh {
				form.need_refresh = false;
				effects.push(Effect::PushUpdate {
					token,
					info: record.js_info(snapshot.map(str::to_string)),
				});
			}
		}
		Ok(needs_refresh)
	}

	fn batch_add(
		&mut self,
		spec: &FormSpec,
		uid: CallerUid,
		token: HostToken,
		count: usize,
		effects: &mut Vec<Effect>,
	) -> Result<Vec<FormId>> {
		validate_spec(spec)?;
		self.check_host(token, uid)?;
		if count == 0 {
			return Ok(Vec::new());
		}
		self.quota
			.try_admit_many(&spec.bundle_name, spec.temporary, count)
			.map_err(FormError::QuotaExceeded)?;

		let mut created: Vec<FormRecord> = Vec::with_capacity(count);
		for _ in 0..count {
			let form_id = self.next_id();
			let record = FormRecord::from_spec(form_id, spec, uid);
			if let Err(err) = self.mirror.put(record.to_persisted()) {
				for done in &created {
					if let Err(undo) = self.mirror.delete(done.form_id) {
						warn!(form_id = %done.form_id, error = %undo, "failed to undo batch entry");
					}
				}
				for _ in 0..count {
					self.quota.release(&spec.bundle_name, spec.temporary);
				}
				return Err(err.into());
			}
			created.push(record);
		}

		let ids: Vec<FormId> = created.iter().map(|r| r.form_id).collect();
		for record in created {
			let form_id = record.form_id;
			self.insert_record(record);
			self.bind_host(token, form_id, uid, effects);
			effects.push(Effect::Acquire {
				key: spec.provider_key(),
				form_id,
				spec: spec.clone(),
			});
		}
		info!(count, bundle = %spec.bundle_name, uid = %uid, "forms batch-added");
		Ok(ids)
	}

	fn clear_all(&mut self, effects: &mut Vec<Effect>) -> Result<()> {
		let mut live: Vec<FormId> = self.records.keys().copied().collect();
		live.sort();
		for form_id in live {
			let owners: Vec<CallerUid> = match self.records.get(&form_id) {
				Some(record) => record.owner_uids.iter().copied().collect(),
				None => continue,
			};
			for uid in owners {
				self.remove_owner(form_id, uid, Unbind::AllOfUid, Cause::Cleared, effects)?;
			}
		}
		self.mirror.clear()?;

		for token in self.hosts.clear() {
			effects.push(Effect::Unwatch(token));
		}
		self.by_provider.clear();
		self.quota.clear();
		info!("form registry cleared");
		Ok(())
	}
}
