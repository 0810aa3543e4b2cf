//! Per-host ownership table.
//!
//! A host record exists while its binding holds at least one form. It stores
//! form ids only, plus per-form subscription flags; form content lives in the
//! record table.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use form_broker_proto::{CallerUid, FormId, HostToken};

/// Subscription state of one form on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HostForm {
	/// Live updates and timer callbacks are delivered to this host.
	pub subscribed: bool,
	/// Last visibility reported by the host.
	pub visible: bool,
	/// The host missed an update and must be refreshed when it becomes visible.
	pub need_refresh: bool,
}

impl Default for HostForm {
	fn default() -> Self {
		Self {
			subscribed: true,
			visible: true,
			need_refresh: false,
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) struct HostRecord {
	pub token: HostToken,
	pub uid: CallerUid,
	pub forms: BTreeMap<FormId, HostForm>,
}

/// Result of binding a form to a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bound {
	/// A host record was created by this bind.
	pub new_host: bool,
	/// The host did not hold the form before.
	pub new_edge: bool,
}

#[derive(Debug, Default)]
pub(crate) struct HostTable {
	hosts: HashMap<HostToken, HostRecord>,
	holders: HashMap<FormId, BTreeSet<HostToken>>,
}

impl HostTable {
	pub fn get(&self, token: HostToken) -> Option<&HostRecord> {
		self.hosts.get(&token)
	}

	/// Identity bound to `token`, if the host is known.
	pub fn uid_of(&self, token: HostToken) -> Option<CallerUid> {
		self.hosts.get(&token).map(|h| h.uid)
	}

	pub fn form_mut(&mut self, token: HostToken, form_id: FormId) -> Option<&mut HostForm> {
		self.hosts.get_mut(&token)?.forms.get_mut(&form_id)
	}

	/// Adds the edge `token -> form_id`, creating the host record if needed.
	///
	/// An existing edge is resubscribed.
	pub fn bind(&mut self, token: HostToken, form_id: FormId, uid: CallerUid) -> Bound {
		let mut new_host = false;
		let host = self.hosts.entry(token).or_insert_with(|| {
			new_host = true;
			HostRecord {
				token,
				uid,
				forms: BTreeMap::new(),
			}
		});
		let new_edge = match host.forms.get_mut(&form_id) {
			Some(form) => {
				form.subscribed = true;
				false
			}
			None => {
				host.forms.insert(form_id, HostForm::default());
				true
			}
		};
		self.holders.entry(form_id).or_default().insert(token);
		Bound { new_host, new_edge }
	}

	/// Removes the edge `token -> form_id`.
	///
	/// Returns true if the host record became empty and was destroyed.
	pub fn unbind(&mut self, token: HostToken, form_id: FormId) -> bool {
		let Some(host) = self.hosts.get_mut(&token) else {
			return false;
		};
		if host.forms.remove(&form_id).is_some()
			&& let Some(set) = self.holders.get_mut(&form_id)
		{
			set.remove(&token);
			if set.is_empty() {
				self.holders.remove(&form_id);
			}
		}
		if host.forms.is_empty() {
			self.hosts.remove(&token);
			return true;
		}
		false
	}

	/// Destroys a host record and all of its edges.
	pub fn remove(&mut self, token: HostToken) -> Option<HostRecord> {
		let host = self.hosts.remove(&token)?;
		for form_id in host.forms.keys() {
			if let Some(set) = self.holders.get_mut(form_id) {
				set.remove(&token);
				if set.is_empty() {
					self.holders.remove(form_id);
				}
			}
		}
		Some(host)
	}

	/// Returns true if `token` holds `form_id`.
	pub fn holds(&self, token: HostToken, form_id: FormId) -> bool {
		self.hosts
			.get(&token)
			.is_some_and(|h| h.forms.contains_key(&form_id))
	}

	/// Hosts currently holding `form_id`.
	pub fn holders(&self, form_id: FormId) -> impl Iterator<Item = HostToken> + '_ {
		self.holders.get(&form_id).into_iter().flatten().copied()
	}

	/// Hosts of `uid` holding `form_id`, other than `except`.
	pub fn uid_holds_elsewhere(
		&self,
		form_id: FormId,
		uid: CallerUid,
		except: Option<HostToken>,
	) -> bool {
		self.holders(form_id)
			.filter(|t| Some(*t) != except)
			.any(|t| self.uid_of(t) == Some(uid))
	}

	/// Number of hosts with an active subscription to `form_id`.
	pub fn subscribers(&self, form_id: FormId) -> usize {
		self.holders(form_id)
			.filter(|t| {
				self.hosts
					.get(t)
					.and_then(|h| h.forms.get(&form_id))
					.is_some_and(|f| f.subscribed)
			})
			.count()
	}

	/// All host tokens bound to `uid`, sorted.
	pub fn tokens_of_uid(&self, uid: CallerUid) -> Vec<HostToken> {
		let mut tokens: Vec<HostToken> = self
			.hosts
			.values()
			.filter(|h| h.uid == uid)
			.map(|h| h.token)
			.collect();
		tokens.sort();
		tokens
	}

	pub fn iter(&self) -> impl Iterator<Item = &HostRecord> {
		self.hosts.values()
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.hosts.len()
	}

	/// Drops every host, returning their tokens.
	pub fn clear(&mut self) -> Vec<HostToken> {
		let tokens = self.hosts.keys().copied().collect();
		self.hosts.clear();
		self.holders.clear();
		tokens
	}
}
