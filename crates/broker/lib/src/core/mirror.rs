//! In-memory mirror of the durable form store.
//!
//! Every mutation writes the backend first and updates the in-memory maps only
//! after the backend accepted it, so the mirror is never ahead of what is
//! durable and the durable store is never behind what a caller was told.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use form_broker_proto::{FormId, PersistedFormEntry, ProviderKey};

use crate::storage::{FormStorage, StorageError};

/// Persisted entries and content snapshots, mirrored in memory.
pub struct PersistentCacheMirror {
	storage: Arc<dyn FormStorage>,
	entries: BTreeMap<FormId, PersistedFormEntry>,
	snapshots: HashMap<FormId, String>,
}

impl PersistentCacheMirror {
	/// Loads every entry and snapshot from `storage`.
	///
	/// # Errors
	///
	/// Returns the backend error if the initial scan fails.
	pub fn load(storage: Arc<dyn FormStorage>) -> Result<Self, StorageError> {
		let entries = storage
			.load_all()?
			.into_iter()
			.map(|mut entry| {
				entry.owner_uids.sort();
				entry.owner_uids.dedup();
				(entry.form_id, entry)
			})
			.collect();
		let snapshots = storage.load_snapshots()?.into_iter().collect();
		Ok(Self {
			storage,
			entries,
			snapshots,
		})
	}

	/// Backend handle, for meta values.
	pub fn storage(&self) -> &Arc<dyn FormStorage> {
		&self.storage
	}

	/// Inserts or replaces an entry.
	pub fn put(&mut self, entry: PersistedFormEntry) -> Result<(), StorageError> {
		self.storage.save(&entry)?;
		self.entries.insert(entry.form_id, entry);
		Ok(())
	}

	/// Entry of a form, if persisted.
	pub fn get(&self, form_id: FormId) -> Option<&PersistedFormEntry> {
		self.entries.get(&form_id)
	}

	/// Returns true if the form is persisted.
	pub fn contains(&self, form_id: FormId) -> bool {
		self.entries.contains_key(&form_id)
	}

	/// Removes an entry together with its snapshot.
	///
	/// The snapshot goes first: a failure then leaves the entry persisted,
	/// and a failure on the entry only costs cached content.
	pub fn delete(&mut self, form_id: FormId) -> Result<(), StorageError> {
		self.evict_snapshot(form_id)?;
		self.storage.delete(form_id)?;
		self.entries.remove(&form_id);
		Ok(())
	}

	/// All entries, ordered by id.
	pub fn load_all(&self) -> impl Iterator<Item = &PersistedFormEntry> {
		self.entries.values()
	}

	/// Entries created by one provider, ordered by id.
	pub fn find_by_provider(&self, key: &ProviderKey) -> Vec<&PersistedFormEntry> {
		self.entries
			.values()
			.filter(|e| {
				e.bundle_name == key.bundle_name
					&& e.module_name == key.module_name
					&& e.ability_name == key.ability_name
			})
			.collect()
	}

	/// Number of entries created by one module of a provider bundle.
	pub fn count_by_module(&self, bundle: &str, module: &str) -> usize {
		self.entries
			.values()
			.filter(|e| e.bundle_name == bundle && e.module_name == module)
			.count()
	}

	/// Cached content of a form.
	pub fn snapshot(&self, form_id: FormId) -> Option<&str> {
		self.snapshots.get(&form_id).map(String::as_str)
	}

	/// Inserts or replaces the cached content of a form.
	pub fn put_snapshot(&mut self, form_id: FormId, data: String) -> Result<(), StorageError> {
		self.storage.save_snapshot(form_id, &data)?;
		self.snapshots.insert(form_id, data);
		Ok(())
	}

	/// Drops the snapshot of a form; missing snapshots are ignored.
	pub fn evict_snapshot(&mut self, form_id: FormId) -> Result<(), StorageError> {
		if self.snapshots.contains_key(&form_id) {
			self.storage.delete_snapshot(form_id)?;
			self.snapshots.remove(&form_id);
		}
		Ok(())
	}

	/// Number of persisted entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Removes every entry and snapshot.
	///
	/// Stops at the first backend failure; whatever was deleted before it
	/// stays deleted.
	pub fn clear(&mut self) -> Result<(), StorageError> {
		let ids: Vec<FormId> = self.entries.keys().copied().collect();
		for form_id in ids {
			self.delete(form_id)?;
		}
		let orphans: Vec<FormId> = self.snapshots.keys().copied().collect();
		for form_id in orphans {
			self.evict_snapshot(form_id)?;
		}
		Ok(())
	}
}
