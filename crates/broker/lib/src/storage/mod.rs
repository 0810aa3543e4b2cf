//! Durable key-value backends for persisted form entries.
//!
//! The registry only relies on the [`FormStorage`] contract: point
//! get/put/delete by form id and a full scan for startup rehydration. Content
//! snapshots and a handful of allocator values live beside the entries.
//!
//! Backends:
//! - [`MemoryStorage`]: process-local maps, used by tests and ephemeral runs.
//! - [`LmdbStorage`]: `heed3` environment with one named database per table.

mod lmdb;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use form_broker_proto::{FormId, PersistedFormEntry};
pub use lmdb::LmdbStorage;
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced by a durable backend.
#[derive(Debug, Error)]
pub enum StorageError {
	/// LMDB environment or transaction failure.
	#[error("lmdb: {0}")]
	Lmdb(#[from] heed3::Error),
	/// Stored bytes could not be encoded or decoded.
	#[error("codec: {0}")]
	Codec(#[from] postcard::Error),
	/// Filesystem failure while preparing the store.
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
}

/// Durable store boundary used by the persistent-cache mirror.
///
/// Implementations must make each call durable before returning `Ok`.
pub trait FormStorage: Send + Sync + 'static {
	/// Inserts or replaces the entry keyed by its form id.
	fn save(&self, entry: &PersistedFormEntry) -> Result<(), StorageError>;

	/// Loads a single entry.
	fn load(&self, form_id: FormId) -> Result<Option<PersistedFormEntry>, StorageError>;

	/// Removes an entry. Removing a missing entry is not an error.
	fn delete(&self, form_id: FormId) -> Result<(), StorageError>;

	/// Returns every stored entry.
	fn load_all(&self) -> Result<Vec<PersistedFormEntry>, StorageError>;

	/// Inserts or replaces the cached content snapshot of a form.
	fn save_snapshot(&self, form_id: FormId, data: &str) -> Result<(), StorageError>;

	/// Removes the cached content snapshot of a form.
	fn delete_snapshot(&self, form_id: FormId) -> Result<(), StorageError>;

	/// Returns every stored content snapshot.
	fn load_snapshots(&self) -> Result<Vec<(FormId, String)>, StorageError>;

	/// Reads a small named counter.
	fn load_meta(&self, key: &str) -> Result<Option<u64>, StorageError>;

	/// Writes a small named counter.
	fn save_meta(&self, key: &str, value: u64) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
	forms: BTreeMap<FormId, PersistedFormEntry>,
	snapshots: BTreeMap<FormId, String>,
	meta: HashMap<String, u64>,
}

/// In-process [`FormStorage`].
///
/// Survives registry restarts as long as the same instance is reused, which is
/// what restart tests rely on. Writes can be forced to fail to exercise the
/// registry's storage-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	tables: Mutex<MemoryTables>,
	fail_writes: AtomicBool,
	fail_snapshot_deletes: AtomicBool,
}

impl MemoryStorage {
	/// Creates an empty store.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every subsequent write fail until reset.
	pub fn set_fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	/// Makes snapshot deletes fail until reset; other writes are unaffected.
	pub fn set_fail_snapshot_deletes(&self, fail: bool) {
		self.fail_snapshot_deletes.store(fail, Ordering::SeqCst);
	}

	/// Number of stored entries.
	#[must_use]
	pub fn len(&self) -> usize {
		self.tables.lock().forms.len()
	}

	/// Returns true if no entries are stored.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.tables.lock().forms.is_empty()
	}

	fn check_writable(&self) -> Result<(), StorageError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(StorageError::Io(std::io::Error::other(
				"memory storage is read-only",
			)));
		}
		Ok(())
	}
}

impl FormStorage for MemoryStorage {
	fn save(&self, entry: &PersistedFormEntry) -> Result<(), StorageError> {
		self.check_writable()?;
		self.tables
			.lock()
			.forms
			.insert(entry.form_id, entry.clone());
		Ok(())
	}

	fn load(&self, form_id: FormId) -> Result<Option<PersistedFormEntry>, StorageError> {
		Ok(self.tables.lock().forms.get(&form_id).cloned())
	}

	fn delete(&self, form_id: FormId) -> Result<(), StorageError> {
		self.check_writable()?;
		self.tables.lock().forms.remove(&form_id);
		Ok(())
	}

	fn load_all(&self) -> Result<Vec<PersistedFormEntry>, StorageError> {
		Ok(self.tables.lock().forms.values().cloned().collect())
	}

	fn save_snapshot(&self, form_id: FormId, data: &str) -> Result<(), StorageError> {
		self.check_writable()?;
		self.tables
			.lock()
			.snapshots
			.insert(form_id, data.to_string());
		Ok(())
	}

	fn delete_snapshot(&self, form_id: FormId) -> Result<(), StorageError> {
		self.check_writable()?;
		if self.fail_snapshot_deletes.load(Ordering::SeqCst) {
			return Err(StorageError::Io(std::io::Error::other(
				"snapshot delete refused",
			)));
		}
		self.tables.lock().snapshots.remove(&form_id);
		Ok(())
	}

	fn load_snapshots(&self) -> Result<Vec<(FormId, String)>, StorageError> {
		Ok(self
			.tables
			.lock()
			.snapshots
			.iter()
			.map(|(id, data)| (*id, data.clone()))
			.collect())
	}

	fn load_meta(&self, key: &str) -> Result<Option<u64>, StorageError> {
		Ok(self.tables.lock().meta.get(key).copied())
	}

	fn save_meta(&self, key: &str, value: u64) -> Result<(), StorageError> {
		self.check_writable()?;
		self.tables.lock().meta.insert(key.to_string(), value);
		Ok(())
	}
}

#[cfg(test)]
pub(crate) fn sample_entry(form_id: u64, owners: &[i32]) -> PersistedFormEntry {
	use form_broker_proto::CallerUid;

	let mut owner_uids: Vec<CallerUid> = owners.iter().copied().map(CallerUid).collect();
	owner_uids.sort();
	PersistedFormEntry {
		form_id: FormId(form_id),
		bundle_name: "com.example.weather".into(),
		module_name: "entry".into(),
		ability_name: "WidgetAbility".into(),
		form_name: "forecast".into(),
		specification_id: 2,
		temporary: false,
		owner_uids,
	}
}
