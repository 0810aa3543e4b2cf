//! LMDB backend.
//!
//! One `heed3` environment with three named databases: persisted entries and
//! content snapshots keyed by big-endian form id, and small allocator values
//! keyed by name.

use std::fs;
use std::path::Path;

use form_broker_proto::{FormId, PersistedFormEntry};
use heed3::byteorder::BE;
use heed3::types::{Bytes, Str, U64};
use heed3::{Database, Env, EnvOpenOptions};

use super::{FormStorage, StorageError};

// database names for the three tables
const DB_FORMS: &str = "forms"; // [form_id]->[postcard PersistedFormEntry]
const DB_SNAPSHOTS: &str = "snapshots"; // [form_id]->[utf8 content]
const DB_META: &str = "meta"; // [name]->[u64]

/// LMDB-backed [`FormStorage`].
///
/// Every call runs in its own write or read transaction, so an `Ok` return
/// means the change is committed.
pub struct LmdbStorage {
	env: Env,
	forms: Database<U64<BE>, Bytes>,
	snapshots: Database<U64<BE>, Str>,
	meta: Database<Str, U64<BE>>,
}

impl LmdbStorage {
	/// Opens (or creates) the store in `path`.
	///
	/// # Errors
	///
	/// Returns [`StorageError::Io`] if the directory cannot be created and
	/// [`StorageError::Lmdb`] if the environment or a table cannot be opened.
	pub fn open(path: &Path, map_size_mb: usize) -> Result<Self, StorageError> {
		fs::create_dir_all(path)?;

		let env = unsafe {
			EnvOpenOptions::new()
				.map_size(map_size_mb * 1024 * 1024)
				.max_dbs(3)
				.open(path)?
		};

		let mut wtxn = env.write_txn()?;
		let forms = env
			.database_options()
			.types::<U64<BE>, Bytes>()
			.name(DB_FORMS)
			.create(&mut wtxn)?;
		let snapshots = env
			.database_options()
			.types::<U64<BE>, Str>()
			.name(DB_SNAPSHOTS)
			.create(&mut wtxn)?;
		let meta = env
			.database_options()
			.types::<Str, U64<BE>>()
			.name(DB_META)
			.create(&mut wtxn)?;
		wtxn.commit()?;

		Ok(Self {
			env,
			forms,
			snapshots,
			meta,
		})
	}
}

impl FormStorage for LmdbStorage {
	fn save(&self, entry: &PersistedFormEntry) -> Result<(), StorageError> {
		let bytes = postcard::to_stdvec(entry)?;
		let mut wtxn = self.env.write_txn()?;
		self.forms
			.put(&mut wtxn, &entry.form_id.0, bytes.as_slice())?;
		wtxn.commit()?;
		Ok(())
	}

	fn load(&self, form_id: FormId) -> Result<Option<PersistedFormEntry>, StorageError> {
		let rtxn = self.env.read_txn()?;
		match self.forms.get(&rtxn, &form_id.0)? {
			Some(bytes) => Ok(Some(postcard::from_bytes(bytes)?)),
			None => Ok(None),
		}
	}

	fn delete(&self, form_id: FormId) -> Result<(), StorageError> {
		let mut wtxn = self.env.write_txn()?;
		self.forms.delete(&mut wtxn, &form_id.0)?;
		wtxn.commit()?;
		Ok(())
	}

	fn load_all(&self) -> Result<Vec<PersistedFormEntry>, StorageError> {
		let rtxn = self.env.read_txn()?;
		let mut entries = Vec::new();
		for item in self.forms.iter(&rtxn)? {
			let (_, bytes) = item?;
			entries.push(postcard::from_bytes(bytes)?);
		}
		Ok(entries)
	}

	fn save_snapshot(&self, form_id: FormId, data: &str) -> Result<(), StorageError> {
		let mut wtxn = self.env.write_txn()?;
		self.snapshots.put(&mut wtxn, &form_id.0, data)?;
		wtxn.commit()?;
		Ok(())
	}

	fn delete_snapshot(&self, form_id: FormId) -> Result<(), StorageError> {
		let mut wtxn = self.env.write_txn()?;
		self.snapshots.delete(&mut wtxn, &form_id.0)?;
		wtxn.commit()?;
		Ok(())
	}

	fn load_snapshots(&self) -> Result<Vec<(FormId, String)>, StorageError> {
		let rtxn = self.env.read_txn()?;
		let mut out = Vec::new();
		for item in self.snapshots.iter(&rtxn)? {
			let (id, data) = item?;
			out.push((FormId(id), data.to_string()));
		}
		Ok(out)
	}

	fn load_meta(&self, key: &str) -> Result<Option<u64>, StorageError> {
		let rtxn = self.env.read_txn()?;
		Ok(self.meta.get(&rtxn, key)?)
	}

	fn save_meta(&self, key: &str, value: u64) -> Result<(), StorageError> {
		let mut wtxn = self.env.write_txn()?;
		self.meta.put(&mut wtxn, key, &value)?;
		wtxn.commit()?;
		Ok(())
	}
}
