//! Form id allocation.
//!
//! Ids are `session_key << 32 | seq`. The session key is a random non-zero
//! value persisted in the store's meta table; the sequence is recovered at
//! startup from the larger of the persisted high-water mark and the highest
//! sequence observed among persisted ids carrying the same key.

use form_broker_proto::FormId;
use tracing::info;

/// Meta key holding the session key.
pub(crate) const META_SESSION_KEY: &str = "session_key";
/// Meta key holding the last allocated sequence number.
pub(crate) const META_SEQ_HIGH_WATER: &str = "seq_high_water";

/// Monotonic id generator.
#[derive(Debug)]
pub struct IdAllocator {
	session_key: u32,
	last_seq: u32,
}

impl IdAllocator {
	/// Starts a fresh sequence under `session_key`.
	#[must_use]
	pub fn new(session_key: u32) -> Self {
		Self {
			session_key,
			last_seq: 0,
		}
	}

	/// Resumes the sequence of `session_key` past every id already handed out.
	pub fn recover(
		session_key: u32,
		high_water: Option<u64>,
		persisted: impl IntoIterator<Item = FormId>,
	) -> Self {
		let observed = persisted
			.into_iter()
			.filter(|id| id.high() == session_key)
			.map(FormId::low)
			.max()
			.unwrap_or(0);
		let stored = high_water.map_or(0, |hw| u32::try_from(hw).unwrap_or(u32::MAX));
		Self {
			session_key,
			last_seq: observed.max(stored),
		}
	}

	/// Current session key.
	#[must_use]
	pub fn session_key(&self) -> u32 {
		self.session_key
	}

	/// Last sequence number handed out.
	#[must_use]
	pub fn high_water(&self) -> u32 {
		self.last_seq
	}

	/// Returns the next id.
	///
	/// When the 32-bit sequence is exhausted a new session key is drawn and
	/// the sequence restarts, so this never fails and never repeats an id of
	/// the current key.
	pub fn allocate(&mut self) -> FormId {
		match self.last_seq.checked_add(1) {
			Some(seq) => self.last_seq = seq,
			None => {
				let previous = self.session_key;
				self.session_key = fresh_session_key_excluding(previous);
				self.last_seq = 1;
				info!(
					previous,
					session_key = self.session_key,
					"form id sequence exhausted, rotated session key"
				);
			}
		}
		FormId::compose(self.session_key, self.last_seq)
	}
}

/// Draws a random non-zero session key.
pub(crate) fn fresh_session_key() -> u32 {
	fresh_session_key_excluding(0)
}

fn fresh_session_key_excluding(previous: u32) -> u32 {
	loop {
		let key = (uuid::Uuid::new_v4().as_u128() >> 96) as u32;
		if key != 0 && key != previous {
			return key;
		}
	}
}
