//! Admission counters for normal and temporary forms.
//!
//! Normal forms count against their provider bundle and a global pool;
//! temporary forms count against a single global pool shared by every caller.
//! Admission checks and increments happen in one call under the registry
//! lock, and a refusal leaves every counter untouched.

use std::collections::HashMap;

use serde::Serialize;
use tracing::error;

use crate::config::QuotaConfig;
use crate::error::QuotaKind;

/// Snapshot of the quota counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
	/// Live normal forms across all bundles.
	pub normal: usize,
	/// Live temporary forms.
	pub temporary: usize,
	/// Live normal forms per bundle.
	pub per_bundle: Vec<(String, usize)>,
}

/// Quota counters and their ceilings.
#[derive(Debug)]
pub struct QuotaGuard {
	limits: QuotaConfig,
	per_bundle: HashMap<String, usize>,
	normal: usize,
	temporary: usize,
}

impl QuotaGuard {
	/// Creates empty counters with the given ceilings.
	#[must_use]
	pub fn new(limits: QuotaConfig) -> Self {
		Self {
			limits,
			per_bundle: HashMap::new(),
			normal: 0,
			temporary: 0,
		}
	}

	/// Admits one form, or reports which ceiling refused it.
	pub fn try_admit(&mut self, bundle: &str, temporary: bool) -> Result<(), QuotaKind> {
		self.try_admit_many(bundle, temporary, 1)
	}

	/// Admits `count` forms of one kind at once, or none of them.
	pub fn try_admit_many(
		&mut self,
		bundle: &str,
		temporary: bool,
		count: usize,
	) -> Result<(), QuotaKind> {
		if temporary {
			if self.temporary + count > self.limits.global_temporary {
				return Err(QuotaKind::GlobalTemporary);
			}
			self.temporary += count;
			return Ok(());
		}

		let in_bundle = self.bundle_count(bundle);
		if in_bundle + count > self.limits.per_bundle_normal {
			return Err(QuotaKind::BundleNormal);
		}
		if self.normal + count > self.limits.global_normal {
			return Err(QuotaKind::GlobalNormal);
		}
		self.normal += count;
		*self.per_bundle.entry(bundle.to_string()).or_default() += count;
		Ok(())
	}

	/// Returns one admitted slot.
	///
	/// Never drives a counter below zero; an unmatched release is logged.
	pub fn release(&mut self, bundle: &str, temporary: bool) {
		if temporary {
			match self.temporary.checked_sub(1) {
				Some(n) => self.temporary = n,
				None => error!(bundle, "temporary quota released below zero"),
			}
			return;
		}

		match self.normal.checked_sub(1) {
			Some(n) => self.normal = n,
			None => error!(bundle, "global normal quota released below zero"),
		}
		match self.per_bundle.get_mut(bundle) {
			Some(n) if *n > 1 => *n -= 1,
			Some(_) => {
				self.per_bundle.remove(bundle);
			}
			None => error!(bundle, "bundle quota released below zero"),
		}
	}

	/// Moves one slot of `bundle` from the temporary pool to the normal pools.
	///
	/// The temporary slot is released first; if the normal admission is then
	/// refused, the temporary slot is taken back and the counters end exactly
	/// where they started.
	pub fn promote(&mut self, bundle: &str) -> Result<(), QuotaKind> {
		self.release(bundle, true);
		if let Err(kind) = self.try_admit(bundle, false) {
			if self.try_admit(bundle, true).is_err() {
				error!(bundle, "could not restore temporary slot after refused promotion");
			}
			return Err(kind);
		}
		Ok(())
	}

	/// Live normal forms of one bundle.
	#[must_use]
	pub fn bundle_count(&self, bundle: &str) -> usize {
		self.per_bundle.get(bundle).copied().unwrap_or(0)
	}

	/// Counter snapshot, bundles sorted by name.
	#[must_use]
	pub fn usage(&self) -> QuotaUsage {
		let mut per_bundle: Vec<(String, usize)> = self
			.per_bundle
			.iter()
			.map(|(bundle, n)| (bundle.clone(), *n))
			.collect();
		per_bundle.sort();
		QuotaUsage {
			normal: self.normal,
			temporary: self.temporary,
			per_bundle,
		}
	}

	/// Resets every counter.
	pub fn clear(&mut self) {
		self.per_bundle.clear();
		self.normal = 0;
		self.temporary = 0;
	}
}
