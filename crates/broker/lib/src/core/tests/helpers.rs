//! Recording collaborators and the registry harness.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use form_broker_proto::{
	CallerUid, FormId, FormJsInfo, FormSpec, HostToken, ProviderKey, RefreshSchedule,
};
use parking_lot::Mutex;

use crate::collab::{
	Collaborators, HostNotifier, LivenessMonitor, ProviderClient, ProviderDirectory,
	RefreshScheduler,
};
use crate::config::QuotaConfig;
use crate::core::FormRegistry;
use crate::storage::MemoryStorage;

pub const WEATHER: &str = "com.example.weather";
pub const CLOCK: &str = "com.example.clock";

/// A collaborator call observed by the [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Acquire(FormId),
	NotifyDelete(FormId),
	Refresh(FormId),
	AddTimer(FormId, RefreshSchedule),
	RemoveTimer(FormId),
	Update(HostToken, FormId, Option<String>),
	Uninstall(HostToken, Vec<FormId>),
	Watch(HostToken),
	Unwatch(HostToken),
}

/// Implements every collaborator trait by appending to a call log.
#[derive(Default)]
pub struct Recorder {
	calls: Mutex<Vec<Call>>,
	removed: Mutex<HashSet<ProviderKey>>,
}

impl Recorder {
	fn push(&self, call: Call) {
		self.calls.lock().push(call);
	}

	/// Makes the directory report `key` as uninstalled.
	pub fn uninstall(&self, key: &ProviderKey) {
		self.removed.lock().insert(key.clone());
	}
}

impl ProviderClient for Recorder {
	fn acquire(&self, _key: &ProviderKey, form_id: FormId, _spec: &FormSpec) {
		self.push(Call::Acquire(form_id));
	}

	fn notify_delete(&self, _key: &ProviderKey, form_id: FormId) {
		self.push(Call::NotifyDelete(form_id));
	}

	fn refresh(&self, _key: &ProviderKey, form_id: FormId) {
		self.push(Call::Refresh(form_id));
	}
}

impl RefreshScheduler for Recorder {
	fn add_timer(&self, form_id: FormId, schedule: RefreshSchedule) {
		self.push(Call::AddTimer(form_id, schedule));
	}

	fn remove_timer(&self, form_id: FormId) {
		self.push(Call::RemoveTimer(form_id));
	}
}

impl HostNotifier for Recorder {
	fn on_update(&self, token: HostToken, info: &FormJsInfo) {
		self.push(Call::Update(token, info.form_id, info.data.clone()));
	}

	fn on_uninstall(&self, token: HostToken, form_ids: &[FormId]) {
		self.push(Call::Uninstall(token, form_ids.to_vec()));
	}
}

impl LivenessMonitor for Recorder {
	fn watch(&self, token: HostToken) {
		self.push(Call::Watch(token));
	}

	fn unwatch(&self, token: HostToken) {
		self.push(Call::Unwatch(token));
	}
}

impl ProviderDirectory for Recorder {
	fn provider_exists(&self, key: &ProviderKey) -> bool {
		!self.removed.lock().contains(key)
	}
}

pub struct Harness {
	pub registry: FormRegistry,
	pub storage: Arc<MemoryStorage>,
	pub recorder: Arc<Recorder>,
	limits: QuotaConfig,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_limits(QuotaConfig::default())
	}

	pub fn with_limits(limits: QuotaConfig) -> Self {
		let storage = Arc::new(MemoryStorage::new());
		let recorder = Arc::new(Recorder::default());
		let registry = open(&limits, &storage, &recorder);
		Self {
			registry,
			storage,
			recorder,
			limits,
		}
	}

	/// Drops the registry and reopens it on the same store.
	pub fn restart(self) -> Self {
		let Self {
			registry,
			storage,
			recorder,
			limits,
		} = self;
		drop(registry);
		recorder.calls.lock().clear();
		let registry = open(&limits, &storage, &recorder);
		Self {
			registry,
			storage,
			recorder,
			limits,
		}
	}

	/// Takes the calls recorded since the last take.
	pub fn calls(&self) -> Vec<Call> {
		std::mem::take(&mut *self.recorder.calls.lock())
	}

	/// Adds a fresh form and returns its id.
	pub fn add(&self, spec: &FormSpec, uid: i32) -> FormId {
		self.registry
			.add_form(FormId::NONE, spec, CallerUid(uid), host(uid))
			.unwrap()
			.form_id
	}

	/// Asserts the cross-table invariants of the registry state.
	pub fn check_invariants(&self) {
		let state = self.registry.state.lock();

		for host in state.hosts.iter() {
			for form_id in host.forms.keys() {
				let record = state
					.records
					.get(form_id)
					.unwrap_or_else(|| panic!("{} holds missing form {form_id}", host.token));
				assert!(
					record.owner_uids.contains(&host.uid),
					"{} holds {form_id} but uid {} is not an owner",
					host.token,
					host.uid
				);
				assert!(state.hosts.holders(*form_id).any(|t| t == host.token));
			}
			assert!(!host.forms.is_empty(), "empty host record {}", host.token);
		}

		let mut normal = 0;
		let mut temporary = 0;
		let mut per_bundle: HashMap<String, usize> = HashMap::new();
		for record in state.records.values() {
			assert!(!record.owner_uids.is_empty(), "ownerless record {}", record.form_id);
			if record.temporary {
				assert!(record.owner_uids.len() <= 1, "shared temporary {}", record.form_id);
				temporary += 1;
			} else {
				normal += 1;
				*per_bundle.entry(record.key.bundle_name.clone()).or_default() += 1;
			}

			assert!(
				state
					.by_provider
					.get(&record.key)
					.is_some_and(|ids| ids.contains(&record.form_id)),
				"record {} missing from provider index",
				record.form_id
			);

			let entry = state
				.mirror
				.get(record.form_id)
				.unwrap_or_else(|| panic!("record {} not persisted", record.form_id));
			assert_eq!(entry.owner_uids, record.owner_uids.iter().copied().collect::<Vec<_>>());
			assert_eq!(entry.temporary, record.temporary);

			let subscribers = state.hosts.subscribers(record.form_id);
			assert_eq!(record.timer_armed, record.wants_timer(subscribers));
		}
		let indexed: usize = state.by_provider.values().map(|ids| ids.len()).sum();
		assert_eq!(indexed, state.records.len());

		let usage = state.quota.usage();
		assert_eq!(usage.normal, normal);
		assert_eq!(usage.temporary, temporary);
		let mut expected: Vec<(String, usize)> = per_bundle.into_iter().collect();
		expected.sort();
		assert_eq!(usage.per_bundle, expected);
	}
}

fn open(limits: &QuotaConfig, storage: &Arc<MemoryStorage>, recorder: &Arc<Recorder>) -> FormRegistry {
	let collab = Collaborators {
		provider: recorder.clone(),
		scheduler: recorder.clone(),
		hosts: recorder.clone(),
		liveness: recorder.clone(),
		directory: recorder.clone(),
	};
	FormRegistry::open(limits.clone(), storage.clone(), collab).unwrap()
}

pub fn spec(bundle: &str) -> FormSpec {
	FormSpec::new(&ProviderKey::new(bundle, "entry", "WidgetAbility"), "forecast", 2)
}

pub fn temp_spec(bundle: &str) -> FormSpec {
	spec(bundle).temporary(true)
}

/// Spec refreshed every thirty minutes.
pub fn timed_spec(bundle: &str) -> FormSpec {
	let mut spec = spec(bundle);
	spec.update_enabled = true;
	spec.update_duration = 1;
	spec
}

pub const fn uid(n: i32) -> CallerUid {
	CallerUid(n)
}

/// Host binding used by `uid(n)` unless a test says otherwise.
pub const fn host(n: i32) -> HostToken {
	HostToken(n as u64)
}

pub fn small_limits(per_bundle_normal: usize, global_normal: usize, global_temporary: usize) -> QuotaConfig {
	QuotaConfig {
		per_bundle_normal,
		global_normal,
		global_temporary,
	}
}
