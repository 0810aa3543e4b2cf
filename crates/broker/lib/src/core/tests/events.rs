use form_broker_proto::{LifecycleEvent, ProviderKey};
use pretty_assertions::assert_eq;

use super::helpers::{CLOCK, Call, Harness, WEATHER, host, spec, temp_spec, timed_spec, uid};
use crate::storage::FormStorage;

fn weather_key() -> ProviderKey {
	ProviderKey::new(WEATHER, "entry", "WidgetAbility")
}

#[test]
fn provider_removal_purges_its_forms_only() {
	let h = Harness::new();
	let a = h.add(&spec(WEATHER), 1);
	h.registry.add_form(a, &spec(WEATHER), uid(2), host(2)).unwrap();
	let b = h.add(&timed_spec(WEATHER), 2);
	let kept = h.add(&spec(CLOCK), 1);
	h.calls();

	h.registry
		.handle_event(&LifecycleEvent::ProviderRemoved(weather_key()));

	assert!(h.registry.dump_by_id(a).is_err());
	assert!(h.registry.dump_by_id(b).is_err());
	assert!(h.registry.dump_by_id(kept).unwrap().live);
	assert!(h.registry.dump_by_bundle(WEATHER).is_empty());
	assert_eq!(h.registry.quota_usage().normal, 1);

	let calls = h.calls();
	assert!(calls.contains(&Call::Uninstall(host(1), vec![a])));
	assert!(calls.contains(&Call::Uninstall(host(2), vec![a, b])));
	assert!(calls.contains(&Call::RemoveTimer(b)));
	assert!(calls.contains(&Call::Unwatch(host(2))));
	assert!(!calls.iter().any(|c| matches!(c, Call::NotifyDelete(_))));
	h.check_invariants();
}

#[test]
fn provider_removal_tolerates_races() {
	let h = Harness::new();
	let a = h.add(&spec(WEATHER), 1);
	h.registry.delete_form(a, uid(1), host(1)).unwrap();
	h.calls();

	h.registry.handle_provider_removed(&weather_key());
	h.registry.handle_provider_removed(&weather_key());
	assert!(h.calls().is_empty());
	h.check_invariants();
}

#[test]
fn provider_removal_purges_mirror_only_forms() {
	let h = Harness::new();
	let a = h.add(&spec(WEATHER), 1);
	let h = h.restart();
	assert!(h.storage.load(a).unwrap().is_some());

	h.registry.handle_provider_removed(&weather_key());
	assert!(h.storage.is_empty());
	assert!(h.registry.dump_by_id(a).is_err());
}

#[test]
fn provider_data_cleared_behaves_like_removal() {
	let h = Harness::new();
	let a = h.add(&temp_spec(WEATHER), 1);
	h.registry
		.handle_event(&LifecycleEvent::ProviderDataCleared(weather_key()));
	assert!(h.registry.dump_by_id(a).is_err());
	assert_eq!(h.registry.quota_usage().temporary, 0);
	h.check_invariants();
}

#[test]
fn host_data_cleared_drops_uid_everywhere() {
	let h = Harness::new();
	let shared = h.add(&spec(WEATHER), 1);
	h.registry.add_form(shared, &spec(WEATHER), uid(2), host(2)).unwrap();
	let own = h.add(&spec(CLOCK), 1);
	let persisted = h.add(&spec(CLOCK), 2);
	h.registry.add_form(persisted, &spec(CLOCK), uid(1), host(1)).unwrap();
	let h = h.restart();
	h.registry.request_form(shared, uid(1), host(1)).unwrap();
	h.registry.request_form(own, uid(1), host(1)).unwrap();
	h.calls();

	h.registry
		.handle_event(&LifecycleEvent::HostDataCleared(uid(1)));

	assert_eq!(h.registry.dump_by_id(shared).unwrap().owner_uids, vec![uid(2)]);
	assert!(h.registry.dump_by_id(own).is_err());
	assert_eq!(h.storage.load(persisted).unwrap().unwrap().owner_uids, vec![uid(2)]);
	assert!(h.registry.dump_hosts().is_empty());
	assert!(h.calls().contains(&Call::NotifyDelete(own)));
	h.check_invariants();
}

#[test]
fn death_event_goes_through_the_same_path() {
	let h = Harness::new();
	let y = h.add(&temp_spec(WEATHER), 3);
	h.registry
		.handle_event(&LifecycleEvent::HostProcessDied(host(3)));
	assert!(h.registry.dump_by_id(y).is_err());
	h.check_invariants();
}
