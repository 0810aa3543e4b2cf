//! End-to-end add/delete flows.

use form_broker_proto::{FormId, HostToken, ProviderKey};
use pretty_assertions::assert_eq;

use super::helpers::{Call, Harness, WEATHER, host, spec, temp_spec, uid};
use crate::error::FormError;

#[test]
fn scenario_a_shared_normal_form() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	assert_eq!(h.calls(), vec![Call::Watch(host(1)), Call::Acquire(x)]);

	let info = h.registry.add_form(x, &spec(WEATHER), uid(2), host(2)).unwrap();
	assert_eq!(info.form_id, x);
	assert_eq!(info.data, None);
	assert_eq!(h.registry.dump_by_id(x).unwrap().owner_uids, vec![uid(1), uid(2)]);
	assert_eq!(h.calls(), vec![Call::Watch(host(2)), Call::Refresh(x)]);
	h.check_invariants();

	h.registry.delete_form(x, uid(1), host(1)).unwrap();
	let view = h.registry.dump_by_id(x).unwrap();
	assert!(view.live);
	assert_eq!(view.owner_uids, vec![uid(2)]);
	assert_eq!(view.hosts, vec![host(2)]);
	assert_eq!(h.calls(), vec![Call::Unwatch(host(1))]);
	h.check_invariants();

	h.registry.delete_form(x, uid(2), host(2)).unwrap();
	assert!(matches!(h.registry.dump_by_id(x), Err(FormError::NotFound(id)) if id == x));
	assert!(h.storage.is_empty());
	assert_eq!(h.calls(), vec![Call::Unwatch(host(2)), Call::NotifyDelete(x)]);
	assert_eq!(h.registry.quota_usage().normal, 0);
	h.check_invariants();
}

#[test]
fn scenario_c_temporary_form_dies_with_its_host() {
	let h = Harness::new();
	let y = h.add(&temp_spec(WEATHER), 5);
	h.registry.handle_host_died(host(5));

	assert!(matches!(h.registry.dump_by_id(y), Err(FormError::NotFound(_))));
	assert_eq!(h.registry.quota_usage().temporary, 0);
	h.check_invariants();
}

#[test]
fn temporary_form_rejects_second_owner() {
	let h = Harness::new();
	let y = h.add(&temp_spec(WEATHER), 1);

	let err = h.registry.add_form(y, &temp_spec(WEATHER), uid(2), host(2)).unwrap_err();
	assert!(matches!(err, FormError::NotOwner { form_id, uid: u } if form_id == y && u == uid(2)));
	assert_eq!(h.registry.dump_by_id(y).unwrap().owner_uids, vec![uid(1)]);
	assert!(h.registry.dump_hosts().iter().all(|v| v.token != host(2)));
	h.check_invariants();
}

#[test]
fn same_owner_can_re_add_its_temporary_form_from_another_host() {
	let h = Harness::new();
	let y = h.add(&temp_spec(WEATHER), 1);
	h.registry.add_form(y, &temp_spec(WEATHER), uid(1), HostToken(100)).unwrap();
	assert_eq!(h.registry.dump_by_id(y).unwrap().hosts, vec![host(1), HostToken(100)]);
	h.check_invariants();
}

#[test]
fn mismatched_spec_is_rejected_without_mutation() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	h.calls();

	let mut other = spec(WEATHER);
	other.specification_id = 4;
	let err = h.registry.add_form(x, &other, uid(2), host(2)).unwrap_err();
	assert!(matches!(err, FormError::ConfigMismatch { form_id } if form_id == x));

	let mut other = spec(WEATHER);
	other.module_name = "widgets".into();
	assert!(matches!(
		h.registry.add_form(x, &other, uid(2), host(2)),
		Err(FormError::ConfigMismatch { .. })
	));
	assert_eq!(h.registry.dump_by_id(x).unwrap().owner_uids, vec![uid(1)]);
	assert!(h.calls().is_empty());
	h.check_invariants();
}

#[test]
fn invalid_requests_are_rejected() {
	let h = Harness::new();
	let mut empty = spec(WEATHER);
	empty.ability_name.clear();
	assert!(matches!(
		h.registry.add_form(FormId::NONE, &empty, uid(1), host(1)),
		Err(FormError::InvalidParam(_))
	));
	assert!(matches!(
		h.registry.delete_form(FormId::NONE, uid(1), host(1)),
		Err(FormError::InvalidParam(_))
	));
	assert_eq!(h.registry.live_count(), 0);
	assert!(h.calls().is_empty());
}

#[test]
fn host_token_cannot_switch_caller() {
	let h = Harness::new();
	h.add(&spec(WEATHER), 1);
	let err = h
		.registry
		.add_form(FormId::NONE, &spec(WEATHER), uid(2), host(1))
		.unwrap_err();
	assert!(matches!(err, FormError::InvalidParam(_)));
	assert_eq!(h.registry.live_count(), 1);
	h.check_invariants();
}

#[test]
fn delete_by_non_owner_fails() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	let err = h.registry.delete_form(x, uid(2), host(2)).unwrap_err();
	assert!(matches!(err, FormError::NotOwner { .. }));
	assert_eq!(err.code(), form_broker_proto::ErrorCode::NotOwner);
	assert!(h.registry.dump_by_id(x).unwrap().live);
	h.check_invariants();
}

#[test]
fn delete_through_another_callers_host_is_rejected() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	h.registry.add_form(x, &spec(WEATHER), uid(2), host(2)).unwrap();
	let before = h.registry.dump_by_id(x).unwrap();
	h.calls();

	let err = h.registry.delete_form(x, uid(1), host(2)).unwrap_err();
	assert!(matches!(err, FormError::InvalidParam(_)));
	let err = h.registry.release_form(x, uid(1), host(2), false).unwrap_err();
	assert!(matches!(err, FormError::InvalidParam(_)));

	assert_eq!(h.registry.dump_by_id(x).unwrap(), before);
	assert!(h.calls().is_empty());
	h.check_invariants();
}

#[test]
fn delete_through_host_without_the_form_is_rejected() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	let stranger = HostToken(999);
	h.calls();

	assert!(matches!(
		h.registry.delete_form(x, uid(1), stranger),
		Err(FormError::NotOwner { .. })
	));
	assert!(matches!(
		h.registry.release_form(x, uid(1), stranger, true),
		Err(FormError::NotOwner { .. })
	));

	let view = h.registry.dump_by_id(x).unwrap();
	assert_eq!(view.owner_uids, vec![uid(1)]);
	assert_eq!(view.hosts, vec![host(1)]);
	assert!(h.calls().is_empty());
	h.check_invariants();
}

#[test]
fn deleted_id_is_never_resurrected() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	h.registry.delete_form(x, uid(1), host(1)).unwrap();

	let again = h
		.registry
		.add_form(x, &spec(WEATHER), uid(1), host(1))
		.unwrap();
	assert_ne!(again.form_id, x);
	assert!(matches!(h.registry.dump_by_id(x), Err(FormError::NotFound(_))));
	assert_eq!(h.registry.live_count(), 1);
	let fresh = h.add(&spec(WEATHER), 1);
	assert_ne!(fresh, x);
	h.check_invariants();
}

#[test]
fn provider_index_tracks_creation_and_purge() {
	let h = Harness::new();
	let a = h.add(&spec(WEATHER), 1);
	let b = h.add(&spec(WEATHER), 2);
	let key = ProviderKey::new(WEATHER, "entry", "WidgetAbility");
	{
		let state = h.registry.state.lock();
		let ids: Vec<FormId> = state.by_provider[&key].iter().copied().collect();
		assert_eq!(ids, vec![a, b]);
	}
	h.registry.delete_form(a, uid(1), host(1)).unwrap();
	h.registry.delete_form(b, uid(2), host(2)).unwrap();
	assert!(h.registry.state.lock().by_provider.is_empty());
}
