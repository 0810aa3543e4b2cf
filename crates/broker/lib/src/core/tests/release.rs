use form_broker_proto::{FormId, ProviderUpdate};
use pretty_assertions::assert_eq;

use super::helpers::{Call, Harness, WEATHER, host, spec, timed_spec, uid};
use crate::error::FormError;
use crate::storage::FormStorage;

fn push(h: &Harness, form_id: FormId, data: &str) {
	h.registry.update_form_record(
		form_id,
		ProviderUpdate {
			data: Some(data.to_string()),
			..ProviderUpdate::default()
		},
	);
}

#[test]
fn release_keeps_ownership_and_quota() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	push(&h, x, "sunny");
	let usage = h.registry.quota_usage();

	h.registry.release_form(x, uid(1), host(1), false).unwrap();

	let view = h.registry.dump_by_id(x).unwrap();
	assert_eq!(view.owner_uids, vec![uid(1)]);
	assert_eq!(view.hosts, vec![host(1)]);
	assert!(view.has_snapshot);
	assert_eq!(h.registry.quota_usage(), usage);
	let hosts = h.registry.dump_hosts();
	assert!(!hosts[0].forms[0].subscribed);
	h.check_invariants();
}

#[test]
fn released_host_gets_no_pushes() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	h.registry.add_form(x, &spec(WEATHER), uid(2), host(2)).unwrap();
	h.registry.release_form(x, uid(1), host(1), false).unwrap();
	h.calls();

	push(&h, x, "rain");
	assert_eq!(
		h.calls(),
		vec![Call::Update(host(2), x, Some("rain".to_string()))]
	);
}

#[test]
fn purge_evicts_snapshot_everywhere() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	push(&h, x, "sunny");
	assert_eq!(h.storage.load_snapshots().unwrap().len(), 1);

	h.registry.release_form(x, uid(1), host(1), true).unwrap();
	assert!(!h.registry.dump_by_id(x).unwrap().has_snapshot);
	assert!(h.storage.load_snapshots().unwrap().is_empty());
	assert!(h.storage.load(x).unwrap().is_some());
	h.check_invariants();
}

#[test]
fn release_stops_timer_and_request_resumes_it() {
	let h = Harness::new();
	let x = h.add(&timed_spec(WEATHER), 1);
	h.calls();

	h.registry.release_form(x, uid(1), host(1), false).unwrap();
	assert_eq!(h.calls(), vec![Call::RemoveTimer(x)]);
	assert!(h.registry.dump_timer_state().is_empty());
	h.check_invariants();

	let info = h.registry.request_form(x, uid(1), host(1)).unwrap();
	assert_eq!(info.form_id, x);
	let calls = h.calls();
	assert!(matches!(calls[0], Call::AddTimer(id, _) if id == x));
	assert_eq!(calls[1], Call::Refresh(x));
	assert!(h.registry.dump_hosts()[0].forms[0].subscribed);
	h.check_invariants();
}

#[test]
fn request_returns_cached_snapshot() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	push(&h, x, "fog");
	let info = h.registry.request_form(x, uid(1), host(1)).unwrap();
	assert_eq!(info.data.as_deref(), Some("fog"));
}

#[test]
fn release_requires_ownership() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	assert!(matches!(
		h.registry.release_form(x, uid(2), host(2), true),
		Err(FormError::NotOwner { .. })
	));
	assert!(matches!(
		h.registry.release_form(FormId(u64::MAX), uid(1), host(1), false),
		Err(FormError::NotFound(_))
	));
	h.check_invariants();
}
