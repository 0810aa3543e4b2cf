use form_broker_proto::FormId;
use pretty_assertions::assert_eq;

use super::helpers::{Call, Harness, WEATHER, host, small_limits, spec, temp_spec, uid};
use crate::core::QuotaUsage;
use crate::error::{FormError, QuotaKind};

#[test]
fn batch_add_creates_all_forms() {
	let h = Harness::new();
	let ids = h
		.registry
		.batch_add_for_records(&spec(WEATHER), uid(1), host(1), 5)
		.unwrap();
	assert_eq!(ids.len(), 5);
	assert!(ids.windows(2).all(|w| w[0] < w[1]));
	assert_eq!(h.registry.quota_usage().normal, 5);

	let calls = h.calls();
	assert_eq!(calls.iter().filter(|c| matches!(c, Call::Acquire(_))).count(), 5);
	assert_eq!(calls.iter().filter(|c| matches!(c, Call::Watch(_))).count(), 1);
	h.check_invariants();
}

#[test]
fn batch_add_respects_aggregate_caps() {
	let h = Harness::with_limits(small_limits(4, 8, 2));
	h.add(&spec(WEATHER), 1);

	assert!(matches!(
		h.registry.batch_add_for_records(&spec(WEATHER), uid(1), host(1), 4),
		Err(FormError::QuotaExceeded(QuotaKind::BundleNormal))
	));
	assert!(matches!(
		h.registry.batch_add_for_records(&temp_spec(WEATHER), uid(1), host(1), 3),
		Err(FormError::QuotaExceeded(QuotaKind::GlobalTemporary))
	));
	assert_eq!(h.registry.live_count(), 1);
	assert_eq!(h.registry.quota_usage().normal, 1);

	h.registry
		.batch_add_for_records(&spec(WEATHER), uid(1), host(1), 3)
		.unwrap();
	assert_eq!(h.registry.quota_usage().normal, 4);
	h.check_invariants();
}

#[test]
fn batch_add_is_all_or_nothing_on_storage_failure() {
	let h = Harness::new();
	h.storage.set_fail_writes(true);
	assert!(matches!(
		h.registry.batch_add_for_records(&spec(WEATHER), uid(1), host(1), 3),
		Err(FormError::Storage(_))
	));
	h.storage.set_fail_writes(false);
	assert_eq!(h.registry.live_count(), 0);
	assert_eq!(h.registry.quota_usage().normal, 0);
	assert!(h.storage.is_empty());
	assert!(
		h.registry
			.batch_add_for_records(&spec(WEATHER), uid(1), host(1), 0)
			.unwrap()
			.is_empty()
	);
}

#[test]
fn clear_all_resets_everything() {
	let h = Harness::new();
	let x = h.add(&spec(WEATHER), 1);
	h.registry.add_form(x, &spec(WEATHER), uid(2), host(2)).unwrap();
	h.add(&temp_spec(WEATHER), 3);
	let restarted = h.restart();
	restarted.add(&spec(WEATHER), 4);
	restarted.calls();

	restarted.registry.clear_all().unwrap();

	assert!(restarted.registry.dump_all().is_empty());
	assert!(restarted.registry.dump_hosts().is_empty());
	assert_eq!(restarted.registry.quota_usage(), QuotaUsage::default());
	assert!(restarted.storage.is_empty());
	let calls = restarted.calls();
	assert!(calls.contains(&Call::Unwatch(host(4))));
	assert!(!calls.iter().any(|c| matches!(c, Call::NotifyDelete(_))));
	restarted.check_invariants();

	let fresh = restarted.add(&spec(WEATHER), 1);
	assert_ne!(fresh, FormId::NONE);
	restarted.check_invariants();
}
