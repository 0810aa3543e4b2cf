use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use form_broker_proto::FormId;
use pretty_assertions::assert_eq;

use super::helpers::{CLOCK, Harness, WEATHER, host, small_limits, spec, temp_spec, uid};
use crate::error::{FormError, QuotaKind};

const THREADS: i32 = 8;
const PER_THREAD: usize = 6;

#[test]
fn racing_temporary_adds_stop_at_the_cap() {
	let h = Harness::with_limits(small_limits(4, 8, 5));
	let admitted = AtomicUsize::new(0);
	let refused = AtomicUsize::new(0);

	thread::scope(|s| {
		for caller in 1..=THREADS {
			let (h, admitted, refused) = (&h, &admitted, &refused);
			s.spawn(move || {
				let bundle = if caller % 2 == 0 { WEATHER } else { CLOCK };
				for _ in 0..PER_THREAD {
					match h.registry.add_form(
						FormId::NONE,
						&temp_spec(bundle),
						uid(caller),
						host(caller),
					) {
						Ok(_) => admitted.fetch_add(1, Ordering::SeqCst),
						Err(FormError::QuotaExceeded(QuotaKind::GlobalTemporary)) => {
							refused.fetch_add(1, Ordering::SeqCst)
						}
						Err(err) => panic!("unexpected error: {err}"),
					};
				}
			});
		}
	});

	assert_eq!(admitted.load(Ordering::SeqCst), 5);
	assert_eq!(refused.load(Ordering::SeqCst), THREADS as usize * PER_THREAD - 5);
	assert_eq!(h.registry.quota_usage().temporary, 5);
	assert_eq!(h.registry.live_count(), 5);
	h.check_invariants();
}

#[test]
fn racing_shares_and_deletes_keep_tables_consistent() {
	let h = Harness::with_limits(small_limits(4, 8, 5));
	let shared: Vec<FormId> = (0..4).map(|_| h.add(&spec(WEATHER), 1)).collect();

	thread::scope(|s| {
		for caller in 2..=THREADS {
			let (h, shared) = (&h, &shared);
			s.spawn(move || {
				let (uid, token) = (uid(caller), host(caller));
				for round in 0..PER_THREAD {
					for form_id in shared {
						let _ = h.registry.add_form(*form_id, &spec(WEATHER), uid, token);
						if round % 2 == 1 {
							let _ = h.registry.delete_form(*form_id, uid, token);
						}
					}
					let _ = h.registry.add_form(FormId::NONE, &spec(CLOCK), uid, token);
				}
			});
		}
	});

	for form_id in &shared {
		assert!(h.registry.dump_by_id(*form_id).unwrap().owner_uids.contains(&uid(1)));
	}
	let usage = h.registry.quota_usage();
	assert!(usage.normal <= 8);
	assert_eq!(usage.normal, h.registry.live_count());
	h.check_invariants();
}
