//! Service-level tests for broker actor subsystems.

use std::sync::Arc;

use form_broker_proto::{CallerUid, FormId, FormSpec, HostToken, ProviderKey};

use crate::collab::Collaborators;
use crate::config::QuotaConfig;
use crate::core::FormRegistry;
use crate::storage::MemoryStorage;


pub(super) fn registry() -> Arc<FormRegistry> {
	let storage = Arc::new(MemoryStorage::new());
	Arc::new(
		FormRegistry::open(QuotaConfig::default(), storage, Collaborators::detached())
			.expect("open registry"),
	)
}

pub(super) fn weather() -> ProviderKey {
	ProviderKey::new("com.example.weather", "entry", "WidgetAbility")
}

pub(super) fn add(registry: &FormRegistry, uid: i32, temporary: bool) -> FormId {
	let spec = FormSpec::new(&weather(), "forecast", 2).temporary(temporary);
	registry
		.add_form(FormId::NONE, &spec, CallerUid(uid), HostToken(uid as u64))
		.expect("add form")
		.form_id
}
