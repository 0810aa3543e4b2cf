//! Lifecycle event reactor.
//!
//! Provider uninstalls, provider data wipes, host deaths and app-data resets
//! arrive from sources that must never block on the registry. This actor
//! queues them on a bounded channel and applies them one at a time through
//! [`FormRegistry::handle_event`].
//!
//! # Mental Model
//!
//! Events are applied in arrival order. A [`LifecycleHandle::barrier`] sent
//! after a batch of events resolves once all of them were applied, which is
//! how callers observe completion. Handlers never report errors back to the
//! event source; races with explicit deletes are already-done no-ops.

use std::sync::Arc;

use form_broker_proto::{HostToken, LifecycleEvent};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collab::DeathRecipient;
use crate::core::FormRegistry;

/// Commands for the lifecycle reactor.
#[derive(Debug)]
pub enum LifecycleCmd {
	/// Apply one lifecycle event.
	Event(LifecycleEvent),
	/// Reply once every previously queued command was processed.
	Barrier {
		/// Completion signal.
		reply: oneshot::Sender<()>,
	},
}

/// Sender side of the lifecycle reactor.
#[derive(Clone, Debug)]
pub struct LifecycleHandle {
	tx: mpsc::Sender<LifecycleCmd>,
}

impl LifecycleHandle {
	/// Wraps a command sender in a typed handle.
	pub fn new(tx: mpsc::Sender<LifecycleCmd>) -> Self {
		Self { tx }
	}

	/// Queues an event, waiting for channel capacity.
	///
	/// Returns false if the reactor has stopped.
	pub async fn send(&self, event: LifecycleEvent) -> bool {
		self.tx.send(LifecycleCmd::Event(event)).await.is_ok()
	}

	/// Queues an event without waiting.
	///
	/// Used from transport callbacks that cannot await. A full channel drops
	/// the event with a warning.
	pub fn try_notify(&self, event: LifecycleEvent) -> bool {
		match self.tx.try_send(LifecycleCmd::Event(event)) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(LifecycleCmd::Event(event))) => {
				warn!(?event, "lifecycle queue full, event dropped");
				false
			}
			Err(_) => false,
		}
	}

	/// Waits until every event queued before this call was applied.
	///
	/// Returns false if the reactor stopped first.
	pub async fn barrier(&self) -> bool {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(LifecycleCmd::Barrier { reply }).await.is_err() {
			return false;
		}
		rx.await.is_ok()
	}
}

impl DeathRecipient for LifecycleHandle {
	fn on_death(&self, token: HostToken) {
		self.try_notify(LifecycleEvent::HostProcessDied(token));
	}
}

/// Lifecycle reactor actor.
pub struct LifecycleService {
	rx: mpsc::Receiver<LifecycleCmd>,
	registry: Arc<FormRegistry>,
	shutdown: CancellationToken,
}

impl LifecycleService {
	/// Spawns the reactor and returns its handle.
	///
	/// The reactor stops when `shutdown` is cancelled or every handle is
	/// dropped.
	pub fn start(
		registry: Arc<FormRegistry>,
		capacity: usize,
		shutdown: CancellationToken,
	) -> LifecycleHandle {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		let service = Self {
			rx,
			registry,
			shutdown,
		};
		tokio::spawn(service.run());
		LifecycleHandle::new(tx)
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				_ = self.shutdown.cancelled() => {
					info!("lifecycle reactor shutting down");
					break;
				}
				cmd = self.rx.recv() => {
					let Some(cmd) = cmd else {
						break;
					};
					match cmd {
						LifecycleCmd::Event(event) => {
							debug!(?event, "applying lifecycle event");
							self.registry.handle_event(&event);
						}
						LifecycleCmd::Barrier { reply } => {
							let _ = reply.send(());
						}
					}
				}
			}
		}
	}
}
