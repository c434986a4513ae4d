//! Trigger listener
//!
//! The Listener is responsible for:
//! - Consuming inbound triggers from a TriggerSource
//! - Running one registration per trigger, concurrently
//! - Delivering the response text back through the source
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ TriggerSource │─── Trigger ───┐
//! └───────────────┘               │
//!         ▲                       ▼
//!         │               ┌──────────────┐
//!         │               │   Listener   │── spawn per trigger
//!         │               └──────────────┘
//!         │                       │
//!         │                       ▼
//!         │               ┌──────────────┐      ┌──────────────┐
//!         └── Response ───│  Registrar   │─────▶│ StoreBackend │
//!                         └──────────────┘      └──────────────┘
//! ```
//!
//! ## Delivery Failures
//!
//! A response that cannot be delivered is logged and dropped. The
//! registration already happened and is neither undone nor retried.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::error::Result;
use crate::identity::Identity;
use crate::registration::Registrar;
use crate::traits::{Trigger, TriggerSource};

/// Events emitted by the Listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Listener started
    Started { backend: &'static str },

    /// Trigger received from the source
    TriggerReceived {
        sender: Identity,
        message_id: String,
    },

    /// Response handed to the source
    ResponseSent {
        recipient: Identity,
        redeemed: bool,
    },

    /// Response could not be delivered and was dropped
    DeliveryFailed { recipient: Identity, error: String },

    /// Listener stopped
    Stopped { reason: String },
}

/// Trigger listener
///
/// ## Lifecycle
///
/// 1. Create with [`Listener::new()`]
/// 2. Start with [`Listener::run()`]
/// 3. Runs until the shutdown signal fires or the source's stream ends
/// 4. In-flight registrations are awaited before `run()` returns
pub struct Listener {
    source: Arc<dyn TriggerSource>,
    registrar: Arc<Registrar>,
    event_tx: mpsc::Sender<ListenerEvent>,
}

impl Listener {
    /// Create a new listener
    ///
    /// # Returns
    ///
    /// A tuple of (listener, event_receiver) where event_receiver yields listener events
    pub fn new(
        source: Arc<dyn TriggerSource>,
        registrar: Arc<Registrar>,
        config: ListenerConfig,
    ) -> (Self, mpsc::Receiver<ListenerEvent>) {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity.max(1));

        let listener = Self {
            source,
            registrar,
            event_tx: tx,
        };

        (listener, rx)
    }

    /// Run the listener
    ///
    /// # Parameters
    ///
    /// - `shutdown_rx`: Optional oneshot receiver; without one the listener
    ///   runs until the source's stream ends
    pub async fn run(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        emit_event(
            &self.event_tx,
            ListenerEvent::Started {
                backend: self.registrar.backend_name(),
            },
        );
        info!(
            "Listening for triggers on {} (backend: {})",
            self.source.source_name(),
            self.registrar.backend_name()
        );

        let mut triggers = self.source.watch();
        let mut tasks = JoinSet::new();

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown);

        let reason = loop {
            tokio::select! {
                maybe_trigger = triggers.next() => match maybe_trigger {
                    Some(trigger) => {
                        tasks.spawn(handle_trigger(
                            Arc::clone(&self.source),
                            Arc::clone(&self.registrar),
                            self.event_tx.clone(),
                            trigger,
                        ));
                    }
                    None => break "Trigger source closed",
                },

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Trigger task failed: {}", e);
                    }
                }

                _ = &mut shutdown => break "Shutdown signal",
            }
        };

        info!("{}, waiting for {} in-flight trigger(s)", reason, tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Trigger task failed: {}", e);
            }
        }

        emit_event(
            &self.event_tx,
            ListenerEvent::Stopped {
                reason: reason.to_string(),
            },
        );
        info!("Listener stopped");

        Ok(())
    }
}

/// Register one trigger and deliver the response
async fn handle_trigger(
    source: Arc<dyn TriggerSource>,
    registrar: Arc<Registrar>,
    event_tx: mpsc::Sender<ListenerEvent>,
    trigger: Trigger,
) {
    info!("Received trigger {:?} from {}", trigger.text, trigger.sender);
    emit_event(
        &event_tx,
        ListenerEvent::TriggerReceived {
            sender: trigger.sender,
            message_id: trigger.message_id.clone(),
        },
    );

    let outcome = registrar.evaluate(&trigger.sender, &trigger.text).await;
    let redeemed = outcome.is_redeemed();
    let response = trigger.reply(outcome.response_text());

    match source.respond(response).await {
        Ok(()) => {
            debug!("Sent response to {}", trigger.sender);
            emit_event(
                &event_tx,
                ListenerEvent::ResponseSent {
                    recipient: trigger.sender,
                    redeemed,
                },
            );
        }
        Err(e) => {
            error!("Failed to send response to {}: {}", trigger.sender, e);
            emit_event(
                &event_tx,
                ListenerEvent::DeliveryFailed {
                    recipient: trigger.sender,
                    error: e.to_string(),
                },
            );
        }
    }
}

/// Emit a listener event, dropping it if the channel is full
fn emit_event(event_tx: &mpsc::Sender<ListenerEvent>, event: ListenerEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = event_tx.try_send(event) {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}
