// # Trigger Source Trait
//
// Defines the interface to the messaging transport that feeds the bot.
//
// ## Purpose
//
// A trigger source delivers `(sender, text)` pairs extracted from inbound
// messages and carries the registration response back to the sender.
// Session establishment, encryption and message marshalling all live
// behind this trait.
//
// ## Usage
//
// ```rust,ignore
// use referral_core::TriggerSource;
// use tokio_stream::StreamExt;
//
// let source = /* TriggerSource implementation */;
//
// let mut triggers = source.watch();
// while let Some(trigger) = triggers.next().await {
//     let text = registrar.register(&trigger.sender, &trigger.text).await;
//     source.respond(trigger.reply(text)).await?;
// }
// ```

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::identity::Identity;

/// An inbound message asking to redeem a code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub sender: Identity,
    /// Transport id of the inbound message, echoed in the reply
    pub message_id: String,
    /// Message text, taken verbatim as the requested code
    pub text: String,
}

impl Trigger {
    pub fn new(sender: Identity, message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender,
            message_id: message_id.into(),
            text: text.into(),
        }
    }

    /// Build the response to this trigger
    pub fn reply(&self, text: impl Into<String>) -> Response {
        Response {
            recipient: self.sender,
            reply_to: self.message_id.clone(),
            text: text.into(),
        }
    }
}

/// An outbound reply to a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub recipient: Identity,
    pub reply_to: String,
    pub text: String,
}

/// Trait for trigger source implementations
///
/// # Thread Safety
///
/// `respond()` is called concurrently from per-trigger tasks.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Stream of inbound triggers
    ///
    /// Called once per listener run. The stream ending means the
    /// transport closed.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Trigger> + Send + 'static>>;

    /// Deliver a response to its recipient
    ///
    /// Failures are reported, never retried here.
    async fn respond(&self, response: Response) -> Result<(), crate::Error>;

    /// Short name for logs
    fn source_name(&self) -> &'static str;
}
