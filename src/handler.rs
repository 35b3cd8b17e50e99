use std::future::Future;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::message::{Envelope, ACK};

/// Capability interface for processing inbound deliveries.
///
/// One implementation per use case; the listener is polymorphic over this
/// trait rather than over an untyped function value. The returned JSON value
/// becomes the reply body when the sender asked for one.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a raw delivery body
    async fn handle(&self, body: &[u8]) -> Result<serde_json::Value>;

    /// Handler name for log lines
    fn name(&self) -> &'static str {
        "MessageHandler"
    }
}

/// Function-based handler adapter; the closure receives the delivery body by
/// value
pub struct FnHandler<F> {
    name: &'static str,
    handler: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: &'static str, handler: F) -> Self {
        Self { name, handler }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value>> + Send,
{
    async fn handle(&self, body: &[u8]) -> Result<serde_json::Value> {
        (self.handler)(body.to_vec()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Default handler: decodes the standard envelope, logs the pattern, answers
/// the fixed acknowledgment value.
///
/// A body that is not a valid envelope is a protocol error: it is logged and
/// answered with null so the delivery can be dropped without requeueing.
pub struct EnvelopeHandler;

#[async_trait]
impl MessageHandler for EnvelopeHandler {
    async fn handle(&self, body: &[u8]) -> Result<serde_json::Value> {
        match Envelope::from_bytes(body) {
            Ok(envelope) => {
                info!(pattern = %envelope.pattern, "Received message");
                Ok(serde_json::Value::String(ACK.to_string()))
            }
            Err(e) => {
                warn!(error = %e, "Failed to decode message envelope");
                Ok(serde_json::Value::Null)
            }
        }
    }

    fn name(&self) -> &'static str {
        "EnvelopeHandler"
    }
}
