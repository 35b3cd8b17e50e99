use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::{CourierError, Result};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Publishes messages to one target queue, optionally waiting for a
/// correlated reply on a private reply queue.
///
/// Owns one connection/channel pair for its lifetime; calls are sequential
/// per client. A caller wanting concurrency runs multiple clients.
pub struct Client {
    config: ClientConfig,
    connection: Connection,
    channel: Channel,
}

impl Client {
    /// Dial the broker and open the client's channel
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connection = Connection::connect(
            &config.broker.dsn,
            ConnectionProperties::default()
                .with_connection_name(format!("courier-client-{}", Uuid::new_v4()).into()),
        )
        .await?;
        let channel = connection.create_channel().await?;

        info!(queue = %config.queue, "Client connected");
        Ok(Self {
            config,
            connection,
            channel,
        })
    }

    /// Publish a message without waiting for a reply.
    ///
    /// Transient failures are retried per the configured policy; the final
    /// error propagates after the budget is exhausted.
    pub async fn send(&self, body: &[u8]) -> Result<()> {
        with_retry(&self.config.retry, || self.publish(body, None, None)).await
    }

    /// Publish a message and wait for the first delivery on a private reply
    /// queue.
    ///
    /// Each call declares its own server-named, exclusive, auto-delete reply
    /// queue, so no correlation cross-check against other in-flight requests
    /// is needed. The wait itself has no deadline; prefer
    /// [`send_with_reply_timeout`](Self::send_with_reply_timeout) unless an
    /// outer deadline already bounds the call.
    pub async fn send_with_reply(&self, body: &[u8]) -> Result<Vec<u8>> {
        with_retry(&self.config.retry, || self.request_reply(body)).await
    }

    /// Like [`send_with_reply`](Self::send_with_reply), but the whole call,
    /// retries included, is bounded by `timeout`.
    pub async fn send_with_reply_timeout(
        &self,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, self.send_with_reply(body)).await {
            Ok(result) => result,
            Err(_) => Err(CourierError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// One request/reply attempt: declare the reply queue, publish, consume
    /// the first delivery
    async fn request_reply(&self, body: &[u8]) -> Result<Vec<u8>> {
        let reply_queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    auto_delete: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let reply_to = reply_queue.name().as_str().to_string();
        let correlation_id = Uuid::new_v4().to_string();

        self.publish(body, Some(&reply_to), Some(&correlation_id))
            .await?;
        debug!(reply_to = %reply_to, correlation_id = %correlation_id, "Request published");

        let mut consumer = self
            .channel
            .basic_consume(
                &reply_to,
                &format!("reply-{correlation_id}"),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        match consumer.next().await {
            Some(Ok(delivery)) => {
                let received = delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string());
                if received.as_deref() != Some(correlation_id.as_str()) {
                    debug!(expected = %correlation_id, received = ?received,
                        "Reply correlation id differs from request");
                }
                Ok(delivery.data)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(CourierError::internal("reply stream closed without a delivery")),
        }
    }

    async fn publish(
        &self,
        body: &[u8],
        reply_to: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        let mut properties =
            BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into());
        if let Some(reply_to) = reply_to {
            properties = properties.with_reply_to(reply_to.to_string().into());
        }
        if let Some(correlation_id) = correlation_id {
            properties = properties.with_correlation_id(correlation_id.to_string().into());
        }

        self.channel
            .basic_publish(
                "",
                &self.config.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    /// Release the channel and connection
    pub async fn close(self) -> Result<()> {
        self.channel.close(200, "client closed").await?;
        self.connection.close(200, "client closed").await?;
        Ok(())
    }
}

/// Run `attempt` up to `policy.max_attempts` times with a fixed delay between
/// tries, returning the first success or the last error.
pub(crate) async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for n in 1..=policy.max_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt = n, max = policy.max_attempts, error = %e, "Send attempt failed");
                last_err = Some(e);
                if n < policy.max_attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CourierError::internal("retry budget of zero attempts")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retry_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(CourierError::internal("induced failure"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts_after_three_failures() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CourierError::internal("always fails")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_after_first_success() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("done") }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // Requires a reachable broker
    #[tokio::test]
    async fn client_connects_against_live_broker() {
        let Ok(dsn) = std::env::var("RABBITMQ_URL") else {
            return;
        };
        let config = ClientConfig::new(BrokerConfig::new(dsn), "courier-test");
        let client = Client::connect(config).await.unwrap();
        client.send(br#"{"pattern":"ping","data":null}"#).await.unwrap();
        client.close().await.unwrap();
    }
}
