use std::sync::Arc;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConsumeSpec, ListenerConfig, QueueSpec};
use crate::error::Result;
use crate::handler::{EnvelopeHandler, MessageHandler};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Listener lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerState {
    /// Connection and channel are open
    Connected,
    /// Declaring configured queues
    Declaring,
    /// Consumer loops are running
    Consuming,
    /// Shutdown completed
    Closed,
}

/// Declares queues, runs one consumer loop per [`ConsumeSpec`], and
/// dispatches every delivery to the configured [`MessageHandler`], answering
/// with a correlated reply when the sender expects one.
///
/// Broker availability is a hard precondition: a failed dial at construction
/// is fatal, not retried.
pub struct Listener {
    config: ListenerConfig,
    handler: Arc<dyn MessageHandler>,
    connection: Connection,
    channel: Channel,
    state: Arc<RwLock<ListenerState>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Listener {
    /// Dial the broker and prepare a listener with the given handler
    pub async fn connect(config: ListenerConfig, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        info!("🚀 Starting listener");
        let connection = Connection::connect(
            &config.broker.dsn,
            ConnectionProperties::default()
                .with_connection_name(format!("courier-listener-{}", Uuid::new_v4()).into()),
        )
        .await?;
        let channel = connection.create_channel().await?;
        info!("✅ Connected to broker");

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            handler,
            connection,
            channel,
            state: Arc::new(RwLock::new(ListenerState::Connected)),
            shutdown_tx,
        })
    }

    /// Dial the broker with the default envelope handler
    pub async fn connect_default(config: ListenerConfig) -> Result<Self> {
        Self::connect(config, Arc::new(EnvelopeHandler)).await
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ListenerState {
        self.state.read().await.clone()
    }

    /// Declare topology, start all consumer loops, then block until
    /// [`shutdown`](Self::shutdown) is signalled. In-flight handlers finish
    /// before this returns.
    pub async fn run(&self) -> Result<()> {
        *self.state.write().await = ListenerState::Declaring;
        for queue in &self.config.queues {
            self.declare_queue(queue).await?;
        }

        let mut workers = Vec::with_capacity(self.config.consumers.len());
        for spec in &self.config.consumers {
            workers.push(self.spawn_consumer(spec).await?);
        }
        *self.state.write().await = ListenerState::Consuming;

        let queues: Vec<&str> = self.config.queues.iter().map(|q| q.name.as_str()).collect();
        info!(queues = ?queues, "✅ Listener running");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("Listener shutting down");
        for worker in workers {
            let _ = worker.await;
        }

        if let Err(e) = self.channel.close(200, "listener closed").await {
            warn!(error = %e, "Error closing channel");
        }
        if let Err(e) = self.connection.close(200, "listener closed").await {
            warn!(error = %e, "Error closing connection");
        }
        *self.state.write().await = ListenerState::Closed;
        Ok(())
    }

    /// Signal a cooperative shutdown: consumer loops stop taking deliveries
    /// and `run` returns once in-flight handlers complete
    pub fn shutdown(&self) {
        // send_replace stores the value even with no live receivers, so a
        // shutdown signalled before run() is not lost
        self.shutdown_tx.send_replace(true);
    }

    /// Declare one queue; a broker conflict on re-declaration with different
    /// parameters surfaces here as a fatal error
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        self.channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    auto_delete: spec.auto_delete,
                    exclusive: spec.exclusive,
                    nowait: spec.no_wait,
                    ..Default::default()
                },
                spec.args.clone(),
            )
            .await?;
        debug!(queue = %spec.name, "Queue declared");
        Ok(())
    }

    /// Start one independent delivery loop for a consume spec
    async fn spawn_consumer(&self, spec: &ConsumeSpec) -> Result<tokio::task::JoinHandle<()>> {
        let mut consumer = self
            .channel
            .basic_consume(
                &spec.queue,
                &spec.consumer_tag,
                BasicConsumeOptions {
                    no_ack: spec.auto_ack,
                    exclusive: spec.exclusive,
                    no_local: spec.no_local,
                    nowait: spec.no_wait,
                },
                spec.args.clone(),
            )
            .await?;

        let channel = self.channel.clone();
        let handler = self.handler.clone();
        let queue = spec.queue.clone();
        let auto_ack = spec.auto_ack;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            debug!(queue = %queue, "Consumer loop started");
            let mut in_flight = tokio::task::JoinSet::new();
            loop {
                if *shutdown_rx.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = consumer.next() => match next {
                        Some(Ok(delivery)) => {
                            let channel = channel.clone();
                            let handler = handler.clone();
                            in_flight.spawn(async move {
                                dispatch(delivery, &channel, handler.as_ref(), auto_ack).await;
                            });
                        }
                        Some(Err(e)) => {
                            error!(queue = %queue, error = %e, "Error receiving delivery");
                        }
                        None => {
                            warn!(queue = %queue, "Delivery stream closed");
                            break;
                        }
                    },
                }
            }
            // drain handlers that were already dispatched
            while in_flight.join_next().await.is_some() {}
            debug!(queue = %queue, "Consumer loop stopped");
        });

        info!(queue = %spec.queue, "Consumer registered");
        Ok(handle)
    }
}

/// Handle one delivery: invoke the handler, publish a correlated reply when
/// the sender asked for one, acknowledge exactly once unless auto-ack.
async fn dispatch(delivery: Delivery, channel: &Channel, handler: &dyn MessageHandler, auto_ack: bool) {
    let reply_value = match handler.handle(&delivery.data).await {
        Ok(value) => value,
        Err(e) => {
            error!(handler = handler.name(), error = %e, "Handler failed");
            serde_json::json!({ "error": e.to_string() })
        }
    };

    if let Some(reply_to) = delivery.properties.reply_to() {
        let correlation_id = delivery.properties.correlation_id().clone();
        if let Err(e) = publish_reply(channel, reply_to.as_str(), correlation_id, &reply_value).await
        {
            // the requester's own timeout is the backstop; no retry here
            warn!(reply_to = %reply_to, error = %e, "Failed to publish reply");
        }
    }

    if !auto_ack {
        if let Err(e) = channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
        {
            error!(error = %e, "Failed to acknowledge delivery");
        }
    }
}

/// Publish a handler result to the requester's reply queue, with the
/// correlation id copied verbatim from the request
async fn publish_reply(
    channel: &Channel,
    reply_to: &str,
    correlation_id: Option<lapin::types::ShortString>,
    value: &serde_json::Value,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    let mut properties = BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into());
    if let Some(correlation_id) = correlation_id {
        properties = properties.with_correlation_id(correlation_id);
    }

    channel
        .basic_publish(
            "",
            reply_to,
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await?
        .await?;

    debug!(reply_to = %reply_to, "Reply published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::{BrokerConfig, ClientConfig};
    use std::time::Duration;

    // Requires a reachable broker: full round trip through declare, consume,
    // dispatch, and the correlated reply convention.
    #[tokio::test]
    async fn round_trip_against_live_broker() {
        let Ok(dsn) = std::env::var("RABBITMQ_URL") else {
            return;
        };

        let queue = format!("courier-test-{}", Uuid::new_v4());
        let config = ListenerConfig::new(BrokerConfig::new(dsn.clone()))
            .declare(QueueSpec {
                durable: false,
                auto_delete: true,
                ..QueueSpec::durable(queue.clone())
            })
            .consume(ConsumeSpec::auto_ack(queue.clone()));

        let listener = Arc::new(Listener::connect_default(config).await.unwrap());
        let runner = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.run().await })
        };

        // wait for the consumer loops to come up
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(listener.state().await, ListenerState::Consuming);

        let client = Client::connect(ClientConfig::new(BrokerConfig::new(dsn), queue))
            .await
            .unwrap();
        let reply = client
            .send_with_reply_timeout(
                br#"{"pattern":"ping","data":null}"#,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(reply, br#""OK""#);

        client.close().await.unwrap();
        listener.shutdown();
        runner.await.unwrap().unwrap();
        assert_eq!(listener.state().await, ListenerState::Closed);
    }
}
