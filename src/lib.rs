//! # courier-mq - request/reply messaging over AMQP with tenant provisioning
//!
//! courier-mq layers a request/reply convention on top of plain AMQP queues:
//! a [`Listener`] declares topology and dispatches every delivery to a
//! [`MessageHandler`], answering on the sender's reply queue with the
//! correlation id copied verbatim; a [`Client`] publishes requests and waits
//! for the correlated reply, retrying transient failures with a bounded
//! budget. A [`TenantManager`] rides on the same AES-256 primitives to turn
//! encrypted tenant records into provisioned database schemas.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use courier_mq::{BrokerConfig, ConsumeSpec, Listener, ListenerConfig, QueueSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = BrokerConfig::from_env("RABBITMQ_DSN")?;
//!     let config = ListenerConfig::new(broker)
//!         .declare(QueueSpec::durable("billing"))
//!         .consume(ConsumeSpec::auto_ack("billing"));
//!
//!     let listener = Listener::connect_default(config).await?;
//!     listener.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod tenant;

pub use client::Client;
pub use config::{
    BrokerConfig, ClientConfig, ConsumeSpec, ListenerConfig, QueueSpec, RetryPolicy,
};
pub use crypto::CryptoBox;
pub use error::{CourierError, Result};
pub use handler::{EnvelopeHandler, FnHandler, MessageHandler};
pub use listener::{Listener, ListenerState};
pub use message::{Envelope, ACK};
pub use tenant::{EncryptedTenant, Tenant, TenantManager};
