//! Upstream MQTT connectivity with SDK heap budgeting.
//!
//! An [`MqttChannel`] publishes serialized payloads on one topic through an
//! SDK connection owned by the surrounding connectivity module. The channel
//! enforces the broker's hard message-size cap and a global heap budget
//! shared by every channel: when the SDK already holds too much in-flight
//! data, the channel refuses instead of growing the heap. Refused payloads
//! are handed to the payload spool when their metadata asks for persistence.
//! The channel itself never retries.

use crate::spool::PayloadSpool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, warn};

/// AWS IoT Core rejects publish requests larger than 128 KiB.
pub const AWS_IOT_MAX_MESSAGE_SIZE: usize = 131_072;

/// Past this SDK heap usage, channels stop handing data to the SDK.
pub const MAXIMUM_IOT_SDK_HEAP_MEMORY_BYTES: u64 = 10_000_000;

/// Errors surfaced by the publish path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("no connection to the broker")]
    NoConnection,

    #[error("SDK heap budget exhausted")]
    QuotaReached,

    #[error("payload exceeds the maximum message size")]
    PayloadTooLarge,

    #[error("channel topic not configured")]
    NotConfigured,

    #[error("transmission failed")]
    TransmissionError,
}

/// Per-payload publication parameters, passed through from the collection
/// scheme that produced the trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendParams {
    /// Payload was compressed by the serializer
    pub compress: bool,

    /// Spool on failure instead of dropping
    pub persist: bool,

    /// Upload priority; higher drains first from the spool
    pub priority: u32,

    /// Collection scheme the payload belongs to, for diagnostics
    pub collection_scheme_id: String,
}

/// Global ledger of bytes currently held by the SDK, shared by all channels.
#[derive(Debug)]
pub struct MemoryLedger {
    used: AtomicU64,
    limit: u64,
}

impl MemoryLedger {
    pub fn new(limit: u64) -> Self {
        Self {
            used: AtomicU64::new(0),
            limit,
        }
    }

    /// Reserves `bytes` unless that would push usage past the limit.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.checked_add(bytes)?;
                (next <= self.limit).then_some(next)
            })
            .is_ok()
    }

    /// Releases a previous reservation.
    pub fn release(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Configured budget in bytes.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(MAXIMUM_IOT_SDK_HEAP_MEMORY_BYTES)
    }
}

/// Seam to the MQTT SDK owned by the surrounding connectivity module.
///
/// `publish` blocks on the transport thread; the inspection worker never
/// calls into this trait directly.
pub trait MqttConnection: Send + Sync {
    /// Publishes `payload` on `topic`, blocking until handed to the SDK.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ConnectivityError>;

    /// Subscribes to `topic`, blocking until the broker acknowledges.
    fn subscribe(&self, topic: &str) -> Result<(), ConnectivityError>;

    /// True while the underlying connection is established.
    fn is_connected(&self) -> bool;
}

/// One publish channel bound to a single topic.
pub struct MqttChannel {
    connection: Arc<dyn MqttConnection>,
    ledger: Arc<MemoryLedger>,
    spool: Arc<dyn PayloadSpool>,
    topic: Mutex<Option<String>>,
}

impl MqttChannel {
    pub fn new(
        connection: Arc<dyn MqttConnection>,
        ledger: Arc<MemoryLedger>,
        spool: Arc<dyn PayloadSpool>,
    ) -> Self {
        Self {
            connection,
            ledger,
            spool,
            topic: Mutex::new(None),
        }
    }

    /// Sets the topic this channel publishes to. Must be called before any
    /// other operation on the channel.
    pub fn set_topic(&self, topic: impl Into<String>) {
        let mut slot = self.topic.lock().expect("topic mutex poisoned");
        *slot = Some(topic.into());
    }

    /// True once a topic has been configured.
    pub fn is_topic_valid(&self) -> bool {
        self.topic
            .lock()
            .expect("topic mutex poisoned")
            .as_deref()
            .is_some_and(|topic| !topic.is_empty())
    }

    /// True when the connection is up and the topic is configured.
    pub fn is_alive(&self) -> bool {
        self.is_topic_valid() && self.connection.is_connected()
    }

    /// Hard upper bound on payload size for this transport.
    pub fn max_send_size(&self) -> usize {
        AWS_IOT_MAX_MESSAGE_SIZE
    }

    /// Subscribes to the configured topic. Blocking; only used for control
    /// topics during bootstrap, never on the egress path.
    pub fn subscribe(&self) -> Result<(), ConnectivityError> {
        let topic = self.configured_topic()?;
        if !self.connection.is_connected() {
            return Err(ConnectivityError::NoConnection);
        }
        self.connection.subscribe(&topic)
    }

    /// Publishes one serialized payload.
    ///
    /// Size and budget are checked before the SDK sees the payload. The
    /// reserved bytes are released once the publish call completes, success
    /// or not. Failures are routed per the payload's metadata: spooled when
    /// `persist` is set, dropped otherwise; oversized payloads are always
    /// dropped.
    pub fn send(&self, payload: &[u8], params: &SendParams) -> Result<(), ConnectivityError> {
        let topic = self.configured_topic()?;

        if payload.len() > self.max_send_size() {
            error!(
                size = payload.len(),
                max = self.max_send_size(),
                collection_scheme_id = %params.collection_scheme_id,
                "payload exceeds maximum message size, dropped"
            );
            return Err(ConnectivityError::PayloadTooLarge);
        }

        if !self.connection.is_connected() {
            return self.route_failure(ConnectivityError::NoConnection, payload, params);
        }

        if !self.ledger.try_reserve(payload.len() as u64) {
            return self.route_failure(ConnectivityError::QuotaReached, payload, params);
        }

        let result = self.connection.publish(&topic, payload);
        self.ledger.release(payload.len() as u64);

        match result {
            Ok(()) => {
                debug!(
                    topic = %topic,
                    size = payload.len(),
                    "payload published"
                );
                Ok(())
            }
            Err(_) => self.route_failure(ConnectivityError::TransmissionError, payload, params),
        }
    }

    fn configured_topic(&self) -> Result<String, ConnectivityError> {
        self.topic
            .lock()
            .expect("topic mutex poisoned")
            .clone()
            .filter(|topic| !topic.is_empty())
            .ok_or(ConnectivityError::NotConfigured)
    }

    fn route_failure(
        &self,
        cause: ConnectivityError,
        payload: &[u8],
        params: &SendParams,
    ) -> Result<(), ConnectivityError> {
        if params.persist {
            match self.spool.store(payload, params) {
                Ok(()) => debug!(
                    %cause,
                    size = payload.len(),
                    collection_scheme_id = %params.collection_scheme_id,
                    "publish failed, payload spooled"
                ),
                Err(error) => warn!(
                    %cause,
                    %error,
                    collection_scheme_id = %params.collection_scheme_id,
                    "publish failed and spool refused the payload"
                ),
            }
        } else {
            warn!(
                %cause,
                size = payload.len(),
                collection_scheme_id = %params.collection_scheme_id,
                "publish failed, non-persistent payload dropped"
            );
        }
        Err(cause)
    }
}
