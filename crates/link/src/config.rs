//! Linker configuration and injected collaborators.

use common::buffer::{BufferPool, PackedBuffer};
use common::packet::{self, Codec, Encryptor, JsonCodec, Message};
use common::{Error, Kind, Locator, Registry, Result};
use dispatcher::BalanceStrategy;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Tunables shared by the gate and node linkers.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Balancing strategy for stateless routes.
    pub strategy: BalanceStrategy,
    /// Deadline for establishing the registry/locator watchers.
    pub watch_timeout: Duration,
    /// Maximum in-flight sends per fan-out.
    pub fanout_concurrency: usize,
    /// First delay after a failed watch `next()`.
    pub retry_backoff: Duration,
    /// Cap for the exponential watch backoff.
    pub max_retry_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            strategy: BalanceStrategy::WeightedRoundRobin,
            watch_timeout: Duration::from_secs(3),
            fanout_concurrency: 256,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(5),
        }
    }
}

impl LinkConfig {
    /// Read overrides from the environment, keeping defaults for unset variables.
    ///
    /// - `LINK_BALANCE_STRATEGY`: `random`, `rr` or `wrr`
    /// - `LINK_WATCH_TIMEOUT_MS`
    /// - `LINK_FANOUT_CONCURRENCY`
    /// - `LINK_RETRY_BACKOFF_MS`
    /// - `LINK_MAX_RETRY_BACKOFF_MS`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            strategy: env_or("LINK_BALANCE_STRATEGY", defaults.strategy)?,
            watch_timeout: env_millis("LINK_WATCH_TIMEOUT_MS", defaults.watch_timeout)?,
            fanout_concurrency: env_or("LINK_FANOUT_CONCURRENCY", defaults.fanout_concurrency)?,
            retry_backoff: env_millis("LINK_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            max_retry_backoff: env_millis("LINK_MAX_RETRY_BACKOFF_MS", defaults.max_retry_backoff)?,
        })
    }

    pub fn with_strategy(mut self, strategy: BalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("{}={}: {}", name, value, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    let millis = env_or(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Collaborators and settings handed to a linker at construction.
#[derive(Clone)]
pub struct LinkOptions {
    /// Kind of the process that owns the linker.
    pub caller: Kind,
    pub config: LinkConfig,
    pub registry: Arc<dyn Registry>,
    pub locator: Arc<dyn Locator>,
    pub codec: Arc<dyn Codec>,
    pub encryptor: Option<Arc<dyn Encryptor>>,
    pub buffers: Arc<BufferPool>,
}

impl LinkOptions {
    pub fn new(caller: Kind, registry: Arc<dyn Registry>, locator: Arc<dyn Locator>) -> Self {
        Self {
            caller,
            config: LinkConfig::default(),
            registry,
            locator,
            codec: Arc::new(JsonCodec),
            encryptor: None,
            buffers: Arc::new(BufferPool::new()),
        }
    }

    pub fn with_config(mut self, config: LinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    pub fn with_buffers(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Encode and pack a message into a pooled buffer.
    pub(crate) fn pack(&self, message: &Message) -> Result<PackedBuffer> {
        let payload = packet::encode_payload(
            &message.data,
            self.codec.as_ref(),
            self.encryptor.as_deref(),
        )?;
        Ok(packet::pack(&self.buffers, message.seq, message.route, &payload))
    }
}
