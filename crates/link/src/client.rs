//! Transport clients pooled per endpoint address.

use common::{ClientBuilder, Endpoint, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct ClientPool<C: ?Sized> {
    builder: Arc<dyn ClientBuilder<C>>,
    clients: DashMap<String, Arc<C>>,
}

impl<C: ?Sized + Send + Sync> ClientPool<C> {
    pub fn new(builder: Arc<dyn ClientBuilder<C>>) -> Self {
        Self {
            builder,
            clients: DashMap::new(),
        }
    }

    /// Client for `endpoint`, built on first use.
    pub fn get(&self, endpoint: &Endpoint) -> Result<Arc<C>> {
        if let Some(client) = self.clients.get(endpoint.address()) {
            return Ok(Arc::clone(client.value()));
        }

        let client = self.builder.build(endpoint)?;
        debug!("Built client for {}", endpoint);
        let entry = self
            .clients
            .entry(endpoint.address().to_string())
            .or_insert(client);
        Ok(Arc::clone(entry.value()))
    }

    /// Drop clients whose address no longer appears in `live`.
    pub fn retain_live(&self, live: &HashMap<String, Endpoint>) {
        self.clients
            .retain(|address, _| live.values().any(|endpoint| endpoint.address() == address));
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
