//! Outbound calls to node instances.
//!
//! Deliveries are routed by the message's route id. Stateful routes go to the
//! node the user is bound to within the route's group; stateless routes are
//! balanced across the route's pool. Events fan out to every subscriber.

use crate::client::ClientPool;
use crate::config::LinkOptions;
use crate::discovery;
use crate::fanout;
use crate::location::NodeLocations;
use crate::retry::{self, MAX_ATTEMPTS};
use crate::types::{direct, DeliverArgs, TriggerArgs};
use common::{
    ClientBuilder, Endpoint, Error, Kind, NodeClient, Outcome, Result, ServiceInstance, State,
};
use dispatcher::{Dispatcher, RoutePool};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// A resolved delivery target. `nid` is set when it came from a user binding.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    nid: Option<String>,
    endpoint: Endpoint,
}

#[derive(Clone)]
pub struct NodeLinker {
    options: LinkOptions,
    dispatcher: Arc<Dispatcher>,
    locations: Arc<NodeLocations>,
    clients: Arc<ClientPool<dyn NodeClient>>,
}

impl NodeLinker {
    pub fn new(options: LinkOptions, builder: Arc<dyn ClientBuilder<dyn NodeClient>>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(options.config.strategy));
        Self {
            options,
            dispatcher,
            locations: Arc::new(NodeLocations::new()),
            clients: Arc::new(ClientPool::new(builder)),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn locations(&self) -> &NodeLocations {
        &self.locations
    }

    /// Start following node topology and node-binding changes.
    pub async fn watch(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        discovery::start(
            &self.options,
            Kind::Node,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.clients),
            Arc::clone(&self.locations),
            shutdown,
        )
        .await
    }

    pub fn has_node(&self, nid: &str) -> bool {
        self.dispatcher.has_endpoint(nid)
    }

    pub async fn locate_node(&self, uid: i64, group: &str) -> Result<String> {
        if let Some(nid) = self.locations.load(uid, group) {
            return Ok(nid);
        }

        match self.options.locator.locate_node(uid, group).await? {
            Some(nid) if !nid.is_empty() => {
                self.locations.store(uid, group, &nid);
                Ok(nid)
            }
            _ => Err(Error::NotFoundUserLocation),
        }
    }

    pub async fn ask_node(&self, uid: i64, group: &str, nid: &str) -> Result<(String, bool)> {
        let actual = self.locate_node(uid, group).await?;
        let matched = actual == nid;
        Ok((actual, matched))
    }

    pub async fn bind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()> {
        self.options.locator.bind_node(uid, group, nid).await?;
        self.locations.store(uid, group, nid);
        Ok(())
    }

    pub async fn unbind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()> {
        self.options.locator.unbind_node(uid, group, nid).await?;
        self.locations.evict(uid, group);
        Ok(())
    }

    pub async fn fetch_node_list(&self, states: &[State]) -> Result<Vec<ServiceInstance>> {
        discovery::fetch_instances(&self.options, Kind::Node, states).await
    }

    pub async fn get_node_state(&self, nid: &str) -> Result<State> {
        self.client(nid)?.get_state().await
    }

    pub async fn set_node_state(&self, nid: &str, state: State) -> Result<()> {
        self.client(nid)?.set_state(state).await
    }

    fn client(&self, nid: &str) -> Result<Arc<dyn NodeClient>> {
        if nid.is_empty() {
            return Err(Error::InvalidNid);
        }
        let endpoint = self.dispatcher.find_endpoint(nid)?;
        self.clients.get(&endpoint)
    }

    async fn resolve(&self, route: &RoutePool, uid: i64) -> Result<Target> {
        if !route.stateful() {
            return Ok(Target {
                nid: None,
                endpoint: route.find_endpoint(None)?,
            });
        }

        let nid = self.locate_node(uid, route.group()).await?;
        let endpoint = route.find_endpoint(Some(&nid))?;
        Ok(Target {
            nid: Some(nid),
            endpoint,
        })
    }

    /// Deliver a message to the node serving its route.
    pub async fn deliver(&self, args: DeliverArgs) -> Result<()> {
        let DeliverArgs {
            nid,
            cid,
            uid,
            message,
        } = args;

        let route = self.dispatcher.find_route(message.route)?;
        if route.internal() && self.options.caller == Kind::Gate {
            debug!(route = route.id(), "Rejected internal route from gate");
            return Err(Error::IllegalRequest);
        }
        counter!("link_node_deliveries_total").increment(1);

        if let Some(nid) = direct(&nid) {
            let endpoint = route.find_endpoint(Some(nid))?;
            let client = self.clients.get(&endpoint)?;
            let packed = self.options.pack(&message)?;
            return match client.deliver(cid, uid, packed.as_slice()).await? {
                Outcome::Done(()) => Ok(()),
                Outcome::Miss => Err(Error::NotFoundSession),
            };
        }

        if route.stateful() && uid == 0 {
            return Err(Error::IllegalRequest);
        }

        let mut leases = self.options.pack(&message)?.delay(MAX_ATTEMPTS);
        let this = self;
        let route: &RoutePool = &route;
        let group = route.group();

        retry::call_with_eviction(
            move || this.resolve(route, uid),
            move |target: Target| {
                let client = this.clients.get(&target.endpoint);
                let lease = leases.pop();
                async move {
                    match (client, lease) {
                        (Ok(client), Some(lease)) => client.deliver(cid, uid, lease.bytes()).await,
                        (Err(e), _) => Err(e),
                        (_, None) => Err(Error::InvalidPacket("buffer leases exhausted".to_string())),
                    }
                }
            },
            move |target: Target| {
                if let Some(nid) = target.nid {
                    debug!(uid, nid = %nid, group, "Node no longer holds user, evicting location");
                    this.locations.evict_stale(uid, group, &nid);
                }
            },
        )
        .await
    }

    /// Notify every node subscribed to the event.
    ///
    /// Fails only when no subscriber accepted the event.
    pub async fn trigger(&self, args: TriggerArgs) -> Result<()> {
        let TriggerArgs { event, cid, uid } = args;
        let pool = self.dispatcher.find_event(event)?;
        counter!("link_node_triggers_total").increment(1);

        let sends = pool.endpoints().into_iter().map(move |(_, endpoint)| {
            let client = self.clients.get(&endpoint);
            async move {
                match client {
                    Ok(client) => client.trigger(event, cid, uid).await.map(|_| 1),
                    Err(e) => Err(e),
                }
            }
        });
        fanout::fan_out(sends, self.options.config.fanout_concurrency).await?;
        Ok(())
    }
}
