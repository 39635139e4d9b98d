//! Outbound calls to gate instances.
//!
//! Addressing rules:
//!
//! - a `gid` pins the call to that gate
//! - `SessionKind::User` without a gid resolves the user's gate through the
//!   location cache, evicting and retrying once on a miss
//! - `SessionKind::Conn` without a gid is rejected with `InvalidGid`

use crate::client::ClientPool;
use crate::config::LinkOptions;
use crate::discovery;
use crate::fanout;
use crate::location::GateLocations;
use crate::retry::{self, MAX_ATTEMPTS};
use crate::types::{
    direct, BroadcastArgs, DisconnectArgs, MulticastArgs, PublishArgs, PushArgs, SessionArgs,
    SubscribeArgs,
};
use common::{
    BufferLease, ClientBuilder, Error, GateClient, Kind, Message, Outcome, Result,
    ServiceInstance, SessionKind, State,
};
use dispatcher::Dispatcher;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct GateLinker {
    options: LinkOptions,
    dispatcher: Arc<Dispatcher>,
    locations: Arc<GateLocations>,
    clients: Arc<ClientPool<dyn GateClient>>,
}

impl GateLinker {
    pub fn new(options: LinkOptions, builder: Arc<dyn ClientBuilder<dyn GateClient>>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(options.config.strategy));
        Self {
            options,
            dispatcher,
            locations: Arc::new(GateLocations::new()),
            clients: Arc::new(ClientPool::new(builder)),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn locations(&self) -> &GateLocations {
        &self.locations
    }

    /// Start following gate topology and gate-binding changes.
    pub async fn watch(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        discovery::start(
            &self.options,
            Kind::Gate,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.clients),
            Arc::clone(&self.locations),
            shutdown,
        )
        .await
    }

    pub fn has_gate(&self, gid: &str) -> bool {
        self.dispatcher.has_endpoint(gid)
    }

    /// Gate currently holding `uid`, from cache or the locator.
    pub async fn locate_gate(&self, uid: i64) -> Result<String> {
        if let Some(gid) = self.locations.load(uid) {
            return Ok(gid);
        }

        match self.options.locator.locate_gate(uid).await? {
            Some(gid) if !gid.is_empty() => {
                self.locations.store(uid, &gid);
                Ok(gid)
            }
            _ => Err(Error::NotFoundUserLocation),
        }
    }

    /// Located gate of `uid` and whether it is `gid`.
    pub async fn ask_gate(&self, uid: i64, gid: &str) -> Result<(String, bool)> {
        let actual = self.locate_gate(uid).await?;
        let matched = actual == gid;
        Ok((actual, matched))
    }

    pub async fn fetch_gate_list(&self, states: &[State]) -> Result<Vec<ServiceInstance>> {
        discovery::fetch_instances(&self.options, Kind::Gate, states).await
    }

    fn client(&self, gid: &str) -> Result<Arc<dyn GateClient>> {
        if gid.is_empty() {
            return Err(Error::InvalidGid);
        }
        let endpoint = self.dispatcher.find_endpoint(gid)?;
        self.clients.get(&endpoint)
    }

    /// Call the gate holding `uid`, re-resolving once if it reports a miss.
    async fn do_rpc<T, F, Fut>(&self, uid: i64, mut op: F) -> Result<T>
    where
        F: FnMut(Arc<dyn GateClient>) -> Fut,
        Fut: Future<Output = Result<Outcome<T>>>,
    {
        let this = self;
        retry::call_with_eviction(
            move || this.locate_gate(uid),
            move |gid: String| {
                let call = this.client(&gid).map(&mut op);
                async move {
                    match call {
                        Ok(call) => call.await,
                        Err(e) => Err(e),
                    }
                }
            },
            move |gid: String| {
                debug!(uid, gid = %gid, "Gate no longer holds user, evicting location");
                this.locations.evict_stale(uid, &gid);
            },
        )
        .await
    }

    /// Bind connection `cid` on gate `gid` to user `uid`.
    pub async fn bind_gate(&self, gid: &str, cid: i64, uid: i64) -> Result<()> {
        match self.client(gid)?.bind(cid, uid).await? {
            Outcome::Done(()) => {
                self.locations.store(uid, gid);
                Ok(())
            }
            Outcome::Miss => Err(Error::NotFoundSession),
        }
    }

    /// Unbind `uid` on its gate. The cached location is dropped either way.
    pub async fn unbind_gate(&self, uid: i64) -> Result<()> {
        let result = self
            .do_rpc(uid, move |client| async move { client.unbind(uid).await })
            .await;
        self.locations.evict(uid);
        result
    }

    pub async fn get_ip(&self, args: SessionArgs) -> Result<String> {
        let SessionArgs { gid, kind, target } = args;
        match (direct(&gid), kind) {
            (Some(gid), _) => self
                .client(gid)?
                .get_ip(kind, target)
                .await?
                .done()
                .ok_or(Error::NotFoundSession),
            (None, SessionKind::Conn) => Err(Error::InvalidGid),
            (None, SessionKind::User) => {
                self.do_rpc(target, move |client| async move {
                    client.get_ip(SessionKind::User, target).await
                })
                .await
            }
        }
    }

    /// Whether the session is online. An unlocatable user counts as offline.
    pub async fn is_online(&self, args: SessionArgs) -> Result<bool> {
        let SessionArgs { gid, kind, target } = args;
        match (direct(&gid), kind) {
            (Some(gid), _) => Ok(self
                .client(gid)?
                .is_online(kind, target)
                .await?
                .done()
                .unwrap_or(false)),
            (None, SessionKind::Conn) => Err(Error::InvalidGid),
            (None, SessionKind::User) => {
                let result = self
                    .do_rpc(target, move |client| async move {
                        client.is_online(SessionKind::User, target).await
                    })
                    .await;
                match result {
                    Err(Error::NotFoundUserLocation) | Err(Error::NotFoundSession) => Ok(false),
                    other => other,
                }
            }
        }
    }

    pub async fn disconnect(&self, args: DisconnectArgs) -> Result<()> {
        let DisconnectArgs {
            gid,
            kind,
            target,
            force,
        } = args;
        match (direct(&gid), kind) {
            (Some(gid), _) => self
                .client(gid)?
                .disconnect(kind, target, force)
                .await?
                .done()
                .ok_or(Error::NotFoundSession),
            (None, SessionKind::Conn) => Err(Error::InvalidGid),
            (None, SessionKind::User) => {
                self.do_rpc(target, move |client| async move {
                    client.disconnect(SessionKind::User, target, force).await
                })
                .await
            }
        }
    }

    /// Push one message to one session and wait for the result.
    pub async fn push(&self, args: PushArgs) -> Result<()> {
        self.multicast(MulticastArgs {
            gid: args.gid,
            kind: args.kind,
            targets: vec![args.target],
            message: args.message,
            ack: true,
        })
        .await
        .map(|_| ())
    }

    /// Push one message to many sessions.
    ///
    /// Returns how many targets confirmed delivery, or 0 when `ack` is unset.
    pub async fn multicast(&self, args: MulticastArgs) -> Result<u64> {
        let MulticastArgs {
            gid,
            kind,
            targets,
            message,
            ack,
        } = args;
        if targets.is_empty() {
            return Err(Error::ReceiveTargetEmpty);
        }
        counter!("link_gate_requests_total", "op" => "multicast").increment(1);

        match (direct(&gid), kind) {
            (Some(gid), _) => self.multicast_direct(gid, kind, targets, &message, ack).await,
            (None, SessionKind::Conn) => Err(Error::InvalidGid),
            (None, SessionKind::User) => self.multicast_indirect(targets, &message, ack).await,
        }
    }

    async fn multicast_direct(
        &self,
        gid: &str,
        kind: SessionKind,
        targets: Vec<i64>,
        message: &Message,
        ack: bool,
    ) -> Result<u64> {
        let client = self.client(gid)?;
        let packed = self.options.pack(message)?;

        let send = async move {
            if let &[target] = targets.as_slice() {
                match client.push(kind, target, packed.as_slice()).await {
                    Ok(Outcome::Done(())) => Ok(1),
                    Ok(Outcome::Miss) => Err(Error::NotFoundSession),
                    Err(e) => Err(e),
                }
            } else {
                client.multicast(kind, &targets, packed.as_slice()).await
            }
        };
        fanout::deliver(send, ack, "multicast").await
    }

    async fn multicast_indirect(&self, targets: Vec<i64>, message: &Message, ack: bool) -> Result<u64> {
        let mut leases = self
            .options
            .pack(message)?
            .delay(targets.len() * MAX_ATTEMPTS)
            .into_iter();

        let sends: Vec<_> = targets
            .into_iter()
            .map(|uid| {
                let linker = self.clone();
                let leases: Vec<BufferLease> = leases.by_ref().take(MAX_ATTEMPTS).collect();
                async move { linker.push_located(uid, leases).await.map(|()| 1) }
            })
            .collect();

        let concurrency = self.options.config.fanout_concurrency;
        fanout::deliver(fanout::fan_out(sends, concurrency), ack, "multicast").await
    }

    /// Push to a located user, taking one lease per attempt.
    async fn push_located(&self, uid: i64, mut leases: Vec<BufferLease>) -> Result<()> {
        self.do_rpc(uid, move |client| {
            let lease = leases.pop();
            async move {
                match lease {
                    Some(lease) => client.push(SessionKind::User, uid, lease.bytes()).await,
                    None => Err(Error::InvalidPacket("buffer leases exhausted".to_string())),
                }
            }
        })
        .await
    }

    /// Push to every session of `kind` on every gate.
    pub async fn broadcast(&self, args: BroadcastArgs) -> Result<u64> {
        let BroadcastArgs { kind, message, ack } = args;
        counter!("link_gate_requests_total", "op" => "broadcast").increment(1);
        self.fan_out_gates(&message, ack, "broadcast", move |client, lease| async move {
            client.broadcast(kind, lease.bytes()).await
        })
        .await
    }

    /// Publish to a channel's subscribers on every gate.
    pub async fn publish(&self, args: PublishArgs) -> Result<u64> {
        let PublishArgs {
            channel,
            message,
            ack,
        } = args;
        counter!("link_gate_requests_total", "op" => "publish").increment(1);
        self.fan_out_gates(&message, ack, "publish", move |client, lease| {
            let channel = channel.clone();
            async move { client.publish(&channel, lease.bytes()).await }
        })
        .await
    }

    async fn fan_out_gates<F, Fut>(
        &self,
        message: &Message,
        ack: bool,
        operation: &'static str,
        send: F,
    ) -> Result<u64>
    where
        F: Fn(Arc<dyn GateClient>, BufferLease) -> Fut,
        Fut: Future<Output = Result<u64>> + Send + 'static,
    {
        let endpoints = self.dispatcher.endpoints();
        let mut leases = self.options.pack(message)?.delay(endpoints.len()).into_iter();

        let mut sends = Vec::with_capacity(endpoints.len());
        let mut build_error = None;
        for ((gid, endpoint), lease) in endpoints.into_iter().zip(leases.by_ref()) {
            match self.clients.get(&endpoint) {
                Ok(client) => sends.push(send(client, lease)),
                Err(e) => {
                    warn!(gid = %gid, "No client for gate: {}", e);
                    if build_error.is_none() {
                        build_error = Some(e);
                    }
                }
            }
        }

        if sends.is_empty() {
            if let Some(e) = build_error {
                return Err(e);
            }
        }

        let concurrency = self.options.config.fanout_concurrency;
        fanout::deliver(fanout::fan_out(sends, concurrency), ack, operation).await
    }

    /// Session count of `kind` on gate `gid`, or summed across all gates.
    pub async fn stat(&self, gid: Option<&str>, kind: SessionKind) -> Result<u64> {
        if let Some(gid) = gid.filter(|gid| !gid.is_empty()) {
            return self.client(gid)?.stat(kind).await;
        }

        let sends = self.dispatcher.endpoints().into_values().map(move |endpoint| {
            let client = self.clients.get(&endpoint);
            async move {
                match client {
                    Ok(client) => client.stat(kind).await,
                    Err(e) => Err(e),
                }
            }
        });
        fanout::fan_out(sends, self.options.config.fanout_concurrency).await
    }

    pub async fn subscribe(&self, args: SubscribeArgs) -> Result<()> {
        self.change_subscription(args, true).await
    }

    pub async fn unsubscribe(&self, args: SubscribeArgs) -> Result<()> {
        self.change_subscription(args, false).await
    }

    async fn change_subscription(&self, args: SubscribeArgs, subscribe: bool) -> Result<()> {
        let SubscribeArgs {
            gid,
            kind,
            targets,
            channel,
        } = args;
        if targets.is_empty() {
            return Err(Error::ReceiveTargetEmpty);
        }

        match (direct(&gid), kind) {
            (Some(gid), _) => {
                let client = self.client(gid)?;
                apply_subscription(client, kind, &targets, &channel, subscribe).await
            }
            (None, SessionKind::Conn) => Err(Error::InvalidGid),
            (None, SessionKind::User) => {
                // gates ignore users they do not hold
                let (targets, channel) = (&targets, &channel);
                let sends = self.dispatcher.endpoints().into_values().map(move |endpoint| {
                    let client = self.clients.get(&endpoint);
                    async move {
                        match client {
                            Ok(client) => apply_subscription(client, kind, targets, channel, subscribe)
                                .await
                                .map(|()| 1),
                            Err(e) => Err(e),
                        }
                    }
                });
                fanout::fan_out(sends, self.options.config.fanout_concurrency)
                    .await
                    .map(|_| ())
            }
        }
    }
}

async fn apply_subscription(
    client: Arc<dyn GateClient>,
    kind: SessionKind,
    targets: &[i64],
    channel: &str,
    subscribe: bool,
) -> Result<()> {
    if subscribe {
        client.subscribe(kind, targets, channel).await
    } else {
        client.unsubscribe(kind, targets, channel).await
    }
}
