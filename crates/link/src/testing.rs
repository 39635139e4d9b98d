//! In-memory collaborators for linker tests.

use async_trait::async_trait;
use common::{
    ClientBuilder, Encryptor, Endpoint, Error, GateClient, Kind, LocationEvent, Locator, LocatorWatcher,
    NodeClient, Outcome, Registry, RegistryWatcher, Result, Route, ServiceInstance, SessionKind,
    State,
};
use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn unavailable(what: &str) -> Error {
    anyhow::anyhow!("{} unavailable", what).into()
}

/// Byte-wise XOR cipher; fails every call once `broken` is set.
pub struct XorEncryptor {
    pub key: u8,
    pub broken: AtomicBool,
}

impl XorEncryptor {
    pub fn new(key: u8) -> Self {
        Self {
            key,
            broken: AtomicBool::new(false),
        }
    }

    fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Encryption("xor key revoked".to_string()));
        }
        Ok(data.iter().map(|b| b ^ self.key).collect())
    }
}

impl Encryptor for XorEncryptor {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.apply(data)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.apply(data)
    }
}

pub fn address(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

pub fn instance(id: &str, kind: Kind, port: u16) -> ServiceInstance {
    ServiceInstance {
        id: id.to_string(),
        name: kind.to_string(),
        kind,
        alias: String::new(),
        state: State::Work,
        events: Vec::new(),
        routes: Vec::new(),
        endpoint: format!("grpc://{}?is_secure=false", address(port)),
        weight: 1,
    }
}

pub fn route(id: i32, group: &str, stateful: bool, internal: bool) -> Route {
    Route {
        id,
        stateful,
        internal,
        group: group.to_string(),
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Watcher fed through an unbounded channel; idles once the sender is gone.
pub struct ChannelWatcher<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    stopped: Arc<AtomicBool>,
}

impl<T: Send> ChannelWatcher<T> {
    async fn recv(&mut self) -> Result<T> {
        match self.rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl RegistryWatcher for ChannelWatcher<Vec<ServiceInstance>> {
    async fn next(&mut self) -> Result<Vec<ServiceInstance>> {
        self.recv().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl LocatorWatcher for ChannelWatcher<Vec<LocationEvent>> {
    async fn next(&mut self) -> Result<Vec<LocationEvent>> {
        self.recv().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One-shot watch feed plus a flag raised when the watcher is stopped.
pub struct Feed<T> {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<T>>>>,
    pub stopped: Arc<AtomicBool>,
    /// Never answer `watch`, to exercise the setup deadline.
    pub hang: AtomicBool,
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self {
            rx: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
            hang: AtomicBool::new(false),
        }
    }
}

impl<T: Send + 'static> Feed<T> {
    pub fn sender(&self) -> mpsc::UnboundedSender<Result<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.rx.lock().unwrap() = Some(rx);
        tx
    }

    async fn open(&self, what: &str) -> Result<ChannelWatcher<T>> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let rx = self.rx.lock().unwrap().take().ok_or_else(|| unavailable(what))?;
        Ok(ChannelWatcher {
            rx,
            stopped: Arc::clone(&self.stopped),
        })
    }
}

#[derive(Default)]
pub struct MockRegistry {
    pub services: Mutex<Vec<ServiceInstance>>,
    pub feed: Feed<Vec<ServiceInstance>>,
}

impl MockRegistry {
    pub fn new(services: Vec<ServiceInstance>) -> Self {
        Self {
            services: Mutex::new(services),
            feed: Feed::default(),
        }
    }

    pub fn snapshot(&self) -> Vec<ServiceInstance> {
        self.services.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn services(&self, kind: Kind) -> Result<Vec<ServiceInstance>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|service| service.kind == kind)
            .collect())
    }

    async fn watch(&self, _kind: Kind) -> Result<Box<dyn RegistryWatcher>> {
        Ok(Box::new(self.feed.open("registry watch").await?))
    }
}

#[derive(Default)]
pub struct MockLocator {
    gates: DashMap<i64, String>,
    nodes: DashMap<(i64, String), String>,
    pub gate_lookups: AtomicUsize,
    pub node_lookups: AtomicUsize,
    pub feed: Feed<Vec<LocationEvent>>,
}

impl MockLocator {
    pub fn set_gate(&self, uid: i64, gid: &str) {
        self.gates.insert(uid, gid.to_string());
    }

    pub fn set_node(&self, uid: i64, group: &str, nid: &str) {
        self.nodes.insert((uid, group.to_string()), nid.to_string());
    }

    pub fn node(&self, uid: i64, group: &str) -> Option<String> {
        self.nodes
            .get(&(uid, group.to_string()))
            .map(|nid| nid.value().clone())
    }

    pub fn gate_lookups(&self) -> usize {
        self.gate_lookups.load(Ordering::SeqCst)
    }

    pub fn node_lookups(&self) -> usize {
        self.node_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Locator for MockLocator {
    async fn locate_gate(&self, uid: i64) -> Result<Option<String>> {
        self.gate_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.gates.get(&uid).map(|gid| gid.value().clone()))
    }

    async fn bind_gate(&self, uid: i64, gid: &str) -> Result<()> {
        self.set_gate(uid, gid);
        Ok(())
    }

    async fn unbind_gate(&self, uid: i64, gid: &str) -> Result<()> {
        self.gates.remove_if(&uid, |_, cached| cached == gid);
        Ok(())
    }

    async fn locate_node(&self, uid: i64, group: &str) -> Result<Option<String>> {
        self.node_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.node(uid, group))
    }

    async fn bind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()> {
        self.set_node(uid, group, nid);
        Ok(())
    }

    async fn unbind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()> {
        self.nodes
            .remove_if(&(uid, group.to_string()), |_, cached| cached == nid);
        Ok(())
    }

    async fn watch(&self, _kinds: &[Kind]) -> Result<Box<dyn LocatorWatcher>> {
        Ok(Box::new(self.feed.open("locator watch").await?))
    }
}

/// Failure switches and call records shared by the mock clients.
#[derive(Default)]
pub struct Behavior {
    pub calls: AtomicUsize,
    /// Every call fails.
    pub down: AtomicBool,
    /// Targets answered with a miss.
    pub misses: Mutex<HashSet<i64>>,
    /// Targets whose calls fail.
    pub failures: Mutex<HashSet<i64>>,
}

impl Behavior {
    pub fn miss(&self, target: i64) {
        self.misses.lock().unwrap().insert(target);
    }

    pub fn fail(&self, target: i64) {
        self.failures.lock().unwrap().insert(target);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, target: i64) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) || self.failures.lock().unwrap().contains(&target) {
            return Err(unavailable("target"));
        }
        Ok(self.misses.lock().unwrap().contains(&target))
    }

    fn outcome<T>(&self, target: i64, value: T) -> Result<Outcome<T>> {
        if self.check(target)? {
            Ok(Outcome::Miss)
        } else {
            Ok(Outcome::Done(value))
        }
    }
}

#[derive(Default)]
pub struct MockGateClient {
    pub behavior: Behavior,
    /// Session count reported by stat, broadcast and publish.
    pub sessions: AtomicU64,
    pub pushed: Mutex<Vec<(i64, Vec<u8>)>>,
    pub subscribed: Mutex<Vec<(i64, String)>>,
}

impl MockGateClient {
    pub fn pushed(&self) -> Vec<(i64, Vec<u8>)> {
        self.pushed.lock().unwrap().clone()
    }

    fn sessions(&self) -> Result<u64> {
        self.behavior.check(0)?;
        Ok(self.sessions.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl GateClient for MockGateClient {
    async fn bind(&self, cid: i64, _uid: i64) -> Result<Outcome<()>> {
        self.behavior.outcome(cid, ())
    }

    async fn unbind(&self, uid: i64) -> Result<Outcome<()>> {
        self.behavior.outcome(uid, ())
    }

    async fn get_ip(&self, _kind: SessionKind, target: i64) -> Result<Outcome<String>> {
        self.behavior.outcome(target, format!("10.0.0.{}", target))
    }

    async fn stat(&self, _kind: SessionKind) -> Result<u64> {
        self.sessions()
    }

    async fn is_online(&self, _kind: SessionKind, target: i64) -> Result<Outcome<bool>> {
        self.behavior.outcome(target, true)
    }

    async fn disconnect(&self, _kind: SessionKind, target: i64, _force: bool) -> Result<Outcome<()>> {
        self.behavior.outcome(target, ())
    }

    async fn push(&self, _kind: SessionKind, target: i64, message: &[u8]) -> Result<Outcome<()>> {
        let outcome = self.behavior.outcome(target, ())?;
        if !outcome.is_miss() {
            self.pushed.lock().unwrap().push((target, message.to_vec()));
        }
        Ok(outcome)
    }

    async fn multicast(&self, _kind: SessionKind, targets: &[i64], message: &[u8]) -> Result<u64> {
        let mut reached = 0;
        for &target in targets {
            if let Ok(Outcome::Done(())) = self.push(SessionKind::Conn, target, message).await {
                reached += 1;
            }
        }
        Ok(reached)
    }

    async fn broadcast(&self, _kind: SessionKind, _message: &[u8]) -> Result<u64> {
        self.sessions()
    }

    async fn publish(&self, _channel: &str, _message: &[u8]) -> Result<u64> {
        self.sessions()
    }

    async fn subscribe(&self, _kind: SessionKind, targets: &[i64], channel: &str) -> Result<()> {
        self.behavior.check(0)?;
        self.subscribed
            .lock()
            .unwrap()
            .extend(targets.iter().map(|&target| (target, channel.to_string())));
        Ok(())
    }

    async fn unsubscribe(&self, _kind: SessionKind, targets: &[i64], channel: &str) -> Result<()> {
        self.behavior.check(0)?;
        self.subscribed
            .lock()
            .unwrap()
            .retain(|(target, ch)| !(targets.contains(target) && ch == channel));
        Ok(())
    }
}

pub struct MockNodeClient {
    pub behavior: Behavior,
    pub state: Mutex<State>,
    pub delivered: Mutex<Vec<(i64, Vec<u8>)>>,
    pub triggered: Mutex<Vec<(i32, i64)>>,
}

impl Default for MockNodeClient {
    fn default() -> Self {
        Self {
            behavior: Behavior::default(),
            state: Mutex::new(State::Work),
            delivered: Mutex::new(Vec::new()),
            triggered: Mutex::new(Vec::new()),
        }
    }
}

impl MockNodeClient {
    pub fn delivered(&self) -> Vec<(i64, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn triggered(&self) -> Vec<(i32, i64)> {
        self.triggered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn trigger(&self, event: i32, _cid: i64, uid: i64) -> Result<Outcome<()>> {
        let outcome = self.behavior.outcome(uid, ())?;
        self.triggered.lock().unwrap().push((event, uid));
        Ok(outcome)
    }

    async fn deliver(&self, _cid: i64, uid: i64, message: &[u8]) -> Result<Outcome<()>> {
        let outcome = self.behavior.outcome(uid, ())?;
        if !outcome.is_miss() {
            self.delivered.lock().unwrap().push((uid, message.to_vec()));
        }
        Ok(outcome)
    }

    async fn get_state(&self) -> Result<State> {
        self.behavior.check(0)?;
        Ok(*self.state.lock().unwrap())
    }

    async fn set_state(&self, state: State) -> Result<()> {
        self.behavior.check(0)?;
        *self.state.lock().unwrap() = state;
        Ok(())
    }
}

/// Hands out one shared mock client per address.
pub struct MockBuilder<M> {
    clients: DashMap<String, Arc<M>>,
    pub builds: AtomicUsize,
}

impl<M> Default for MockBuilder<M> {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            builds: AtomicUsize::new(0),
        }
    }
}

impl<M: Default> MockBuilder<M> {
    pub fn client(&self, address: &str) -> Arc<M> {
        Arc::clone(self.clients.entry(address.to_string()).or_default().value())
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientBuilder<dyn GateClient> for MockBuilder<MockGateClient> {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn GateClient>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn GateClient> = self.client(endpoint.address());
        Ok(client)
    }
}

impl ClientBuilder<dyn NodeClient> for MockBuilder<MockNodeClient> {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<dyn NodeClient>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn NodeClient> = self.client(endpoint.address());
        Ok(client)
    }
}
