//! Registry and locator watch loops.
//!
//! Both watchers must be established within `watch_timeout`; failing that is
//! fatal to startup. Once running, a failed `next()` is logged and retried
//! with exponential backoff until shutdown.

use crate::client::ClientPool;
use crate::config::{LinkConfig, LinkOptions};
use crate::location::ApplyLocation;
use common::{Error, Kind, LocatorWatcher, RegistryWatcher, Result, ServiceInstance, State};
use dispatcher::Dispatcher;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Exponential delay between failed watch reads.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

async fn establish<T, F>(timeout: Duration, what: &str, setup: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, setup).await {
        Ok(result) => result,
        Err(_) => {
            error!("Timed out establishing {} after {:?}", what, timeout);
            Err(Error::WatchTimeout)
        }
    }
}

/// Services of `kind` whose state is in `states`; an empty filter keeps all.
pub(crate) async fn fetch_instances(
    options: &LinkOptions,
    kind: Kind,
    states: &[State],
) -> Result<Vec<ServiceInstance>> {
    let services = options.registry.services(kind).await?;
    Ok(services
        .into_iter()
        .filter(|service| states.is_empty() || states.contains(&service.state))
        .collect())
}

/// Open both watchers, resync once, then spawn the two loops.
pub(crate) async fn start<C, A>(
    options: &LinkOptions,
    kind: Kind,
    dispatcher: Arc<Dispatcher>,
    clients: Arc<ClientPool<C>>,
    locations: Arc<A>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>>
where
    C: ?Sized + Send + Sync + 'static,
    A: ApplyLocation,
{
    let timeout = options.config.watch_timeout;
    let mut services = establish(timeout, "registry watcher", options.registry.watch(kind)).await?;
    let mut locations_watcher =
        match establish(timeout, "locator watcher", options.locator.watch(&[kind])).await {
            Ok(watcher) => watcher,
            Err(e) => {
                let _ = services.stop().await;
                return Err(e);
            }
        };

    let initial =
        match establish(timeout, "initial service list", options.registry.services(kind)).await {
            Ok(initial) => initial,
            Err(e) => {
                let _ = services.stop().await;
                let _ = locations_watcher.stop().await;
                return Err(e);
            }
        };
    dispatcher.replace_services(&initial);
    clients.retain_live(&dispatcher.endpoints());
    info!(%kind, "Watching {} services and their user locations", initial.len());

    Ok(vec![
        tokio::spawn(run_services(
            services,
            dispatcher,
            clients,
            options.config.clone(),
            shutdown.clone(),
        )),
        tokio::spawn(run_locations(
            locations_watcher,
            locations,
            options.config.clone(),
            shutdown,
        )),
    ])
}

/// Sleep for `delay` unless shutdown arrives first. Returns false on shutdown.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_services<C>(
    mut watcher: Box<dyn RegistryWatcher>,
    dispatcher: Arc<Dispatcher>,
    clients: Arc<ClientPool<C>>,
    config: LinkConfig,
    mut shutdown: watch::Receiver<bool>,
) where
    C: ?Sized + Send + Sync + 'static,
{
    let mut backoff = Backoff::new(config.retry_backoff, config.max_retry_backoff);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = watcher.next() => result,
        };

        match result {
            Ok(services) => {
                backoff.reset();
                dispatcher.replace_services(&services);
                clients.retain_live(&dispatcher.endpoints());
                counter!("link_registry_updates_total").increment(1);
                debug!("Applied registry update with {} services", services.len());
            }
            Err(e) => {
                counter!("link_watch_errors_total", "source" => "registry").increment(1);
                let delay = backoff.next_delay();
                warn!("Registry watch failed: {}. Retrying in {:?}", e, delay);
                if !pause(delay, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    if let Err(e) = watcher.stop().await {
        warn!("Failed to stop registry watcher: {}", e);
    }
    info!("Registry watch loop stopped");
}

async fn run_locations<A: ApplyLocation>(
    mut watcher: Box<dyn LocatorWatcher>,
    locations: Arc<A>,
    config: LinkConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.retry_backoff, config.max_retry_backoff);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = watcher.next() => result,
        };

        match result {
            Ok(events) => {
                backoff.reset();
                for event in &events {
                    locations.apply(event);
                }
            }
            Err(e) => {
                counter!("link_watch_errors_total", "source" => "locator").increment(1);
                let delay = backoff.next_delay();
                warn!("Locator watch failed: {}. Retrying in {:?}", e, delay);
                if !pause(delay, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    if let Err(e) = watcher.stop().await {
        warn!("Failed to stop locator watcher: {}", e);
    }
    info!("Locator watch loop stopped");
}
