//! Route/event directory built from the registry's instance list.
//!
//! Tables are rebuilt from scratch on every topology update and swapped in
//! under one write lock, so readers see either the old or the new snapshot.

use crate::route::{EventPool, RoutePool};
use crate::strategy::BalanceStrategy;
use common::{Endpoint, Error, Result, ServiceInstance};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Tables {
    routes: HashMap<i32, Arc<RoutePool>>,
    events: HashMap<i32, Arc<EventPool>>,
    endpoints: HashMap<String, Endpoint>,
}

/// Load-balancing directory over one cluster role.
#[derive(Debug)]
pub struct Dispatcher {
    strategy: BalanceStrategy,
    tables: RwLock<Arc<Tables>>,
}

impl Dispatcher {
    pub fn new(strategy: BalanceStrategy) -> Self {
        Self {
            strategy,
            tables: RwLock::new(Arc::new(Tables::default())),
        }
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    /// Replace the whole topology with `services`.
    ///
    /// Instances whose endpoint does not parse are logged and skipped.
    pub fn replace_services(&self, services: &[ServiceInstance]) {
        let mut routes: HashMap<i32, RoutePool> = HashMap::new();
        let mut events: HashMap<i32, EventPool> = HashMap::new();
        let mut endpoints = HashMap::with_capacity(services.len());

        for service in services {
            let endpoint = match Endpoint::parse(&service.endpoint) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    error!(
                        ins_id = %service.id,
                        kind = %service.kind,
                        name = %service.name,
                        alias = %service.alias,
                        endpoint = %service.endpoint,
                        "Service endpoint parse failed: {}",
                        e
                    );
                    counter!("dispatcher_invalid_endpoints_total").increment(1);
                    continue;
                }
            };

            for route in &service.routes {
                routes
                    .entry(route.id)
                    .or_insert_with(|| {
                        RoutePool::new(route.id, &route.group, route.stateful, route.internal, self.strategy)
                    })
                    .pool_mut()
                    .add_endpoint(&service.id, service.state, endpoint.clone(), service.weight);
            }

            for &event in &service.events {
                events
                    .entry(event)
                    .or_insert_with(|| EventPool::new(event, self.strategy))
                    .pool_mut()
                    .add_endpoint(&service.id, service.state, endpoint.clone(), service.weight);
            }

            endpoints.insert(service.id.clone(), endpoint);
        }

        let tables = Tables {
            routes: routes.into_iter().map(|(id, r)| (id, Arc::new(r))).collect(),
            events: events.into_iter().map(|(id, e)| (id, Arc::new(e))).collect(),
            endpoints,
        };

        debug!(
            "Replacing dispatcher tables: {} routes, {} events, {} endpoints",
            tables.routes.len(),
            tables.events.len(),
            tables.endpoints.len()
        );
        gauge!("dispatcher_endpoints").set(tables.endpoints.len() as f64);
        counter!("dispatcher_rebuilds_total").increment(1);

        *self.tables.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(tables);
    }

    fn snapshot(&self) -> Arc<Tables> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Endpoint of an instance in the latest snapshot.
    pub fn find_endpoint(&self, ins_id: &str) -> Result<Endpoint> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .endpoints
            .get(ins_id)
            .cloned()
            .ok_or(Error::NotFoundEndpoint)
    }

    pub fn has_endpoint(&self, ins_id: &str) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .endpoints
            .contains_key(ins_id)
    }

    pub fn find_route(&self, route: i32) -> Result<Arc<RoutePool>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .get(&route)
            .cloned()
            .ok_or(Error::NotFoundRoute(route))
    }

    pub fn find_event(&self, event: i32) -> Result<Arc<EventPool>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .get(&event)
            .cloned()
            .ok_or(Error::NotFoundEvent(event))
    }

    /// Visit `(instance id, endpoint)` pairs of one snapshot until `f` returns false.
    pub fn visit_endpoints<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Endpoint) -> bool,
    {
        let tables = self.snapshot();
        for (ins_id, endpoint) in tables.endpoints.iter() {
            if !f(ins_id, endpoint) {
                break;
            }
        }
    }

    /// Copy of the instance id → endpoint table.
    pub fn endpoints(&self) -> HashMap<String, Endpoint> {
        self.snapshot().endpoints.clone()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(BalanceStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Kind, Route, State};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn instance(id: &str, port: u16, weight: i32, routes: &[i32], events: &[i32]) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            name: "node".to_string(),
            kind: Kind::Node,
            alias: String::new(),
            state: State::Work,
            events: events.to_vec(),
            routes: routes
                .iter()
                .map(|&id| Route {
                    id,
                    stateful: false,
                    internal: false,
                    group: "game".to_string(),
                })
                .collect(),
            endpoint: format!("grpc://127.0.0.1:{}?is_secure=false", port),
            weight,
        }
    }

    #[test]
    fn test_lookup_errors() {
        let dispatcher = Dispatcher::default();
        assert!(matches!(dispatcher.find_endpoint("x"), Err(Error::NotFoundEndpoint)));
        assert!(matches!(dispatcher.find_route(1), Err(Error::NotFoundRoute(1))));
        assert!(matches!(dispatcher.find_event(2), Err(Error::NotFoundEvent(2))));
    }

    #[test]
    fn test_replace_builds_tables() {
        let dispatcher = Dispatcher::new(BalanceStrategy::RoundRobin);
        dispatcher.replace_services(&[
            instance("a", 9001, 1, &[1, 2], &[10]),
            instance("b", 9002, 1, &[1], &[10, 11]),
        ]);

        assert_eq!(dispatcher.find_route(1).unwrap().len(), 2);
        assert_eq!(dispatcher.find_route(2).unwrap().len(), 1);
        assert_eq!(dispatcher.find_route(1).unwrap().group(), "game");
        assert_eq!(dispatcher.find_event(10).unwrap().endpoints().len(), 2);
        assert_eq!(dispatcher.find_endpoint("b").unwrap().address(), "127.0.0.1:9002");

        // the next replace drops everything not listed
        dispatcher.replace_services(&[instance("b", 9002, 1, &[1], &[])]);
        assert!(dispatcher.find_route(2).is_err());
        assert!(dispatcher.find_event(10).is_err());
        assert!(!dispatcher.has_endpoint("a"));
    }

    #[test]
    fn test_malformed_endpoint_skipped() {
        let dispatcher = Dispatcher::default();
        let mut broken = instance("bad", 1, 1, &[1], &[]);
        broken.endpoint = "::not a url::".to_string();
        dispatcher.replace_services(&[broken, instance("good", 9001, 1, &[1], &[])]);

        assert_eq!(dispatcher.endpoints().len(), 1);
        assert_eq!(dispatcher.find_route(1).unwrap().len(), 1);
        assert!(dispatcher.find_endpoint("bad").is_err());
    }

    #[test]
    fn test_visit_stops_early() {
        let dispatcher = Dispatcher::default();
        dispatcher.replace_services(&[
            instance("a", 9001, 1, &[], &[]),
            instance("b", 9002, 1, &[], &[]),
            instance("c", 9003, 1, &[], &[]),
        ]);

        let mut visited = 0;
        dispatcher.visit_endpoints(|_, _| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_weighted_distribution_end_to_end() {
        let dispatcher = Dispatcher::new(BalanceStrategy::WeightedRoundRobin);
        dispatcher.replace_services(&[
            instance("A", 9001, 4, &[1], &[]),
            instance("B", 9002, 1, &[1], &[]),
        ]);

        let mut a = 0;
        let mut b = 0;
        for _ in 0..500 {
            let endpoint = dispatcher.find_route(1).unwrap().find_endpoint(None).unwrap();
            match endpoint.address() {
                "127.0.0.1:9001" => a += 1,
                "127.0.0.1:9002" => b += 1,
                other => panic!("unexpected endpoint {}", other),
            }
        }
        assert_eq!((a, b), (400, 100));
    }

    #[test]
    fn test_swap_is_atomic_under_readers() {
        let dispatcher = Arc::new(Dispatcher::new(BalanceStrategy::RoundRobin));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let tables = dispatcher.snapshot();
                        for route in tables.routes.values() {
                            for ins_id in route.instance_ids() {
                                assert!(tables.endpoints.contains_key(&ins_id));
                            }
                        }
                        if let Ok(route) = dispatcher.find_route(1) {
                            assert!(route.find_endpoint(None).is_ok());
                        }
                    }
                })
            })
            .collect();

        for generation in 0..200u16 {
            let services: Vec<_> = (0..5u16)
                .map(|i| {
                    let id = format!("g{}-{}", generation, i);
                    instance(&id, 10000 + generation * 10 + i, 1, &[1, 2], &[3])
                })
                .collect();
            dispatcher.replace_services(&services);
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
