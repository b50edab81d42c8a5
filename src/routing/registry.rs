//! Live route table and dispatch.
//!
//! # Responsibilities
//! - Store the registered routes keyed by normalized listen path
//! - Look up the most specific route for a request
//! - Apply register/unregister (single or batched) atomically
//!
//! # Design Decisions
//! - The published table is immutable; writers build a new one and swap it
//!   in with `ArcSwap`, so a reader sees the old table or the new one
//! - Writers are serialized by a mutex that readers never touch
//! - O(n) ordered scan (acceptable for typical route counts)
//! - Explicit NotFound / MethodNotAllowed rather than silent default

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use axum::http::Method;

use crate::definitions::loader::RouteSource;
use crate::http::handler::HandlerRef;
use crate::routing::matcher::{pattern_key, ListenPath};
use crate::routing::MethodSet;

/// One installed route.
pub struct RegisteredRoute {
    pub pattern: ListenPath,
    pub methods: MethodSet,
    pub handler: HandlerRef,
    /// Definition the route was built from; `None` for routes registered directly.
    pub source: Option<RouteSource>,
}

impl std::fmt::Debug for RegisteredRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredRoute")
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods.to_string())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Result of looking up a request.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Found(Arc<RegisteredRoute>),
    /// A pattern matched the path but none of the matching routes allow the method.
    MethodNotAllowed,
    NotFound,
}

/// An immutable snapshot of every registered route.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: BTreeMap<String, Arc<RegisteredRoute>>,
    /// Same routes, most specific first.
    ordered: Vec<Arc<RegisteredRoute>>,
}

impl RouteTable {
    fn from_routes(routes: BTreeMap<String, Arc<RegisteredRoute>>) -> Self {
        let mut ordered: Vec<_> = routes.values().cloned().collect();
        ordered.sort_by(|a, b| a.pattern.cmp_specificity(&b.pattern));
        Self { routes, ordered }
    }

    pub fn get(&self, pattern: &str) -> Option<&Arc<RegisteredRoute>> {
        self.routes.get(&pattern_key(pattern))
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.routes.contains_key(&pattern_key(pattern))
    }

    /// Registered pattern keys in lexical order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn dispatch(&self, method: &Method, path: &str) -> Dispatch {
        let mut path_matched = false;
        for route in &self.ordered {
            if !route.pattern.matches(path) {
                continue;
            }
            if route.methods.allows(method) {
                return Dispatch::Found(route.clone());
            }
            path_matched = true;
        }

        if path_matched {
            Dispatch::MethodNotAllowed
        } else {
            Dispatch::NotFound
        }
    }
}

/// A pending set of changes, published as one table when the update returns.
pub struct RouteTableEdit<'a> {
    routes: &'a mut BTreeMap<String, Arc<RegisteredRoute>>,
}

impl RouteTableEdit<'_> {
    pub fn get(&self, pattern: &str) -> Option<&Arc<RegisteredRoute>> {
        self.routes.get(&pattern_key(pattern))
    }

    pub fn patterns(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    /// Install or replace the route for its pattern key.
    pub fn insert(&mut self, route: RegisteredRoute) -> Arc<RegisteredRoute> {
        let route = Arc::new(route);
        self.routes.insert(route.pattern.key().to_string(), route.clone());
        route
    }

    /// Remove a route; returns whether it existed.
    pub fn remove(&mut self, pattern: &str) -> bool {
        self.routes.remove(&pattern_key(pattern)).is_some()
    }
}

/// The live dispatch table.
pub struct RouteRegistry {
    table: ArcSwap<RouteTable>,
    write_lock: Mutex<()>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Current table. Holding it pins that version; later updates are not visible through it.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    pub fn dispatch(&self, method: &Method, path: &str) -> Dispatch {
        self.table.load().dispatch(method, path)
    }

    /// Apply several changes as one atomic table swap.
    pub fn update<R>(&self, f: impl FnOnce(&mut RouteTableEdit<'_>) -> R) -> R {
        let _guard = self.write_lock.lock().expect("route registry lock poisoned");

        let mut routes = self.table.load().routes.clone();
        let result = f(&mut RouteTableEdit { routes: &mut routes });
        self.table.store(Arc::new(RouteTable::from_routes(routes)));

        result
    }

    /// Install or replace the handler for `pattern`.
    pub fn register(
        &self,
        pattern: ListenPath,
        methods: MethodSet,
        handler: HandlerRef,
    ) -> Arc<RegisteredRoute> {
        tracing::debug!(pattern = %pattern, methods = %methods, "Registering route");
        self.update(|edit| {
            edit.insert(RegisteredRoute {
                pattern,
                methods,
                handler,
                source: None,
            })
        })
    }

    /// Remove the route for `pattern`; does nothing if it is absent.
    pub fn unregister(&self, pattern: &str) -> bool {
        let removed = self.update(|edit| edit.remove(pattern));
        if removed {
            tracing::debug!(pattern = %pattern, "Unregistered route");
        }
        removed
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use axum::response::IntoResponse;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop() -> HandlerRef {
        handler_fn(|_req| async { "ok".into_response() })
    }

    fn path(p: &str) -> ListenPath {
        ListenPath::parse(p).unwrap()
    }

    #[test]
    fn dispatch_prefers_most_specific() {
        let registry = RouteRegistry::new();
        let users = registry.register(path("/users"), MethodSet::any(), noop());
        let by_id = registry.register(path("/users/:id"), MethodSet::any(), noop());
        let me = registry.register(path("/users/me"), MethodSet::any(), noop());

        let found = |p: &str| match registry.dispatch(&Method::GET, p) {
            Dispatch::Found(route) => route,
            other => panic!("expected a route for {p}, got {other:?}"),
        };

        assert!(Arc::ptr_eq(&found("/users"), &users));
        assert!(Arc::ptr_eq(&found("/users/42"), &by_id));
        assert!(Arc::ptr_eq(&found("/users/me/settings"), &me));
        assert!(matches!(registry.dispatch(&Method::GET, "/orders"), Dispatch::NotFound));
    }

    #[test]
    fn method_mismatch_falls_through_then_reports_405() {
        let registry = RouteRegistry::new();
        let get_only: MethodSet = [Method::GET].into_iter().collect();
        registry.register(path("/items/:id"), get_only, noop());
        let fallback = registry.register(path("/items"), [Method::POST].into_iter().collect(), noop());

        assert!(matches!(
            registry.dispatch(&Method::POST, "/items/1"),
            Dispatch::Found(route) if Arc::ptr_eq(&route, &fallback)
        ));
        assert!(matches!(registry.dispatch(&Method::DELETE, "/items/1"), Dispatch::MethodNotAllowed));
    }

    #[test]
    fn register_replaces_and_unregister_is_idempotent() {
        let registry = RouteRegistry::new();
        let first = registry.register(path("/a/*"), MethodSet::any(), noop());
        let second = registry.register(path("/a"), MethodSet::any(), noop());

        let table = registry.snapshot();
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(table.get("/a").unwrap(), &second));
        assert!(!Arc::ptr_eq(&first, &second));

        assert!(registry.unregister("/a"));
        assert!(!registry.unregister("/a"));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn param_names_share_one_slot() {
        let registry = RouteRegistry::new();
        registry.register(path("/u/:id"), MethodSet::any(), noop());
        let by_name = registry.register(path("/u/:name"), MethodSet::any(), noop());

        let table = registry.snapshot();
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(table.get("/u/:id").unwrap(), &by_name));

        assert!(registry.unregister("/u/:other"));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn snapshots_are_isolated_from_later_updates() {
        let registry = RouteRegistry::new();
        registry.register(path("/a"), MethodSet::any(), noop());
        let before = registry.snapshot();

        registry.unregister("/a");

        assert!(before.contains("/a"));
        assert!(!registry.snapshot().contains("/a"));
    }

    #[test]
    fn concurrent_readers_never_observe_partial_updates() {
        let registry = Arc::new(RouteRegistry::new());
        registry.update(|edit| {
            for p in ["/a", "/b"] {
                edit.insert(RegisteredRoute {
                    pattern: path(p),
                    methods: MethodSet::any(),
                    handler: noop(),
                    source: None,
                });
            }
        });

        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let mut observed = 0u64;
                    loop {
                        let table = registry.snapshot();
                        let state = (table.contains("/a"), table.contains("/b"), table.contains("/c"));
                        assert!(
                            state == (true, true, false) || state == (false, false, true),
                            "mixed table observed: {state:?}"
                        );
                        // A still-registered pattern must always dispatch.
                        if state.2 {
                            assert!(matches!(table.dispatch(&Method::GET, "/c"), Dispatch::Found(_)));
                        }
                        observed += 1;
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    observed
                })
            })
            .collect();

        for i in 0..2_000 {
            registry.update(|edit| {
                if i % 2 == 0 {
                    edit.remove("/a");
                    edit.remove("/b");
                    edit.insert(RegisteredRoute {
                        pattern: path("/c"),
                        methods: MethodSet::any(),
                        handler: noop(),
                        source: None,
                    });
                } else {
                    edit.remove("/c");
                    for p in ["/a", "/b"] {
                        edit.insert(RegisteredRoute {
                            pattern: path(p),
                            methods: MethodSet::any(),
                            handler: noop(),
                            source: None,
                        });
                    }
                }
            });
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }

    #[test]
    fn replacing_a_handler_never_leaves_a_gap() {
        let registry = Arc::new(RouteRegistry::new());
        registry.register(path("/live"), MethodSet::any(), noop());

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let registry = registry.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    assert!(matches!(
                        registry.dispatch(&Method::GET, "/live/x"),
                        Dispatch::Found(_)
                    ));
                }
            })
        };

        for _ in 0..2_000 {
            registry.register(path("/live"), MethodSet::any(), noop());
        }

        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }
}
