//! The locator contract (C1) — the single operation the core needs
//! from an external service container: "resolve all instances of this
//! service type." The core never asks for "the one handler"; it always asks
//! for "all" and enforces cardinality itself, which keeps this
//! contract identical for singleton and multi-valued roles alike.
//!
//! [`InMemoryLocator`] is a reference implementation good enough to back
//! this crate's own tests and demos. Production consumers are expected to
//! bring their own locator backed by a real DI container — the core places
//! no requirement on how registration happens, only on what `resolve_all`
//! returns.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

/// Resolves instances of a service type on the core's behalf.
///
/// Implementations **must** return an empty `Vec` — never an error — when
/// nothing is registered for `service_type`. They **must not** return
/// null/absent elements. `resolve_all` may be invoked multiple times per
/// dispatch (once per collaborator role) and must be safe under concurrent
/// invocation.
pub trait Locator: Send + Sync + 'static {
    /// Returns every instance registered against the given service type,
    /// identified by the `TypeId` of the (possibly unsized) service trait,
    /// e.g. `TypeId::of::<dyn RequestHandler<Ping>>()`.
    fn resolve_all(&self, service_type: TypeId) -> Vec<Arc<dyn Any + Send + Sync>>;
}

/// Looks up `T` against `locator` and downcasts every result back to
/// `Arc<T>`. Entries that fail to downcast (which should never happen for a
/// well-behaved [`Locator`]) are silently dropped rather than causing the
/// whole resolution to fail.
pub fn resolve_typed<T: ?Sized + 'static>(locator: &dyn Locator) -> Vec<Arc<T>> {
    locator
        .resolve_all(TypeId::of::<T>())
        .into_iter()
        .filter_map(|erased| erased.downcast::<Arc<T>>().ok().map(|boxed| (*boxed).clone()))
        .collect()
}

/// A minimal, fully in-process [`Locator`]. Registration uses "first wins"
/// semantics for terminal handlers (a second registration for the same
/// service type is silently ignored, enforcing the "exactly one handler"
/// cardinality at the source) and "add-distinct" semantics for every other
/// role (the same concrete type registered twice collapses to one entry),
/// matching the registration rules the core's external registration
/// collaborator is expected to honor.
#[derive(Default)]
pub struct InMemoryLocator {
    singletons: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    multi: DashMap<TypeId, Vec<(TypeId, Arc<dyn Any + Send + Sync>)>>,
}

impl InMemoryLocator {
    /// Creates an empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sole instance for service type `T` ("first wins" — a
    /// later call for the same `T` is a no-op). Use this for terminal
    /// request/stream handlers, where the data model guarantees at most one.
    ///
    /// Callers pass the concrete handler directly (e.g. `Arc::new(Echo)`);
    /// the coercion to `Arc<T>` happens at the call site, where the concrete
    /// type's impl of the service trait is still visible to the compiler.
    pub fn register_handler<T>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(value);
        self.singletons.entry(TypeId::of::<T>()).or_insert(erased);
    }

    /// Adds an instance for service type `T` ("add-distinct" — a second
    /// registration of the same concrete `C` collapses into the first). Use
    /// this for pre/post-processors, middleware behaviors, exception
    /// handlers/actions, and notification handlers.
    ///
    /// `C` names the concrete handler type for the dedup key and must be
    /// supplied explicitly (it cannot be inferred once `value` has already
    /// coerced to `Arc<T>`); `value` itself is passed as the concrete
    /// `Arc::new(handler)`, coerced to `Arc<T>` at the call site.
    pub fn register<T, C>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
        C: 'static,
    {
        let concrete = TypeId::of::<C>();
        let erased: Arc<dyn Any + Send + Sync> = Arc::new(value);
        let mut entries = self.multi.entry(TypeId::of::<T>()).or_default();
        if !entries.iter().any(|(existing, _)| *existing == concrete) {
            entries.push((concrete, erased));
        }
    }
}

impl Locator for InMemoryLocator {
    fn resolve_all(&self, service_type: TypeId) -> Vec<Arc<dyn Any + Send + Sync>> {
        if let Some(single) = self.singletons.get(&service_type) {
            return vec![single.clone()];
        }
        self.multi
            .get(&service_type)
            .map(|entries| entries.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }
}
