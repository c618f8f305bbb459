//! The exception processor (C5) — walks an exception's type hierarchy,
//! invokes typed recovery handlers and side-effect actions, and preserves
//! the original failure when nothing recovers it.
//!
//! Rust has no runtime class hierarchy for errors to walk. For a language
//! built on sum types rather than inheritance, this crate replaces it with an explicit, user-declared
//! partial order over concrete error types: [`ExceptionHierarchy`] maps a
//! child `TypeId` to its parent `TypeId`, rooted at the implicit universal
//! marker [`AnyFailure`]. [`Raised`] is the type-erased envelope around a
//! concrete, raised error that lets handlers declared against an ancestor
//! type still get typed access to whatever concrete error was actually
//! thrown — the same `TypeId`-keyed downcast technique the locator uses for
//! handler resolution.

use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::future::BoxFuture;
use crate::locator::{resolve_typed, Locator};

/// The implicit root of every exception hierarchy. A chain always
/// terminates here if no explicit parent is registered further up.
#[derive(Debug)]
pub struct AnyFailure;

/// A type-erased envelope around a concrete error that was raised during
/// dispatch. Carries enough information to walk the hierarchy
/// ([`Raised::type_id`]), to display/propagate it untouched
/// ([`Raised::error`]), and to hand a handler typed access back to the
/// concrete type it declared interest in ([`Raised::downcast`]).
#[derive(Clone)]
pub struct Raised {
    type_id: TypeId,
    type_name: &'static str,
    error: Arc<dyn std::error::Error + Send + Sync>,
    any: Arc<dyn Any + Send + Sync>,
}

impl Raised {
    /// Wraps a concrete error, recording its identity for the hierarchy walk.
    pub fn new<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        let boxed = Arc::new(error);
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            error: boxed.clone() as Arc<dyn std::error::Error + Send + Sync>,
            any: boxed as Arc<dyn Any + Send + Sync>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the underlying error for display and source-chain access.
    /// The core never wraps this — it is the exact value a handler threw.
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Returns a clone of the shared boxed error, for threading into
    /// [`crate::error::DispatchError::HandlerFailure`] on rethrow.
    pub fn into_shared(self) -> Arc<dyn std::error::Error + Send + Sync> {
        self.error
    }

    /// Attempts to recover the concrete error type `E`, if `self` was built
    /// from exactly that type.
    pub fn downcast<E: 'static>(&self) -> Option<Arc<E>> {
        self.any.clone().downcast::<E>().ok()
    }
}

impl std::fmt::Debug for Raised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raised")
            .field("type_name", &self.type_name)
            .field("error", &self.error.to_string())
            .finish()
    }
}

impl std::fmt::Display for Raised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

/// Delegates to the wrapped error's own `source()` so the chain a handler
/// threw stays intact through [`crate::error::DispatchError::HandlerFailure`].
impl std::error::Error for Raised {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// A user-declared partial order over concrete exception types, replacing
/// the host-language class hierarchy the original design walks.
/// Parent relationships are registered once at bootstrap
/// ([`crate::Dispatcher::register_exception_parent`]); the resulting
/// ancestor chain for a given concrete type is cached after first
/// computation.
#[derive(Default)]
pub struct ExceptionHierarchy {
    parents: DashMap<TypeId, TypeId>,
    chain_cache: DashMap<TypeId, Arc<Vec<TypeId>>>,
}

impl ExceptionHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `Child` is more specific than `Parent` — when `Child`
    /// (or something registered as a descendant of it) is raised, the walk
    /// visits `Parent` immediately after `Child`.
    pub fn register_parent<Child: 'static, Parent: 'static>(&self) {
        self.parents.insert(TypeId::of::<Child>(), TypeId::of::<Parent>());
        self.chain_cache.clear();
    }

    /// The ancestor chain for `start`, most-specific-first, always ending at
    /// [`AnyFailure`] (unless `start` already is it).
    pub fn chain(&self, start: TypeId) -> Arc<Vec<TypeId>> {
        if let Some(cached) = self.chain_cache.get(&start) {
            return cached.clone();
        }

        let root = TypeId::of::<AnyFailure>();
        let mut chain = vec![start];
        let mut current = start;
        while current != root {
            match self.parents.get(&current) {
                Some(parent) => {
                    current = *parent;
                    chain.push(current);
                }
                None => {
                    if current != root {
                        chain.push(root);
                    }
                    break;
                }
            }
        }

        let chain = Arc::new(chain);
        self.chain_cache.insert(start, chain.clone());
        chain
    }
}

/// Per-dispatch recovery state, passed by reference into every exception
/// handler in the walk. `T` is the recovery
/// payload: a response value on the request path, a replacement lazy
/// sequence on the stream path.
pub struct ExceptionState<T> {
    handled: Option<T>,
}

impl<T> ExceptionState<T> {
    pub fn new() -> Self {
        Self { handled: None }
    }

    /// Marks the failure handled, supplying the recovery value. Only the
    /// first handler to call this within a walk has any effect — the walk
    /// stops as soon as `is_handled()` becomes true.
    pub fn mark_handled(&mut self, value: T) {
        if self.handled.is_none() {
            self.handled = Some(value);
        }
    }

    pub fn is_handled(&self) -> bool {
        self.handled.is_some()
    }

    fn into_inner(self) -> Option<T> {
        self.handled
    }
}

impl<T> Default for ExceptionState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of running the exception processor on a single failure.
pub enum Recovery<T> {
    /// A handler marked the failure handled; the caller never observes the
    /// original exception.
    Handled(T),
    /// No handler recovered the failure; the original exception must be
    /// rethrown after actions have run.
    Unhandled(Raised),
}

/// Typed recovery handler for message type `M`, registered against a
/// specific ancestor-or-self exception type. `T` is the recovery
/// payload type (a response for requests, a replacement stream for streams).
pub trait ExceptionHandler<M, T>: Send + Sync + 'static
where
    M: Send + Sync + 'static,
{
    /// `TypeId` of the concrete exception type this handler declares
    /// interest in — an entry in the hierarchy walk, not necessarily the
    /// type that was actually thrown.
    fn exception_type(&self) -> TypeId;

    fn handle(
        &self,
        message: Arc<M>,
        exception: &Raised,
        state: &mut ExceptionState<T>,
        token: CancellationToken,
    ) -> BoxFuture<()>;
}

/// Side-effect action for message type `M`, registered against a specific
/// ancestor-or-self exception type. Actions cannot mutate recovery state —
/// they run only once the walk has ended unhandled.
pub trait ExceptionAction<M>: Send + Sync + 'static
where
    M: Send + Sync + 'static,
{
    fn exception_type(&self) -> TypeId;

    fn act(&self, message: Arc<M>, exception: &Raised, token: CancellationToken) -> BoxFuture<Result<(), crate::error::DispatchError>>;
}

/// Adapts a closure typed against a concrete exception type `E` into an
/// [`ExceptionHandler<M, T>`] — the same "typed closure → type-erased
/// trait object" conversion used elsewhere for `from_middleware` /
/// `IntoHandler`, applied to recovery handlers instead of request handlers.
pub struct TypedExceptionHandler<E, F> {
    handle: F,
    _exception: PhantomData<fn() -> E>,
}

impl<E, F> TypedExceptionHandler<E, F> {
    pub fn new(handle: F) -> Self {
        Self {
            handle,
            _exception: PhantomData,
        }
    }
}

impl<M, T, E, F> ExceptionHandler<M, T> for TypedExceptionHandler<E, F>
where
    M: Send + Sync + 'static,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: for<'a> Fn(Arc<M>, Arc<E>, &'a mut ExceptionState<T>, CancellationToken) -> BoxFuture<()> + Send + Sync + 'static,
{
    fn exception_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn handle(&self, message: Arc<M>, exception: &Raised, state: &mut ExceptionState<T>, token: CancellationToken) -> BoxFuture<()> {
        match exception.downcast::<E>() {
            Some(typed) => (self.handle)(message, typed, state, token),
            None => Box::pin(async {}),
        }
    }
}

/// Adapts a closure typed against a concrete exception type `E` into an
/// [`ExceptionAction<M>`].
pub struct TypedExceptionAction<E, F> {
    act: F,
    _exception: PhantomData<fn() -> E>,
}

impl<E, F> TypedExceptionAction<E, F> {
    pub fn new(act: F) -> Self {
        Self {
            act,
            _exception: PhantomData,
        }
    }
}

impl<M, E, F> ExceptionAction<M> for TypedExceptionAction<E, F>
where
    M: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(Arc<M>, Arc<E>, CancellationToken) -> BoxFuture<Result<(), crate::error::DispatchError>> + Send + Sync + 'static,
{
    fn exception_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn act(&self, message: Arc<M>, exception: &Raised, token: CancellationToken) -> BoxFuture<Result<(), crate::error::DispatchError>> {
        match exception.downcast::<E>() {
            Some(typed) => (self.act)(message, typed, token),
            None => Box::pin(async { Ok(()) }),
        }
    }
}

/// Runs the exception processor for message type `M` with recovery payload
/// `T`: walks the hierarchy invoking handlers until one marks the
/// failure handled; if none do, walks it again invoking actions, then
/// returns [`Recovery::Unhandled`] so the caller rethrows the original
/// error untouched.
pub async fn process<M, T>(
    locator: &dyn Locator,
    hierarchy: &ExceptionHierarchy,
    message: Arc<M>,
    raised: Raised,
    token: CancellationToken,
) -> Recovery<T>
where
    M: Send + Sync + 'static,
    T: Send + 'static,
{
    let chain = hierarchy.chain(raised.type_id());
    let handlers = resolve_typed::<dyn ExceptionHandler<M, T>>(locator);
    let mut state = ExceptionState::<T>::new();

    'walk: for ancestor in chain.iter() {
        for handler in handlers.iter().filter(|h| h.exception_type() == *ancestor) {
            handler
                .handle(Arc::clone(&message), &raised, &mut state, token.clone())
                .await;
            if state.is_handled() {
                tracing::warn!(
                    exception = raised.type_name(),
                    ancestor_reached = ?ancestor,
                    "exception recovered by handler"
                );
                break 'walk;
            }
        }
    }

    if let Some(value) = state.into_inner() {
        return Recovery::Handled(value);
    }

    let actions = resolve_typed::<dyn ExceptionAction<M>>(locator);
    for ancestor in chain.iter() {
        for action in actions.iter().filter(|a| a.exception_type() == *ancestor) {
            if let Err(err) = action.act(Arc::clone(&message), &raised, token.clone()).await {
                tracing::error!(error = %err, "exception action failed; continuing remaining actions");
            }
        }
    }

    tracing::error!(exception = raised.type_name(), "exception unrecovered, rethrowing original");
    Recovery::Unhandled(raised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::InMemoryLocator;
    use std::fmt;

    #[derive(Debug)]
    struct BaseError;
    impl fmt::Display for BaseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "base error")
        }
    }
    impl std::error::Error for BaseError {}

    #[derive(Debug)]
    struct SpecificError;
    impl fmt::Display for SpecificError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "specific error")
        }
    }
    impl std::error::Error for SpecificError {}

    struct Ping;

    fn hierarchy_with_specific_under_base() -> ExceptionHierarchy {
        let hierarchy = ExceptionHierarchy::new();
        hierarchy.register_parent::<SpecificError, BaseError>();
        hierarchy
    }

    #[tokio::test]
    async fn most_specific_handler_wins_over_base() {
        let locator = InMemoryLocator::new();
        let specific_handler: Arc<dyn ExceptionHandler<Ping, &'static str>> =
            Arc::new(TypedExceptionHandler::<SpecificError, _>::new(
                |_msg: Arc<Ping>, _e: Arc<SpecificError>, state: &mut ExceptionState<&'static str>, _token| {
                    state.mark_handled("specific");
                    Box::pin(async {})
                },
            ));
        locator.register::<dyn ExceptionHandler<Ping, &'static str>, SpecificError>(specific_handler);
        let base_handler: Arc<dyn ExceptionHandler<Ping, &'static str>> =
            Arc::new(TypedExceptionHandler::<BaseError, _>::new(
                |_msg: Arc<Ping>, _e: Arc<BaseError>, state: &mut ExceptionState<&'static str>, _token| {
                    state.mark_handled("fallback");
                    Box::pin(async {})
                },
            ));
        locator.register::<dyn ExceptionHandler<Ping, &'static str>, BaseError>(base_handler);

        let hierarchy = hierarchy_with_specific_under_base();
        let raised = Raised::new(SpecificError);
        let recovery = process::<Ping, &'static str>(
            &locator,
            &hierarchy,
            Arc::new(Ping),
            raised,
            CancellationToken::new(),
        )
        .await;

        match recovery {
            Recovery::Handled(value) => assert_eq!(value, "specific"),
            Recovery::Unhandled(_) => panic!("expected recovery"),
        }
    }

    #[tokio::test]
    async fn actions_run_exactly_once_when_unhandled_then_rethrows() {
        let locator = InMemoryLocator::new();
        let invocations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let action: Arc<dyn ExceptionAction<Ping>> = Arc::new(TypedExceptionAction::<BaseError, _>::new(
            move |_msg: Arc<Ping>, _e: Arc<BaseError>, _token| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            },
        ));
        locator.register::<dyn ExceptionAction<Ping>, BaseError>(action);

        let hierarchy = ExceptionHierarchy::new();
        let raised = Raised::new(BaseError);
        let recovery =
            process::<Ping, ()>(&locator, &hierarchy, Arc::new(Ping), raised, CancellationToken::new()).await;

        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 1);
        match recovery {
            Recovery::Unhandled(raised) => assert_eq!(raised.type_name(), std::any::type_name::<BaseError>()),
            Recovery::Handled(_) => panic!("expected unhandled"),
        }
    }

    #[test]
    fn chain_terminates_at_any_failure_when_no_parent_registered() {
        let hierarchy = ExceptionHierarchy::new();
        let chain = hierarchy.chain(TypeId::of::<BaseError>());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], TypeId::of::<AnyFailure>());
    }

    #[test]
    fn chain_follows_registered_parent_links() {
        let hierarchy = hierarchy_with_specific_under_base();
        let chain = hierarchy.chain(TypeId::of::<SpecificError>());
        assert_eq!(chain[0], TypeId::of::<SpecificError>());
        assert_eq!(chain[1], TypeId::of::<BaseError>());
        assert_eq!(chain[2], TypeId::of::<AnyFailure>());
    }
}
