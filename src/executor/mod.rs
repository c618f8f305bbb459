//! The request executor (C6) and stream executor (C7) — the two
//! algorithms that drive the pipeline composer (C4) and exception processor
//! (C5) for their respective dispatch kinds.
//!
//! Both executors share one shape: resolve collaborators from the locator,
//! compose a pipeline, run it, and on a recoverable failure hand off to the
//! exception processor instead of surfacing the original error. The stream
//! executor additionally owns the swap loop that lets a
//! mid-iteration recovery replace the active sequence without the consumer
//! ever observing two iterators at once.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::exception::{self, ExceptionHierarchy, Recovery};
use crate::future::{BoxFuture, DynStream};
use crate::handler::{PostProcessor, PreProcessor, RequestHandler, StreamRequestHandler};
use crate::invoker::{ErasedInvoker, InvokerCache};
use crate::locator::{resolve_typed, Locator};
use crate::message::{Request, StreamRequest};
use crate::middleware::{RequestBehavior, StreamBehavior};
use crate::pipeline::{compose_request, compose_stream};

/// An invoker for the request path: bridges a resolved, concretely
/// typed handler to a call, built once per concrete message type and
/// downcast back out of the cache's `dyn Any` slot on every dispatch
/// thereafter — the warm path after the first dispatch for `M` is a cache
/// lookup plus a pointer downcast, no reflective type inspection.
type RequestInvoker<M> = Arc<
    dyn Fn(Arc<dyn RequestHandler<M>>, Arc<M>, CancellationToken) -> BoxFuture<Result<<M as Request>::Response, DispatchError>>
        + Send
        + Sync,
>;

/// The stream-path equivalent of [`RequestInvoker`].
type StreamInvoker<M> = Arc<
    dyn Fn(
            Arc<dyn StreamRequestHandler<M>>,
            Arc<M>,
            CancellationToken,
        ) -> BoxFuture<Result<DynStream<Result<<M as StreamRequest>::Item, DispatchError>>, DispatchError>>
        + Send
        + Sync,
>;

fn build_request_invoker<M: Request>() -> RequestInvoker<M> {
    Arc::new(|handler, message, token| handler.handle(message, token))
}

fn build_stream_invoker<M: StreamRequest>() -> StreamInvoker<M> {
    Arc::new(|handler, message, token| handler.handle(message, token))
}

/// Downcasts a cache entry back to the concrete invoker closure type it was
/// built as. `V` is always `Arc<dyn Fn(...)>` at call sites ([`RequestInvoker<M>`]
/// or [`StreamInvoker<M>`]), hence the `Clone` bound — mirrors
/// `resolve_typed`'s `Arc<T>`-in-`Arc<dyn Any>` downcast in
/// [`crate::locator`]. A mismatch here indicates a build-time bug in the
/// runtime itself, not a user error — reported as `NoDispatchShape`.
fn downcast_invoker<V: Clone + 'static>(erased: ErasedInvoker, message_type: &'static str) -> Result<V, DispatchError> {
    erased
        .downcast::<V>()
        .map(|boxed| (*boxed).clone())
        .map_err(|_| DispatchError::NoDispatchShape {
            message_type,
            detail: "invoker cache entry did not downcast to the expected closure type".to_string(),
        })
}

/// Adapts a cached invoker plus a resolved handler into a
/// [`RequestHandler<M>`], so the pipeline composer (C4) can treat the
/// cache-mediated call exactly like any other terminal handler.
struct InvokerRequestHandler<M: Request> {
    invoker: RequestInvoker<M>,
    handler: Arc<dyn RequestHandler<M>>,
}

impl<M: Request> RequestHandler<M> for InvokerRequestHandler<M> {
    fn handle(&self, message: Arc<M>, token: CancellationToken) -> BoxFuture<Result<M::Response, DispatchError>> {
        (self.invoker)(Arc::clone(&self.handler), message, token)
    }
}

struct InvokerStreamHandler<M: StreamRequest> {
    invoker: StreamInvoker<M>,
    handler: Arc<dyn StreamRequestHandler<M>>,
}

impl<M: StreamRequest> StreamRequestHandler<M> for InvokerStreamHandler<M> {
    fn handle(
        &self,
        message: Arc<M>,
        token: CancellationToken,
    ) -> BoxFuture<Result<DynStream<Result<M::Item, DispatchError>>, DispatchError>> {
        (self.invoker)(Arc::clone(&self.handler), message, token)
    }
}

/// Drives the request-with-response and void-request dispatch paths (C6).
/// Owns one invoker cache; [`crate::dispatch::DispatchTable`] keeps a
/// separate instance per dispatch kind.
#[derive(Default)]
pub struct RequestExecutor {
    invoker_cache: InvokerCache<ErasedInvoker>,
}

impl RequestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// ```text
    /// RECEIVE -> PREPROCESS -> PIPELINE -> (success: RETURN)
    ///                                    -> (failure: EXCEPTION
    ///                                        -> (handled: RETURN recovery)
    ///                                        -> (not handled: ACTIONS -> RETHROW))
    /// ```
    ///
    pub async fn dispatch<M: Request>(
        &self,
        locator: &dyn Locator,
        hierarchy: &ExceptionHierarchy,
        message: Arc<M>,
        token: CancellationToken,
    ) -> Result<M::Response, DispatchError> {
        let handler = resolve_typed::<dyn RequestHandler<M>>(locator)
            .into_iter()
            .next()
            .ok_or(DispatchError::NoHandler {
                message_type: M::type_name(),
                expected_role: "request handler",
            })?;

        let erased = self
            .invoker_cache
            .get_or_build::<M>(|| Arc::new(build_request_invoker::<M>()) as ErasedInvoker);
        let invoker: RequestInvoker<M> = downcast_invoker(erased, M::type_name())?;

        let pre_processors = resolve_typed::<dyn PreProcessor<M>>(locator);
        let behaviors = resolve_typed::<dyn RequestBehavior<M>>(locator);
        let post_processors = resolve_typed::<dyn PostProcessor<M>>(locator);

        let terminal = Arc::new(InvokerRequestHandler { invoker, handler });
        let pipeline = compose_request::<M>(pre_processors, behaviors, post_processors, terminal);

        match pipeline.run(Arc::clone(&message), token.clone()).await {
            Ok(response) => Ok(response),
            Err(DispatchError::HandlerFailure { message_type, raised }) => {
                match exception::process::<M, M::Response>(locator, hierarchy, message, raised, token).await {
                    Recovery::Handled(value) => Ok(value),
                    Recovery::Unhandled(raised) => Err(DispatchError::HandlerFailure { message_type, raised }),
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Drives the stream-request dispatch path (C7) — the hardest subsystem in
/// the core. See [`dispatch`](Self::dispatch) for the state machine.
#[derive(Default)]
pub struct StreamExecutor {
    invoker_cache: InvokerCache<ErasedInvoker>,
}

/// Guards the background task that forwards cancellation from two parent
/// tokens into one linked child. Aborting on drop disposes the
/// linked cancellation source on every exit path — normal end, error, or the
/// consumer dropping the stream early — since dropping the swap loop's
/// state always drops this guard.
struct LinkedTokenGuard {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for LinkedTokenGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Links a request token and an optional enumeration token: if
/// both are present, forward cancellation from either into a fresh child
/// token; otherwise just reuse whichever single token was supplied.
fn link_tokens(request_token: CancellationToken, enumeration_token: Option<CancellationToken>) -> (CancellationToken, Option<LinkedTokenGuard>) {
    match enumeration_token {
        None => (request_token, None),
        Some(enumeration_token) => {
            let linked = CancellationToken::new();
            let forward_to = linked.clone();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    _ = request_token.cancelled() => {}
                    _ = enumeration_token.cancelled() => {}
                }
                forward_to.cancel();
            });
            (linked, Some(LinkedTokenGuard { handle: Some(handle) }))
        }
    }
}

/// Per-stream state threaded through the swap loop via
/// [`futures::stream::unfold`]. Dropping this struct — on normal
/// completion, an unrecovered error, or the consumer dropping the stream
/// early — drops `active` (disposing the current iterator) and
/// `_token_guard` (disposing the linked cancellation source) together.
struct SwapState<M: StreamRequest> {
    active: DynStream<Result<M::Item, DispatchError>>,
    message: Arc<M>,
    locator: Arc<dyn Locator>,
    hierarchy: Arc<ExceptionHierarchy>,
    token: CancellationToken,
    _token_guard: Option<LinkedTokenGuard>,
}

impl StreamExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stream dispatch state machine:
    ///
    /// 1. Link cancellation tokens.
    /// 2. Build the initial stream, routing a setup-time failure through
    ///    the exception processor with "mark-handled-with-stream".
    /// 3. Swap loop: each mid-iteration failure is routed through the
    ///    exception processor again; a recovery replaces the active
    ///    stream and iteration continues from its first element, a
    ///    non-recovery ends the stream with the original failure.
    ///
    /// Steps 3 and 4 (outer swap / inner advance) collapse into a single
    /// loop here because [`futures::StreamExt::next`] already fuses
    /// "create an iterator" and "advance it" into one poll — there is no
    /// separate enumerator-creation step to fail independently of the
    /// first `next()` call in Rust's `Stream` model.
    pub async fn dispatch<M: StreamRequest>(
        &self,
        locator: Arc<dyn Locator>,
        hierarchy: Arc<ExceptionHierarchy>,
        message: Arc<M>,
        request_token: CancellationToken,
        enumeration_token: Option<CancellationToken>,
    ) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        let (token, token_guard) = link_tokens(request_token, enumeration_token);

        let handler = resolve_typed::<dyn StreamRequestHandler<M>>(locator.as_ref())
            .into_iter()
            .next()
            .ok_or(DispatchError::NoHandler {
                message_type: M::type_name(),
                expected_role: "stream request handler",
            })?;

        let erased = self
            .invoker_cache
            .get_or_build::<M>(|| Arc::new(build_stream_invoker::<M>()) as ErasedInvoker);
        let invoker: StreamInvoker<M> = downcast_invoker(erased, M::type_name())?;

        let pre_processors = resolve_typed::<dyn PreProcessor<M>>(locator.as_ref());
        let behaviors = resolve_typed::<dyn StreamBehavior<M>>(locator.as_ref());

        let terminal = Arc::new(InvokerStreamHandler { invoker, handler });
        let pipeline = compose_stream::<M>(pre_processors, behaviors, terminal);

        tracing::debug!(message_type = M::type_name(), "building initial stream");
        let active = match pipeline.run(Arc::clone(&message), token.clone()).await {
            Ok(stream) => stream,
            Err(DispatchError::HandlerFailure { message_type, raised }) => {
                match exception::process::<M, DynStream<Result<M::Item, DispatchError>>>(
                    locator.as_ref(),
                    hierarchy.as_ref(),
                    Arc::clone(&message),
                    raised,
                    token.clone(),
                )
                .await
                {
                    Recovery::Handled(replacement) => {
                        tracing::warn!(message_type = M::type_name(), "initial stream build recovered");
                        replacement
                    }
                    Recovery::Unhandled(raised) => {
                        return Err(DispatchError::HandlerFailure { message_type, raised });
                    }
                }
            }
            Err(other) => return Err(other),
        };

        let state = SwapState {
            active,
            message,
            locator,
            hierarchy,
            token,
            _token_guard: token_guard,
        };

        Ok(Box::pin(futures::stream::unfold(Some(state), swap_step)))
    }
}

/// One step of the swap loop's `unfold`: advance the active iterator,
/// yielding its element, ending the stream, or — on a recoverable failure —
/// swapping in the replacement iterator and trying again without yielding
/// anything to the consumer. A recovered exception is never surfaced.
async fn swap_step<M: StreamRequest>(
    mut state: Option<SwapState<M>>,
) -> Option<(Result<M::Item, DispatchError>, Option<SwapState<M>>)> {
    loop {
        let mut inner = state.take()?;
        match inner.active.next().await {
            Some(Ok(item)) => return Some((Ok(item), Some(inner))),
            Some(Err(DispatchError::HandlerFailure { message_type, raised })) => {
                tracing::debug!(message_type = M::type_name(), "disposing iterator after mid-stream failure");
                match exception::process::<M, DynStream<Result<M::Item, DispatchError>>>(
                    inner.locator.as_ref(),
                    inner.hierarchy.as_ref(),
                    Arc::clone(&inner.message),
                    raised,
                    inner.token.clone(),
                )
                .await
                {
                    Recovery::Handled(replacement) => {
                        tracing::warn!(message_type = M::type_name(), "mid-stream failure recovered, swapping iterator");
                        inner.active = replacement;
                        state = Some(inner);
                        continue;
                    }
                    Recovery::Unhandled(raised) => {
                        tracing::error!(message_type = M::type_name(), "mid-stream failure unrecovered");
                        return Some((Err(DispatchError::HandlerFailure { message_type, raised }), None));
                    }
                }
            }
            Some(Err(other)) => return Some((Err(other), None)),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ExceptionHandler, ExceptionState};
    use crate::locator::InMemoryLocator;
    use crate::message::Unit;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping;
    impl Request for Ping {
        type Response = String;
    }

    struct Echo;
    impl RequestHandler<Ping> for Echo {
        fn handle(&self, _message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<String, DispatchError>> {
            Box::pin(async { Ok("PONG: hello".to_string()) })
        }
    }

    #[tokio::test]
    async fn ping_pong_end_to_end() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn RequestHandler<Ping>>(Arc::new(Echo));
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        let response = executor
            .dispatch::<Ping>(&locator, &hierarchy, Arc::new(Ping), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, "PONG: hello");
    }

    #[tokio::test]
    async fn repeated_dispatch_builds_invoker_once() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn RequestHandler<Ping>>(Arc::new(Echo));
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        for _ in 0..5 {
            executor
                .dispatch::<Ping>(&locator, &hierarchy, Arc::new(Ping), CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(executor.invoker_cache.build_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_without_handler_is_no_handler() {
        let locator = InMemoryLocator::new();
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        let err = executor
            .dispatch::<Ping>(&locator, &hierarchy, Arc::new(Ping), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NoHandler { .. }));
    }

    struct VoidPing;
    impl crate::message::VoidRequest for VoidPing {}

    struct VoidEcho(Arc<AtomicUsize>);
    impl RequestHandler<VoidPing> for VoidEcho {
        fn handle(&self, _message: Arc<VoidPing>, _token: CancellationToken) -> BoxFuture<Result<Unit, DispatchError>> {
            let counter = Arc::clone(&self.0);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Unit)
            })
        }
    }

    #[tokio::test]
    async fn void_request_completes_with_unit() {
        let locator = InMemoryLocator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        locator.register_handler::<dyn RequestHandler<VoidPing>>(Arc::new(VoidEcho(Arc::clone(&calls))));
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        let response = executor
            .dispatch::<VoidPing>(&locator, &hierarchy, Arc::new(VoidPing), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, Unit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Invalid;
    impl fmt::Display for Invalid {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid operation")
        }
    }
    impl std::error::Error for Invalid {}

    struct Failing;
    impl RequestHandler<Ping> for Failing {
        fn handle(&self, _message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<String, DispatchError>> {
            Box::pin(async { Err(DispatchError::raise(Ping::type_name(), Invalid)) })
        }
    }

    struct RecoverInvalid;
    impl ExceptionHandler<Ping, String> for RecoverInvalid {
        fn exception_type(&self) -> std::any::TypeId {
            std::any::TypeId::of::<Invalid>()
        }

        fn handle(
            &self,
            _message: Arc<Ping>,
            _exception: &crate::exception::Raised,
            state: &mut ExceptionState<String>,
            _token: CancellationToken,
        ) -> BoxFuture<()> {
            state.mark_handled("recovered".to_string());
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn recovered_failure_is_never_observed_by_caller() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn RequestHandler<Ping>>(Arc::new(Failing));
        locator.register::<dyn ExceptionHandler<Ping, String>, RecoverInvalid>(Arc::new(RecoverInvalid));
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        let response = executor
            .dispatch::<Ping>(&locator, &hierarchy, Arc::new(Ping), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response, "recovered");
    }

    #[tokio::test]
    async fn unrecovered_failure_surfaces_as_handler_failure() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn RequestHandler<Ping>>(Arc::new(Failing));
        let hierarchy = ExceptionHierarchy::new();
        let executor = RequestExecutor::new();

        let err = executor
            .dispatch::<Ping>(&locator, &hierarchy, Arc::new(Ping), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DispatchError::HandlerFailure { raised, .. } => {
                assert_eq!(raised.type_name(), std::any::type_name::<Invalid>());
            }
            other => panic!("expected HandlerFailure, got {other:?}"),
        }
    }

    struct CountingStream(Arc<AtomicUsize>);
    impl StreamRequest for CountingStream {
        type Item = u32;
    }
    struct CountingStreamHandler;
    impl StreamRequestHandler<CountingStream> for CountingStreamHandler {
        fn handle(
            &self,
            _message: Arc<CountingStream>,
            _token: CancellationToken,
        ) -> BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
            Box::pin(async { Ok(Box::pin(futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)])) as DynStream<_>) })
        }
    }

    #[tokio::test]
    async fn stream_yields_every_element_with_no_middleware() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn StreamRequestHandler<CountingStream>>(Arc::new(CountingStreamHandler));
        let locator = Arc::new(locator);
        let hierarchy = Arc::new(ExceptionHierarchy::new());
        let executor = StreamExecutor::new();

        let stream = executor
            .dispatch::<CountingStream>(
                Arc::clone(&locator) as Arc<dyn Locator>,
                hierarchy,
                Arc::new(CountingStream(Arc::new(AtomicUsize::new(0)))),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        let items: Vec<_> = stream.collect().await;
        let items: Vec<u32> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![1, 2, 3]);
    }

    struct FlakyOnce(AtomicUsize);
    impl StreamRequest for FlakyOnce {
        type Item = u32;
    }
    struct FlakyHandler;
    impl StreamRequestHandler<FlakyOnce> for FlakyHandler {
        fn handle(
            &self,
            _message: Arc<FlakyOnce>,
            _token: CancellationToken,
        ) -> BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
            Box::pin(async {
                let items = vec![
                    Ok(1),
                    Err(DispatchError::raise(FlakyOnce::type_name(), Invalid)),
                ];
                Ok(Box::pin(futures::stream::iter(items)) as DynStream<_>)
            })
        }
    }
    struct ReplaceWithTail;
    impl ExceptionHandler<FlakyOnce, DynStream<Result<u32, DispatchError>>> for ReplaceWithTail {
        fn exception_type(&self) -> std::any::TypeId {
            std::any::TypeId::of::<Invalid>()
        }

        fn handle(
            &self,
            _message: Arc<FlakyOnce>,
            _exception: &crate::exception::Raised,
            state: &mut ExceptionState<DynStream<Result<u32, DispatchError>>>,
            _token: CancellationToken,
        ) -> BoxFuture<()> {
            state.mark_handled(Box::pin(futures::stream::iter(vec![Ok(99), Ok(100)])));
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn stream_recovery_swaps_iterator_mid_stream() {
        let locator = InMemoryLocator::new();
        locator.register_handler::<dyn StreamRequestHandler<FlakyOnce>>(Arc::new(FlakyHandler));
        locator.register::<dyn ExceptionHandler<FlakyOnce, DynStream<Result<u32, DispatchError>>>, ReplaceWithTail>(
            Arc::new(ReplaceWithTail),
        );
        let locator = Arc::new(locator);
        let hierarchy = Arc::new(ExceptionHierarchy::new());
        let executor = StreamExecutor::new();

        let stream = executor
            .dispatch::<FlakyOnce>(
                Arc::clone(&locator) as Arc<dyn Locator>,
                hierarchy,
                Arc::new(FlakyOnce(AtomicUsize::new(0))),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        let items: Vec<u32> = stream.collect::<Vec<_>>().await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![1, 99, 100]);
    }
}
