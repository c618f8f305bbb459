//! The facade (C9) — the user-facing dispatch API. [`Dispatcher`]
//! binds a [`Locator`] (the sender's collaborator for resolving handlers and
//! middleware) and a [`NotificationPublisher`] strategy, and exposes exactly
//! four operations: `send` (request-with-response and
//! void-request share one method, since a void request is a
//! `Request<Response = Unit>`), `create_stream`, and `publish`.
//!
//! Assembly follows a bind-then-configure shape
//! (`Server::bind(..).run(..)`, `CorsMiddleware::new().allow_origin(..)`):
//! [`Dispatcher::new`] takes the one required collaborator, and
//! [`Dispatcher::with_publisher`] / [`Dispatcher::register_exception_parent`]
//! are `#[must_use]` builder methods layered on top.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchTable;
use crate::error::DispatchError;
use crate::exception::ExceptionHierarchy;
use crate::future::DynStream;
use crate::handler::NotificationHandler;
use crate::locator::{resolve_typed, Locator};
use crate::message::{Notification, Request, StreamRequest, Unit, VoidRequest};
use crate::notification::{NotificationPublisher, SequentialPublisher};

/// The in-process dispatch runtime's public entry point. Stateless beyond
/// its collaborators and the process-wide invoker/exception caches owned by
/// [`DispatchTable`].
pub struct Dispatcher {
    locator: Arc<dyn Locator>,
    hierarchy: Arc<ExceptionHierarchy>,
    publisher: Arc<dyn NotificationPublisher>,
    table: DispatchTable,
}

impl Dispatcher {
    /// Binds the dispatcher to its one required collaborator. Defaults to
    /// the sequential notification strategy and an empty exception
    /// hierarchy (every raised error's ancestor chain is just itself then
    /// [`crate::exception::AnyFailure`], until [`register_exception_parent`](Self::register_exception_parent)
    /// declares otherwise).
    pub fn new(locator: Arc<dyn Locator>) -> Self {
        Self {
            locator,
            hierarchy: Arc::new(ExceptionHierarchy::new()),
            publisher: Arc::new(SequentialPublisher),
            table: DispatchTable::new(),
        }
    }

    /// Selects the notification fan-out strategy. Replaces the
    /// default [`SequentialPublisher`].
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Declares that `Child` is more specific than `Parent` in the
    /// exception hierarchy the exception processor (C5) walks.
    #[must_use]
    pub fn register_exception_parent<Child: 'static, Parent: 'static>(self) -> Self {
        self.hierarchy.register_parent::<Child, Parent>();
        self
    }

    /// `send(request-with-response) -> completion of R` and
    /// `send(void-request) -> completion of nothing` collapse into
    /// one method: a void request is a `Request<Response = Unit>` by
    /// blanket impl ([`crate::message::VoidRequest`]), so the caller of a
    /// void request simply discards the returned [`Unit`].
    ///
    /// Uses a fresh, non-cancellable [`CancellationToken`]; use
    /// [`send_cancellable`](Self::send_cancellable) to supply your own.
    pub async fn send<M: Request>(&self, message: M) -> Result<M::Response, DispatchError> {
        self.send_cancellable(message, CancellationToken::new()).await
    }

    /// [`send`](Self::send) with an explicit cancellation token — the same
    /// logical token is passed to every collaborator in the pipeline.
    pub async fn send_cancellable<M: Request>(&self, message: M, token: CancellationToken) -> Result<M::Response, DispatchError> {
        self.table
            .send::<M>(self.locator.as_ref(), &self.hierarchy, Arc::new(message), token)
            .await
    }

    /// `send-void` restricted to types that only ever implement
    /// [`VoidRequest`] and not a "real" response-bearing `Request` — routes
    /// through the dedicated void-request invoker cache
    /// instead of the response-bearing one. Functionally identical to
    /// [`send`](Self::send) on the same type; kept as a separate entry
    /// point so the two invoker caches observe distinct build traffic.
    pub async fn send_void<M: VoidRequest>(&self, message: M) -> Result<(), DispatchError> {
        self.send_void_cancellable(message, CancellationToken::new()).await
    }

    pub async fn send_void_cancellable<M: VoidRequest>(&self, message: M, token: CancellationToken) -> Result<(), DispatchError> {
        self.table
            .send_void::<M>(self.locator.as_ref(), &self.hierarchy, Arc::new(message), token)
            .await
            .map(|Unit| ())
    }

    /// `create-stream(stream-request) -> lazy sequence of R`. Drives
    /// the stream executor (C7); `request_token` and an optional
    /// `enumeration_token` are linked so cancelling either one cancels the stream.
    pub async fn create_stream<M: StreamRequest>(
        &self,
        message: M,
        request_token: CancellationToken,
        enumeration_token: Option<CancellationToken>,
    ) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        self.table
            .create_stream::<M>(
                Arc::clone(&self.locator),
                Arc::clone(&self.hierarchy),
                Arc::new(message),
                request_token,
                enumeration_token,
            )
            .await
    }

    /// [`create_stream`](Self::create_stream) with a fresh request token and
    /// no separate enumeration token.
    pub async fn create_stream_simple<M: StreamRequest>(&self, message: M) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        self.create_stream(message, CancellationToken::new(), None).await
    }

    /// `publish(notification) -> completion of nothing`. Resolves
    /// every registered [`NotificationHandler<N>`], defers each into a
    /// [`crate::future::BoxFuture`], and hands the batch to the configured
    /// publisher strategy (C8). Notifications never enter the pipeline:
    /// no pre/post-processors, middleware, or exception handling apply here.
    pub async fn publish<N: Notification>(&self, notification: N) -> Result<(), DispatchError> {
        self.publish_cancellable(notification, CancellationToken::new()).await
    }

    pub async fn publish_cancellable<N: Notification>(&self, notification: N, token: CancellationToken) -> Result<(), DispatchError> {
        let notification = Arc::new(notification);
        let handlers = resolve_typed::<dyn NotificationHandler<N>>(self.locator.as_ref());
        tracing::debug!(
            notification_type = N::type_name(),
            handler_count = handlers.len(),
            "publishing notification"
        );

        let calls = handlers
            .into_iter()
            .map(|handler| {
                let notification = Arc::clone(&notification);
                let token = token.clone();
                Box::pin(async move { handler.handle(notification, token).await }) as crate::future::BoxFuture<_>
            })
            .collect();

        self.publisher.publish(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RequestHandler;
    use crate::locator::InMemoryLocator;
    use crate::message::Unit as UnitMarker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping;
    impl Request for Ping {
        type Response = String;
    }
    struct Echo;
    impl RequestHandler<Ping> for Echo {
        fn handle(
            &self,
            _message: Arc<Ping>,
            _token: CancellationToken,
        ) -> crate::future::BoxFuture<Result<String, DispatchError>> {
            Box::pin(async { Ok("PONG: hello".to_string()) })
        }
    }

    fn dispatcher_with_echo() -> Dispatcher {
        let locator = InMemoryLocator::new();
        let echo: Arc<dyn RequestHandler<Ping>> = Arc::new(Echo);
        locator.register_handler::<dyn RequestHandler<Ping>>(echo);
        Dispatcher::new(Arc::new(locator))
    }

    #[tokio::test]
    async fn send_dispatches_to_the_registered_handler() {
        let dispatcher = dispatcher_with_echo();
        let response = dispatcher.send(Ping).await.unwrap();
        assert_eq!(response, "PONG: hello");
    }

    struct Ring;
    impl crate::message::VoidRequest for Ring {}
    struct RingHandler(Arc<AtomicUsize>);
    impl RequestHandler<Ring> for RingHandler {
        fn handle(&self, _message: Arc<Ring>, _token: CancellationToken) -> crate::future::BoxFuture<Result<UnitMarker, DispatchError>> {
            let counter = Arc::clone(&self.0);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(UnitMarker)
            })
        }
    }

    #[tokio::test]
    async fn send_void_discards_the_unit_response() {
        let locator = InMemoryLocator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn RequestHandler<Ring>> = Arc::new(RingHandler(Arc::clone(&calls)));
        locator.register_handler::<dyn RequestHandler<Ring>>(handler);
        let dispatcher = Dispatcher::new(Arc::new(locator));

        dispatcher.send_void(Ring).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Announced(u32);
    impl Notification for Announced {}

    struct CounterA(Arc<AtomicUsize>);
    impl NotificationHandler<Announced> for CounterA {
        fn handle(&self, _n: Arc<Announced>, _token: CancellationToken) -> crate::future::BoxFuture<Result<(), DispatchError>> {
            let counter = Arc::clone(&self.0);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct CounterB(Arc<AtomicUsize>);
    impl NotificationHandler<Announced> for CounterB {
        fn handle(&self, _n: Arc<Announced>, _token: CancellationToken) -> crate::future::BoxFuture<Result<(), DispatchError>> {
            let counter = Arc::clone(&self.0);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn publish_with_no_handlers_succeeds() {
        let dispatcher = Dispatcher::new(Arc::new(InMemoryLocator::new()));
        dispatcher.publish(Announced(1)).await.unwrap();
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_handler() {
        let locator = InMemoryLocator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let first: Arc<dyn NotificationHandler<Announced>> = Arc::new(CounterA(Arc::clone(&calls)));
        let second: Arc<dyn NotificationHandler<Announced>> = Arc::new(CounterB(Arc::clone(&calls)));
        locator.register::<dyn NotificationHandler<Announced>, CounterA>(first);
        locator.register::<dyn NotificationHandler<Announced>, CounterB>(second);
        let dispatcher = Dispatcher::new(Arc::new(locator));

        dispatcher.publish(Announced(1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
