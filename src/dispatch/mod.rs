//! The dispatch table (C3) — the flat routing rule that ties a
//! dispatched message to the invoker cache and executor that knows how to
//! run it, and names the service type each dispatch kind resolves against.
//!
//! There is no runtime lookup here beyond what generics already give for
//! free: `send-for-response`, `send-void`, and `create-stream` each become a
//! monomorphized call into [`RequestExecutor`]/[`StreamExecutor`] once `M`
//! (and, for void requests, the blanket [`crate::message::Request`] impl
//! over [`crate::message::Unit`]) is known at the call site. What this
//! module centralizes is the "what service type does `M` resolve
//! against" rule, and keeping the three invoker caches
//! separate — request, void-request, and stream-request — even though, in
//! Rust, a void request and a response-bearing request already share the
//! same executor machinery via the `Request` trait.

use std::any::TypeId;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::exception::ExceptionHierarchy;
use crate::executor::{RequestExecutor, StreamExecutor};
use crate::future::DynStream;
use crate::handler::{NotificationHandler, RequestHandler, StreamRequestHandler};
use crate::locator::Locator;
use crate::message::{Notification, Request, StreamRequest, VoidRequest};

/// The service type a request-with-response dispatch resolves against:
/// "exactly one [`RequestHandler<M>`]".
pub fn request_handler_service_type<M: Request>() -> TypeId {
    TypeId::of::<dyn RequestHandler<M>>()
}

/// The service type a stream dispatch resolves against: "exactly one
/// [`StreamRequestHandler<M>`]".
pub fn stream_handler_service_type<M: StreamRequest>() -> TypeId {
    TypeId::of::<dyn StreamRequestHandler<M>>()
}

/// The service type a notification publish resolves against: "zero or more
/// [`NotificationHandler<N>`]" — there is no invoker cache for publishing,
/// the publisher strategy receives the raw resolved collection.
pub fn notification_handler_service_type<N: Notification>() -> TypeId {
    TypeId::of::<dyn NotificationHandler<N>>()
}

/// Bundles the three invoker caches and the two
/// executors that drive them. Owned by the facade (C9); never constructed
/// per dispatch.
#[derive(Default)]
pub struct DispatchTable {
    request_executor: RequestExecutor,
    void_executor: RequestExecutor,
    stream_executor: StreamExecutor,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `send-for-response`: resolves against
    /// [`request_handler_service_type`] and runs the request executor
    /// (C6) against the dedicated request-kind invoker cache.
    pub async fn send<M: Request>(
        &self,
        locator: &dyn Locator,
        hierarchy: &ExceptionHierarchy,
        message: Arc<M>,
        token: CancellationToken,
    ) -> Result<M::Response, DispatchError> {
        tracing::debug!(message_type = M::type_name(), "routing request dispatch");
        self.request_executor.dispatch(locator, hierarchy, message, token).await
    }

    /// Routes `send-void`: resolves against the same
    /// [`request_handler_service_type`] rule (a void request is a
    /// `Request<Response = Unit>` by blanket impl) but through the
    /// void-request invoker cache, kept distinct from the response-bearing one.
    pub async fn send_void<M: VoidRequest>(
        &self,
        locator: &dyn Locator,
        hierarchy: &ExceptionHierarchy,
        message: Arc<M>,
        token: CancellationToken,
    ) -> Result<crate::message::Unit, DispatchError> {
        tracing::debug!(message_type = M::type_name(), "routing void-request dispatch");
        self.void_executor.dispatch(locator, hierarchy, message, token).await
    }

    /// Routes `create-stream`: resolves against
    /// [`stream_handler_service_type`] and runs the stream executor (C7)
    /// against the dedicated stream-kind invoker cache.
    pub async fn create_stream<M: StreamRequest>(
        &self,
        locator: Arc<dyn Locator>,
        hierarchy: Arc<ExceptionHierarchy>,
        message: Arc<M>,
        request_token: CancellationToken,
        enumeration_token: Option<CancellationToken>,
    ) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        tracing::debug!(message_type = M::type_name(), "routing stream dispatch");
        self.stream_executor
            .dispatch(locator, hierarchy, message, request_token, enumeration_token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Unit;

    struct Ping;
    impl Request for Ping {
        type Response = Unit;
    }

    struct StreamedPing;
    impl StreamRequest for StreamedPing {
        type Item = u32;
    }

    #[derive(Debug)]
    struct Announced;
    impl Notification for Announced {}

    #[test]
    fn service_types_are_distinct_per_kind() {
        assert_ne!(
            request_handler_service_type::<Ping>(),
            stream_handler_service_type::<StreamedPing>()
        );
        assert_ne!(
            request_handler_service_type::<Ping>(),
            notification_handler_service_type::<Announced>()
        );
    }
}
