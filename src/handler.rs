//! Handler roles: the collaborators the locator resolves on the core's
//! behalf. Every role is a plain trait object — `Send + Sync` because
//! instances are shared across concurrently-dispatched messages, and
//! `'static` because they outlive any single dispatch.
//!
//! Messages are threaded through every role as `Arc<_>` rather than by value
//! or by reference. This keeps the pipeline free of lifetime parameters (a
//! boxed `'static` future can't borrow from its caller's stack) without
//! requiring every message type to implement `Clone` — the facade wraps the
//! caller's owned value once, and the rest of the pipeline shares that
//! allocation.
//!
//! The handler's response is the one exception: it is produced once, owned,
//! and returned owned, with [`PostProcessor`] only ever borrowing it for the
//! span of its own call — sharing it via `Arc` instead would force the
//! pipeline to reclaim sole ownership afterward, which breaks the moment a
//! post-processor legitimately holds on to a clone past its `.await`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::future::{BoxFuture, DynStream, RefFuture};
use crate::message::{Notification, Request, StreamRequest};

/// Produces the response for a request-with-response message (or completes a
/// void request, whose response is [`crate::message::Unit`]). Exactly one
/// handler may be registered per concrete message type.
pub trait RequestHandler<M: Request>: Send + Sync + 'static {
    fn handle(&self, message: Arc<M>, token: CancellationToken) -> BoxFuture<Result<M::Response, DispatchError>>;
}

/// Produces the lazy sequence for a stream-request message. Exactly one
/// handler may be registered per concrete message type.
pub trait StreamRequestHandler<M: StreamRequest>: Send + Sync + 'static {
    fn handle(
        &self,
        message: Arc<M>,
        token: CancellationToken,
    ) -> BoxFuture<Result<DynStream<Result<M::Item, DispatchError>>, DispatchError>>;
}

/// Receives a published notification. Zero or more handlers may be
/// registered per concrete notification type.
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    fn handle(&self, notification: Arc<N>, token: CancellationToken) -> BoxFuture<Result<(), DispatchError>>;
}

/// Observes a message before the handler (or stream handler) runs. Runs
/// unconditionally, even if a later middleware short-circuits — pre-
/// processors precede the entire middleware chain.
///
/// The same trait serves both request and stream pipelines; `M` is the
/// concrete message type in either case, not its response or item type.
pub trait PreProcessor<M: Send + Sync + 'static>: Send + Sync + 'static {
    fn process(&self, message: Arc<M>, token: CancellationToken) -> BoxFuture<Result<(), DispatchError>>;
}

/// Observes a message and its response after the handler succeeds.
/// Request-only — there is no stream equivalent. Runs only when the
/// middleware chain actually reaches the handler; a short-circuiting
/// middleware skips post-processing entirely.
///
/// `response` is borrowed, not shared via `Arc`: the pipeline still owns it
/// and hands it back to the caller once every post-processor has run, so a
/// post-processor that wants to keep data past this call must copy what it
/// needs rather than retain the reference itself.
pub trait PostProcessor<M: Request>: Send + Sync + 'static {
    fn process<'a>(
        &'a self,
        message: Arc<M>,
        response: &'a M::Response,
        token: CancellationToken,
    ) -> RefFuture<'a, Result<(), DispatchError>>;
}
