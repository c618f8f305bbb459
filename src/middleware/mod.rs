//! Middleware behaviors — composable before/after logic wrapped around the
//! terminal handler.
//!
//! [`Next`] (request path) and [`StreamNext`] (stream path) are cursors into
//! the remaining behavior chain for a single dispatch; calling
//! [`Next::run`]/[`StreamNext::run`] advances the cursor by one and invokes
//! the next behavior, or the terminal closure once the chain is exhausted.
//! A behavior is free to not call `next` at all — the value it returns
//! directly becomes the pipeline's result, and everything downstream
//! (remaining behaviors, the handler, post-processors) never runs —
//! short-circuit semantics.
//!
//! The closed-over terminal/next capability is ownership-neutral: a
//! behavior neither owns the next stage nor its lifetime, it just holds a
//! cheaply-cloneable callable.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::future::{BoxFuture, DynStream};
use crate::message::{Request, StreamRequest};

/// The terminal closure a [`Next`] falls back to once every behavior has
/// been consumed — produced by the pipeline composer (C4) by wrapping the
/// resolved handler and post-processors together.
pub type RequestTerminal<M> =
    Arc<dyn Fn(Arc<M>, CancellationToken) -> BoxFuture<Result<<M as Request>::Response, DispatchError>> + Send + Sync>;

/// The terminal closure a [`StreamNext`] falls back to — the resolved stream
/// handler, with no post-processor equivalent on the stream path.
pub type StreamTerminal<M> = Arc<
    dyn Fn(
            Arc<M>,
            CancellationToken,
        ) -> BoxFuture<Result<DynStream<Result<<M as StreamRequest>::Item, DispatchError>>, DispatchError>>
        + Send
        + Sync,
>;

/// A single middleware behavior wrapping the request pipeline. May inspect
/// or transform the message, call `next` to continue, or return without
/// calling it to short-circuit the remainder of the chain.
pub trait RequestBehavior<M: Request>: Send + Sync + 'static {
    fn handle(
        &self,
        message: Arc<M>,
        next: Next<M>,
        token: CancellationToken,
    ) -> BoxFuture<Result<M::Response, DispatchError>>;
}

/// A single middleware behavior wrapping the stream pipeline. Operates over
/// a callable that produces a lazy sequence rather than a single completed
/// value.
pub trait StreamBehavior<M: StreamRequest>: Send + Sync + 'static {
    fn handle(
        &self,
        message: Arc<M>,
        next: StreamNext<M>,
        token: CancellationToken,
    ) -> BoxFuture<Result<DynStream<Result<M::Item, DispatchError>>, DispatchError>>;
}

/// Cursor into the remaining request-behavior chain for a single dispatch.
///
/// Behaviors nest in enumeration order — the first registered is outermost.
/// `Next` is consumed by [`Next::run`], so it cannot be
/// invoked more than once per behavior.
pub struct Next<M: Request> {
    behaviors: Arc<Vec<Arc<dyn RequestBehavior<M>>>>,
    index: usize,
    terminal: RequestTerminal<M>,
}

impl<M: Request> Next<M> {
    pub(crate) fn new(behaviors: Arc<Vec<Arc<dyn RequestBehavior<M>>>>, terminal: RequestTerminal<M>) -> Self {
        Self {
            behaviors,
            index: 0,
            terminal,
        }
    }

    /// Advances to the next behavior (or the terminal handler+post-processor
    /// closure once the chain is exhausted) and awaits it.
    pub async fn run(mut self, message: Arc<M>, token: CancellationToken) -> Result<M::Response, DispatchError> {
        if self.index < self.behaviors.len() {
            let behavior = Arc::clone(&self.behaviors[self.index]);
            self.index += 1;
            behavior.handle(message, self, token).await
        } else {
            (self.terminal)(message, token).await
        }
    }
}

/// Cursor into the remaining stream-behavior chain for a single dispatch.
/// Structurally identical to [`Next`], but resolves to a lazy sequence
/// rather than a single value.
pub struct StreamNext<M: StreamRequest> {
    behaviors: Arc<Vec<Arc<dyn StreamBehavior<M>>>>,
    index: usize,
    terminal: StreamTerminal<M>,
}

impl<M: StreamRequest> StreamNext<M> {
    pub(crate) fn new(behaviors: Arc<Vec<Arc<dyn StreamBehavior<M>>>>, terminal: StreamTerminal<M>) -> Self {
        Self {
            behaviors,
            index: 0,
            terminal,
        }
    }

    pub async fn run(
        mut self,
        message: Arc<M>,
        token: CancellationToken,
    ) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        if self.index < self.behaviors.len() {
            let behavior = Arc::clone(&self.behaviors[self.index]);
            self.index += 1;
            behavior.handle(message, self, token).await
        } else {
            (self.terminal)(message, token).await
        }
    }
}
