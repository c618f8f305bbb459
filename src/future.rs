//! Shared future/stream type aliases used across the dispatch pipeline.

use std::pin::Pin;

use futures::Stream;

/// A boxed, `Send`, `'static` future — the async completion shape every
/// collaborator in this crate returns.
pub type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

/// A boxed, `Send` future borrowing from its caller for `'a` — used where a
/// collaborator only needs to observe a value for the duration of its own
/// call rather than take ownership of it.
pub type RefFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A boxed, `Send`, `'static` lazy sequence of fallible items — the shape
/// produced by a stream-request handler or stream middleware.
pub type DynStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;
