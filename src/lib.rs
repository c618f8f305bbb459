//! # medius
//!
//! An in-process message-dispatch runtime: one typed `send` for a
//! request-with-response or void request, one `create_stream` for a lazy
//! sequence of responses, one `publish` for fire-and-forget notifications —
//! each routed to handlers resolved from a pluggable [`locator::Locator`],
//! composed through pre-processors, middleware, and post-processors, with a
//! hierarchy-aware exception processor standing in for the mediator
//! pipeline's usual try/catch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medius::{Dispatcher, DispatchError, InMemoryLocator, Request, RequestHandler};
//! use medius::future::BoxFuture;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Ping;
//! impl Request for Ping {
//!     type Response = String;
//! }
//!
//! struct Pong;
//! impl RequestHandler<Ping> for Pong {
//!     fn handle(&self, _message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<String, DispatchError>> {
//!         Box::pin(async { Ok("pong".to_string()) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DispatchError> {
//!     let locator = InMemoryLocator::new();
//!     let handler: Arc<dyn RequestHandler<Ping>> = Arc::new(Pong);
//!     locator.register_handler::<dyn RequestHandler<Ping>>(handler);
//!
//!     let dispatcher = Dispatcher::new(Arc::new(locator));
//!     let response = dispatcher.send(Ping).await?;
//!     println!("{response}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module map
//!
//! - [`message`] — the four message-kind marker traits (C0 data model).
//! - [`handler`] / [`middleware`] — the collaborator roles a handled
//!   message's pipeline is built from.
//! - [`locator`] — the single "resolve all instances of this service type"
//!   contract (C1) plus an in-memory reference implementation.
//! - [`invoker`] — the process-wide, per-message-type cache (C2) that keeps
//!   repeated dispatch from re-deriving its call path.
//! - [`dispatch`] — the flat table (C3) tying a message's static type to the
//!   right invoker cache and executor.
//! - [`pipeline`] — composes pre/post-processors and middleware into one
//!   terminal call (C4).
//! - [`exception`] — the hierarchy-walking recovery processor (C5).
//! - [`executor`] — drives the request (C6) and stream (C7) dispatch paths
//!   end to end, including the stream swap loop.
//! - [`notification`] — fan-out publisher strategies for notifications (C8).
//! - [`facade`] — [`Dispatcher`], the public entry point (C9).
//! - [`error`] — the single [`DispatchError`] enum every fallible operation
//!   returns.
//! - [`future`] — the `BoxFuture`/`DynStream` aliases used at every async
//!   trait boundary.

pub mod dispatch;
pub mod error;
pub mod exception;
pub mod executor;
pub mod facade;
pub mod future;
pub mod handler;
pub mod invoker;
pub mod locator;
pub mod message;
pub mod middleware;
pub mod notification;
pub mod pipeline;

pub use error::DispatchError;
pub use exception::{AnyFailure, ExceptionHierarchy, ExceptionState, Raised, Recovery};
pub use facade::Dispatcher;
pub use handler::{NotificationHandler, PostProcessor, PreProcessor, RequestHandler, StreamRequestHandler};
pub use locator::{resolve_typed, InMemoryLocator, Locator};
pub use message::{Notification, Request, StreamRequest, Unit, VoidRequest};
pub use middleware::{RequestBehavior, StreamBehavior};
pub use notification::{NotificationPublisher, ParallelPublisher, SequentialPublisher};
