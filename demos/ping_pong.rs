//! Walks through the request pipeline end to end: a pre-processor, a
//! logging middleware behavior, a short-circuiting auth behavior, a
//! post-processor, and exception-hierarchy recovery — the scenarios named
//! in the dispatch runtime's worked examples.
//!
//! Run with `cargo run --example ping_pong`.

use std::fmt;
use std::sync::Arc;

use medius::future::{BoxFuture, RefFuture};
use medius::{
    DispatchError, Dispatcher, InMemoryLocator, PostProcessor, PreProcessor, Request, RequestBehavior, RequestHandler,
};
use tokio_util::sync::CancellationToken;

struct Ping {
    name: String,
}

impl Request for Ping {
    type Response = String;
}

struct Pong;

impl RequestHandler<Ping> for Pong {
    fn handle(&self, message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<String, DispatchError>> {
        Box::pin(async move { Ok(format!("pong: {}", message.name)) })
    }
}

struct LogPreProcessor;

impl PreProcessor<Ping> for LogPreProcessor {
    fn process(&self, message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<(), DispatchError>> {
        Box::pin(async move {
            tracing::info!(name = %message.name, "pre-processing ping");
            Ok(())
        })
    }
}

struct LogPostProcessor;

impl PostProcessor<Ping> for LogPostProcessor {
    fn process<'a>(
        &'a self,
        _message: Arc<Ping>,
        response: &'a String,
        _token: CancellationToken,
    ) -> RefFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            tracing::info!(response = %response, "post-processing complete");
            Ok(())
        })
    }
}

/// Times the call and logs it — the same shape as an HTTP logging
/// middleware, generalized to any request type instead of one HTTP handler.
struct TimingBehavior;

impl RequestBehavior<Ping> for TimingBehavior {
    fn handle(
        &self,
        message: Arc<Ping>,
        next: medius::middleware::Next<Ping>,
        token: CancellationToken,
    ) -> BoxFuture<Result<String, DispatchError>> {
        Box::pin(async move {
            let started = std::time::Instant::now();
            let result = next.run(message, token).await;
            tracing::info!(elapsed = ?started.elapsed(), "timing behavior observed call");
            result
        })
    }
}

/// Short-circuits the chain for any name starting with an underscore,
/// demonstrating that post-processors never see a short-circuited call.
struct AuthBehavior;

impl RequestBehavior<Ping> for AuthBehavior {
    fn handle(
        &self,
        message: Arc<Ping>,
        next: medius::middleware::Next<Ping>,
        token: CancellationToken,
    ) -> BoxFuture<Result<String, DispatchError>> {
        Box::pin(async move {
            if message.name.starts_with('_') {
                return Ok("rejected: names may not start with an underscore".to_string());
            }
            next.run(message, token).await
        })
    }
}

#[derive(Debug)]
struct NotFound(String);

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no such ping target: {}", self.0)
    }
}

impl std::error::Error for NotFound {}

/// A handler that fails for one specific name, to demonstrate recovery.
struct FlakyPong;

impl RequestHandler<Ping> for FlakyPong {
    fn handle(&self, message: Arc<Ping>, _token: CancellationToken) -> BoxFuture<Result<String, DispatchError>> {
        Box::pin(async move {
            if message.name == "missing" {
                return Err(DispatchError::raise(Ping::type_name(), NotFound(message.name.clone())));
            }
            Ok(format!("pong: {}", message.name))
        })
    }
}

struct RecoverNotFound;

impl medius::exception::ExceptionHandler<Ping, String> for RecoverNotFound {
    fn exception_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<NotFound>()
    }

    fn handle(
        &self,
        _message: Arc<Ping>,
        _exception: &medius::Raised,
        state: &mut medius::ExceptionState<String>,
        _token: CancellationToken,
    ) -> BoxFuture<()> {
        state.mark_handled("pong: <unknown target, defaulted>".to_string());
        Box::pin(async {})
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Plain pipeline: pre/post-processors and middleware around a direct handler.
    let locator = InMemoryLocator::new();
    let handler: Arc<dyn RequestHandler<Ping>> = Arc::new(Pong);
    locator.register_handler::<dyn RequestHandler<Ping>>(handler);
    locator.register::<dyn PreProcessor<Ping>, LogPreProcessor>(Arc::new(LogPreProcessor));
    locator.register::<dyn PostProcessor<Ping>, LogPostProcessor>(Arc::new(LogPostProcessor));
    locator.register::<dyn RequestBehavior<Ping>, TimingBehavior>(Arc::new(TimingBehavior));
    locator.register::<dyn RequestBehavior<Ping>, AuthBehavior>(Arc::new(AuthBehavior));

    let dispatcher = Dispatcher::new(Arc::new(locator));

    let response = dispatcher
        .send(Ping {
            name: "world".to_string(),
        })
        .await?;
    println!("{response}");

    let rejected = dispatcher
        .send(Ping {
            name: "_secret".to_string(),
        })
        .await?;
    println!("{rejected}");

    // Separate dispatcher: a flaky handler plus a recovery handler declared
    // against the concrete exception type it can fix.
    let recovering_locator = InMemoryLocator::new();
    let flaky: Arc<dyn RequestHandler<Ping>> = Arc::new(FlakyPong);
    recovering_locator.register_handler::<dyn RequestHandler<Ping>>(flaky);
    recovering_locator.register::<dyn medius::exception::ExceptionHandler<Ping, String>, RecoverNotFound>(Arc::new(
        RecoverNotFound,
    ));
    let recovering_dispatcher = Dispatcher::new(Arc::new(recovering_locator));

    let recovered = recovering_dispatcher
        .send(Ping {
            name: "missing".to_string(),
        })
        .await?;
    println!("{recovered}");

    Ok(())
}
