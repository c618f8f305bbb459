//! Demonstrates `create_stream`: a mid-stream recovery swap (a stream
//! handler that fails partway through, recovered by an exception handler
//! that hands back a replacement tail, so the consumer never observes two
//! iterators or the original failure) and stream middleware composition (a
//! behavior that transforms every item the rest of the chain produces).
//!
//! Run with `cargo run --example stream_recovery`.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use medius::exception::ExceptionHandler;
use medius::future::DynStream;
use medius::{
    DispatchError, Dispatcher, ExceptionState, InMemoryLocator, Raised, StreamBehavior, StreamRequest, StreamRequestHandler,
};
use tokio_util::sync::CancellationToken;

struct Countdown {
    from: u32,
}

impl StreamRequest for Countdown {
    type Item = u32;
}

#[derive(Debug)]
struct PowerFailure;

impl fmt::Display for PowerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "countdown interrupted by a simulated power failure")
    }
}

impl std::error::Error for PowerFailure {}

/// Counts down from `from`, but dies two elements before reaching zero.
struct FlakyCountdown;

impl StreamRequestHandler<Countdown> for FlakyCountdown {
    fn handle(
        &self,
        message: Arc<Countdown>,
        _token: CancellationToken,
    ) -> medius::future::BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
        Box::pin(async move {
            let mut items: Vec<Result<u32, DispatchError>> = Vec::new();
            for n in (0..message.from).rev() {
                if n == 2 {
                    items.push(Err(DispatchError::raise(Countdown::type_name(), PowerFailure)));
                    break;
                }
                items.push(Ok(n));
            }
            Ok(Box::pin(futures::stream::iter(items)) as DynStream<_>)
        })
    }
}

/// Recovers from a power failure by replacing the rest of the countdown
/// with a manual backup sequence.
struct BackupGenerator;

impl ExceptionHandler<Countdown, DynStream<Result<u32, DispatchError>>> for BackupGenerator {
    fn exception_type(&self) -> std::any::TypeId {
        std::any::TypeId::of::<PowerFailure>()
    }

    fn handle(
        &self,
        _message: Arc<Countdown>,
        _exception: &Raised,
        state: &mut ExceptionState<DynStream<Result<u32, DispatchError>>>,
        _token: CancellationToken,
    ) -> medius::future::BoxFuture<()> {
        let backup = futures::stream::iter(vec![Ok(1), Ok(0)]);
        state.mark_handled(Box::pin(backup));
        Box::pin(async {})
    }
}

struct CountUp {
    to: u32,
}

impl StreamRequest for CountUp {
    type Item = u32;
}

struct CountUpHandler;

impl StreamRequestHandler<CountUp> for CountUpHandler {
    fn handle(
        &self,
        message: Arc<CountUp>,
        _token: CancellationToken,
    ) -> medius::future::BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
        Box::pin(async move { Ok(Box::pin(futures::stream::iter((1..=message.to).map(Ok))) as DynStream<_>) })
    }
}

/// Doubles every item the rest of the stream chain produces, demonstrating
/// that stream middleware composes the same way request middleware does.
struct DoublingBehavior;

impl StreamBehavior<CountUp> for DoublingBehavior {
    fn handle(
        &self,
        message: Arc<CountUp>,
        next: medius::middleware::StreamNext<CountUp>,
        token: CancellationToken,
    ) -> medius::future::BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
        Box::pin(async move {
            let stream = next.run(message, token).await?;
            let doubled = stream.map(|item| item.map(|n| n * 2));
            Ok(Box::pin(doubled) as DynStream<_>)
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let locator = InMemoryLocator::new();
    let handler: Arc<dyn StreamRequestHandler<Countdown>> = Arc::new(FlakyCountdown);
    locator.register_handler::<dyn StreamRequestHandler<Countdown>>(handler);
    locator.register::<dyn ExceptionHandler<Countdown, DynStream<Result<u32, DispatchError>>>, BackupGenerator>(
        Arc::new(BackupGenerator),
    );

    let dispatcher = Dispatcher::new(Arc::new(locator));

    let stream = dispatcher.create_stream_simple(Countdown { from: 5 }).await?;

    let items: Vec<u32> = stream.collect::<Vec<_>>().await.into_iter().map(|r| r.unwrap()).collect();

    println!("countdown (with recovered backup tail): {items:?}");
    assert_eq!(items, vec![4, 3, 1, 0]);

    // A second dispatcher: stream middleware transforming every element.
    let doubling_locator = InMemoryLocator::new();
    let count_up: Arc<dyn StreamRequestHandler<CountUp>> = Arc::new(CountUpHandler);
    doubling_locator.register_handler::<dyn StreamRequestHandler<CountUp>>(count_up);
    doubling_locator.register::<dyn StreamBehavior<CountUp>, DoublingBehavior>(Arc::new(DoublingBehavior));
    let doubling_dispatcher = Dispatcher::new(Arc::new(doubling_locator));

    let doubled_stream = doubling_dispatcher.create_stream_simple(CountUp { to: 3 }).await?;
    let doubled: Vec<u32> = doubled_stream.collect::<Vec<_>>().await.into_iter().map(|r| r.unwrap()).collect();

    println!("count-up doubled by stream middleware: {doubled:?}");
    assert_eq!(doubled, vec![2, 4, 6]);

    Ok(())
}
