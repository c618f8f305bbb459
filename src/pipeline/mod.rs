//! The pipeline composer (C4) — builds the onion of pre-processors →
//! middleware behaviors → handler → post-processors from already-resolved
//! collaborators.
//!
//! [`compose_request`] and [`compose_stream`] are pure assembly: they take
//! whatever the locator returned for this dispatch and wire it into a single
//! callable. Resolution itself (asking the locator for instances) is the
//! request/stream executor's job (C6/C7) — the composer only ever sees
//! already-resolved `Vec`s, so it has no dependency on [`crate::locator`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::future::DynStream;
use crate::handler::{PostProcessor, PreProcessor, RequestHandler, StreamRequestHandler};
use crate::message::{Request, StreamRequest};
use crate::middleware::{Next, RequestBehavior, RequestTerminal, StreamBehavior, StreamNext, StreamTerminal};

/// The composed request pipeline for a single dispatch: pre-processors
/// wrapping a middleware chain wrapping the handler and post-processors.
pub struct RequestPipeline<M: Request> {
    pre_processors: Vec<Arc<dyn PreProcessor<M>>>,
    next: Next<M>,
}

impl<M: Request> RequestPipeline<M> {
    /// Runs pre-processors in order, then the middleware chain (which
    /// terminates in the handler and, on success, the post-processors).
    pub async fn run(self, message: Arc<M>, token: CancellationToken) -> Result<M::Response, DispatchError> {
        for pre in &self.pre_processors {
            pre.process(Arc::clone(&message), token.clone()).await?;
        }
        self.next.run(message, token).await
    }
}

/// Builds a [`RequestPipeline`] from resolved collaborators.
///
/// `post_processors` is folded into the terminal closure — the innermost
/// link the middleware chain wraps — so a middleware that short-circuits
/// (returns without calling `next`) skips post-processing along with the
/// handler itself.
pub fn compose_request<M: Request>(
    pre_processors: Vec<Arc<dyn PreProcessor<M>>>,
    behaviors: Vec<Arc<dyn RequestBehavior<M>>>,
    post_processors: Vec<Arc<dyn PostProcessor<M>>>,
    handler: Arc<dyn RequestHandler<M>>,
) -> RequestPipeline<M> {
    let post_processors = Arc::new(post_processors);
    let terminal: RequestTerminal<M> = Arc::new(move |message, token| {
        let handler = Arc::clone(&handler);
        let post_processors = Arc::clone(&post_processors);
        Box::pin(async move {
            let response = handler.handle(Arc::clone(&message), token.clone()).await?;
            for post in post_processors.iter() {
                post.process(Arc::clone(&message), &response, token.clone()).await?;
            }
            Ok(response)
        })
    });

    RequestPipeline {
        pre_processors,
        next: Next::new(Arc::new(behaviors), terminal),
    }
}

/// The composed stream pipeline for a single dispatch. Identical shape to
/// [`RequestPipeline`] except there are no post-processors and the
/// terminal resolves to a lazy sequence rather than a single value.
pub struct StreamPipeline<M: StreamRequest> {
    pre_processors: Vec<Arc<dyn PreProcessor<M>>>,
    next: StreamNext<M>,
}

impl<M: StreamRequest> StreamPipeline<M> {
    pub async fn run(
        self,
        message: Arc<M>,
        token: CancellationToken,
    ) -> Result<DynStream<Result<M::Item, DispatchError>>, DispatchError> {
        for pre in &self.pre_processors {
            pre.process(Arc::clone(&message), token.clone()).await?;
        }
        self.next.run(message, token).await
    }
}

/// Builds a [`StreamPipeline`] from resolved collaborators.
pub fn compose_stream<M: StreamRequest>(
    pre_processors: Vec<Arc<dyn PreProcessor<M>>>,
    behaviors: Vec<Arc<dyn StreamBehavior<M>>>,
    handler: Arc<dyn StreamRequestHandler<M>>,
) -> StreamPipeline<M> {
    let terminal: StreamTerminal<M> = Arc::new(move |message, token| {
        let handler = Arc::clone(&handler);
        Box::pin(async move { handler.handle(message, token).await })
    });

    StreamPipeline {
        pre_processors,
        next: StreamNext::new(Arc::new(behaviors), terminal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn pipeline_with_no_middleware_or_processors_equals_direct_call() {
        let pipeline = compose_request::<Ping>(vec![], vec![], vec![], Arc::new(Echo));
        let response = pipeline.run(Arc::new(Ping), CancellationToken::new()).await.unwrap();
        assert_eq!(response, "PONG: hello");
    }

    struct RecordingPost(Arc<std::sync::Mutex<Vec<String>>>);
    impl PostProcessor<Ping> for RecordingPost {
        fn process<'a>(
            &'a self,
            _message: Arc<Ping>,
            response: &'a String,
            _token: CancellationToken,
        ) -> crate::future::RefFuture<'a, Result<(), DispatchError>> {
            let log = Arc::clone(&self.0);
            Box::pin(async move {
                log.lock().unwrap().push(response.clone());
                Ok(())
            })
        }
    }

    struct ShortCircuitBehavior;
    impl RequestBehavior<Ping> for ShortCircuitBehavior {
        fn handle(
            &self,
            _message: Arc<Ping>,
            _next: Next<Ping>,
            _token: CancellationToken,
        ) -> crate::future::BoxFuture<Result<String, DispatchError>> {
            Box::pin(async { Ok("short".to_string()) })
        }
    }

    #[tokio::test]
    async fn short_circuit_middleware_skips_post_processors() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = compose_request::<Ping>(
            vec![],
            vec![Arc::new(ShortCircuitBehavior)],
            vec![Arc::new(RecordingPost(Arc::clone(&log)))],
            Arc::new(Echo),
        );

        let response = pipeline.run(Arc::new(Ping), CancellationToken::new()).await.unwrap();

        assert_eq!(response, "short");
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_processors_observe_the_response() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = compose_request::<Ping>(
            vec![],
            vec![],
            vec![Arc::new(RecordingPost(Arc::clone(&log)))],
            Arc::new(Echo),
        );

        pipeline.run(Arc::new(Ping), CancellationToken::new()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["PONG: hello".to_string()]);
    }

    struct RetainingPost(Arc<std::sync::Mutex<Vec<String>>>);
    impl PostProcessor<Ping> for RetainingPost {
        fn process<'a>(
            &'a self,
            _message: Arc<Ping>,
            response: &'a String,
            _token: CancellationToken,
        ) -> crate::future::RefFuture<'a, Result<(), DispatchError>> {
            let log = Arc::clone(&self.0);
            let copy = response.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(copy);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn response_is_returned_even_when_a_post_processor_holds_a_copy_across_an_await() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = compose_request::<Ping>(
            vec![],
            vec![],
            vec![Arc::new(RetainingPost(Arc::clone(&log)))],
            Arc::new(Echo),
        );

        let response = pipeline.run(Arc::new(Ping), CancellationToken::new()).await.unwrap();

        assert_eq!(response, "PONG: hello");
        assert_eq!(*log.lock().unwrap(), vec!["PONG: hello".to_string()]);
    }

    struct CountUp;
    impl StreamRequest for CountUp {
        type Item = u32;
    }

    struct CountUpHandler;
    impl StreamRequestHandler<CountUp> for CountUpHandler {
        fn handle(
            &self,
            _message: Arc<CountUp>,
            _token: CancellationToken,
        ) -> crate::future::BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
            Box::pin(async { Ok(Box::pin(futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)])) as DynStream<_>) })
        }
    }

    struct DoublingBehavior;
    impl StreamBehavior<CountUp> for DoublingBehavior {
        fn handle(
            &self,
            message: Arc<CountUp>,
            next: StreamNext<CountUp>,
            token: CancellationToken,
        ) -> crate::future::BoxFuture<Result<DynStream<Result<u32, DispatchError>>, DispatchError>> {
            Box::pin(async move {
                let stream = next.run(message, token).await?;
                let doubled = futures::StreamExt::map(stream, |item| item.map(|n| n * 2));
                Ok(Box::pin(doubled) as DynStream<_>)
            })
        }
    }

    #[tokio::test]
    async fn stream_behavior_transforms_every_item() {
        let pipeline = compose_stream::<CountUp>(vec![], vec![Arc::new(DoublingBehavior)], Arc::new(CountUpHandler));

        let stream = pipeline.run(Arc::new(CountUp), CancellationToken::new()).await.unwrap();
        let items: Vec<u32> = futures::StreamExt::collect::<Vec<_>>(stream)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(items, vec![2, 4, 6]);
    }
}
