#![forbid(unsafe_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use jrpc::{
    Client, Codec, Context, Endpoint, EndpointBuilder, EndpointConfig, ErrorKind,
    HandlerRegistry, ResponseFuture, Result, channel,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

#[jrpc::service(base_path = "math")]
trait Math {
    async fn add(&self, ctx: &Context, a: i64, b: i64) -> Result<i64>;

    #[jrpc(params = "named")]
    async fn scale(&self, ctx: &Context, value: f64, factor: f64) -> Result<f64>;

    #[jrpc(params = "single")]
    async fn sum(&self, ctx: &Context, values: &[i64]) -> Result<i64>;

    #[jrpc(timeout_ms = 50)]
    async fn sleep(&self, ctx: &Context, ms: u64) -> Result<u64>;

    fn delayed(&self, ctx: &Context, ms: u64, value: i64) -> ResponseFuture<i64>;

    async fn explode(&self, ctx: &Context) -> Result<()>;
}

struct MathImpl;

impl Math for MathImpl {
    async fn add(&self, _: &Context, a: i64, b: i64) -> Result<i64> {
        Ok(a + b)
    }

    async fn scale(&self, _: &Context, value: f64, factor: f64) -> Result<f64> {
        Ok(value * factor)
    }

    async fn sum(&self, _: &Context, values: &[i64]) -> Result<i64> {
        Ok(values.iter().sum())
    }

    async fn sleep(&self, _: &Context, ms: u64) -> Result<u64> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }

    fn delayed(&self, _: &Context, ms: u64, value: i64) -> ResponseFuture<i64> {
        ResponseFuture::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    async fn explode(&self, _: &Context) -> Result<()> {
        panic!("boom")
    }
}

/// Same wire method as `math/add`, with parameter types the handler rejects.
#[jrpc::service]
trait MathMismatch {
    #[jrpc(name = "math/add")]
    async fn add_text(&self, ctx: &Context, a: String, b: String) -> Result<i64>;
}

#[jrpc::service(base_path = "nowhere")]
trait Unexported {
    async fn missing(&self, ctx: &Context) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct Tick {
    count: u64,
}

#[jrpc::service(base_path = "events")]
trait Events {
    #[jrpc(notification, params = "named")]
    fn tick(&self, ctx: &Context, count: u64) -> Result<()>;
}

struct EventsImpl {
    tag: &'static str,
    seen: mpsc::UnboundedSender<(&'static str, u64)>,
}

impl Events for EventsImpl {
    fn tick(&self, _: &Context, count: u64) -> Result<()> {
        let _ = self.seen.send((self.tag, count));
        Ok(())
    }
}

fn math_pair(config: EndpointConfig) -> (Endpoint, Endpoint) {
    let registry = HandlerRegistry::new();
    Arc::new(MathImpl).jrpc_export(&registry).unwrap();
    channel::connect(
        EndpointBuilder::new(config.clone()),
        EndpointBuilder::new(config).registry(registry),
    )
    .unwrap()
}

#[tokio::test]
async fn test_math_add() {
    let _ = tracing_subscriber::fmt().try_init();

    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);
    let client = Client::default();

    assert_eq!(client.add(&ctx, 2, 3).await, Ok(5));
    assert_eq!(client.scale(&ctx, 1.5, 2.0).await, Ok(3.0));
    assert_eq!(client.sum(&ctx, &[1, 2, 3]).await, Ok(6));

    let sum: i64 = client_ep
        .request("math/add", Some(json!([2, 3])), None)
        .await
        .unwrap();
    assert_eq!(sum, 5);

    let scaled: f64 = client_ep
        .request("math/scale", Some(json!({"factor": 3.0, "value": 2.0})), None)
        .await
        .unwrap();
    assert_eq!(scaled, 6.0);

    assert!(client_ep.pending().is_empty());
}

#[tokio::test]
async fn test_message_pack() {
    let config = EndpointConfig {
        codec: Codec::MessagePack,
        ..Default::default()
    };
    let (client_ep, _server) = math_pair(config);
    let ctx = Context::new(&client_ep);
    assert_eq!(Client::default().add(&ctx, 20, 22).await, Ok(42));
}

#[tokio::test]
async fn test_method_timeout() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);
    // the method timeout wins over the client fallback.
    let client = Client {
        timeout: Some(Duration::from_secs(5)),
    };

    let start = Instant::now();
    let err = client.sleep(&ctx, 500).await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    assert!(client_ep.pending().is_empty());

    // the late response finds no pending request.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client_ep.stats().unmatched_responses(), 1);
}

#[tokio::test]
async fn test_client_fallback_timeout() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);

    let client = Client {
        timeout: Some(Duration::from_millis(20)),
    };
    let err = client.delayed(&ctx, 200, 1).await.unwrap_err();
    assert!(err.is_timeout());

    let client = Client::default();
    assert_eq!(client.delayed(&ctx, 30, 1).await, Ok(1));
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);
    let client = Client::default();

    let slow = client.delayed(&ctx, 150, 1);
    let fast = client.delayed(&ctx, 10, 2);
    assert_ne!(slow.id(), fast.id());
    assert_eq!(client_ep.pending().len(), 2);

    assert_eq!(fast.await, Ok(2));
    assert_eq!(client_ep.pending().len(), 1);
    assert_eq!(slow.await, Ok(1));
    assert!(client_ep.pending().is_empty());
}

#[tokio::test]
async fn test_method_not_found() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);

    let err = Client::default().missing(&ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::MethodNotFound);
    assert_eq!(err.code(), -32601);
}

#[tokio::test]
async fn test_invalid_params() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);

    let err = Client::default()
        .add_text(&ctx, "two".into(), "three".into())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);

    let err = client_ep
        .request::<i64>("math/add", Some(json!({"a": 1, "b": 2})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidParams);
}

#[tokio::test]
async fn test_handler_panic() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);

    let err = Client::default().explode(&ctx).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert_eq!(err.msg, "boom");

    // the server keeps serving.
    assert_eq!(Client::default().add(&ctx, 1, 1).await, Ok(2));
}

#[tokio::test]
async fn test_duplicate_registration() {
    let registry = HandlerRegistry::new();
    Arc::new(MathImpl).jrpc_export(&registry).unwrap();
    let err = Arc::new(MathImpl).jrpc_export(&registry).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateHandler);

    // notification handlers stack instead.
    let (seen, _rx) = mpsc::unbounded_channel();
    for tag in ["a", "b"] {
        let events = EventsImpl {
            tag,
            seen: seen.clone(),
        };
        Arc::new(events).jrpc_export(&registry).unwrap();
    }
    assert_eq!(registry.notification_handlers("events/tick").len(), 2);
}

#[tokio::test]
async fn test_notification_handlers() {
    let registry = HandlerRegistry::new();
    let (seen, mut rx) = mpsc::unbounded_channel();
    Arc::new(EventsImpl {
        tag: "first",
        seen: seen.clone(),
    })
    .jrpc_export(&registry)
    .unwrap();
    registry.add_notification_fn("events/tick", move |_ctx, tick: Tick| {
        let seen = seen.clone();
        async move { seen.send(("second", tick.count)).map_err(|e| e.to_string()) }
    });

    let (client_ep, server) =
        channel::connect(Endpoint::builder(), Endpoint::builder().registry(registry)).unwrap();
    let ctx = Context::new(&client_ep);
    Client::default().tick(&ctx, 1).unwrap();

    let mut observed = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    observed.sort_unstable();
    assert_eq!(observed, vec![("first", 1), ("second", 1)]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    client_ep.notify("events/unknown", None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.stats().unhandled_notifications(), 1);
    assert_eq!(server.stats().failed_notifications(), 0);
}

#[tokio::test]
async fn test_failing_notification_handler() {
    let registry = HandlerRegistry::new();
    let (seen, mut rx) = mpsc::unbounded_channel();
    registry.add_notification_fn("events/tick", |_ctx, _tick: Tick| async {
        Err::<(), _>("rejected")
    });
    registry.add_notification_fn("events/tick", move |_ctx, tick: Tick| {
        let seen = seen.clone();
        async move { seen.send(tick.count).map_err(|e| e.to_string()) }
    });

    let (client_ep, server) =
        channel::connect(Endpoint::builder(), Endpoint::builder().registry(registry)).unwrap();
    client_ep
        .notify("events/tick", Some(json!({"count": 7})))
        .unwrap();

    // the failing handler does not keep the other from running.
    assert_eq!(rx.recv().await, Some(7));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.stats().failed_notifications(), 1);
}

#[tokio::test]
async fn test_request_also_notifies() {
    let registry = HandlerRegistry::new();
    Arc::new(MathImpl).jrpc_export(&registry).unwrap();
    let (seen, mut rx) = mpsc::unbounded_channel();
    registry.add_notification_fn("math/add", move |ctx: Context, args: (i64, i64)| {
        let seen = seen.clone();
        async move {
            assert!(ctx.is_notification());
            seen.send(args).map_err(|e| e.to_string())
        }
    });

    let (client_ep, server) =
        channel::connect(Endpoint::builder(), Endpoint::builder().registry(registry)).unwrap();
    let ctx = Context::new(&client_ep);
    assert_eq!(Client::default().add(&ctx, 2, 3).await, Ok(5));
    assert_eq!(rx.recv().await, Some((2, 3)));

    // a request without a notification handler is not counted as dropped.
    assert_eq!(Client::default().scale(&ctx, 1.0, 1.0).await, Ok(1.0));
    assert_eq!(server.stats().unhandled_notifications(), 0);
}

#[tokio::test]
async fn test_stop_interrupts_pending() {
    let (client_ep, _server) = math_pair(EndpointConfig::default());
    let ctx = Context::new(&client_ep);
    let pending = Client::default().delayed(&ctx, 3600 * 1000, 1);

    client_ep.stop();
    assert_eq!(pending.await.unwrap_err(), jrpc::Error::interrupted());
    client_ep.join().await;

    let err = Client::default().add(&ctx, 1, 2).await.unwrap_err();
    assert_eq!(err, jrpc::Error::interrupted());
}
