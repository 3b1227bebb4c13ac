#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use jrpc::{
    Client, Context, Endpoint, EndpointBuilder, Error, ErrorKind, HandlerRegistry, Result,
    services::MetaService, stream,
};
use tokio::{net::TcpListener, sync::mpsc};

const CLIENT_TIMEOUT: Duration = Duration::from_millis(200);

#[jrpc::service]
trait Foo {
    async fn hello(&self, ctx: &Context, name: &str, wait: Duration) -> Result<String>;
}

struct FooImpl {
    checks: mpsc::UnboundedSender<(Duration, bool)>,
}

impl Foo for FooImpl {
    async fn hello(&self, ctx: &Context, name: &str, wait: Duration) -> Result<String> {
        tokio::time::sleep(wait).await;

        // asks the caller whether it is still waiting for this request.
        let id = ctx
            .id
            .clone()
            .ok_or_else(|| Error::kind(ErrorKind::InvalidRequest))?;
        let in_waiting = Client::default().is_request_pending(ctx, id).await?;
        let _ = self.checks.send((wait, in_waiting));

        Ok(format!("hello {name}!"))
    }
}

async fn serve(
    registry: Arc<HandlerRegistry>,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<Endpoint>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        stream::attach(Endpoint::builder().registry(registry), stream).unwrap()
    });
    (addr, handle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_verify_pending() {
    let _ = tracing_subscriber::fmt().try_init();

    let (checks, mut rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::new();
    Arc::new(FooImpl { checks }).jrpc_export(&registry).unwrap();
    Arc::new(()).jrpc_export(&registry).unwrap();
    let (addr, server) = serve(registry).await;

    // the caller answers meta requests too.
    let client_registry = HandlerRegistry::new();
    Arc::new(()).jrpc_export(&client_registry).unwrap();
    let socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let client_ep = stream::attach(
        EndpointBuilder::default().registry(client_registry),
        socket,
    )
    .unwrap();
    let server = server.await.unwrap();
    let ctx = Context::new(&client_ep);

    let client = Client {
        timeout: Some(CLIENT_TIMEOUT),
    };
    let rsp = client
        .hello(&ctx, "jrpc", Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(rsp, "hello jrpc!");
    assert_eq!(rx.recv().await, Some((Duration::from_millis(10), true)));

    let err = client
        .hello(&ctx, "jrpc", Duration::from_millis(250))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(rx.recv().await, Some((Duration::from_millis(250), false)));

    let methods = client.list_methods(&ctx).await.unwrap();
    for method in ["hello", "meta/is_request_pending", "meta/list_methods"] {
        assert!(methods.iter().any(|m| m == method), "{methods:?}");
    }

    // closing the client side shuts the server side down.
    drop(ctx);
    drop(client_ep);
    tokio::time::timeout(Duration::from_secs(5), server.join())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_peer_close_interrupts() {
    let registry = HandlerRegistry::new();
    let (checks, _rx) = mpsc::unbounded_channel();
    Arc::new(FooImpl { checks }).jrpc_export(&registry).unwrap();
    let (addr, server) = serve(registry).await;

    let socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let client_ep = stream::attach(Endpoint::builder(), socket).unwrap();
    let server = server.await.unwrap();
    let ctx = Context::new(&client_ep);

    let pending = tokio::spawn({
        let ctx = ctx.clone();
        async move {
            Client::default()
                .hello(&ctx, "late", Duration::from_secs(3600))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client_ep.pending().len(), 1);

    server.stop();
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err, Error::interrupted());
    client_ep.join().await;
}
