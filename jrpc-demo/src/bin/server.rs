use clap::Parser;
use jrpc::{
    Codec, Context, EndpointBuilder, EndpointConfig, Error, ErrorKind, HandlerRegistry, Result,
    services::MetaService, stream,
};
use jrpc_demo::{EventsService, MathService, Tick};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::net::TcpListener;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// Use MessagePack
    #[arg(long, default_value_t = false)]
    pub use_msgpack: bool,
}

#[derive(Default)]
struct DemoImpl {
    ticks: AtomicU64,
}

impl MathService for DemoImpl {
    async fn add(&self, _c: &Context, a: i64, b: i64) -> Result<i64> {
        a.checked_add(b)
            .ok_or_else(|| Error::new(ErrorKind::InvalidParams, "overflow"))
    }

    async fn div(&self, _c: &Context, dividend: i64, divisor: i64) -> Result<i64> {
        dividend
            .checked_div(divisor)
            .ok_or_else(|| Error::new(ErrorKind::InvalidParams, "division by zero"))
    }
}

impl EventsService for DemoImpl {
    fn tick(&self, _c: &Context, tick: &Tick) -> Result<()> {
        let total = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!("tick {} from {} ({total} total)", tick.count, tick.source);
        Ok(())
    }
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let demo = Arc::new(DemoImpl::default());
    let registry = HandlerRegistry::new();
    MathService::jrpc_export(demo.clone(), &registry)?;
    EventsService::jrpc_export(demo.clone(), &registry)?;
    MetaService::jrpc_export(Arc::new(()), &registry)?;

    let config = EndpointConfig {
        codec: if args.use_msgpack {
            Codec::MessagePack
        } else {
            Codec::Json
        },
        ..Default::default()
    };
    let builder = EndpointBuilder::new(config).registry(registry.clone());

    let listener = TcpListener::bind(args.addr)
        .await
        .map_err(|e| Error::resolve(&e))?;
    let addr = listener.local_addr().map_err(|e| Error::resolve(&e))?;
    tracing::info!("Serving {:?} on {addr}...", registry.method_names());

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("accept failed: {e}");
                continue;
            }
        };
        let endpoint = match stream::attach(builder.clone(), socket) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!("attach {peer} failed: {e}");
                continue;
            }
        };
        tracing::info!("accepted {peer}");
        tokio::spawn(async move {
            endpoint.join().await;
            tracing::info!("{peer} disconnected");
        });
    }
}
