use clap::Parser;
use jrpc::{Client, Codec, Context, EndpointBuilder, EndpointConfig, services::MetaService, stream};
use jrpc_demo::{EventsService, MathService, Tick};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// First operand.
    #[arg(short, default_value = "2")]
    pub a: i64,

    /// Second operand.
    #[arg(short, default_value = "3")]
    pub b: i64,

    /// Use MessagePack
    #[arg(long, default_value_t = false)]
    pub use_msgpack: bool,

    /// List the methods served by the peer.
    #[arg(long, default_value_t = false)]
    pub list_methods: bool,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

#[derive(Default)]
struct State {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test(args: Args, ctx: Context) {
    let state = Arc::new(State::default());
    let start_time = std::time::Instant::now();
    let mut tasks = vec![];
    for _ in 0..args.coroutines {
        let state = state.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let client = Client {
                timeout: Some(Duration::from_secs(5)),
            };
            while start_time.elapsed().as_secs() < args.secs {
                for _ in 0..256 {
                    let result = client.add(&ctx, args.a, args.b).await;
                    state.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        state.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!("stress task failed: {e}");
                }
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = state.total.swap(0, Ordering::AcqRel);
                let fails = state.fails.swap(0, Ordering::AcqRel);
                tracing::info!("QPS: {total}/s, fails: {fails}/s");
            }
        } => {
        }
    }
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> jrpc::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let config = EndpointConfig {
        codec: if args.use_msgpack {
            Codec::MessagePack
        } else {
            Codec::Json
        },
        ..Default::default()
    };
    let socket = tokio::net::TcpStream::connect(args.addr)
        .await
        .map_err(|e| jrpc::Error::resolve(&e))?;
    let endpoint = stream::attach(EndpointBuilder::new(config), socket)?;
    let ctx = Context::new(&endpoint);

    if args.stress {
        stress_test(args, ctx).await;
        return Ok(());
    }

    let client = Client::default();
    let rsp = client.add(&ctx, args.a, args.b).await;
    tracing::info!("add rsp: {:?}", rsp);

    let rsp = client.div(&ctx, args.a, args.b).await;
    tracing::info!("div rsp: {:?}", rsp);

    let tick = Tick {
        count: 1,
        source: "jrpc-demo".into(),
    };
    client.tick(&ctx, &tick)?;

    if args.list_methods {
        let methods = client.list_methods(&ctx).await?;
        tracing::info!("methods: {methods:?}");
    }

    // let the notification leave before the connection drops.
    tokio::time::sleep(Duration::from_millis(100)).await;
    endpoint.stop();
    endpoint.join().await;
    Ok(())
}
