use jrpc::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tick {
    pub count: u64,
    pub source: String,
}

#[jrpc::service(base_path = "math", timeout_ms = 5000)]
pub trait MathService {
    async fn add(&self, c: &Context, a: i64, b: i64) -> Result<i64>;

    /// Fails with `InvalidParams` on a zero divisor.
    #[jrpc(params = "named")]
    async fn div(&self, c: &Context, dividend: i64, divisor: i64) -> Result<i64>;
}

#[jrpc::service(base_path = "events")]
pub trait EventsService {
    #[jrpc(notification, params = "single")]
    fn tick(&self, c: &Context, tick: &Tick) -> Result<()>;
}
