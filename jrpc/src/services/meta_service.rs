use crate::{Context, Id, Result};

#[crate::service(base_path = "meta")]
pub trait MetaService {
    /// Methods with a request handler on the answering endpoint.
    async fn list_methods(&self, ctx: &Context) -> Result<Vec<String>>;

    /// Whether the answering endpoint still waits for the response to `id`.
    async fn is_request_pending(&self, ctx: &Context, id: Id) -> Result<bool>;
}

impl MetaService for () {
    async fn list_methods(&self, ctx: &Context) -> Result<Vec<String>> {
        Ok(ctx.endpoint.registry().method_names())
    }

    async fn is_request_pending(&self, ctx: &Context, id: Id) -> Result<bool> {
        Ok(ctx.endpoint.is_pending(&id))
    }
}
