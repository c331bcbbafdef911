use anyhow::Context;

use saledesk_api::server::{self, ServerConfig};
use saledesk_infra::StoreConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    saledesk_observability::init();

    let store_config = StoreConfig::from_env().context("invalid store configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    let services = saledesk_api::app::services::build_services(&store_config)
        .await
        .context("failed to initialise invoice store")?;
    let app = saledesk_api::app::build_app(services);

    server::serve(server_config, app)
        .await
        .with_context(|| format!("server on {} failed", server_config.addr))
}
