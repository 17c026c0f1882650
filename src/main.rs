use std::path::PathBuf;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

use poolgate::endpoints::EndpointRegistry;
use poolgate::server::config_routes;
use poolgate::util::{init_tracing, max_body_bytes_from_env, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "poolgate",
    version,
    about = "Round-robin chat gateway and realtime relay for Azure OpenAI deployments"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8088")]
    bind: String,

    /// Endpoint registry (JSON, or YAML by extension).
    #[arg(long, env = "POOLGATE_ENDPOINTS")]
    endpoints: PathBuf,

    /// Worker threads; defaults to the number of physical cores.
    #[arg(long)]
    workers: Option<usize>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let registry = EndpointRegistry::load_from_file(&args.endpoints)?;
    let state = web::Data::new(AppState::from_env(registry).context("invalid gateway setup")?);
    let body_limit = max_body_bytes_from_env();

    tracing::info!(
        bind = %args.bind,
        pools = state.registry.pools().len(),
        realtime = state.realtime.is_some(),
        "starting poolgate"
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(body_limit))
            .configure(config_routes)
    });
    if let Some(workers) = args.workers {
        server = server.workers(workers);
    }

    server
        .bind(&args.bind)
        .with_context(|| format!("failed to bind {}", args.bind))?
        .run()
        .await?;
    Ok(())
}
