mod cache;
mod config;
mod controller;
mod error;
mod processor;
mod response;
mod routes;
mod storage;
mod variant;

#[cfg(test)]
mod tests;

#[macro_use]
extern crate tracing;

#[macro_use]
extern crate serde_json;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::Server;
use tracing::level_filters::LevelFilter;

use crate::config::RuntimeConfig;
use crate::controller::CdnService;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub struct ServerConfig {
    #[clap(long, default_value = "127.0.0.1", env)]
    /// The binding host address of the server.
    host: String,

    #[clap(short, long, default_value_t = 8000, env)]
    /// The binding port of the server.
    port: u16,

    #[clap(long, default_value = "info", env)]
    /// The log level filter, ignored when `RUST_LOG` is set.
    log_level: LevelFilter,

    #[clap(long, env)]
    /// The path to the YAML runtime config file.
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: ServerConfig = ServerConfig::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", format!("{},poem=info", args.log_level));
    }
    tracing_subscriber::fmt::init();

    let config = Arc::new(RuntimeConfig::from_file(&args.config_file)?);
    let service = CdnService::from_config(config).await?;
    let app = routes::build_app(Arc::new(service));

    let bind = format!("{}:{}", args.host, args.port);
    info!("Serving images on http://{}/v1/images", bind);

    Server::new(TcpListener::bind(bind)).run(app).await?;

    Ok(())
}
