use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use room_presence::config::{Config, TlsConfig};
use room_presence::{api, sweeper, Server, Store};

fn tls_files_present(tls: &TlsConfig) -> bool {
    let mut present = true;
    for path in [&tls.cert_path, &tls.key_path] {
        if !path.is_file() {
            warn!("TLS file {} is missing", path.display());
            present = false;
        }
    }
    present
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("could not load config: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(Store::in_memory());
    let server = Server::new(store);
    let _sweeper = sweeper::spawn_sweeper(server.registry().clone(), config.sweep);

    let routes = api::routes(server);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    match config.tls.as_ref().filter(|tls| tls_files_present(tls)) {
        Some(tls) => {
            info!("Starting secure server (HTTPS) on {}...", addr);
            warp::serve(routes)
                .tls()
                .cert_path(&tls.cert_path)
                .key_path(&tls.key_path)
                .run(addr)
                .await;
        }
        None => {
            if config.tls.is_some() {
                warn!("Failed to load TLS files, falling back to HTTP");
            }
            info!("Server starting on {}...", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}
