/* src/main.rs */

use dotenvy::dotenv;
use fancy_log::{LogLevel, log, set_log_level};
use lazy_geodns::config::AppConfig;
use lazy_geodns::dns_server;
use lazy_geodns::geoip::GeoIpClient;
use lazy_geodns::health::HealthTestRunner;
use lazy_geodns::reload::ZoneReloader;
use lazy_geodns::resolver::DnsResolver;
use lazy_geodns::status::status_zone;
use lazy_geodns::zone::ZoneStore;
use lazy_motd::lazy_motd;
use std::env;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- Initialization ---
    dotenv().ok();
    let level = env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let log_level = match level.as_str() {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    };
    set_log_level(log_level);
    lazy_motd!();

    // --- Load Config ---
    let config = match AppConfig::load_from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            log(LogLevel::Error, &format!("Failed to load config: {}", e));
            return Err(e);
        }
    };

    // --- Initialize Services ---
    let geoip_client = Arc::new(GeoIpClient::new());
    geoip_client.start_reconnect_task();

    let runner = Arc::new(HealthTestRunner::new());
    let store = Arc::new(ZoneStore::new());
    store.insert(Arc::new(status_zone()));

    let reloader = Arc::new(ZoneReloader::new(
        config.zones_dir.clone(),
        store.clone(),
        runner.clone(),
        geoip_client.clone(),
        config.zone_defaults(),
    ));
    if let Err(e) = reloader.reload().await {
        log(LogLevel::Warn, &format!("Initial zone load incomplete: {}", e));
    }
    log(
        LogLevel::Info,
        &format!(
            "Serving {} zone(s) from {:?}",
            store.len().saturating_sub(1),
            config.zones_dir
        ),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reload_task = tokio::spawn(reloader.run(config.reload_period(), shutdown_rx));

    let resolver = Arc::new(DnsResolver::new(store, runner.clone(), geoip_client));

    // --- Start DNS Server ---
    log(
        LogLevel::Info,
        &format!("Lazy GeoDNS server starting on {}", config.listen),
    );

    let served = tokio::select! {
        result = dns_server::run_server(&config.listen, resolver) => result,
        _ = tokio::signal::ctrl_c() => {
            log(LogLevel::Info, "Shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = reload_task.await;
    runner.shutdown().await;

    served
}
