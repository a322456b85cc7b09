use eav_store::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    println!("EAV Store: entities, attributes and relations over REST");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{} backend={:?} seed={}",
        config.server.host, config.server.port, config.database.backend, config.seed.enabled
    );
    println!(
        "API documentation available at http://{}/docs/openapi.json",
        config.server_address()
    );

    eav_store::start(config).await
}
