#[tokio::main]
async fn main() {
    // Load .env if present (development convenience); production uses
    // system environment variables.
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::info!("voicepad {}", env!("CARGO_PKG_VERSION"));

    voicepad::run().await;
}
