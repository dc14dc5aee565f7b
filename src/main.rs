mod config;
mod error;
mod room;
mod server;
mod session;
mod upstream;
mod utils;

use config::Config;

#[actix::main]
async fn main() -> std::io::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };
    config.init_logging();
    log::info!("starting on port {}", config.port);
    server::http::start(config).await
}
