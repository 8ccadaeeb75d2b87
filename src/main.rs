// Tab service entry point

use tabforge_lib::config::AppConfig;

#[tokio::main]
async fn main() {
    tabforge_lib::init_logging();

    let config = AppConfig::from_env();
    if let Err(e) = tabforge_lib::run(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
