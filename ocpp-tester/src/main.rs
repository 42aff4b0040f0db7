use std::sync::Arc;

use rocpp_tester::{
    config::TesterConfig,
    operator::StdinOperator,
    transport::{run_server, ServerContext},
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "tester.json".into());
    let config = match TesterConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let ctx = ServerContext::new(config, Arc::new(StdinOperator));
    if let Err(e) = run_server(ctx).await {
        log::error!("central system stopped: {:#}", e);
        std::process::exit(1);
    }
}
