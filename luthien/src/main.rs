use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::init_logger(&args.log_filter);

    let config = Config::load(&args.config)?;

    let listen_address = args
        .listen_address
        .unwrap_or_else(|| config.server.listen_address_or_default());

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {error}");
                return;
            }
            shutdown_signal.cancel();
        });
    }

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
        store: None,
        registry: None,
    })
    .await
}
