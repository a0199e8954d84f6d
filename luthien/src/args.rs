use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// The Luthien LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "luthien", version, about)]
pub(crate) struct Args {
    /// Path to the luthien.toml configuration file.
    #[arg(short, long, env = "LUTHIEN_CONFIG", default_value = "luthien.toml")]
    pub(crate) config: PathBuf,

    /// Listen address, overriding the configuration file.
    #[arg(short, long, env = "LUTHIEN_LISTEN_ADDRESS")]
    pub(crate) listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "gateway=debug".
    #[arg(long, env = "LUTHIEN_LOG", default_value = "info")]
    pub(crate) log_filter: String,
}
