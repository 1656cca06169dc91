use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tile-relay",
    version,
    about = "Relay map tiles from local producers to the tile backend"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Host to accept producer connections on (overrides config file setting)
    #[arg(long)]
    pub listen_host: Option<String>,

    /// Port to accept producer connections on (overrides config file setting)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Backend WebSocket URL (overrides config file setting)
    #[arg(long)]
    pub uplink: Option<String>,

    /// Shared map identifier producers authenticate against (overrides config file setting)
    #[arg(long)]
    pub map_id: Option<String>,

    /// Tile metadata snapshot file (overrides config file setting)
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}
