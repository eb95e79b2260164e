//! tokenchain CLI entry point.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tokenchain")]
#[command(about = "A proof-of-authority coin and token ledger", long_about = None)]
struct Cli {
    /// Directory holding config.json, keys/ and the database
    #[arg(short, long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<commands::Commands>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Some(cmd) => {
            if let Err(e) = commands::run(cmd, &cli.data_dir).await {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("tokenchain - A proof-of-authority coin and token ledger");
            println!("Run 'tokenchain --help' for usage information.");
        }
    }
}
