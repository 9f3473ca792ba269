use clap::Parser;
use quack_translate::cli;
use tracing::error;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args).await {
        error!("{:#}", err);
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
