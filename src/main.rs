use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = livemock::cli::Cli::parse();
    if let Err(e) = livemock::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
