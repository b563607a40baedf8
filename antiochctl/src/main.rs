use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = antiochctl::Cli::parse();
    antiochctl::init_tracing(cli.verbose);
    if let Err(err) = antiochctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
