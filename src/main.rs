use clap::{Parser, Subcommand};
use sonar_exporter::cli;
use anyhow::Result;

#[derive(Parser)]
#[command(name = "sonar-exporter")]
#[command(version = sonar_exporter::VERSION)]
#[command(about = "Prometheus exporter for SonarQube project measures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll SonarQube and serve /metrics and /health
    Serve(cli::serve::ServeArgs),

    /// Run one refresh cycle and print the metrics
    Once(cli::once::OnceArgs),

    /// Configuration management
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => cli::serve::run(args).await,
        Commands::Once(args) => cli::once::run(args).await,
        Commands::Config(args) => cli::config::run(args).await,
    }
}
