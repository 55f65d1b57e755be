use super::serve::SourceArgs;
use crate::config::parser::render_config;
use crate::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the effective configuration (file plus overrides)
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Write a configuration file with every default filled in
    Init {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Check { source } => {
            let cfg = source.load()?;
            let warnings = cfg.validate()?;

            if warnings.is_empty() {
                println!(" Configuration is valid!");
            } else {
                println!("Configuration loaded with warnings:\n");
                for warning in warnings {
                    println!("{}", warning);
                }
            }

            Ok(())
        }

        ConfigCommand::Init { output } => {
            let rendered = render_config(&Config::default())?;

            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
                    println!(" Wrote default configuration to {}", path.display());
                    println!("Set the token via SONAR_TOKEN or [sonar].token before starting.");
                }
                None => print!("{}", rendered),
            }

            Ok(())
        }
    }
}
