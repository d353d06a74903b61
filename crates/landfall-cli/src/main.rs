//! landfall: provision a cloud environment phase by phase and certify it.
//!
//! # Usage
//!
//! ```text
//! landfall init --domain demo.example.com
//! landfall deploy demo http://demo-alb.example.com
//! landfall status demo
//! landfall reset demo
//! ```
//!
//! `deploy` exits 0 only when every endpoint was tested and the database
//! was reached; on failure it prints the last recorded state so the run can
//! be resumed or discarded.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use landfall_state::Phase;

mod commands;

#[derive(Parser)]
#[command(
    name = "landfall",
    about = "Landfall: resumable environment provisioning and validation",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to landfall.toml.
    #[arg(short, long, global = true, default_value = "landfall.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision and validate a deployment, resuming where the last run stopped.
    Deploy {
        /// Deployment name; prefixes every resource.
        name: String,
        /// Address the health probes are sent to, e.g. http://my-alb.example.com
        target: String,
        /// Discard any recorded progress and start from the first phase.
        #[arg(long)]
        reset: bool,
        /// Stop after this phase, e.g. CLUSTER_CONFIGURED.
        #[arg(long, value_parser = parse_phase)]
        until: Option<Phase>,
    },
    /// Print the recorded state of a deployment.
    Status {
        name: String,
        /// Print the raw JSON record.
        #[arg(long)]
        json: bool,
    },
    /// Discard the recorded state of a deployment. Cloud resources are kept.
    Reset { name: String },
    /// Write a landfall.toml scaffold.
    Init {
        /// Domain to request a certificate for.
        #[arg(long)]
        domain: Option<String>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// A runnable phase to stop after. COMPLETE is reached by a full run only.
fn parse_phase(s: &str) -> Result<Phase, String> {
    let phase: Phase = s.to_uppercase().replace('-', "_").parse()?;
    if !Phase::RUNNABLE.contains(&phase) {
        return Err(format!("{phase} is not a phase a run can stop after"));
    }
    Ok(phase)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Deploy {
            name,
            target,
            reset,
            until,
        } => commands::deploy::deploy(&cli.config, &name, &target, reset, until).await,
        Command::Status { name, json } => commands::status::status(&cli.config, &name, json),
        Command::Reset { name } => commands::status::reset(&cli.config, &name),
        Command::Init { domain, force } => commands::init::init(&cli.config, domain.as_deref(), force),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,landfall=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_takes_name_and_target() {
        let cli = Cli::try_parse_from(["landfall", "deploy", "demo", "http://alb.example.com"]).unwrap();
        match cli.command {
            Command::Deploy { name, target, reset, until } => {
                assert_eq!(name, "demo");
                assert_eq!(target, "http://alb.example.com");
                assert!(!reset);
                assert_eq!(until, None);
            }
            _ => panic!("expected deploy"),
        }
        assert_eq!(cli.config, PathBuf::from("landfall.toml"));
    }

    #[test]
    fn until_accepts_phase_names() {
        let cli = Cli::try_parse_from([
            "landfall",
            "--config",
            "env/prod.toml",
            "deploy",
            "demo",
            "alb:8080",
            "--until",
            "cluster-configured",
        ])
        .unwrap();
        match cli.command {
            Command::Deploy { until, .. } => assert_eq!(until, Some(Phase::ClusterConfigured)),
            _ => panic!("expected deploy"),
        }
        assert_eq!(cli.config, PathBuf::from("env/prod.toml"));
    }

    #[test]
    fn until_rejects_the_terminal_phase() {
        for value in ["COMPLETE", "complete"] {
            assert!(
                Cli::try_parse_from(["landfall", "deploy", "demo", "alb", "--until", value]).is_err(),
                "{value} accepted"
            );
        }
        assert_eq!(parse_phase("validated"), Ok(Phase::Validated));
    }

    #[test]
    fn deploy_requires_a_target() {
        assert!(Cli::try_parse_from(["landfall", "deploy", "demo"]).is_err());
    }
}
