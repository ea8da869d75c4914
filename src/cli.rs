//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// potato - GitOps reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "potato")]
#[command(version)]
#[command(about = "Keep cluster resources in line with manifests in a git repository")]
#[command(
    long_about = "potato mirrors the repository of each Application, decodes the manifests under its manifest directory and converges every declared resource, owned by the Application, into the target namespace."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides applied on top of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Namespace managed resources are created in
    #[arg(long, global = true)]
    pub target_namespace: Option<String>,

    /// Directory mirrors are cloned under
    #[arg(long, global = true)]
    pub mirror_root: Option<PathBuf>,

    /// Seconds between passes after a successful one
    #[arg(long, global = true)]
    pub requeue_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single reconciliation pass and print the result
    Reconcile {
        /// Application name
        #[arg(long)]
        name: String,

        /// Application namespace
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Repository URL or local path
        #[arg(long)]
        repository: String,

        /// Branch to follow
        #[arg(long = "ref", default_value = "main")]
        reference: String,
    },

    /// Run the controller over Applications loaded from a file until Ctrl-C
    Run {
        /// YAML file holding a list of Application records
        #[arg(long)]
        apps: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects
    )]

    use super::*;

    #[test]
    fn reconcile_takes_defaults_for_namespace_and_ref() {
        let cli = Cli::try_parse_from([
            "potato",
            "reconcile",
            "--name",
            "demo",
            "--repository",
            "https://example.com/demo.git",
        ])
        .unwrap();

        match cli.command {
            Commands::Reconcile {
                name,
                namespace,
                reference,
                ..
            } => {
                assert_eq!(name, "demo");
                assert_eq!(namespace, "default");
                assert_eq!(reference, "main");
            }
            Commands::Run { .. } => panic!("expected reconcile"),
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "potato",
            "run",
            "--apps",
            "apps.yaml",
            "--target-namespace",
            "prod",
            "--requeue-secs",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.global.target_namespace.as_deref(), Some("prod"));
        assert_eq!(cli.global.requeue_secs, Some(30));
        assert!(cli.global.config.is_none());
    }

    #[test]
    fn reconcile_requires_repository() {
        assert!(Cli::try_parse_from(["potato", "reconcile", "--name", "demo"]).is_err());
    }
}
