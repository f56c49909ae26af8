// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use treegraft::{BuildPaths, Orchestrator, Toolchain};

#[derive(Parser)]
#[command(name = "treegraft")]
#[command(author, version, about = "Graft externally built artifacts into a build output tree", long_about = None)]
struct Cli {
    /// Supplied artifact tree (one subdirectory per partition)
    #[arg(short, long)]
    source_path: PathBuf,

    /// The build's target output tree to graft into
    #[arg(short, long)]
    target_out: PathBuf,

    /// Root of the wrapped build checkout
    #[arg(short, long)]
    build_root: PathBuf,

    /// Product output directory (defaults to the target-out tree)
    #[arg(long)]
    product_out: Option<PathBuf>,

    /// Pre-graft rule document (what an earlier phase already placed)
    #[arg(long, default_value = "configs/pre_rules.json")]
    pre_rules: PathBuf,

    /// Post-graft rule document (the keyword/override catalogue)
    #[arg(long, default_value = "configs/post_rules.json")]
    post_rules: PathBuf,

    /// JSON array file receiving one stats record per run
    #[arg(long)]
    stats_path: Option<PathBuf>,

    /// Remove per-artifact locks and markers after each partition
    #[arg(long)]
    cleanup_markers: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (pre, rules) = treegraft::load_rules(&cli.pre_rules, &cli.post_rules)
        .context("loading rule documents")?;

    let paths = BuildPaths {
        build_root: cli.build_root.clone(),
        target_out: cli.target_out.clone(),
        product_out: cli.product_out.unwrap_or_else(|| cli.target_out.clone()),
    };
    let tools = Toolchain::new(&paths.build_root);

    info!(
        "grafting {} into {}",
        cli.source_path.display(),
        paths.target_out.display()
    );

    let mut orchestrator =
        Orchestrator::new(&rules, &pre, &paths, &tools, &cli.source_path)
            .with_cleanup(cli.cleanup_markers);
    if let Some(stats_path) = &cli.stats_path {
        orchestrator = orchestrator.with_stats_path(stats_path);
    }

    let report = orchestrator.run().context("grafting run failed")?;

    println!(
        "grafted {} file(s) directly, {} via object cache; {} skipped, {} error(s)",
        report.direct_count(),
        report.indirect_count(),
        report.skipped_count(),
        report.error_count()
    );
    Ok(())
}
