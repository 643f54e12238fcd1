use super::{resolve_repository, Cli};
use crate::retention::{self, Policy, SweepReport};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use polyfmt::{println, success};

#[derive(Debug, Args, Clone)]
pub struct PruneArgs {
    /// Image repository without a tag, i.e. "your-registry/aspnet-api". Defaults to image.repository.
    #[arg(short, long)]
    pub repository: Option<String>,

    /// Number of most recently created release images to keep. Defaults to retention.keep.
    #[arg(short, long)]
    pub keep: Option<usize>,

    /// Only print what would be removed.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Removal failures are printed but never fail the command.
    pub async fn prune(&self, args: PruneArgs) -> Result<()> {
        let repository = resolve_repository(args.repository, &self.conf)?;

        let mut policy = Policy::new(&repository, &self.conf.retention);
        if let Some(keep) = args.keep {
            policy = policy.with_keep(keep);
        }

        let inventory = self.inventory().await?;
        let records = inventory
            .list_images()
            .await
            .context("Could not list images")?;

        let selection = retention::select_for_deletion(&policy, &records);

        if selection.is_empty() {
            println!("Nothing to prune for '{}'.", repository);
            return Ok(());
        }

        for (target, reason) in selection.iter() {
            println!("  {} {}", target, format!("({reason})").dimmed());
        }

        if args.dry_run {
            println!(
                "Dry run; would remove {} image(s) for '{}'.",
                selection.len(),
                repository
            );
            return Ok(());
        }

        let report = retention::sweep(inventory.as_ref(), &selection).await;
        print_report(&report);

        Ok(())
    }
}

fn print_report(report: &SweepReport) {
    if !report.already_gone.is_empty() {
        println!(
            "{} image(s) were already gone: {}",
            report.already_gone.len(),
            report
                .already_gone
                .iter()
                .map(|target| target.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    for failure in &report.failures {
        println!(
            "{} Could not remove {}; {}",
            "x".red(),
            failure.target,
            failure.reason
        );
    }

    success!(
        "Removed {} image(s); {} failed",
        report.removed.len() + report.already_gone.len(),
        report.failures.len()
    );
}
