use super::{resolve_repository, Cli};
use crate::tags;
use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

#[derive(Debug, Args, Clone)]
pub struct NextTagArgs {
    /// Image repository without a tag, i.e. "your-registry/aspnet-api". Defaults to image.repository.
    #[arg(short, long)]
    pub repository: Option<String>,
}

impl Cli {
    /// Prints nothing but the tag on stdout so pipelines can capture it directly.
    pub async fn next_tag(&self, args: NextTagArgs) -> Result<()> {
        let repository = resolve_repository(args.repository, &self.conf)?;

        let inventory = self.inventory().await?;
        let records = inventory
            .list_images()
            .await
            .context("Could not list images; refusing to guess the next tag")?;

        let tag = tags::next_tag(&repository, &records)?;

        info!(repository, tag, "Allocated next tag");
        println!("{tag}");

        Ok(())
    }
}
