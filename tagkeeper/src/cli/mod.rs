mod images;
mod next_tag;
mod prune;

use crate::conf::Config;
use crate::inventory::{self, Inventory};
use crate::tags;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(env!("BUILD_SEMVER"), " (", env!("BUILD_COMMIT"), ")");

#[derive(Debug, Parser, Clone)]
#[clap(name = "tagkeeper")]
#[clap(about = "Tagkeeper hands out numeric image tags and prunes the images that fall behind.")]
#[clap(
    long_about = "Tagkeeper hands out numeric image tags and prunes the images that fall behind.\n\n
    It is meant to be called from a build pipeline: once before the build to learn which tag the new image
    should carry, and once after the deploy to drop old release images, the per-run test and scan images
    and any dangling images left over by the build."
)]
#[clap(version = VERSION)]
struct Args {
    /// Set configuration path; if empty default paths are used
    #[clap(long, value_name = "PATH", global = true)]
    config_path: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
enum Commands {
    /// Print the tag the next build of a repository should use.
    NextTag(next_tag::NextTagArgs),

    /// Remove old release images, auxiliary images and dangling images.
    Prune(prune::PruneArgs),

    /// List local images along with how retention sees them.
    Images(images::ImagesArgs),
}

#[derive(Debug)]
pub struct Cli {
    args: Args,
    conf: Config,
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("could not parse log_level '{log_level}'"))?;

    // Stdout belongs to command output, i.e. the tag piped into the build step.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("could not init logging; {}", e))
}

/// Flags always get final priority over configuration.
fn resolve_repository(flag: Option<String>, conf: &Config) -> Result<String> {
    let repository = flag
        .or_else(|| conf.image.repository.clone())
        .filter(|repository| !repository.is_empty())
        .ok_or_else(|| {
            anyhow!("no repository given; pass --repository or set image.repository in config")
        })?;

    tags::validate_repository(&repository)?;

    Ok(repository)
}

impl Cli {
    pub fn new() -> Result<Self> {
        let args = Args::parse();

        let conf = Config::load(args.config_path.as_deref())
            .context("Could not initialize configuration")?;

        init_logging(&conf.general.log_level)?;

        Ok(Self { args, conf })
    }

    pub async fn run(&self) -> Result<()> {
        match self.args.command.clone() {
            Commands::NextTag(args) => self.next_tag(args).await,
            Commands::Prune(args) => self.prune(args).await,
            Commands::Images(args) => self.images(args).await,
        }
    }

    async fn inventory(&self) -> Result<Box<dyn Inventory>> {
        inventory::new(&self.conf.inventory)
            .await
            .context("Could not connect to image inventory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf_with_repository(repository: Option<&str>) -> Config {
        let mut conf = Config::default();
        conf.image.repository = repository.map(String::from);
        conf
    }

    #[test]
    fn flag_overrides_configured_repository() {
        let conf = conf_with_repository(Some("configured"));

        assert_eq!(
            resolve_repository(Some("flagged".into()), &conf).unwrap(),
            "flagged"
        );
        assert_eq!(resolve_repository(None, &conf).unwrap(), "configured");
    }

    #[test]
    fn missing_repository_is_an_error() {
        assert!(resolve_repository(None, &conf_with_repository(None)).is_err());
        assert!(resolve_repository(None, &conf_with_repository(Some(""))).is_err());
    }

    #[test]
    fn tagged_repository_is_rejected() {
        let conf = conf_with_repository(None);
        assert!(resolve_repository(Some("myapp:latest".into()), &conf).is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "tagkeeper",
            "prune",
            "--repository",
            "myapp",
            "--keep",
            "5",
            "--dry-run",
        ])
        .unwrap();

        match args.command {
            Commands::Prune(prune_args) => {
                assert_eq!(prune_args.repository.as_deref(), Some("myapp"));
                assert_eq!(prune_args.keep, Some(5));
                assert!(prune_args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
