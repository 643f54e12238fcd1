use crate::inventory;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_embed::RustEmbed;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

#[derive(RustEmbed)]
#[folder = "src/conf/"]
#[include = "*.toml"]
struct EmbeddedConfigFS;

const ENV_PREFIX: &str = "TAGKEEPER_";

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub image: Image,
    pub retention: Retention,
    pub inventory: Inventory,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct General {
    pub log_level: String,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Repository used when a command isn't given one explicitly.
    #[serde(default, deserialize_with = "repository_name")]
    pub repository: Option<String>,
}

/// Env values are typed by figment, so an all-digit repository such as `TAGKEEPER_IMAGE__REPOSITORY=12345`
/// arrives as a number. Leading zeros are lost that way; quote the value (`'"007"'`) to keep them.
fn repository_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Name {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(Option::<Name>::deserialize(deserializer)?.map(|name| match name {
        Name::Text(text) => text,
        Name::Unsigned(number) => number.to_string(),
        Name::Signed(number) => number.to_string(),
    }))
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Retention {
    /// How many of the most recently created release images survive a prune.
    pub keep: usize,
    pub test_suffix: String,
    pub scan_suffix: String,
    pub prune_dangling: bool,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub engine: inventory::Engine,
    pub docker: Option<inventory::docker::Config>,
    pub snapshot: Option<inventory::snapshot::Config>,
}

/// returns the embedded default configuration file.
fn default_config() -> Result<String> {
    let config_file = EmbeddedConfigFS::get("default_config.toml")
        .context("embedded default configuration is missing")?;

    Ok(std::str::from_utf8(&config_file.data)?.to_string())
}

/// returns the default configuration paths that are searched in case user does not specify.
fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/tagkeeper/tagkeeper.toml")];

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".tagkeeper.toml"));
        paths.push(home.join(".config/tagkeeper.toml"));
    }

    paths
}

impl Config {
    /// Layers configuration sources. Later sources override earlier ones:
    /// embedded defaults, then config files, then `TAGKEEPER_` env vars (`__` separates nested keys,
    /// i.e. `TAGKEEPER_RETENTION__KEEP=5`).
    fn figment(path_override: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Toml::string(&default_config()?));

        match path_override {
            Some(path) => {
                if !path.exists() {
                    bail!("config file '{}' does not exist", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                for path in config_paths() {
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// returns a correctly deserialized config struct from the configuration files and environment.
    pub fn load(path_override: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(path_override)?
            .extract()
            .context("could not parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retention.test_suffix.is_empty() || self.retention.scan_suffix.is_empty() {
            bail!("retention.test_suffix and retention.scan_suffix cannot be empty");
        }

        if self.retention.test_suffix == self.retention.scan_suffix {
            bail!("retention.test_suffix and retention.scan_suffix must differ");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    /// Test that the default config is properly parsed from the embedded configuration file.
    fn parse_default_config_from_file() {
        let parsed_config: Config = Figment::from(Toml::string(&default_config().unwrap()))
            .extract()
            .unwrap();

        let expected_config = Config {
            general: General {
                log_level: "info".to_string(),
            },
            image: Image { repository: None },
            retention: Retention {
                keep: 3,
                test_suffix: ".test".to_string(),
                scan_suffix: ".sonarscan".to_string(),
                prune_dangling: true,
            },
            inventory: Inventory {
                engine: inventory::Engine::Docker,
                docker: Some(inventory::docker::Config { timeout: 120 }),
                snapshot: Some(inventory::snapshot::Config {
                    path: "tagkeeper_snapshot.json".to_string(),
                }),
            },
        };

        assert_eq!(parsed_config, expected_config);
    }

    #[test]
    /// Test that files override defaults and env vars override everything.
    fn layered_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tagkeeper.toml",
                r#"
                [image]
                repository = "your-registry/aspnet-api"

                [retention]
                keep = 10

                [inventory]
                engine = "snapshot"
                "#,
            )?;
            jail.set_env("TAGKEEPER_RETENTION__KEEP", "5");
            jail.set_env("TAGKEEPER_GENERAL__LOG_LEVEL", "debug");

            let config = Config::load(Some(Path::new("tagkeeper.toml"))).unwrap();

            assert_eq!(
                config.image.repository.as_deref(),
                Some("your-registry/aspnet-api")
            );
            assert_eq!(config.retention.keep, 5);
            assert_eq!(config.retention.test_suffix, ".test");
            assert_eq!(config.general.log_level, "debug");
            assert_eq!(config.inventory.engine, inventory::Engine::Snapshot);

            Ok(())
        });
    }

    #[test]
    fn numeric_repository_from_env() {
        Jail::expect_with(|jail| {
            jail.create_file("tagkeeper.toml", "")?;
            jail.set_env("TAGKEEPER_IMAGE__REPOSITORY", "12345");

            let config = Config::load(Some(Path::new("tagkeeper.toml"))).unwrap();
            assert_eq!(config.image.repository.as_deref(), Some("12345"));

            jail.set_env("TAGKEEPER_IMAGE__REPOSITORY", "\"007\"");

            let config = Config::load(Some(Path::new("tagkeeper.toml"))).unwrap();
            assert_eq!(config.image.repository.as_deref(), Some("007"));

            Ok(())
        });
    }

    #[test]
    fn missing_override_file_is_an_error() {
        Jail::expect_with(|_jail| {
            assert!(Config::load(Some(Path::new("nope.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn identical_suffixes_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tagkeeper.toml",
                r#"
                [retention]
                scan_suffix = ".test"
                "#,
            )?;

            assert!(Config::load(Some(Path::new("tagkeeper.toml"))).is_err());
            Ok(())
        });
    }
}
