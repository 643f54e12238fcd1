pub mod docker;
pub mod snapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// The name docker reports for images that have lost every `repo:tag` reference.
pub const DANGLING_NAME: &str = "<none>:<none>";

/// Represents different inventory failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InventoryError {
    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init inventory; {0}")]
    FailedPrecondition(String),

    /// Failed to communicate with the image store due to network error or other.
    #[error("could not connect to image store; {0}")]
    Connection(String),

    /// The image list could not be read. Nothing downstream can proceed without it.
    #[error("could not query image inventory; {0}")]
    Query(String),

    /// Image requested for removal no longer exists.
    #[error("image not found; {0}")]
    NotFound(String),

    /// Image is still referenced by a container.
    #[error("image in use; {0}")]
    Conflict(String),

    /// An expected and unknown error has occurred.
    #[error("unexpected inventory error occurred; {0}")]
    Unknown(String),
}

/// A `repository:tag` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub repository: String,
    pub tag: String,
}

impl Reference {
    pub fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Splits a docker style image name into repository and tag. The tag separator is the last colon
    /// that comes after the last slash, so registry ports (`registry:5000/app:3`) are kept in the
    /// repository. Names without a tag default to `latest`, the same way docker resolves them.
    ///
    /// Returns None for docker's dangling placeholder and for names with an empty component.
    pub fn parse(name: &str) -> Option<Self> {
        if name == DANGLING_NAME {
            return None;
        }

        let name = name.split_once('@').map_or(name, |(name, _digest)| name);
        let slash = name.rfind('/').map_or(0, |pos| pos + 1);

        let (repository, tag) = match name[slash..].rfind(':') {
            Some(pos) => (&name[..slash + pos], &name[slash + pos + 1..]),
            None => (name, "latest"),
        };

        if repository.is_empty() || tag.is_empty() {
            return None;
        }

        Some(Self::new(repository, tag))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// A single entry of the image store. Images known under several names show up as one record per name,
/// all sharing the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,

    /// None for dangling images.
    #[serde(default)]
    pub reference: Option<Reference>,

    pub created: DateTime<Utc>,
}

impl ImageRecord {
    #[cfg(test)]
    pub fn tagged(id: &str, repository: &str, tag: &str, created: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            reference: Some(Reference::new(repository, tag)),
            created,
        }
    }

    pub fn dangling(id: &str, created: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            reference: None,
            created,
        }
    }

    /// The image id without its digest algorithm prefix and shortened the way docker prints it.
    pub fn short_id(&self) -> &str {
        let id = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        match id.char_indices().nth(12) {
            Some((pos, _)) => &id[..pos],
            None => id,
        }
    }
}

/// Something that can be removed from the image store.
///
/// Ordering puts every tagged target before any dangling one so that untagging happens first and
/// frees up layers the dangling sweep would otherwise trip over.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    Tagged(Reference),
    Dangling { id: String },
}

impl From<&ImageRecord> for Target {
    fn from(record: &ImageRecord) -> Self {
        match &record.reference {
            Some(reference) => Target::Tagged(reference.clone()),
            None => Target::Dangling {
                id: record.id.clone(),
            },
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tagged(reference) => write!(f, "{reference}"),
            Target::Dangling { id } => write!(f, "{DANGLING_NAME} ({id})"),
        }
    }
}

/// The inventory trait defines what the interface between tagkeeper and a local image store should look like.
#[async_trait]
pub trait Inventory: Debug + Send + Sync + 'static {
    /// Returns every image the store currently knows about. Never cached; each call reads the store again.
    async fn list_images(&self) -> Result<Vec<ImageRecord>, InventoryError>;

    /// Remove a single image by reference, or by id for dangling images. Implementations must report images
    /// that are already gone as [`InventoryError::NotFound`] so callers can treat removal as idempotent.
    async fn remove_image(&self, target: &Target) -> Result<(), InventoryError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")] // This handles case insensitivity during deserialization
pub enum Engine {
    #[default]
    Docker,
    Snapshot,
}

pub async fn new(config: &crate::conf::Inventory) -> Result<Box<dyn Inventory>, InventoryError> {
    match config.engine {
        Engine::Docker => {
            let Some(docker_config) = &config.docker else {
                return Err(InventoryError::FailedPrecondition(
                    "docker engine settings not found in config".into(),
                ));
            };

            let engine = docker::Engine::new(docker_config).await?;
            Ok(Box::new(engine))
        }
        Engine::Snapshot => {
            let Some(snapshot_config) = &config.snapshot else {
                return Err(InventoryError::FailedPrecondition(
                    "snapshot engine settings not found in config".into(),
                ));
            };

            let engine = snapshot::Engine::new(snapshot_config)?;
            Ok(Box::new(engine))
        }
    }
}
