use super::{ImageRecord, Inventory, InventoryError, Reference, Target};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The total amount of time any request is allowed to be pending for in seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Engine {
    client: bollard::Docker,
}

impl Engine {
    #[instrument(fields(origin = "inventory::docker"))]
    pub async fn new(config: &Config) -> Result<Self, InventoryError> {
        let client = bollard::Docker::connect_with_socket_defaults().map_err(|e| {
            InventoryError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;
        let client = client.with_timeout(tokio::time::Duration::from_secs(config.timeout));

        // Check that we can actually get a connection.
        let version = client.version().await.map_err(|e| {
            InventoryError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;

        debug!(
            version = version.version.unwrap_or_default(),
            "Local docker engine successfully connected"
        );

        Ok(Self { client })
    }
}

/// Flattens a docker image summary into one record per `repo:tag` name. Images that only carry
/// docker's `<none>:<none>` placeholder, or no name at all, become a single dangling record.
fn records_from_summary(summary: bollard::models::ImageSummary) -> Vec<ImageRecord> {
    let created = DateTime::<Utc>::from_timestamp(summary.created, 0).unwrap_or_default();

    let records: Vec<ImageRecord> = summary
        .repo_tags
        .iter()
        .filter_map(|name| Reference::parse(name))
        .map(|reference| ImageRecord {
            id: summary.id.clone(),
            reference: Some(reference),
            created,
        })
        .collect();

    if records.is_empty() {
        return vec![ImageRecord::dangling(&summary.id, created)];
    }

    records
}

#[async_trait]
impl Inventory for Engine {
    #[instrument(skip(self), fields(origin = "inventory::docker"))]
    async fn list_images(&self) -> Result<Vec<ImageRecord>, InventoryError> {
        let summaries = self
            .client
            .list_images(Some(bollard::image::ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| InventoryError::Query(e.to_string()))?;

        let records: Vec<ImageRecord> = summaries
            .into_iter()
            .flat_map(records_from_summary)
            .collect();

        debug!(count = records.len(), "Listed local images");

        Ok(records)
    }

    #[instrument(skip(self, target), fields(origin = "inventory::docker", image = %target))]
    async fn remove_image(&self, target: &Target) -> Result<(), InventoryError> {
        let name = removal_name(target);

        // Never forced; images backing a container stay put.
        let items = self
            .client
            .remove_image(
                &name,
                Some(bollard::image::RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await
            .map_err(|e| map_remove_error(&name, e))?;

        for item in items {
            if let Some(untagged) = item.untagged {
                debug!(untagged, "Untagged image");
            }
            if let Some(deleted) = item.deleted {
                debug!(deleted, "Deleted image layer");
            }
        }

        Ok(())
    }
}

/// Tagged targets are removed by `repo:tag`, which only untags while other names still point at the
/// image. Dangling targets have no name left, so they go by image id.
fn removal_name(target: &Target) -> String {
    match target {
        Target::Tagged(reference) => reference.to_string(),
        Target::Dangling { id } => id.clone(),
    }
}

fn map_remove_error(name: &str, e: bollard::errors::Error) -> InventoryError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => InventoryError::NotFound(format!("{name}; {message}")),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => {
            warn!(image = name, "Image is still in use by a container");
            InventoryError::Conflict(format!("{name}; {message}"))
        }
        e => InventoryError::Unknown(format!("{name}; {e}")),
    }
}
