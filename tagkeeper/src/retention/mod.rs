//! Retention pruning: picks images that fell out of the keep-last-N window, auxiliary test and scan images,
//! and dangling images, then removes them best-effort.

use crate::conf;
use crate::inventory::{ImageRecord, Inventory, InventoryError, Reference, Target};
use crate::tags;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use strum::Display;
use tracing::{debug, info, instrument, warn};

/// How an image relates to the repository being pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Category {
    /// Numeric release tag of the repository itself.
    Release,
    /// Any tag of the repository's test or scan image.
    Auxiliary,
    /// No `repo:tag` points at the image at all.
    Dangling,
    /// Everything else, never touched.
    Other,
}

/// Why a target was selected for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Reason {
    /// Older than the newest `keep` release images.
    Expired,
    Auxiliary,
    Dangling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub repository: String,
    pub keep: usize,
    pub test_repository: String,
    pub scan_repository: String,
    pub prune_dangling: bool,
}

impl Policy {
    pub fn new(repository: &str, config: &conf::Retention) -> Self {
        Self {
            repository: repository.to_string(),
            keep: config.keep,
            test_repository: format!("{repository}{}", config.test_suffix),
            scan_repository: format!("{repository}{}", config.scan_suffix),
            prune_dangling: config.prune_dangling,
        }
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    pub fn categorize(&self, record: &ImageRecord) -> Category {
        let Some(reference) = &record.reference else {
            return Category::Dangling;
        };

        if reference.repository == self.repository && tags::is_release_tag(&reference.tag) {
            return Category::Release;
        }

        if reference.repository == self.test_repository
            || reference.repository == self.scan_repository
        {
            return Category::Auxiliary;
        }

        Category::Other
    }
}

/// The set of targets chosen for removal, each with the rule that chose it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(BTreeMap<Target, Reason>);

impl Selection {
    fn insert(&mut self, target: Target, reason: Reason) {
        self.0.entry(target).or_insert(reason);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Targets in removal order: tagged before dangling.
    pub fn iter(&self) -> impl Iterator<Item = (&Target, &Reason)> {
        self.0.iter()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.0.keys()
    }
}

/// Selects everything `policy` says should go. Pure; nothing is removed here.
///
/// Release images are ordered newest first by creation time; images created in the same second are
/// ordered by descending tag value so the result never depends on inventory listing order.
pub fn select_for_deletion(policy: &Policy, records: &[ImageRecord]) -> Selection {
    let mut selection = Selection::default();

    // A reference listed more than once counts once, at its newest creation time.
    let mut newest: BTreeMap<&Reference, DateTime<Utc>> = BTreeMap::new();
    for record in records {
        if policy.categorize(record) != Category::Release {
            continue;
        }
        if let Some(reference) = &record.reference {
            let created = newest.entry(reference).or_insert(record.created);
            *created = (*created).max(record.created);
        }
    }

    let mut releases: Vec<(&Reference, DateTime<Utc>)> = newest.into_iter().collect();
    releases.sort_by(|(a, a_created), (b, b_created)| {
        b_created
            .cmp(a_created)
            .then_with(|| tags::cmp_release_tags(&b.tag, &a.tag))
    });

    for (reference, _) in releases.into_iter().skip(policy.keep) {
        selection.insert(Target::Tagged(reference.clone()), Reason::Expired);
    }

    for record in records {
        match policy.categorize(record) {
            Category::Auxiliary => selection.insert(Target::from(record), Reason::Auxiliary),
            Category::Dangling if policy.prune_dangling => {
                selection.insert(Target::from(record), Reason::Dangling)
            }
            _ => {}
        }
    }

    debug!(
        repository = policy.repository,
        keep = policy.keep,
        selected = selection.len(),
        "Selected images for removal"
    );

    selection
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub target: Target,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<Target>,
    /// Selected but already removed by someone else by the time we got to it.
    pub already_gone: Vec<Target>,
    pub failures: Vec<DeletionFailure>,
}

/// Removes every selected target. A failure to remove one target is recorded and the sweep moves on.
#[instrument(skip_all, fields(origin = "retention", selected = selection.len()))]
pub async fn sweep(inventory: &dyn Inventory, selection: &Selection) -> SweepReport {
    let mut report = SweepReport::default();

    for target in selection.targets() {
        match inventory.remove_image(target).await {
            Ok(()) => {
                info!(image = %target, "Removed image");
                report.removed.push(target.clone());
            }
            Err(InventoryError::NotFound(_)) => {
                debug!(image = %target, "Image already removed");
                report.already_gone.push(target.clone());
            }
            Err(e) => {
                warn!(image = %target, err = %e, "Could not remove image");
                report.failures.push(DeletionFailure {
                    target: target.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}
