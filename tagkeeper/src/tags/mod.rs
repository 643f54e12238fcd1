//! Numeric release tags and allocation of the next one.
//!
//! A release tag is any tag made up entirely of ascii digits. Leading zeros are allowed and compare by
//! value, so `007` and `7` name the same release number. Everything else (`latest`, `v1`, `1.0`, `+5`)
//! is invisible to allocation.

use crate::inventory::ImageRecord;
use lazy_regex::regex;
use std::cmp::Ordering;
use tracing::warn;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TagError {
    #[error("invalid repository '{0}'; {1}")]
    InvalidRepository(String, String),

    #[error("numeric tags for repository '{0}' have reached the largest representable value")]
    Exhausted(String),
}

pub fn is_release_tag(tag: &str) -> bool {
    regex!("^[0-9]+$").is_match(tag)
}

/// Parses a release tag into its value. Tags that are not release tags return None, as do release tags too
/// large to represent; the latter are logged and otherwise treated like any other non-numeric tag.
pub fn parse_release_tag(tag: &str) -> Option<u64> {
    if !is_release_tag(tag) {
        return None;
    }

    match tag.parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(tag, err = %e, "Ignoring numeric tag that does not fit in 64 bits");
            None
        }
    }
}

/// Compares two release tags by numeric value without parsing them, so arbitrarily long tags still order
/// correctly. Equal values with different spellings (`7` and `007`) fall back to comparing the raw text.
pub fn cmp_release_tags(a: &str, b: &str) -> Ordering {
    let a_digits = a.trim_start_matches('0');
    let b_digits = b.trim_start_matches('0');

    a_digits
        .len()
        .cmp(&b_digits.len())
        .then_with(|| a_digits.cmp(b_digits))
        .then_with(|| a.cmp(b))
}

/// Repositories are tag-less docker names. A colon is only allowed before the last slash, where it
/// separates a registry host from its port.
pub fn validate_repository(repository: &str) -> Result<(), TagError> {
    let invalid = |reason: &str| {
        Err(TagError::InvalidRepository(
            repository.to_string(),
            reason.to_string(),
        ))
    };

    if repository.is_empty() {
        return invalid("cannot be empty");
    }

    if repository.chars().any(char::is_whitespace) {
        return invalid("cannot contain whitespace");
    }

    if repository.contains('@') {
        return invalid("cannot contain a digest");
    }

    let last_segment = repository.rsplit('/').next().unwrap_or(repository);
    if last_segment.is_empty() {
        return invalid("cannot end with a slash");
    }

    if last_segment.contains(':') {
        return invalid("cannot contain a tag");
    }

    Ok(())
}

/// Returns the tag the next build of `repository` should carry: one more than the highest release tag
/// currently in `records`, or `1` if there is none.
pub fn next_tag(repository: &str, records: &[ImageRecord]) -> Result<String, TagError> {
    validate_repository(repository)?;

    let highest = records
        .iter()
        .filter_map(|record| record.reference.as_ref())
        .filter(|reference| reference.repository == repository)
        .filter_map(|reference| parse_release_tag(&reference.tag))
        .max();

    let Some(highest) = highest else {
        return Ok("1".to_string());
    };

    highest
        .checked_add(1)
        .map(|next| next.to_string())
        .ok_or_else(|| TagError::Exhausted(repository.to_string()))
}
