//! Job trigger parsing
//!
//! A trigger file holds either one job request object or an array of them.

use crate::state::JobRequest;
use crate::IngestError;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Parses trigger JSON into job requests
///
/// Only the shape is checked here. Semantically invalid pagination settings
/// are accepted so that they surface as non-retryable failures on the job
/// and land in the dead-letter set with their error.
pub fn parse_triggers(input: &str) -> Result<Vec<JobRequest>, IngestError> {
    let value: Value = serde_json::from_str(input)?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(IngestError::from))
            .collect(),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}

/// Reads and parses a trigger file
///
/// # Arguments
///
/// * `path` - Path to a JSON file with one trigger object or an array
///
/// # Returns
///
/// * `Ok(Vec<JobRequest>)` - The parsed requests, in file order
/// * `Err(IngestError)` - The file could not be read or parsed
pub fn load_triggers(path: &Path) -> Result<Vec<JobRequest>, IngestError> {
    let content = fs::read_to_string(path)?;
    parse_triggers(&content)
}
