//! Content fingerprints
//!
//! Two fingerprints guard a job. The request fingerprint hashes the canonical
//! trigger payload and is reserved before any page is fetched, so concurrent
//! triggers of the same request never both reach the source. The content
//! fingerprint hashes the normalized records after a successful fetch, so two
//! different requests that yield identical data are persisted once.

use crate::pagination::NormalizedRecord;
use crate::state::JobRequest;
use sha2::{Digest, Sha256};

const REQUEST_PREFIX: &str = "req:";
const CONTENT_PREFIX: &str = "content:";

/// Computes the fingerprint of a job request
///
/// The request is serialized through `serde_json::Value`, whose object maps
/// are key-sorted, so field order in the submitted trigger does not matter.
pub fn request_fingerprint(request: &JobRequest) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_value(request)?.to_string();
    Ok(format!("{}{}", REQUEST_PREFIX, sha256_hex(canonical.as_bytes())))
}

/// Computes the fingerprint of a fetch's normalized records
///
/// Returns `None` for an empty record set: "no data" is not content and must
/// not suppress a later fetch that does return data.
pub fn content_fingerprint(source_id: &str, records: &[NormalizedRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\n");
    for record in records {
        hasher.update(record.payload.to_string().as_bytes());
        hasher.update(b"\n");
    }

    Some(format!("{}{}", CONTENT_PREFIX, hex::encode(hasher.finalize())))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
