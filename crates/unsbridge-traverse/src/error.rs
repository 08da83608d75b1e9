use thiserror::Error;
use unsbridge_domain::AssetUri;

/// A malformed element. Produces no record; traversal continues with the
/// siblings, so one bad element never costs a snapshot.
#[derive(Debug, Clone, Error)]
#[error("malformed element at {asset_uri}/{submodel_id}/{}: {reason}", path.join("/"))]
pub struct ElementError {
    pub asset_uri: AssetUri,
    pub submodel_id: String,
    /// Path walked up to (and including) the offending element.
    pub path: Vec<String>,
    pub reason: String,
}
