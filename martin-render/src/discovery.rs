//! Finding map definitions in a directory.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::fs;
use tracing::{trace, warn};

use crate::identity::SourceIdentity;
use crate::{RenderSourceError, RenderSourceResult};

/// Extension of map-definition files.
pub const DEFINITION_EXTENSION: &str = "xml";

/// Lists the map definitions in `dir`, keyed by source id, with their canonical URIs.
///
/// Subdirectories are not searched.
pub async fn list(dir: impl AsRef<Path>) -> RenderSourceResult<BTreeMap<String, String>> {
    let dir = dir.as_ref();
    let io_err = |e| RenderSourceError::IoError(e, dir.to_path_buf());
    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;

    let mut result = BTreeMap::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_definition = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DEFINITION_EXTENSION));
        if !is_definition || !entry.file_type().await.map_err(io_err)?.is_file() {
            trace!("Skipping {} while listing map definitions", path.display());
            continue;
        }
        let identity = SourceIdentity::from_path(&path)?;
        if let Some(old) = result.insert(identity.id(), identity.to_string()) {
            warn!(
                "Map definitions {old} and {identity} share the id {}, using the latter",
                identity.id()
            );
        }
    }
    Ok(result)
}

/// Canonical URI of the map definition with the given source id in `dir`.
pub async fn find_id(dir: impl AsRef<Path>, id: &str) -> RenderSourceResult<String> {
    let dir = dir.as_ref();
    list(dir)
        .await?
        .remove(id)
        .ok_or_else(|| RenderSourceError::SourceNotFound(id.to_string(), dir.to_path_buf()))
}
