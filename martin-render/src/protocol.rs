//! The seam between source adapters and the host that serves their tiles.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use martin_render_utils::{TileCoord, TileData};
use tracing::{info, warn};
use url::Url;

use crate::metadata::Metadata;
use crate::{RenderSourceError, RenderSourceResult};

/// A shared, type-erased [`Source`].
pub type BoxedSource = Arc<dyn Source>;

/// A tile source as seen by the host.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Source identifier.
    fn get_id(&self) -> &str;

    /// Metadata describing the source.
    fn get_info(&self) -> RenderSourceResult<&Metadata>;

    /// Tile data, prefixed with its 4-byte big-endian length.
    async fn get_tile(&self, xyz: TileCoord) -> RenderSourceResult<TileData>;

    /// Releases the resources held by the source. Later calls fail.
    async fn close(&self);

    /// URI that opens an equivalent source.
    fn serialize(&self) -> String;
}

/// Opens sources for the URIs of one scheme.
#[async_trait]
pub trait Protocol: Send + Sync + Debug {
    /// Opens the source identified by `uri`.
    async fn open(&self, uri: &str) -> RenderSourceResult<BoxedSource>;
}

/// Source adapters of a host, keyed by URI scheme.
#[derive(Debug, Default, Clone)]
pub struct ProtocolRegistry(HashMap<String, Arc<dyn Protocol>>);

impl ProtocolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `protocol` under `scheme`. A scheme that is already taken keeps its adapter.
    pub fn register(&mut self, scheme: &str, protocol: Arc<dyn Protocol>) -> bool {
        match self.0.entry(scheme.to_ascii_lowercase()) {
            Entry::Occupied(v) => {
                warn!(
                    "Ignoring duplicate protocol {scheme} because it was already registered as {:?}",
                    v.get()
                );
                false
            }
            Entry::Vacant(v) => {
                info!("Registered protocol {scheme}");
                v.insert(protocol);
                true
            }
        }
    }

    /// Opens `uri` with the adapter registered for its scheme.
    pub async fn open(&self, uri: &str) -> RenderSourceResult<BoxedSource> {
        let scheme = Url::parse(uri)
            .map_err(|e| RenderSourceError::InvalidUri(uri.to_string(), e.to_string()))?
            .scheme()
            .to_string();
        let Some(protocol) = self.0.get(&scheme) else {
            return Err(RenderSourceError::UnsupportedScheme {
                scheme,
                uri: uri.to_string(),
            });
        };
        protocol.open(uri).await
    }

    /// Whether an adapter is registered for `scheme`.
    #[must_use]
    pub fn contains(&self, scheme: &str) -> bool {
        self.0.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.0.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}
