//! Process-wide registry of initialized sources.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::backend::{MapBuilder, Renderer};
use crate::config::RenderConfig;
use crate::identity::{SCHEME, SourceIdentity, SourceUri};
use crate::protocol::{BoxedSource, Protocol, ProtocolRegistry};
use crate::source::TileSource;
use crate::{RenderSourceError, RenderSourceResult};

/// Maps canonical source identities to initialized sources.
///
/// Concurrent [`obtain`](Self::obtain) calls for the same identity share one initialization.
/// An identity counts as registered from the moment its initialization starts.
/// A failed initialization is not cached, so the next call tries again.
pub struct SourceRegistry<M: MapBuilder, R> {
    sources: Cache<String, Arc<TileSource<M, R>>>,
    /// Keys whose initialization is running
    pending: Mutex<HashSet<String>>,
    builder: Arc<M>,
    renderer: Arc<R>,
    config: RenderConfig,
}

impl<M: MapBuilder, R: Renderer<M::Context>> Debug for SourceRegistry<M, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.entry_count())
            .field("pending", &self.pending().len())
            .field("builder", &self.builder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<M: MapBuilder, R: Renderer<M::Context>> SourceRegistry<M, R> {
    /// Creates an empty registry. Unrecognized config keys are reported here.
    pub fn new(builder: M, renderer: R, mut config: RenderConfig) -> Self {
        config.finalize();
        Self {
            sources: Cache::builder().name("render_sources").build(),
            pending: Mutex::default(),
            builder: Arc::new(builder),
            renderer: Arc::new(renderer),
            config,
        }
    }

    /// Returns the source for `uri`, initializing it unless it is cached.
    ///
    /// Every caller waiting on the same initialization receives the same source, or the same
    /// [`RenderSourceError::Initialization`] error. A cached source that was closed is replaced.
    pub async fn obtain(&self, uri: SourceUri) -> RenderSourceResult<Arc<TileSource<M, R>>> {
        let identity = SourceIdentity::try_from(uri)?;
        let key = identity.key();
        loop {
            let init = async {
                let _pending = Pending::start(&self.pending, key);
                debug!("Initializing source {key}");
                TileSource::initialize(
                    identity.clone(),
                    Arc::clone(&self.builder),
                    Arc::clone(&self.renderer),
                    &self.config,
                )
                .await
                .map(Arc::new)
                .inspect_err(|e| {
                    warn!("Unable to initialize source {key}, it will be retried on the next request: {e}");
                })
            };
            let source = self
                .sources
                .try_get_with_by_ref(key, init)
                .await
                .map_err(RenderSourceError::Initialization)?;
            if !source.is_closed() {
                return Ok(source);
            }

            if self
                .sources
                .get(key)
                .await
                .is_some_and(|cached| Arc::ptr_eq(&cached, &source))
            {
                debug!("Evicting closed source {key}");
                self.sources.invalidate(key).await;
            }
        }
    }

    /// Removes the source of `uri` from the registry and closes it.
    /// Returns `false` if no such source was cached.
    pub async fn close(&self, uri: SourceUri) -> RenderSourceResult<bool> {
        let identity = SourceIdentity::try_from(uri)?;
        let Some(source) = self.sources.remove(identity.key()).await else {
            return Ok(false);
        };
        info!("Closing source {}", source.id());
        source.close().await;
        Ok(true)
    }

    /// Removes and closes every cached source.
    ///
    /// Sources that finish initializing while this runs stay cached and open.
    pub async fn close_all(&self) {
        let keys: Vec<_> = self.sources.iter().map(|(k, _)| k).collect();
        for key in keys {
            if let Some(source) = self.sources.remove(key.as_str()).await {
                source.close().await;
            }
        }
    }

    /// Installs this registry into `protocols` under its own scheme.
    pub fn register_protocols(self: &Arc<Self>, protocols: &mut ProtocolRegistry) -> bool {
        protocols.register(SCHEME, Arc::clone(self) as Arc<dyn Protocol>)
    }

    /// Whether a source is cached or being initialized for `identity`.
    #[must_use]
    pub fn contains(&self, identity: &SourceIdentity) -> bool {
        self.sources.contains_key(identity.key()) || self.pending().contains(identity.key())
    }

    /// Number of sources that are cached or being initialized.
    pub async fn len(&self) -> u64 {
        self.sources.run_pending_tasks().await;
        let pending = u64::try_from(self.pending().len()).unwrap_or(u64::MAX);
        self.sources.entry_count().saturating_add(pending)
    }

    /// Whether no source is cached or being initialized.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Configuration shared by all sources.
    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        lock(&self.pending)
    }
}

fn lock(keys: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    keys.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a key as initializing until dropped, including when the initialization is cancelled.
struct Pending<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: &'a str,
}

impl<'a> Pending<'a> {
    fn start(keys: &'a Mutex<HashSet<String>>, key: &'a str) -> Self {
        lock(keys).insert(key.to_string());
        Self { keys, key }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        lock(self.keys).remove(self.key);
    }
}

#[async_trait]
impl<M: MapBuilder, R: Renderer<M::Context>> Protocol for SourceRegistry<M, R> {
    async fn open(&self, uri: &str) -> RenderSourceResult<BoxedSource> {
        let source: BoxedSource = self.obtain(uri.parse()?).await?;
        Ok(source)
    }
}
