//! A source rendering tiles from one map definition.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use martin_render_utils::{Projection, TileCoord, TileData, frame_tile, tile_bbox};
use tokio::fs;
use tracing::{debug, error, info, trace};

use crate::backend::{
    BackendError, BuildOptions, MapBuilder, RenderContext as _, RenderOptions, Renderer,
};
use crate::config::RenderConfig;
use crate::identity::SourceIdentity;
use crate::metadata::Metadata;
use crate::pool::{Manager, Pool, PoolError, Status};
use crate::protocol::Source;
use crate::{RenderSourceError, RenderSourceResult};

/// Builds render contexts of one map definition for a [`Pool`].
#[derive(Debug)]
pub struct ContextManager<M> {
    id: String,
    builder: Arc<M>,
    definition: Arc<str>,
    options: BuildOptions,
}

#[async_trait]
impl<M: MapBuilder> Manager for ContextManager<M> {
    type Object = M::Context;

    async fn create(&self) -> Result<M::Context, BackendError> {
        debug!("Building render context of source {}", self.id);
        self.builder.build(&self.definition, &self.options).await
    }

    fn destroy(&self, context: M::Context) {
        trace!("Destroying render context of source {}", self.id);
        drop(context);
    }
}

/// A source rendering tiles from one map definition through a pool of render contexts.
///
/// Created by [`TileSource::initialize`], which fails unless the definition could be loaded
/// and parsed. After [`close`](Self::close), every call fails with [`RenderSourceError::Closed`].
pub struct TileSource<M: MapBuilder, R> {
    id: String,
    identity: SourceIdentity,
    pool: Pool<ContextManager<M>>,
    renderer: Arc<R>,
    render_options: RenderOptions,
    metadata: OnceLock<Metadata>,
    closed: AtomicBool,
}

#[expect(clippy::missing_fields_in_debug)]
impl<M: MapBuilder, R> Debug for TileSource<M, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSource")
            .field("id", &self.id)
            .field("identity", &self.identity.key())
            .field("pool", &self.pool)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M: MapBuilder, R: Renderer<M::Context>> TileSource<M, R> {
    /// Loads the map definition, sets up the context pool and reads the source metadata.
    ///
    /// The first render context is built here, so a malformed definition is reported
    /// as [`RenderSourceError::DefinitionParseError`].
    pub async fn initialize(
        identity: SourceIdentity,
        builder: Arc<M>,
        renderer: Arc<R>,
        config: &RenderConfig,
    ) -> RenderSourceResult<Self> {
        let id = identity.id();

        let definition = if let Some(definition) = identity.definition() {
            debug!("Using inline map definition of source {id}");
            Arc::clone(definition)
        } else {
            let path = identity.path();
            debug!("Loading map definition of source {id} from {}", path.display());
            fs::read_to_string(path)
                .await
                .map_err(|e| RenderSourceError::DefinitionLoadError(e, path.to_path_buf()))?
                .into()
        };

        let manager = ContextManager {
            id: id.clone(),
            builder,
            definition,
            options: config.build_options(&identity),
        };
        let pool = Pool::builder(manager)
            .max_size(config.pool_size())
            .build();

        let source = Self {
            render_options: config.render_options(&identity),
            id,
            identity,
            pool,
            renderer,
            metadata: OnceLock::new(),
            closed: AtomicBool::new(false),
        };
        source.populate_metadata().await?;
        info!(
            "Initialized source {} from {} with up to {} render contexts",
            source.id,
            source.identity,
            source.pool.status().max_size
        );
        Ok(source)
    }

    async fn populate_metadata(&self) -> RenderSourceResult<()> {
        let context = self.pool.get().await.map_err(|e| self.pool_error(e))?;
        let metadata = Metadata::from_parameters(&self.id, context.parameters());
        drop(context);
        debug!(
            "Source {} covers zoom {}..={} within {:?}",
            self.id, metadata.minzoom, metadata.maxzoom, metadata.bounds
        );
        self.metadata.get_or_init(|| metadata);
        Ok(())
    }

    /// Validates integer coordinates and renders the tile.
    pub async fn get_tile(&self, z: i64, x: i64, y: i64) -> RenderSourceResult<TileData> {
        self.render_tile(TileCoord::new_checked(z, x, y)?).await
    }

    /// Coerces textual coordinates (e.g. URL path segments) and renders the tile.
    ///
    /// Integral values such as `"3.0"` are accepted. Other non-integers fail with
    /// [`TileCoordError::InvalidCoordinate`](martin_render_utils::TileCoordError::InvalidCoordinate)
    /// before a render context is acquired.
    pub async fn get_tile_str(&self, z: &str, x: &str, y: &str) -> RenderSourceResult<TileData> {
        self.render_tile(TileCoord::parse(z, x, y)?).await
    }

    /// Renders a tile and returns it prefixed with its 4-byte big-endian length.
    ///
    /// The render context goes back to the pool whether or not rendering succeeded.
    pub async fn render_tile(&self, xyz: TileCoord) -> RenderSourceResult<TileData> {
        if !xyz.is_valid() {
            TileCoord::new_checked(xyz.z.into(), xyz.x.into(), xyz.y.into())?;
        }
        self.ensure_open()?;

        let mut context = self.pool.get().await.map_err(|e| {
            let e = self.pool_error(e);
            error!("{e}");
            e
        })?;
        context.set_extent(tile_bbox(xyz, false, Projection::WebMercator));
        let result = self.renderer.render(&mut context, &self.render_options).await;
        drop(context);

        let data = result.map_err(|e| {
            let e = RenderSourceError::RenderError(e, xyz, self.id.clone());
            error!("{e}");
            e
        })?;
        trace!("Rendered tile {xyz:#} of source {} ({} bytes)", self.id, data.len());
        Ok(frame_tile(&data)?)
    }

    /// Metadata of the source. Fails once the source is closed.
    pub fn get_info(&self) -> RenderSourceResult<&Metadata> {
        self.ensure_open()?;
        self.metadata
            .get()
            .ok_or_else(|| RenderSourceError::Unavailable(self.id.clone()))
    }
}

impl<M: MapBuilder, R> TileSource<M, R> {
    /// Source id, derived from the map-definition file name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical identity the source was created from.
    #[must_use]
    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    /// Canonical URI that opens an equivalent source.
    #[must_use]
    pub fn serialize(&self) -> String {
        self.identity.to_string()
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Bookkeeping counters of the render-context pool.
    #[must_use]
    pub fn pool_status(&self) -> Status {
        self.pool.status()
    }

    /// Waits until all render contexts are returned and destroys them.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing source {}", self.id);
        }
        self.pool.close().await;
    }

    fn ensure_open(&self) -> RenderSourceResult<()> {
        if self.is_closed() {
            Err(RenderSourceError::Closed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    fn pool_error(&self, error: PoolError) -> RenderSourceError {
        match error {
            PoolError::Create(e) => {
                RenderSourceError::DefinitionParseError(e, self.identity.path().to_path_buf())
            }
            PoolError::Closed => RenderSourceError::Closed(self.id.clone()),
        }
    }
}

#[async_trait]
impl<M: MapBuilder, R: Renderer<M::Context>> Source for TileSource<M, R> {
    fn get_id(&self) -> &str {
        &self.id
    }

    fn get_info(&self) -> RenderSourceResult<&Metadata> {
        Self::get_info(self)
    }

    async fn get_tile(&self, xyz: TileCoord) -> RenderSourceResult<TileData> {
        self.render_tile(xyz).await
    }

    async fn close(&self) {
        Self::close(self).await;
    }

    fn serialize(&self) -> String {
        Self::serialize(self)
    }
}
