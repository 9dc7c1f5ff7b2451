//! Seams to the external map-definition parser and renderer.
//!
//! A backend provides two capabilities:
//! - a [`MapBuilder`] that turns map-definition text into a [`RenderContext`], and
//! - a [`Renderer`] that draws a context whose extent was set for one tile.
//!
//! Contexts are expensive to build and not thread-safe, so they live in a [`Pool`](crate::Pool)
//! and are handed to exactly one tile request at a time.
//! Backends doing CPU-heavy work should move it off the async executor,
//! e.g. with `tokio::task::spawn_blocking`.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use martin_render_utils::TileData;

/// Error reported by a backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// String parameters declared by a map definition.
pub type Parameters = BTreeMap<String, String>;

/// Options passed to [`MapBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Reject unknown or malformed definition elements instead of ignoring them
    pub strict: bool,
    /// Directory relative paths inside the definition are resolved against
    pub base_path: PathBuf,
    /// Width and height of a rendered tile in pixels
    pub tile_size: u32,
    /// Pixels rendered around a tile to avoid clipping labels and symbols at its edges
    pub buffer_size: u32,
}

/// Options passed to [`Renderer::render`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Width and height of a rendered tile in pixels
    pub tile_size: u32,
    /// Pixel density multiplier
    pub scale: f64,
}

/// A parsed map definition that can render one tile at a time.
pub trait RenderContext: Send + 'static {
    /// Parameters declared by the map definition.
    fn parameters(&self) -> &Parameters;

    /// Sets the extent `[minx, miny, maxx, maxy]` in Web-Mercator metres for the next render.
    fn set_extent(&mut self, extent: [f64; 4]);
}

/// Builds render contexts from map-definition text.
#[async_trait]
pub trait MapBuilder: Send + Sync + Debug + 'static {
    /// The context type this builder produces.
    type Context: RenderContext;

    /// Parses `definition` into a new context.
    async fn build(
        &self,
        definition: &str,
        options: &BuildOptions,
    ) -> Result<Self::Context, BackendError>;
}

/// Renders contexts of type `C` into encoded tile bytes.
#[async_trait]
pub trait Renderer<C: RenderContext>: Send + Sync + Debug + 'static {
    /// Renders the current extent of `context`.
    async fn render(&self, context: &mut C, options: &RenderOptions)
    -> Result<TileData, BackendError>;
}
