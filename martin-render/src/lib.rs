#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
pub use backend::{
    BackendError, BuildOptions, MapBuilder, Parameters, RenderContext, RenderOptions, Renderer,
};

pub mod config;
pub use config::RenderConfig;

pub mod discovery;

mod error;
pub use error::{RenderSourceError, RenderSourceResult};

pub mod identity;
pub use identity::{SCHEME, SourceIdentity, SourceUri};

pub mod metadata;
pub use metadata::Metadata;

pub mod pool;
pub use pool::{Manager, Object, Pool, PoolError};

pub mod protocol;
pub use protocol::{BoxedSource, Protocol, ProtocolRegistry, Source};

pub mod registry;
pub use registry::SourceRegistry;

pub mod source;
pub use source::TileSource;

pub use martin_render_utils::{TileCoord, TileCoordError, TileData};
