use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use martin_render_utils::{FrameError, TileCoord, TileCoordError};

use crate::backend::BackendError;
use crate::identity::SCHEME;

/// Errors that can occur while opening sources or serving their tiles.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum RenderSourceError {
    /// The URI declares a scheme other than the adapter's own.
    #[error("Unsupported scheme {scheme:?} in {uri}, only {own}: sources are supported", own = SCHEME)]
    UnsupportedScheme {
        /// Scheme found in the URI
        scheme: String,
        /// The offending URI
        uri: String,
    },

    /// The URI could not be parsed or has no usable path.
    #[error("Invalid source URI {0}: {1}")]
    InvalidUri(String, String),

    /// Reading the map definition failed.
    #[error("Unable to load map definition {1}: {0}")]
    DefinitionLoadError(#[source] io::Error, PathBuf),

    /// The map builder rejected the map definition.
    #[error("Unable to parse map definition {1}: {0}")]
    DefinitionParseError(#[source] BackendError, PathBuf),

    /// Tile coordinates failed validation.
    #[error(transparent)]
    Coordinate(#[from] TileCoordError),

    /// The renderer failed to render a tile.
    #[error("Unable to render tile {1:#} of source {2}: {0}")]
    RenderError(#[source] BackendError, TileCoord, String),

    /// The rendered tile could not be framed.
    #[error(transparent)]
    FrameError(#[from] FrameError),

    /// Metadata was requested before the source finished initializing.
    #[error("Metadata of source {0} is unavailable")]
    Unavailable(String),

    /// The source was closed.
    #[error("Source {0} is closed")]
    Closed(String),

    /// No map definition with the requested id exists.
    #[error("Source {0} was not found in {1}")]
    SourceNotFound(String, PathBuf),

    /// Directory listing failed.
    #[error("IO error {1}: {0}")]
    IoError(#[source] io::Error, PathBuf),

    /// Configuration could not be parsed.
    #[error("Unable to parse configuration: {0}")]
    ConfigError(#[from] serde_yaml::Error),

    /// Initialization of a source failed. Every caller that waited for the
    /// same initialization receives the same shared error.
    #[error(transparent)]
    Initialization(Arc<RenderSourceError>),
}

impl RenderSourceError {
    /// The error that caused a failure, looking through shared initialization errors.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Initialization(inner) => inner.root(),
            other => other,
        }
    }
}

/// A convenience [`Result`] for `martin-render`.
pub type RenderSourceResult<T> = Result<T, RenderSourceError>;
