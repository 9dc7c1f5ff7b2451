//! Adapter configuration and its per-source overrides.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::RenderSourceResult;
use crate::backend::{BuildOptions, RenderOptions};
use crate::identity::SourceIdentity;

/// Default width and height of a rendered tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;
/// Default number of pixels rendered around each tile.
pub const DEFAULT_BUFFER_SIZE: u32 = 128;
/// Default pixel density multiplier.
pub const DEFAULT_SCALE: f64 = 1.0;

/// Config values that did not match any known key.
pub type UnrecognizedValues = HashMap<String, serde_yaml::Value>;
/// Names of the config keys that were not recognized.
pub type UnrecognizedKeys = HashSet<String>;

/// Configuration shared by every source of a registry.
///
/// `tileSize`, `bufferSize` and `scale` may be overridden per source
/// through the query string of its URI.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum number of render contexts alive per source. Defaults to the number of CPUs.
    pub pool_size: Option<usize>,
    /// Width and height of a rendered tile in pixels
    pub tile_size: u32,
    /// Pixels rendered around a tile
    pub buffer_size: u32,
    /// Reject malformed map definitions instead of ignoring what cannot be parsed
    pub strict: bool,
    /// Pixel density multiplier
    pub scale: f64,

    /// Keys that did not match any field, reported by [`Self::finalize`]
    #[serde(flatten, skip_serializing)]
    pub unrecognized: UnrecognizedValues,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            tile_size: DEFAULT_TILE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            strict: false,
            scale: DEFAULT_SCALE,
            unrecognized: UnrecognizedValues::default(),
        }
    }
}

impl RenderConfig {
    /// Parses a YAML document. Unknown keys are kept in [`Self::unrecognized`].
    pub fn from_yaml_str(yaml: &str) -> RenderSourceResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Logs a warning for every unrecognized key and returns them.
    pub fn finalize(&mut self) -> UnrecognizedKeys {
        let keys: UnrecognizedKeys = self.unrecognized.keys().cloned().collect();
        for key in &keys {
            warn!("Ignoring unrecognized render configuration key '{key}'. Please check your configuration file for typos.");
        }
        keys
    }

    /// Number of render contexts a source may keep alive.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(num_cpus::get)
    }

    /// Options for building the render contexts of `identity`.
    #[must_use]
    pub fn build_options(&self, identity: &SourceIdentity) -> BuildOptions {
        BuildOptions {
            strict: self.strict,
            base_path: identity.base_dir().to_path_buf(),
            tile_size: query_override(identity, "tileSize", self.tile_size),
            buffer_size: query_override(identity, "bufferSize", self.buffer_size),
        }
    }

    /// Options for rendering tiles of `identity`.
    #[must_use]
    pub fn render_options(&self, identity: &SourceIdentity) -> RenderOptions {
        let scale = query_override(identity, "scale", self.scale);
        RenderOptions {
            tile_size: query_override(identity, "tileSize", self.tile_size),
            scale: if scale.is_finite() && scale > 0.0 {
                scale
            } else {
                warn!("Ignoring scale={scale} of source {identity}: must be a positive number");
                self.scale
            },
        }
    }
}

fn query_override<T: FromStr>(identity: &SourceIdentity, key: &str, default: T) -> T {
    match identity.query().get(key) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring {key}={value:?} of source {identity}: not a valid number");
            default
        }),
    }
}
