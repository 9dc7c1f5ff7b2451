//! Source metadata and its defaulting rules.

use std::collections::BTreeMap;
use std::str::FromStr;

use martin_render_utils::WORLD_BOUNDS;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tilejson::{Bounds, Center, TileJSON, tilejson};
use tracing::warn;

use crate::backend::Parameters;

/// Zoom range used when a map definition declares none.
pub const DEFAULT_MINZOOM: u8 = 0;
/// Zoom range used when a map definition declares none.
pub const DEFAULT_MAXZOOM: u8 = 22;
/// Zoom of the center point derived from bounds.
pub const DEFAULT_CENTER_ZOOM: f64 = 2.0;

/// Read-only summary of a source, derived from the parameters of its map definition.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Source id, the `id` parameter or the definition's file name
    pub id: String,
    /// Display name, defaults to the id
    pub name: String,
    /// Lowest zoom level the source is meant for
    pub minzoom: u8,
    /// Highest zoom level the source is meant for
    pub maxzoom: u8,
    /// `[west, south, east, north]` in WGS84 degrees
    pub bounds: [f64; 4],
    /// `[longitude, latitude, zoom]`
    pub center: [f64; 3],
    /// Comma-separated `interactivity_fields` parameter, split into a list
    pub interactivity_fields: Option<Vec<String>>,
    /// Any other parameter of the map definition, verbatim
    #[serde(flatten)]
    pub other: BTreeMap<String, String>,
}

impl Metadata {
    /// Applies the defaulting rules to the parameters declared by a map definition.
    ///
    /// Values that cannot be parsed are replaced by their defaults.
    /// An inverted zoom range is kept as declared.
    #[must_use]
    pub fn from_parameters(id: &str, parameters: &Parameters) -> Self {
        let mut other = parameters.clone();
        let id = other.remove("id").unwrap_or_else(|| id.to_string());
        let name = other.remove("name").unwrap_or_else(|| id.clone());

        let minzoom = parse_param(&id, "minzoom", other.remove("minzoom"), DEFAULT_MINZOOM);
        let maxzoom = parse_param(&id, "maxzoom", other.remove("maxzoom"), DEFAULT_MAXZOOM);
        if minzoom > maxzoom {
            warn!("Source {id} declares minzoom {minzoom} greater than maxzoom {maxzoom}");
        }

        let bounds = other
            .remove("bounds")
            .and_then(|v| parse_list::<4>(&id, "bounds", &v))
            .unwrap_or(WORLD_BOUNDS);
        let center = other
            .remove("center")
            .and_then(|v| parse_list::<3>(&id, "center", &v))
            .unwrap_or_else(|| default_center(bounds));

        let interactivity_fields = other.remove("interactivity_fields").map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(ToString::to_string)
                .collect()
        });

        Self {
            id,
            name,
            minzoom,
            maxzoom,
            bounds,
            center,
            interactivity_fields,
            other,
        }
    }

    /// `TileJSON` view of this metadata. The `tiles` list is left for the host to fill in.
    #[must_use]
    pub fn to_tilejson(&self) -> TileJSON {
        let [west, south, east, north] = self.bounds;
        let [longitude, latitude, zoom] = self.center;
        let mut tj = tilejson! {
            tiles: vec![],
            name: self.name.clone(),
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            bounds: Bounds::new(west, south, east, north),
            center: Center {
                longitude,
                latitude,
                zoom: center_zoom(zoom),
            },
        };
        if let Some(fields) = &self.interactivity_fields {
            tj.other.insert(
                "interactivity_fields".to_string(),
                Value::from(fields.clone()),
            );
        }
        for (key, value) in &self.other {
            tj.other.insert(key.clone(), Value::from(value.as_str()));
        }
        tj
    }
}

fn default_center(bounds: [f64; 4]) -> [f64; 3] {
    [
        (bounds[2] - bounds[0]) / 2.0 + bounds[0],
        (bounds[3] - bounds[1]) / 2.0 + bounds[1],
        DEFAULT_CENTER_ZOOM,
    ]
}

#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn center_zoom(zoom: f64) -> u8 {
    zoom.round().clamp(0.0, f64::from(u8::MAX)) as u8
}

fn parse_param<T: FromStr>(id: &str, key: &str, value: Option<String>, default: T) -> T {
    let Some(value) = value else {
        return default;
    };
    value.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring {key}={value:?} of source {id}: not a valid number");
        default
    })
}

fn parse_list<const N: usize>(id: &str, key: &str, value: &str) -> Option<[f64; N]> {
    let values = value
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>();
    match values.and_then(|v| <[f64; N]>::try_from(v).ok()) {
        Some(v) => Some(v),
        None => {
            warn!("Ignoring {key}={value:?} of source {id}: expected {N} comma-separated numbers");
            None
        }
    }
}
