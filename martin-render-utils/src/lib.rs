#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod coord;
pub use coord::{MAX_ZOOM, TileCoord, TileCoordError};

mod framing;
pub use framing::{FRAME_HEADER_LEN, FrameError, frame_tile, split_frame, unframe_tile};

mod mercator;
pub use mercator::{
    EARTH_CIRCUMFERENCE, EARTH_RADIUS, MAX_LATITUDE, Projection, WORLD_BOUNDS, tile_bbox,
    webmercator_to_wgs84, wgs84_to_webmercator,
};

/// Raw or framed tile payload.
pub type TileData = Vec<u8>;
