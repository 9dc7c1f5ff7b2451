use std::f64::consts::PI;

use crate::TileCoord;

/// Equatorial radius of the WGS84 ellipsoid, in metres.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Circumference of the earth at the equator, in metres.
pub const EARTH_CIRCUMFERENCE: f64 = 2.0 * PI * EARTH_RADIUS;

/// Latitude at which the Web-Mercator square world ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// The full Web-Mercator extent as `[west, south, east, north]` in degrees.
pub const WORLD_BOUNDS: [f64; 4] = [-180.0, -MAX_LATITUDE, 180.0, MAX_LATITUDE];

/// Units of a bounding box returned by [`tile_bbox`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Spherical mercator metres (`EPSG:3857`, a.k.a. `900913`)
    #[default]
    WebMercator,
    /// Longitude/latitude degrees (`EPSG:4326`)
    Wgs84,
}

/// Converts Web-Mercator metres into longitude/latitude degrees.
#[must_use]
pub fn webmercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = f64::atan(f64::sinh(y / EARTH_RADIUS)).to_degrees();
    (lng, lat)
}

/// Converts longitude/latitude degrees into Web-Mercator metres.
///
/// Latitudes beyond [`MAX_LATITUDE`] are clamped to the edge of the mercator square.
#[must_use]
pub fn wgs84_to_webmercator(lng: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lng.to_radians() * EARTH_RADIUS;
    let y = f64::ln(f64::tan(PI / 4.0 + lat.to_radians() / 2.0)) * EARTH_RADIUS;
    (x, y)
}

/// Bounding box `[minx, miny, maxx, maxy]` covered by a tile.
///
/// With `tms` set, `xyz.y` is counted from the bottom of the grid (TMS scheme)
/// instead of the top (XYZ scheme).
#[must_use]
pub fn tile_bbox(xyz: TileCoord, tms: bool, projection: Projection) -> [f64; 4] {
    let tiles = 2_f64.powi(i32::from(xyz.z));
    let tile_size = EARTH_CIRCUMFERENCE / tiles;
    let row = if tms {
        f64::from(xyz.y)
    } else {
        tiles - 1.0 - f64::from(xyz.y)
    };

    let min_x = -0.5 * EARTH_CIRCUMFERENCE + f64::from(xyz.x) * tile_size;
    let min_y = -0.5 * EARTH_CIRCUMFERENCE + row * tile_size;
    let max_x = min_x + tile_size;
    let max_y = min_y + tile_size;

    match projection {
        Projection::WebMercator => [min_x, min_y, max_x, max_y],
        Projection::Wgs84 => {
            let (west, south) = webmercator_to_wgs84(min_x, min_y);
            let (east, north) = webmercator_to_wgs84(max_x, max_y);
            [west, south, east, north]
        }
    }
}
