use std::fmt::{Display, Formatter};

/// Highest zoom level whose tile grid still fits the `u32` tile numbering.
pub const MAX_ZOOM: u8 = 30;

/// A tile address in the quad-tree tiling scheme, with `y` counted from the top.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Zoom level
    pub z: u8,
    /// Column, `0..2^z`
    pub x: u32,
    /// Row, `0..2^z`
    pub y: u32,
}

/// Errors produced while validating tile coordinates.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TileCoordError {
    /// One of the coordinate components is not an integer.
    #[error("Invalid tile coordinate: {axis} value {value:?} is not a number")]
    InvalidCoordinate {
        /// Which component failed to parse (`z`, `x` or `y`)
        axis: &'static str,
        /// The offending input
        value: String,
    },

    /// The coordinate lies outside of the `2^z` by `2^z` tile grid.
    #[error("Tile coordinate {z},{x},{y} is out of range")]
    CoordinateOutOfRange {
        /// Requested zoom level
        z: i64,
        /// Requested column
        x: i64,
        /// Requested row
        y: i64,
    },
}

impl TileCoord {
    /// Validates `(z, x, y)` against the tile grid of zoom `z`.
    ///
    /// A zoom level must be within `0..=MAX_ZOOM`, and both `x` and `y` within `0..2^z`.
    ///
    /// ```
    /// # use martin_render_utils::TileCoord;
    /// assert!(TileCoord::new_checked(1, 1, 1).is_ok());
    /// assert!(TileCoord::new_checked(1, 2, 0).is_err());
    /// assert!(TileCoord::new_checked(-1, 0, 0).is_err());
    /// ```
    pub fn new_checked(z: i64, x: i64, y: i64) -> Result<Self, TileCoordError> {
        let out_of_range = || TileCoordError::CoordinateOutOfRange { z, x, y };

        if !(0..=i64::from(MAX_ZOOM)).contains(&z) {
            return Err(out_of_range());
        }
        let max = 1_i64 << z;
        if !(0..max).contains(&x) || !(0..max).contains(&y) {
            return Err(out_of_range());
        }

        Ok(Self {
            z: u8::try_from(z).map_err(|_| out_of_range())?,
            x: u32::try_from(x).map_err(|_| out_of_range())?,
            y: u32::try_from(y).map_err(|_| out_of_range())?,
        })
    }

    /// Coerces loosely-typed inputs (e.g. URL path segments) into a validated coordinate.
    ///
    /// Integral floating point values such as `"3.0"` are accepted,
    /// anything else that is not an integer is an [`TileCoordError::InvalidCoordinate`].
    pub fn parse(z: &str, x: &str, y: &str) -> Result<Self, TileCoordError> {
        Self::new_checked(coerce("z", z)?, coerce("x", x)?, coerce("y", y)?)
    }

    /// Checks that this coordinate lies on the tile grid of its zoom level.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::new_checked(i64::from(self.z), i64::from(self.x), i64::from(self.y)).is_ok()
    }
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

#[expect(clippy::cast_possible_truncation)]
fn coerce(axis: &'static str, value: &str) -> Result<i64, TileCoordError> {
    let trimmed = value.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    match trimmed.parse::<f64>() {
        // i64::MIN..i64::MAX check keeps the cast exact
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e18 => Ok(v as i64),
        _ => Err(TileCoordError::InvalidCoordinate {
            axis,
            value: value.to_string(),
        }),
    }
}
