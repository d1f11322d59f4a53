//! Drawn paths and their opaque wire segments.
//!
//! The replication protocol only ever sees [`EncodedPath`]: a non-empty text
//! segment without `%`. The typed [`Path`] exists for the input side (turning
//! strokes into segments) and for canvases that want coordinates back.
//!
//! Segment format produced by [`Path::encode`]:
//! ```text
//! color;x,y;x,y;...      e.g.  red;10,20;30,40
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BoardError;

/// Separator between path segments inside a board payload.
pub const PATH_SEPARATOR: char = '%';

/// One path exactly as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedPath(String);

impl EncodedPath {
    pub fn new(segment: impl Into<String>) -> Result<Self, BoardError> {
        let segment = segment.into();
        if segment.is_empty() || segment.contains(PATH_SEPARATOR) {
            return Err(BoardError::InvalidPath(segment));
        }
        Ok(Self(segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pen color of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathColor {
    Black,
    Red,
    Rgb(u8, u8, u8),
}

impl PathColor {
    pub fn to_rgb(self) -> (u8, u8, u8) {
        match self {
            PathColor::Black => (0, 0, 0),
            PathColor::Red => (255, 0, 0),
            PathColor::Rgb(r, g, b) => (r, g, b),
        }
    }
}

impl fmt::Display for PathColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathColor::Black => f.write_str("black"),
            PathColor::Red => f.write_str("red"),
            PathColor::Rgb(r, g, b) => write!(f, "#{r:02x}{g:02x}{b:02x}"),
        }
    }
}

impl FromStr for PathColor {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "black" => Ok(PathColor::Black),
            "red" => Ok(PathColor::Red),
            hex if hex.len() == 7 && hex.is_ascii() && hex.starts_with('#') => {
                let channel = |range: std::ops::Range<usize>| {
                    u8::from_str_radix(&hex[range], 16).map_err(|_| BoardError::InvalidPath(s.to_string()))
                };
                Ok(PathColor::Rgb(channel(1..3)?, channel(3..5)?, channel(5..7)?))
            }
            _ => Err(BoardError::InvalidPath(s.to_string())),
        }
    }
}

/// Point in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl FromStr for Point {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| BoardError::InvalidPath(s.to_string()))?;
        let coord = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|_| BoardError::InvalidPath(s.to_string()))
        };
        Ok(Point::new(coord(x)?, coord(y)?))
    }
}

/// A stroke drawn with one color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub color: PathColor,
    pub points: Vec<Point>,
}

impl Path {
    pub fn new(color: PathColor, points: Vec<Point>) -> Self {
        Self { color, points }
    }

    pub fn encode(&self) -> EncodedPath {
        let mut segment = self.color.to_string();
        for p in &self.points {
            segment.push_str(&format!(";{},{}", p.x, p.y));
        }
        // Colors and integers never produce '%'.
        EncodedPath(segment)
    }

    pub fn decode(encoded: &EncodedPath) -> Result<Self, BoardError> {
        let mut fields = encoded.as_str().split(';');
        let color = fields
            .next()
            .ok_or_else(|| BoardError::InvalidPath(encoded.to_string()))?
            .parse::<PathColor>()?;
        let points = fields.map(str::parse).collect::<Result<Vec<Point>, _>>()?;
        Ok(Self { color, points })
    }
}
