//! 2D integer geometry for the play field

use serde::Serialize;

/// Integer position on the play field (screen coordinates, y grows downward)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        dx.hypot(dy)
    }
}

/// Inclusive play field bounds: `0..=width` by `0..=height`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldBounds {
    pub width: i32,
    pub height: i32,
}

impl WorldBounds {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn clamp_x(&self, x: i32) -> i32 {
        x.clamp(0, self.width)
    }

    pub fn clamp_y(&self, y: i32) -> i32 {
        y.clamp(0, self.height)
    }

    pub fn contains(&self, point: &Point) -> bool {
        (0..=self.width).contains(&point.x) && (0..=self.height).contains(&point.y)
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self::new(640, 480)
    }
}
