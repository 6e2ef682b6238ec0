//! Shared geometry types used across multiple modules.

use serde::{Deserialize, Serialize};

/// A rectangle representing geometry.
///
/// Width and height are signed so that intermediate layout arithmetic
/// (gaps, borders, off-screen parking) never has to round-trip through
/// unsigned casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Center X coordinate
    pub fn center_x(&self) -> i32 {
        self.x + self.width / 2
    }

    /// Center Y coordinate
    pub fn center_y(&self) -> i32 {
        self.y + self.height / 2
    }

    /// Right edge (exclusive)
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive)
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Area of the intersection with another rectangle, 0 if disjoint
    pub fn intersect_area(&self, other: &Rect) -> i64 {
        let w = (self.right().min(other.right()) - self.x.max(other.x)).max(0);
        let h = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0);
        w as i64 * h as i64
    }

    /// Whether a point lies inside this rectangle
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_center() {
        let rect = Rect::new(0, 0, 100, 100);
        assert_eq!(rect.center_x(), 50);
        assert_eq!(rect.center_y(), 50);

        let rect = Rect::new(10, 20, 100, 200);
        assert_eq!(rect.center_x(), 60);
        assert_eq!(rect.center_y(), 120);
    }

    #[test]
    fn test_intersect_area() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersect_area(&b), 2500);

        let far = Rect::new(500, 500, 10, 10);
        assert_eq!(a.intersect_area(&far), 0);
    }

    #[test]
    fn test_contains() {
        let rect = Rect::new(1920, 0, 1920, 1080);
        assert!(rect.contains(1920, 0));
        assert!(!rect.contains(3840, 10));
        assert!(!rect.contains(100, 100));
    }
}
