/// A rectangle defined by its top-left corner and dimensions
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    /// horizontal position of the top-left corner of the rectangle, in pixels
    pub x: i32,
    /// vertical position of the top-left corner of the rectangle, in pixels
    pub y: i32,
    /// width of the rectangle
    pub width: i32,
    /// height of the rectangle
    pub height: i32,
}

impl Rectangle {
    /// Creates a rectangle from its top-left corner and size
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rectangle { x, y, width, height }
    }

    /// Creates a rectangle at the origin with the given size
    pub const fn from_size(width: i32, height: i32) -> Self {
        Rectangle::new(0, 0, width, height)
    }

    /// Creates a rectangle from its top-left and (exclusive) bottom-right corners
    pub const fn from_extremities(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Rectangle::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Exclusive right edge
    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Whether the rectangle covers no pixel
    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Checks whether given point is inside a rectangle
    pub fn contains(&self, point: (i32, i32)) -> bool {
        let (x, y) = point;
        (x >= self.x) && (x < self.right()) && (y >= self.y) && (y < self.bottom())
    }

    /// Checks whether a given rectangle overlaps with this one
    pub fn overlaps(&self, other: &Rectangle) -> bool {
        // if the rectangle is not outside of the other
        // they must overlap
        !(
            // self is left of other
            self.right() < other.x
            // self is right of other
            ||  self.x > other.right()
            // self is above of other
            ||  self.bottom() < other.y
            // self is below of other
            ||  self.y > other.bottom()
        )
    }

    /// Intersection of two rectangles, `None` if they do not share any pixel
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let rect = Rectangle::from_extremities(x0, y0, x1, y1);
        (!rect.is_empty()).then_some(rect)
    }

    /// Rounds every component down to a multiple of `align`
    ///
    /// `align` has to be a power of two.
    pub const fn align_down(self, align: i32) -> Rectangle {
        Rectangle {
            x: align_down(self.x, align),
            y: align_down(self.y, align),
            width: align_down(self.width, align),
            height: align_down(self.height, align),
        }
    }
}

/// Rounds `value` down to a multiple of `align`, which has to be a power of two.
#[inline]
pub const fn align_down(value: i32, align: i32) -> i32 {
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align`, which has to be a power of two.
#[inline]
pub const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}
