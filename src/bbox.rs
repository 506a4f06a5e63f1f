use opencv::core;
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-width-height format, contains left top corner and width-height
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ltwh;
impl BBoxFormat for Ltwh {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// Integer pixel box, the meaning of the four values is given by `F`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BBox<F: BBoxFormat>([i32; 4], PhantomData<F>);

impl<F: BBoxFormat> From<BBox<F>> for [i32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[i32; 4] {
        &self.0
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        BBox([left, top, right, bottom], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> i32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> i32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> i32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> i32 {
        self.0[3]
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.left() < self.right() && self.top() < self.bottom()
    }

    #[inline]
    pub fn area(&self) -> i64 {
        span(self.left(), self.right()).saturating_mul(span(self.top(), self.bottom()))
    }

    /// Intersection over union, `0.0` for disjoint boxes or an empty union.
    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        let i_left = self.left().max(other.left());
        let i_top = self.top().max(other.top());
        let i_right = self.right().min(other.right());
        let i_bottom = self.bottom().min(other.bottom());

        // f64 so boxes spanning the whole i32 range cannot overflow
        let area = |l: i32, t: i32, r: i32, b: i32| span(l, r) as f64 * span(t, b) as f64;
        let i_area = area(i_left, i_top, i_right, i_bottom);
        let union = area(self.left(), self.top(), self.right(), self.bottom())
            + area(other.left(), other.top(), other.right(), other.bottom())
            - i_area;

        if union <= 0.0 {
            return 0.0;
        }

        (i_area / union) as f32
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }
}

/// Non-negative extent between two coordinates, widened before subtracting.
#[inline(always)]
fn span(lo: i32, hi: i32) -> i64 {
    (hi as i64 - lo as i64).max(0)
}

impl BBox<Ltwh> {
    #[inline]
    pub fn ltwh(left: i32, top: i32, width: i32, height: i32) -> Self {
        BBox([left, top, width, height], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> i32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> i32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> i32 {
        self.0[3]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    /// Part of the region lying inside a `cols`x`rows` frame, `None` when nothing is left.
    pub fn clip(&self, cols: i32, rows: i32) -> Option<BBox<Ltwh>> {
        if self.is_empty() {
            return None;
        }

        let left = self.left().max(0);
        let top = self.top().max(0);
        let right = self.left().saturating_add(self.width()).min(cols);
        let bottom = self.top().saturating_add(self.height()).min(rows);

        if left >= right || top >= bottom {
            return None;
        }

        Some(BBox::ltwh(left, top, right - left, bottom - top))
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        BBox::ltwh(v.0[0], v.0[1], v.0[2] - v.0[0], v.0[3] - v.0[1])
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        BBox::ltrb(v.0[0], v.0[1], v.0[0] + v.0[2], v.0[1] + v.0[3])
    }
}

impl From<core::Rect> for BBox<Ltwh> {
    #[inline]
    fn from(r: core::Rect) -> Self {
        BBox::ltwh(r.x, r.y, r.width, r.height)
    }
}

impl From<BBox<Ltwh>> for core::Rect {
    #[inline]
    fn from(b: BBox<Ltwh>) -> Self {
        core::Rect::new(b.left(), b.top(), b.width(), b.height())
    }
}
