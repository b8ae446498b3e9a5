/// Face bounding box in ROI-local pixel coordinates.
///
/// Field order follows the (top, right, bottom, left) convention that face
/// embedding models commonly report. `right` and `bottom` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Builds a box from corner coordinates, rounding to whole pixels.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(
            y1.round() as i32,
            x2.round() as i32,
            y2.round() as i32,
            x1.round() as i32,
        )
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersects the box with a `width` × `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let w = width as i32;
        let h = height as i32;
        BoundingBox {
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
            left: self.left.clamp(0, w),
        }
    }

    /// `(left, top, width, height)`, the layout the face store persists.
    pub fn to_xywh(&self) -> (i32, i32, i32, i32) {
        (self.left, self.top, self.width(), self.height())
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.left.max(other.left);
        let iy1 = self.top.max(other.top);
        let ix2 = self.right.min(other.right);
        let iy2 = self.bottom.min(other.bottom);

        let inter = (ix2 - ix1).max(0) as f64 * (iy2 - iy1).max(0) as f64;
        if inter == 0.0 {
            return 0.0;
        }

        let area_a = self.width() as f64 * self.height() as f64;
        let area_b = other.width() as f64 * other.height() as f64;
        inter / (area_a + area_b - inter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn bbox(left: i32, top: i32, w: i32, h: i32) -> BoundingBox {
        BoundingBox::new(top, left + w, top + h, left)
    }

    #[test]
    fn test_dimensions() {
        let b = BoundingBox::new(10, 70, 60, 20);
        assert_eq!(b.width(), 50);
        assert_eq!(b.height(), 50);
        assert!(!b.is_empty());
    }

    #[test]
    fn test_inverted_box_has_zero_size() {
        let b = BoundingBox::new(60, 20, 10, 70);
        assert_eq!(b.width(), 0);
        assert_eq!(b.height(), 0);
        assert!(b.is_empty());
    }

    #[test]
    fn test_from_corners_rounds() {
        let b = BoundingBox::from_corners(10.4, 20.6, 50.5, 80.2);
        assert_eq!(b, BoundingBox::new(21, 51, 80, 10));
    }

    #[test]
    fn test_clamp_to_image() {
        let b = BoundingBox::new(-5, 120, 90, -10).clamp_to(100, 80);
        assert_eq!(b, BoundingBox::new(0, 100, 80, 0));
    }

    #[test]
    fn test_to_xywh() {
        assert_eq!(bbox(5, 6, 40, 50).to_xywh(), (5, 6, 40, 50));
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(10, 10, 100, 100);
        assert_relative_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // intersection 50*100 = 5000, union 15000
        let a = bbox(0, 0, 100, 100);
        let b = bbox(50, 0, 100, 100);
        assert_relative_eq!(a.iou(&b), 5000.0 / 15000.0);
    }

    #[rstest]
    #[case::disjoint(bbox(0, 0, 50, 50), bbox(100, 100, 50, 50))]
    #[case::touching(bbox(0, 0, 50, 50), bbox(50, 0, 50, 50))]
    #[case::degenerate(bbox(0, 0, 0, 100), bbox(0, 0, 50, 50))]
    fn test_iou_zero(#[case] a: BoundingBox, #[case] b: BoundingBox) {
        assert_relative_eq!(a.iou(&b), 0.0);
    }
}
