use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box stored as top-left corner plus size.
///
/// Three layouts are used across the tracker:
/// - TLWH: top-left x, top-left y, width, height (storage)
/// - TLBR: x1, y1, x2, y2 (detector input and tracker output)
/// - XYAH: center x, center y, aspect ratio (w/h), height (Kalman measurement)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the box
    pub width: f32,
    /// Height of the box
    pub height: f32,
}

impl Rect {
    /// Create a box from top-left coordinates and size (TLWH).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a box from corners (x1, y1, x2, y2).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Create a box from center, aspect ratio (w/h) and height.
    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Convert to TLBR: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// Convert to TLWH: (x, y, width, height).
    #[inline]
    pub fn to_tlwh(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Convert to XYAH: (center_x, center_y, aspect_ratio, height). A box with
    /// zero height gets aspect ratio 0.
    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, self.height]
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area of the box.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// A box is usable by the tracker when every coordinate is finite and it
    /// has a strictly positive extent (x2 > x1, y2 > y1).
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Area of the overlap with another box, 0 when they are disjoint.
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.to_tlbr();
        let [bx1, by1, bx2, by2] = other.to_tlbr();
        let inter_width = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_height = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        inter_width * inter_height
    }

    /// Intersection over Union with another box.
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter_area = self.intersection_area(other);
        let union_area = self.area() + other.area() - inter_area;
        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Fraction of `self` lying inside `outer`, in `[0, 1]`.
    pub fn containment_in(&self, outer: &Rect) -> f32 {
        let area = self.area();
        if area > 0.0 {
            (self.intersection_area(outer) / area).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// IOU matrix of shape (M, N) between `boxes_a` (rows) and `boxes_b` (columns).
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    Array2::from_shape_fn((boxes_a.len(), boxes_b.len()), |(i, j)| {
        boxes_a[i].iou(&boxes_b[j])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_conversions() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(rect.to_tlbr(), [10.0, 20.0, 40.0, 60.0]);

        let xyah = rect.to_xyah();
        assert_eq!(xyah[0], 25.0);
        assert_eq!(xyah[1], 40.0);
        assert!((xyah[2] - 0.75).abs() < 1e-6);
        assert_eq!(xyah[3], 40.0);

        let back = Rect::from_xyah(xyah[0], xyah[1], xyah[2], xyah[3]);
        assert!((back.x - 10.0).abs() < 1e-5);
        assert!((back.width - 30.0).abs() < 1e-5);
    }

    #[test]
    fn test_validity() {
        assert!(Rect::from_tlbr(10.0, 10.0, 50.0, 50.0).is_valid());
        assert!(!Rect::from_tlbr(50.0, 10.0, 10.0, 50.0).is_valid());
        assert!(!Rect::from_tlbr(10.0, 10.0, 10.0, 50.0).is_valid());
        assert!(!Rect::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_containment() {
        let body = Rect::from_tlbr(100.0, 100.0, 200.0, 400.0);
        let face = Rect::from_tlbr(130.0, 110.0, 170.0, 150.0);
        assert!((face.containment_in(&body) - 1.0).abs() < 1e-6);

        let half_out = Rect::from_tlbr(180.0, 110.0, 220.0, 150.0);
        assert!((half_out.containment_in(&body) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_iou_batch_shape() {
        let a = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let b = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(50.0, 50.0, 5.0, 5.0)];
        let m = iou_batch(&a, &b);
        assert_eq!(m.dim(), (1, 2));
        assert_eq!(m[[0, 1]], 0.0);
    }
}
