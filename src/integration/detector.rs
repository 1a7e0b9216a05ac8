//! Trait for object detection inference backends.

use crate::tracker::Detection;

/// Trait for object detection inference backends.
///
/// Implement this trait to connect any detection model to the tracker.
/// Detectors with a re-identification head should attach the embedding to
/// each detection (`Detection::with_embedding`).
///
/// # Example
///
/// ```ignore
/// use deepsort_rs::{DetectionSource, Detection};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, input: &[u8], width: u32, height: u32) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference and return detections
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    /// Error type for detection failures.
    type Error;

    /// Run inference on raw image data and return detections.
    ///
    /// # Arguments
    /// * `input` - Raw image bytes (format depends on implementation)
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    ///
    /// # Returns
    /// A vector of `Detection` objects, or an error.
    fn detect(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, Self::Error>;
}

/// Helper trait for converting model-specific outputs to `Detection`.
///
/// Implement this for your model's output format to enable easy conversion.
pub trait IntoDetections {
    /// Convert the output into a vector of detections.
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

/// Rows of `[x1, y1, x2, y2, score, class_id]`, the usual post-NMS layout.
impl IntoDetections for &[[f32; 6]] {
    fn into_detections(self) -> Vec<Detection> {
        self.iter()
            .map(|&[x1, y1, x2, y2, score, class_id]| {
                Detection::new(x1, y1, x2, y2, score, class_id as i32)
            })
            .collect()
    }
}

/// Post-NMS rows paired with their embeddings.
impl IntoDetections for Vec<([f32; 6], Vec<f32>)> {
    fn into_detections(self) -> Vec<Detection> {
        self.into_iter()
            .map(|([x1, y1, x2, y2, score, class_id], embedding)| {
                Detection::new(x1, y1, x2, y2, score, class_id as i32).with_embedding(embedding)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_into_detections() {
        let rows: [[f32; 6]; 2] = [
            [0.0, 0.0, 10.0, 20.0, 0.8, 1.0],
            [5.0, 5.0, 15.0, 25.0, 0.6, 0.0],
        ];
        let dets = rows.as_slice().into_detections();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_id(), 1);
        assert_eq!(dets[1].bbox().to_tlbr(), [5.0, 5.0, 15.0, 25.0]);
    }

    #[test]
    fn test_rows_with_embeddings() {
        let rows: Vec<([f32; 6], Vec<f32>)> =
            vec![([0.0, 0.0, 10.0, 20.0, 0.8, 0.0], vec![1.0, 0.0])];
        let dets = rows.into_detections();
        assert_eq!(dets[0].embedding(), Some(&[1.0, 0.0][..]));
    }
}
