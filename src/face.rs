use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box in pixel coordinates of the frame it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenderEstimate {
    pub gender: Gender,
    #[serde(default = "full_confidence")]
    pub probability: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Expression label to confidence. Labels are unique; insertion order is kept
/// and decides ties in [`Expressions::dominant`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expressions(IndexMap<String, f32>);

impl Expressions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the score for `label`. A repeated label keeps its first position.
    pub fn insert(&mut self, label: impl Into<String>, score: f32) {
        self.0.insert(label.into(), score);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(label, score)| (label.as_str(), *score))
    }

    /// Highest-confidence label. Ties go to the label seen first; NaN scores
    /// never win.
    pub fn dominant(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((label, score)),
            }
        }
        best
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for Expressions {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut expressions = Self::new();
        for (label, score) in iter {
            expressions.insert(label, score);
        }
        expressions
    }
}

/// One detected face. Classification fields are optional because not every
/// detector estimates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    #[serde(default = "full_confidence")]
    pub score: f32,
    #[serde(default)]
    pub landmarks: Vec<Point>,
    #[serde(default)]
    pub expressions: Expressions,
    #[serde(default)]
    pub age: Option<f32>,
    #[serde(default)]
    pub gender: Option<GenderEstimate>,
}

impl FaceResult {
    pub fn new(bounding_box: BoundingBox, score: f32) -> Self {
        Self {
            bounding_box,
            score,
            landmarks: Vec::new(),
            expressions: Expressions::new(),
            age: None,
            gender: None,
        }
    }

    /// Age rounded half away from zero, clamped at zero.
    pub fn rounded_age(&self) -> Option<u32> {
        self.age
            .filter(|age| age.is_finite())
            .map(|age| age.round().max(0.0) as u32)
    }

    pub fn dominant_expression(&self) -> Option<&str> {
        self.expressions.dominant().map(|(label, _)| label)
    }

    fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            bounding_box: self.bounding_box.scaled(sx, sy),
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            ..self.clone()
        }
    }
}

/// All faces found in one frame. A new batch replaces the previous one whole.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBatch {
    pub frame_index: u64,
    /// Width and height the face geometry is expressed in.
    pub frame_size: (u32, u32),
    pub faces: Vec<FaceResult>,
}

impl DetectionBatch {
    pub fn new(frame_index: u64, frame_size: (u32, u32), faces: Vec<FaceResult>) -> Self {
        Self {
            frame_index,
            frame_size,
            faces,
        }
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Copy of this batch with geometry rescaled to `size`.
    pub fn resized_to(&self, size: (u32, u32)) -> Self {
        let (frame_w, frame_h) = self.frame_size;
        if frame_w == 0 || frame_h == 0 || self.frame_size == size {
            return Self {
                frame_size: size,
                ..self.clone()
            };
        }
        let sx = size.0 as f32 / frame_w as f32;
        let sy = size.1 as f32 / frame_h as f32;
        Self {
            frame_index: self.frame_index,
            frame_size: size,
            faces: self.faces.iter().map(|f| f.scaled(sx, sy)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dominant_picks_highest_score() {
        let expressions: Expressions =
            [("neutral", 0.2), ("happy", 0.7), ("sad", 0.1)].into_iter().collect();
        assert_eq!(expressions.dominant(), Some(("happy", 0.7)));
    }

    #[test]
    fn test_dominant_tie_goes_to_first_seen() {
        let expressions: Expressions =
            [("surprised", 0.4), ("angry", 0.4), ("sad", 0.2)].into_iter().collect();
        assert_eq!(expressions.dominant().map(|(l, _)| l), Some("surprised"));
    }

    #[test]
    fn test_dominant_ignores_nan() {
        let expressions: Expressions = [("happy", f32::NAN), ("sad", 0.1)].into_iter().collect();
        assert_eq!(expressions.dominant().map(|(l, _)| l), Some("sad"));
        assert_eq!(Expressions::new().dominant(), None);
    }

    #[test]
    fn test_repeated_label_keeps_position() {
        let mut expressions = Expressions::new();
        expressions.insert("happy", 0.5);
        expressions.insert("sad", 0.5);
        expressions.insert("happy", 0.3);
        assert_eq!(expressions.len(), 2);
        assert_eq!(expressions.iter().next(), Some(("happy", 0.3)));
    }

    #[test]
    fn test_rounded_age() {
        let mut face = FaceResult::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9);
        assert_eq!(face.rounded_age(), None);
        face.age = Some(23.4);
        assert_eq!(face.rounded_age(), Some(23));
        face.age = Some(40.6);
        assert_eq!(face.rounded_age(), Some(41));
        face.age = Some(f32::NAN);
        assert_eq!(face.rounded_age(), None);
    }

    #[test]
    fn test_resized_to_scales_boxes_and_landmarks() {
        let mut face = FaceResult::new(BoundingBox::new(10.0, 20.0, 30.0, 40.0), 0.9);
        face.landmarks = vec![Point::new(15.0, 25.0)];
        let batch = DetectionBatch::new(3, (100, 100), vec![face]);

        let resized = batch.resized_to((200, 50));

        assert_eq!(resized.frame_size, (200, 50));
        assert_eq!(resized.frame_index, 3);
        let b = resized.faces[0].bounding_box;
        assert_relative_eq!(b.x, 20.0);
        assert_relative_eq!(b.y, 10.0);
        assert_relative_eq!(b.width, 60.0);
        assert_relative_eq!(b.height, 20.0);
        assert_relative_eq!(resized.faces[0].landmarks[0].x, 30.0);
        assert_relative_eq!(resized.faces[0].landmarks[0].y, 12.5);
    }

    #[test]
    fn test_face_deserializes_with_defaults() {
        let face: FaceResult = serde_json::from_str(
            r#"{"box": {"x": 1, "y": 2, "width": 3, "height": 4},
                "expressions": {"happy": 0.9, "neutral": 0.1},
                "age": 31.2,
                "gender": {"gender": "female", "probability": 0.8}}"#,
        )
        .unwrap();
        assert_relative_eq!(face.score, 1.0);
        assert!(face.landmarks.is_empty());
        assert_eq!(face.dominant_expression(), Some("happy"));
        assert_eq!(face.gender.map(|g| g.gender), Some(Gender::Female));
    }
}
