//! User-facing wording for annotations and narration.
//!
//! A `Labels` value is built once (from a preset, optionally overridden by a
//! JSON file) and shared read-only by the renderer and the narrator.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::face::{FaceResult, Gender};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    /// BCP 47 tag handed to the speech provider.
    pub locale: String,
    pub gender_caption: String,
    pub age_caption: String,
    pub expression_caption: String,
    pub male: String,
    pub female: String,
    pub unknown: String,
    /// Raw detector expression label to display name.
    pub expressions: IndexMap<String, String>,
    /// Narration for one face; `{gender}`, `{age}` and `{expression}` are substituted.
    pub sentence: String,
    /// Joins the sentences of a multi-face batch.
    pub separator: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self::english()
    }
}

impl Labels {
    pub fn english() -> Self {
        Self {
            locale: "en-US".to_string(),
            gender_caption: "Gender".to_string(),
            age_caption: "Age".to_string(),
            expression_caption: "Expression".to_string(),
            male: "Male".to_string(),
            female: "Female".to_string(),
            unknown: "Unknown".to_string(),
            expressions: [
                ("neutral", "Neutral"),
                ("surprised", "Surprised"),
                ("happy", "Happy"),
                ("angry", "Angry"),
                ("disgusted", "Disgusted"),
                ("sad", "Sad"),
                ("fearful", "Fearful"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            sentence: "{gender}, {age} years old, {expression}".to_string(),
            separator: ". ".to_string(),
        }
    }

    pub fn vietnamese() -> Self {
        Self {
            locale: "vi-VN".to_string(),
            gender_caption: "Giới tính".to_string(),
            age_caption: "Tuổi".to_string(),
            expression_caption: "Cảm xúc".to_string(),
            male: "Nam".to_string(),
            female: "Nữ".to_string(),
            unknown: "Không rõ".to_string(),
            expressions: [
                ("neutral", "Bình thường"),
                ("surprised", "Ngạc nhiên"),
                ("happy", "Hạnh phúc"),
                ("angry", "Tức giận"),
                ("disgusted", "Kinh tởm"),
                ("sad", "Buồn bã"),
                ("fearful", "Sợ hãi"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            sentence: "{gender}, {age} tuổi, cảm xúc {expression}".to_string(),
            separator: ". ".to_string(),
        }
    }

    /// Preset by short locale name (`en`, `vi`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "en" | "en-us" | "english" => Some(Self::english()),
            "vi" | "vi-vn" | "vietnamese" => Some(Self::vietnamese()),
            _ => None,
        }
    }

    /// Loads overrides from a JSON file on top of `base`. Fields missing from
    /// the file keep the base value; expression names are merged.
    pub fn with_overrides_from(base: Self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels file: {:?}", path))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse labels file: {:?}", path))?;

        let mut merged = serde_json::to_value(&base)?;
        if let (Some(target), Some(source)) = (merged.as_object_mut(), value.as_object()) {
            for (key, v) in source {
                if key == "expressions" {
                    if let (Some(serde_json::Value::Object(names)), Some(overrides)) =
                        (target.get_mut(key), v.as_object())
                    {
                        for (label, name) in overrides {
                            names.insert(label.clone(), name.clone());
                        }
                        continue;
                    }
                }
                target.insert(key.clone(), v.clone());
            }
        }
        serde_json::from_value(merged)
            .with_context(|| format!("Invalid labels in {:?}", path))
    }

    pub fn expression_name<'a>(&'a self, label: &'a str) -> &'a str {
        self.expressions.get(label).map(String::as_str).unwrap_or(label)
    }

    pub fn gender_name(&self, gender: Option<Gender>) -> &str {
        match gender {
            Some(Gender::Male) => &self.male,
            Some(Gender::Female) => &self.female,
            None => &self.unknown,
        }
    }

    /// Text lines drawn next to a face. Fields the detector did not estimate
    /// are left out.
    pub fn annotation_lines(&self, face: &FaceResult) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        if let Some(estimate) = face.gender {
            lines.push(format!(
                "{}: {}",
                self.gender_caption,
                self.gender_name(Some(estimate.gender))
            ));
        }
        if let Some(age) = face.rounded_age() {
            lines.push(format!("{}: {}", self.age_caption, age));
        }
        if let Some(label) = face.dominant_expression() {
            lines.push(format!(
                "{}: {}",
                self.expression_caption,
                self.expression_name(label)
            ));
        }
        lines
    }

    /// Narration sentence for one face.
    pub fn sentence_for(&self, face: &FaceResult) -> String {
        let age = face
            .rounded_age()
            .map(|a| a.to_string())
            .unwrap_or_else(|| self.unknown.clone());
        let expression = face
            .dominant_expression()
            .map(|label| self.expression_name(label))
            .unwrap_or(self.unknown.as_str());
        self.sentence
            .replace("{gender}", self.gender_name(face.gender.map(|g| g.gender)))
            .replace("{age}", &age)
            .replace("{expression}", expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{BoundingBox, GenderEstimate};

    fn face(age: f32, gender: Gender, expressions: &[(&str, f32)]) -> FaceResult {
        let mut face = FaceResult::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9);
        face.age = Some(age);
        face.gender = Some(GenderEstimate {
            gender,
            probability: 0.9,
        });
        face.expressions = expressions.iter().copied().collect();
        face
    }

    #[test]
    fn test_annotation_lines_round_age() {
        let labels = Labels::english();
        let young = labels.annotation_lines(&face(23.4, Gender::Male, &[("happy", 0.8)]));
        let older = labels.annotation_lines(&face(40.6, Gender::Female, &[("sad", 0.8)]));

        assert_eq!(young, vec!["Gender: Male", "Age: 23", "Expression: Happy"]);
        assert_eq!(older, vec!["Gender: Female", "Age: 41", "Expression: Sad"]);
    }

    #[test]
    fn test_annotation_lines_skip_missing_fields() {
        let labels = Labels::english();
        let bare = FaceResult::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9);
        assert!(labels.annotation_lines(&bare).is_empty());
    }

    #[test]
    fn test_vietnamese_sentence() {
        let labels = Labels::vietnamese();
        let sentence = labels.sentence_for(&face(30.2, Gender::Female, &[("neutral", 0.9)]));
        assert_eq!(sentence, "Nữ, 30 tuổi, cảm xúc Bình thường");
    }

    #[test]
    fn test_unknown_expression_label_falls_back_to_raw() {
        let labels = Labels::english();
        assert_eq!(labels.expression_name("contempt"), "contempt");
    }

    #[test]
    fn test_overrides_merge_expression_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        std::fs::write(&path, r#"{"male": "Man", "expressions": {"happy": "Joyful"}}"#).unwrap();

        let labels = Labels::with_overrides_from(Labels::english(), &path).unwrap();

        assert_eq!(labels.male, "Man");
        assert_eq!(labels.female, "Female");
        assert_eq!(labels.expression_name("happy"), "Joyful");
        assert_eq!(labels.expression_name("sad"), "Sad");
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(Labels::preset("VI").map(|l| l.locale), Some("vi-VN".to_string()));
        assert!(Labels::preset("fr").is_none());
    }
}
