// ============================================================
// Layer 3 — Label Domain Types
// ============================================================
// The three speaker attributes the model predicts, the dense
// label triple attached to every sample, and the manifest row
// they are derived from.
//
// A manifest row starts life as three raw strings plus an image
// path (RawRecord). Once the LabelCodec has been fit on the full
// manifest every row becomes a LabeledImage: same path, but the
// strings are replaced by contiguous indices.
//
//   RawRecord { age: "twenties", gender: "female", accent: "us", .. }
//        │  LabelCodec::encode
//        ▼
//   LabeledImage { labels: LabelTriple { age: 2, gender: 0, accent: 7 }, .. }

use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

/// One of the three predicted attributes.
///
/// The declaration order is the column order of every `[B, 3]`
/// label tensor and of the pooled evaluation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Age,
    Gender,
    Accent,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [Attribute::Age, Attribute::Gender, Attribute::Accent];

    /// Column of this attribute in a label triple / label tensor
    pub fn index(self) -> usize {
        match self {
            Attribute::Age => 0,
            Attribute::Gender => 1,
            Attribute::Accent => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Age => "age",
            Attribute::Gender => "gender",
            Attribute::Accent => "accent",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dense class indices for one sample, one per attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelTriple {
    pub age: usize,
    pub gender: usize,
    pub accent: usize,
}

impl LabelTriple {
    pub fn new(age: usize, gender: usize, accent: usize) -> Self {
        Self { age, gender, accent }
    }

    pub fn get(&self, attribute: Attribute) -> usize {
        match attribute {
            Attribute::Age => self.age,
            Attribute::Gender => self.gender,
            Attribute::Accent => self.accent,
        }
    }

    /// Labels in `Attribute::ALL` order
    pub fn as_array(&self) -> [usize; 3] {
        [self.age, self.gender, self.accent]
    }

    pub fn from_array([age, gender, accent]: [usize; 3]) -> Self {
        Self { age, gender, accent }
    }
}

/// A manifest row with every required column present.
/// Rows with a missing value never become a RawRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub age: String,
    pub gender: String,
    pub accent: String,
    pub image_path: PathBuf,
}

impl RawRecord {
    pub fn new(
        age: impl Into<String>,
        gender: impl Into<String>,
        accent: impl Into<String>,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            age: age.into(),
            gender: gender.into(),
            accent: accent.into(),
            image_path: image_path.into(),
        }
    }

    /// Raw category string of one attribute
    pub fn value(&self, attribute: Attribute) -> &str {
        match attribute {
            Attribute::Age => &self.age,
            Attribute::Gender => &self.gender,
            Attribute::Accent => &self.accent,
        }
    }
}

/// A manifest row after label encoding. The image is still on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub image_path: PathBuf,
    pub labels: LabelTriple,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_indices_follow_declaration_order() {
        for (i, attribute) in Attribute::ALL.iter().enumerate() {
            assert_eq!(attribute.index(), i);
        }
    }

    #[test]
    fn test_triple_array_round_trip() {
        let triple = LabelTriple::new(3, 1, 4);
        assert_eq!(triple.as_array(), [3, 1, 4]);
        assert_eq!(LabelTriple::from_array(triple.as_array()), triple);
        assert_eq!(triple.get(Attribute::Accent), 4);
    }

    #[test]
    fn test_record_value_by_attribute() {
        let record = RawRecord::new("thirties", "male", "scottish", "a.png");
        assert_eq!(record.value(Attribute::Age), "thirties");
        assert_eq!(record.value(Attribute::Gender), "male");
        assert_eq!(record.value(Attribute::Accent), "scottish");
    }
}
