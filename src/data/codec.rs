// ============================================================
// Layer 4 — Label Codec
// ============================================================
// Maps raw categorical labels to dense class indices, one codec
// per attribute.
//
// Fit rules:
//   - fit ONCE on the full manifest, before the train/val split,
//     so both partitions share one index space
//   - categories are sorted lexicographically, so the same
//     manifest always produces the same indices
//   - after fitting the codec is frozen and written to disk;
//     `evaluate` loads it instead of refitting
//
// Files (one per attribute, in the artifact directory):
//   age_codec.json, gender_codec.json, accent_codec.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fs, path::Path};

use crate::domain::error::PipelineError;
use crate::domain::labels::{Attribute, LabelTriple, LabeledImage, RawRecord};
use crate::domain::traits::Persistable;

// ─── CategoryCodec ────────────────────────────────────────────────────────────
/// Invertible mapping between one attribute's raw values and
/// the contiguous indices `0..cardinality`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCodec {
    attribute: Attribute,
    /// Sorted, de-duplicated; the position of a value is its index
    classes: Vec<String>,
}

impl CategoryCodec {
    pub fn fit<'a>(attribute: Attribute, values: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            attribute,
            classes: classes.into_iter().map(str::to_owned).collect(),
        }
    }

    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn cardinality(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, value: &str) -> Result<usize, PipelineError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .map_err(|_| PipelineError::UnknownCategory {
                attribute: self.attribute,
                value: value.to_owned(),
            })
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }
}

impl Persistable for CategoryCodec {
    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Cannot write label codec to '{}'", path.display()))
    }

    fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).with_context(|| {
            format!(
                "Cannot read label codec '{}'. Has 'train' been run?",
                path.display()
            )
        })?;
        let codec: CategoryCodec = serde_json::from_str(&json)
            .with_context(|| format!("Corrupt label codec '{}'", path.display()))?;

        // encode() relies on binary search
        if codec.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::DataIntegrity(format!(
                "label codec '{}' is not sorted and de-duplicated",
                path.display()
            ))
            .into());
        }
        Ok(codec)
    }
}

// ─── LabelCodec ───────────────────────────────────────────────────────────────
/// The three per-attribute codecs, fit and persisted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCodec {
    age: CategoryCodec,
    gender: CategoryCodec,
    accent: CategoryCodec,
}

impl LabelCodec {
    /// Fit all three codecs on the full (pre-split) record set
    pub fn fit(records: &[RawRecord]) -> Self {
        let fit_one = |attribute: Attribute| {
            CategoryCodec::fit(attribute, records.iter().map(|r| r.value(attribute)))
        };
        Self {
            age: fit_one(Attribute::Age),
            gender: fit_one(Attribute::Gender),
            accent: fit_one(Attribute::Accent),
        }
    }

    pub fn codec(&self, attribute: Attribute) -> &CategoryCodec {
        match attribute {
            Attribute::Age => &self.age,
            Attribute::Gender => &self.gender,
            Attribute::Accent => &self.accent,
        }
    }

    /// Class counts in `Attribute::ALL` order
    pub fn cardinalities(&self) -> [usize; 3] {
        Attribute::ALL.map(|a| self.codec(a).cardinality())
    }

    pub fn encode(&self, record: &RawRecord) -> Result<LabelTriple, PipelineError> {
        Ok(LabelTriple::new(
            self.age.encode(&record.age)?,
            self.gender.encode(&record.gender)?,
            self.accent.encode(&record.accent)?,
        ))
    }

    /// Encode every record; the first unseen category aborts
    pub fn encode_all(&self, records: &[RawRecord]) -> Result<Vec<LabeledImage>, PipelineError> {
        records
            .iter()
            .map(|r| {
                Ok(LabeledImage {
                    image_path: r.image_path.clone(),
                    labels: self.encode(r)?,
                })
            })
            .collect()
    }

    pub fn decode(&self, labels: &LabelTriple) -> Option<(&str, &str, &str)> {
        Some((
            self.age.decode(labels.age)?,
            self.gender.decode(labels.gender)?,
            self.accent.decode(labels.accent)?,
        ))
    }

    pub fn persist(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        for attribute in Attribute::ALL {
            self.codec(attribute).save(&dir.join(file_name(attribute)))?;
        }
        tracing::debug!("Saved label codecs to '{}'", dir.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let load_one = |attribute: Attribute| -> Result<CategoryCodec> {
            let path = dir.join(file_name(attribute));
            let codec = CategoryCodec::load(&path)?;
            if codec.attribute != attribute {
                return Err(PipelineError::DataIntegrity(format!(
                    "'{}' holds the {} codec, expected {}",
                    path.display(),
                    codec.attribute,
                    attribute
                ))
                .into());
            }
            Ok(codec)
        };
        Ok(Self {
            age: load_one(Attribute::Age)?,
            gender: load_one(Attribute::Gender)?,
            accent: load_one(Attribute::Accent)?,
        })
    }
}

fn file_name(attribute: Attribute) -> String {
    format!("{attribute}_codec.json")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<RawRecord> {
        vec![
            RawRecord::new("twenties", "female", "us", "0.png"),
            RawRecord::new("thirties", "male", "england", "1.png"),
            RawRecord::new("twenties", "male", "indian", "2.png"),
            RawRecord::new("fifties", "female", "us", "3.png"),
        ]
    }

    #[test]
    fn test_indices_are_contiguous_and_sorted() {
        let codec = LabelCodec::fit(&records());
        assert_eq!(codec.cardinalities(), [3, 2, 3]);
        assert_eq!(
            codec.codec(Attribute::Age).classes(),
            &["fifties", "thirties", "twenties"]
        );
        assert_eq!(codec.codec(Attribute::Accent).encode("england").unwrap(), 0);
        assert_eq!(codec.codec(Attribute::Accent).encode("us").unwrap(), 2);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let records = records();
        let codec = LabelCodec::fit(&records);
        for record in &records {
            let triple = codec.encode(record).unwrap();
            let (age, gender, accent) = codec.decode(&triple).unwrap();
            assert_eq!(age, record.age);
            assert_eq!(gender, record.gender);
            assert_eq!(accent, record.accent);
        }
    }

    #[test]
    fn test_unseen_value_is_rejected() {
        let codec = LabelCodec::fit(&records());
        let stranger = RawRecord::new("twenties", "female", "australian", "x.png");
        match codec.encode(&stranger) {
            Err(PipelineError::UnknownCategory { attribute, value }) => {
                assert_eq!(attribute, Attribute::Accent);
                assert_eq!(value, "australian");
            }
            other => panic!("expected UnknownCategory, got {other:?}"),
        }
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let codec = LabelCodec::fit(&records());
        codec.persist(dir.path()).unwrap();

        assert!(dir.path().join("age_codec.json").exists());
        assert!(dir.path().join("gender_codec.json").exists());
        assert!(dir.path().join("accent_codec.json").exists());
        assert_eq!(LabelCodec::load(dir.path()).unwrap(), codec);
    }

    #[test]
    fn test_swapped_codec_files_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let codec = LabelCodec::fit(&records());
        codec.persist(dir.path()).unwrap();
        fs::copy(
            dir.path().join("gender_codec.json"),
            dir.path().join("age_codec.json"),
        )
        .unwrap();

        assert!(LabelCodec::load(dir.path()).is_err());
    }
}
