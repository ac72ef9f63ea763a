// ============================================================
// Layer 4 — Manifest Loader
// ============================================================
// Reads the tabular manifest that lists every spectrogram and
// its three raw labels, using the csv crate.
//
// Expected header (extra columns are ignored):
//
//   age,gender,accent,filename_spectrogram
//   twenties,female,us,spectrograms/0001.png
//   ,male,england,spectrograms/0002.png        ← dropped (missing age)
//
// `filename` and `path` are accepted as aliases of the image
// column; when several are present the first in IMAGE_COLUMNS
// order wins, so an audio `filename` next to
// `filename_spectrogram` is ignored. A row with any missing value
// is dropped entirely before anything else happens; a malformed
// row (wrong field count, broken quoting) aborts the run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::error::PipelineError;
use crate::domain::labels::RawRecord;
use crate::domain::traits::RecordSource;

/// Column names accepted for the image path, in lookup order
const IMAGE_COLUMNS: [&str; 3] = ["filename_spectrogram", "filename", "path"];

/// Cell values treated as missing, compared case-insensitively
const MISSING_MARKERS: [&str; 5] = ["", "na", "nan", "null", "none"];

/// Positions of the four used columns in the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    age: usize,
    gender: usize,
    accent: usize,
    image: usize,
}

impl Columns {
    /// Every required column must be present in the header row,
    /// otherwise every row would silently count as "missing".
    fn locate(headers: &csv::StringRecord) -> Result<Self, PipelineError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| {
                PipelineError::DataIntegrity(format!("manifest has no '{name}' column"))
            })
        };

        let age = required("age")?;
        let gender = required("gender")?;
        let accent = required("accent")?;
        let image = IMAGE_COLUMNS.iter().find_map(|&c| find(c)).ok_or_else(|| {
            PipelineError::DataIntegrity(format!(
                "manifest has no image column (expected one of {IMAGE_COLUMNS:?})"
            ))
        })?;

        Ok(Self { age, gender, accent, image })
    }
}

/// Loads labelled spectrogram references from a CSV manifest.
/// Implements the RecordSource trait from Layer 3.
pub struct CsvManifest {
    path: PathBuf,
    /// Relative image paths are joined onto this directory when set
    image_root: Option<PathBuf>,
}

impl CsvManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image_root: None,
        }
    }

    pub fn with_image_root(mut self, root: Option<impl Into<PathBuf>>) -> Self {
        self.image_root = root.map(Into::into);
        self
    }

    fn resolve(&self, image: &str) -> PathBuf {
        let image = Path::new(image);
        match &self.image_root {
            Some(root) if image.is_relative() => root.join(image),
            _ => image.to_path_buf(),
        }
    }
}

impl RecordSource for CsvManifest {
    fn load_all(&self) -> Result<Vec<RawRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .with_context(|| format!("Cannot open manifest '{}'", self.path.display()))?;

        let columns = Columns::locate(reader.headers()?)?;
        tracing::debug!("Manifest columns: {:?}", columns);

        let mut records = Vec::new();
        let mut dropped = 0usize;

        for (line, row) in reader.records().enumerate() {
            // +2: one for the header, one for 1-based numbering
            let row = row.map_err(|e| {
                PipelineError::DataIntegrity(format!(
                    "malformed manifest row {} in '{}': {e}",
                    line + 2,
                    self.path.display()
                ))
            })?;

            match complete(&row, columns) {
                Some((age, gender, accent, image)) => {
                    records.push(RawRecord::new(age, gender, accent, self.resolve(&image)));
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            tracing::warn!("Dropped {} manifest rows with missing values", dropped);
        }
        tracing::info!(
            "Loaded {} labelled spectrograms from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

fn present(cell: Option<&str>) -> Option<String> {
    cell.filter(|v| !MISSING_MARKERS.iter().any(|m| v.trim().eq_ignore_ascii_case(m)))
        .map(str::to_owned)
}

/// Returns the four cells only when none of them is missing
fn complete(row: &csv::StringRecord, columns: Columns) -> Option<(String, String, String, String)> {
    Some((
        present(row.get(columns.age))?,
        present(row.get(columns.gender))?,
        present(row.get(columns.accent))?,
        present(row.get(columns.image))?,
    ))
}
