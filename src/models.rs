use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::preview::PreviewReference;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InputMode {
    Normal,
    EditingPath,
}

/// A file picked by the user, held in memory until it is submitted or replaced.
#[derive(Clone, Debug)]
pub struct SelectedFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Arc<[u8]>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk. `~` and environment variables in `raw_path` are expanded,
    /// and the media type is guessed from the extension.
    pub fn from_path(raw_path: &str) -> Result<Self, ClassifyError> {
        let unreadable = |reason: String| ClassifyError::Unreadable {
            path: raw_path.to_string(),
            reason,
        };
        let expanded = shellexpand::full(raw_path.trim()).map_err(|e| unreadable(e.to_string()))?;
        let path = Path::new(expanded.as_ref());
        let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| expanded.to_string());
        let media_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MEDIA_TYPE);
        Ok(Self::new(name, media_type, bytes))
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Body of a successful `/predict` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_emotion: String,
    pub confidence: f64,
    pub full_probabilities: BTreeMap<String, f64>,
}

/// Everything the view needs to draw one frame.
#[derive(Clone, Debug, Default)]
pub struct ClassifierState {
    pub selected: Option<SelectedFile>,
    pub preview: Option<PreviewReference>,
    pub prediction: Option<PredictionResult>,
    pub error: Option<String>,
    pub loading: bool,
    pub attempt: u32,
    /// When the last request settled, successfully or not.
    pub settled_at: Option<DateTime<Local>>,
}

impl ClassifierState {
    pub fn can_submit(&self) -> bool {
        self.selected.is_some() && !self.loading
    }
}
