use serde::Deserialize;
use std::fmt;
use std::path::Path;

pub const DEFAULT_BACKGROUND: [f32; 4] = [0.12, 0.13, 0.16, 1.0];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Called after every successful load with the model's normalized size.
pub type ModelLoadedCallback = Box<dyn FnMut(f32)>;

/// Construction-time viewer settings. Only the plain data fields can come
/// from an options file; `on_model_loaded` is set in code.
#[derive(Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    pub show_grid: bool,
    /// Marker-relative authoring: smaller placement target and a pickable
    /// reference plane.
    pub marker_mode: bool,
    pub background_color: [f32; 4],
    #[serde(skip)]
    pub on_model_loaded: Option<ModelLoadedCallback>,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            show_grid: true,
            marker_mode: false,
            background_color: DEFAULT_BACKGROUND,
            on_model_loaded: None,
        }
    }
}

impl fmt::Debug for ViewerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerOptions")
            .field("show_grid", &self.show_grid)
            .field("marker_mode", &self.marker_mode)
            .field("background_color", &self.background_color)
            .field("on_model_loaded", &self.on_model_loaded.is_some())
            .finish()
    }
}

impl ViewerOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_on_model_loaded<F>(mut self, callback: F) -> Self
    where
        F: FnMut(f32) + 'static,
    {
        self.on_model_loaded = Some(Box::new(callback));
        self
    }
}
