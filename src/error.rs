#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Please select a valid image file.")]
    NotAnImage { media_type: String },
    #[error("Please select an image before predicting.")]
    NoFileSelected,
    #[error("Could not read {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("A prediction is already in progress.")]
    Busy,
    #[error("{0}")]
    Network(String),
    #[error("{message}")]
    Server { status: Option<u16>, message: String },
}

impl ClassifyError {
    /// Text shown in the error panel. Request failures carry a hint about the endpoint.
    pub fn user_message(&self, endpoint: &str) -> String {
        match self {
            ClassifyError::Network(msg) | ClassifyError::Server { message: msg, .. } => format!(
                "Connection Error: {}. Ensure the inference server is running at {}",
                msg, endpoint
            ),
            other => other.to_string(),
        }
    }
}
