use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtcError {
    #[error("invalid shape: {message}")]
    InvalidShape { message: String },
    #[error("sample {sample}: label id {label} outside class range 0..{classes}")]
    InvalidLabel {
        sample: usize,
        label: usize,
        classes: usize,
    },
    #[error("{context}: {message}")]
    Backend {
        context: &'static str,
        message: String,
    },
}

impl CtcError {
    pub(crate) fn invalid_shape(message: impl Into<String>) -> Self {
        Self::InvalidShape {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_label(sample: usize, label: usize, classes: usize) -> Self {
        Self::InvalidLabel {
            sample,
            label,
            classes,
        }
    }
}
