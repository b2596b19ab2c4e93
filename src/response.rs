use serde::Serialize;

/// Body returned for one upload: either the overlay plus one entry per disc in rank
/// order, or a single error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        output_image_url: String,
        disc_images: Vec<DiscImage>,
    },
    Failure {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscImage {
    pub url: String,
    pub message: String,
}

impl Response {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}
