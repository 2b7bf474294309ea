use serde::{Deserialize, Serialize};

use crate::core::FetchError;

/// The `{ "success": bool, "data"?: T, "error"?: string }` shape the dashboard
/// backend wraps its responses in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwraps the data of a successful envelope.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Api`] when `success` is false, and [`FetchError::Decode`]
    /// when a successful envelope carries no `data`.
    pub fn into_data(self) -> Result<T, FetchError> {
        if !self.success {
            return Err(FetchError::Api(
                self.error
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| FetchError::Decode("successful envelope without data".into()))
    }
}
