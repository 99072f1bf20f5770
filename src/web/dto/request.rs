//! Request DTOs for Web API.

use serde::Deserialize;
use validator::Validate;

use super::validation::no_control_chars;

/// Share link creation request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateShareRequest {
    /// File to share.
    #[validate(
        length(min = 1, max = 64, message = "file_id must be 1-64 characters"),
        custom(function = "no_control_chars")
    )]
    pub file_id: String,
    /// Minutes until the link expires (absent = never, 0 = already expired).
    #[serde(default)]
    #[validate(range(min = 0, message = "expires_in_minutes must not be negative"))]
    pub expires_in_minutes: Option<i64>,
    /// Download cap (absent = unlimited).
    #[serde(default)]
    #[validate(range(min = 1, message = "max_downloads must be at least 1"))]
    pub max_downloads: Option<i64>,
}

/// Password supplied in the JSON body of a share download.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SharePasswordRequest {
    /// Password that unlocks the shared file.
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// Password supplied as a query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct PasswordQuery {
    #[serde(default)]
    pub password: Option<String>,
}
