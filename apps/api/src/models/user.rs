use serde::Serialize;
use sqlx::FromRow;

/// Public view of a user row, as returned by the auth routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl UserProfile {
    /// Profile for an identity with no stored row.
    pub fn guest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: Some("Guest".to_string()),
        }
    }
}
