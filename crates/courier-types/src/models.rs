use serde::{Deserialize, Serialize};

/// Public subset of a user record, embedded in message detail responses.
/// The password hash never leaves the database layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}
