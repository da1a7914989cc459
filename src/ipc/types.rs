use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Authenticated identity forwarded by the hosting layer. Absent only on
    /// the core workspace methods.
    #[serde(default)]
    pub auth: Option<Identity>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub organization: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Staff,
    Student,
    SuperAdmin,
}

impl Role {
    /// Roles allowed to create and mutate attendance and result records.
    pub fn is_staff(self) -> bool {
        matches!(
            self,
            Role::Admin | Role::Teacher | Role::Staff | Role::SuperAdmin
        )
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
