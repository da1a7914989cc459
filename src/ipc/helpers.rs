use rusqlite::Connection;

use super::error::err;
use super::types::{AppState, Identity, Request, Role};

/// Handler-level failure carrying the taxonomy code surfaced on the wire:
/// `not_found`, `conflict`, `forbidden`, `bad_params`, or one of the
/// infrastructure codes.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<crate::calc::CalcError> for HandlerErr {
    fn from(e: crate::calc::CalcError) -> Self {
        // CalcError codes are already taxonomy codes.
        let code = match e.code.as_str() {
            "bad_params" => "bad_params",
            _ => "operation_failed",
        };
        Self::new(code, e.message)
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn require_auth(req: &Request) -> Result<&Identity, HandlerErr> {
    req.auth
        .as_ref()
        .ok_or_else(|| HandlerErr::bad_params("missing auth"))
}

/// admin/teacher/staff/super_admin; a student identity on a staff-only
/// operation is a forbidden, not a missing-param, condition.
pub fn require_staff(req: &Request) -> Result<&Identity, HandlerErr> {
    let identity = require_auth(req)?;
    if !identity.role.is_staff() {
        return Err(HandlerErr::forbidden(
            "only admin, teacher or staff may perform this operation",
        ));
    }
    Ok(identity)
}

pub fn require_student(req: &Request) -> Result<&Identity, HandlerErr> {
    let identity = require_auth(req)?;
    if identity.role != Role::Student {
        return Err(HandlerErr::forbidden(
            "this operation is for student accounts",
        ));
    }
    Ok(identity)
}
