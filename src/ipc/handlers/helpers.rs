use crate::ipc::error::err;
use chrono::{DateTime, NaiveDate};
use serde_json::json;

/// Handler-level failure, rendered into the JSON error envelope.
/// Every domain error carries one of the codes from the taxonomy:
/// bad_params, conflict, not_found, capacity_exceeded,
/// invalid_credentials, db_* for store failures.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
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

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn update(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn delete(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
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

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Truncate an incoming date to the calendar day it names.
/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn normalize_date(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    if let Ok(d) = t.parse::<NaiveDate>() {
        return Ok(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    Err(HandlerErr::bad_params(
        "date must be YYYY-MM-DD or RFC 3339",
    ))
}
