//! Shape validation for incoming operations.
//!
//! Runs before any store is touched; a rejected operation writes nothing.

use crate::error::{BtError, BtResult};
use crate::operation::{CreateItem, DerivedField, Operation, RecordEvent, UpdateDerivedField};
use crate::time;
use chrono::{DateTime, Utc};

const MAX_TAG_LEN: usize = 32;
const MAX_LOCATION_LEN: usize = 16;
const MAX_KEY_LEN: usize = 64;

/// Validate an operation and normalize its timestamps to storage precision.
pub fn validate(op: Operation) -> BtResult<Operation> {
    match op {
        Operation::CreateItem(op) => validate_create(op).map(Operation::CreateItem),
        Operation::RecordEvent(op) => validate_event(op).map(Operation::RecordEvent),
        Operation::UpdateDerivedField(op) => validate_update(op).map(Operation::UpdateDerivedField),
    }
}

/// Tags: 1-32 characters of `[A-Za-z0-9_-]`.
pub fn validate_tag(tag: &str) -> BtResult<()> {
    check_code("item tag", tag, MAX_TAG_LEN)
}

/// Location codes: 1-16 characters of `[A-Za-z0-9_-]`.
pub fn validate_location(code: &str) -> BtResult<()> {
    check_code("location code", code, MAX_LOCATION_LEN)
}

fn check_code(what: &str, value: &str, max_len: usize) -> BtResult<()> {
    if value.is_empty() {
        return Err(BtError::validation(format!("{} is required", what)));
    }
    if value.len() > max_len {
        return Err(BtError::validation(format!(
            "{} '{}' is longer than {} characters",
            what, value, max_len
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BtError::validation(format!(
            "{} '{}' may only contain letters, digits, '-' and '_'",
            what, value
        )));
    }
    Ok(())
}

fn check_key(what: &str, key: &str) -> BtResult<()> {
    if key.trim().is_empty() {
        return Err(BtError::validation(format!("{} is required", what)));
    }
    if key.len() > MAX_KEY_LEN || key.chars().any(char::is_whitespace) {
        return Err(BtError::validation(format!(
            "{} '{}' must be at most {} characters without whitespace",
            what, key, MAX_KEY_LEN
        )));
    }
    Ok(())
}

fn check_risk(score: f64) -> BtResult<()> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(BtError::validation(format!(
            "risk score {} must be within [0, 1]",
            score
        )));
    }
    Ok(())
}

fn check_timestamp(what: &str, ts: &DateTime<Utc>) -> BtResult<()> {
    if !time::is_storable(ts) {
        return Err(BtError::validation(format!(
            "{} {} is outside years 0000-9999",
            what, ts
        )));
    }
    Ok(())
}

fn validate_create(op: CreateItem) -> BtResult<CreateItem> {
    validate_tag(&op.tag)?;
    if op.routing.is_empty() {
        return Err(BtError::validation("routing must contain at least one stop"));
    }
    for stop in &op.routing {
        validate_location(stop)?;
    }
    validate_location(&op.origin)?;
    if let Some(owner) = &op.owner_ref {
        if owner.trim().is_empty() {
            return Err(BtError::validation("owner reference must not be blank"));
        }
    }
    check_risk(op.risk_score)?;
    Ok(op)
}

fn validate_event(mut op: RecordEvent) -> BtResult<RecordEvent> {
    check_key("event id", &op.event_id)?;
    validate_tag(&op.tag)?;
    validate_location(&op.location)?;
    check_timestamp("event timestamp", &op.timestamp)?;
    op.timestamp = time::normalize(op.timestamp);
    Ok(op)
}

fn validate_update(mut op: UpdateDerivedField) -> BtResult<UpdateDerivedField> {
    check_key("request id", &op.request_id)?;
    validate_tag(&op.tag)?;
    if let DerivedField::RiskScore(score) = op.field {
        check_risk(score)?;
    }
    check_timestamp("computed_at", &op.computed_at)?;
    op.computed_at = time::normalize(op.computed_at);
    Ok(op)
}
