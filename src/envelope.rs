//! Decoding for the backend's uniform response envelope.
//!
//! Every response body is `{success, data?, error?, message?}`; paginated
//! lists nest `{data: [T], pagination: {...}}` inside `data`. Domain date
//! strings are decoded by trying two ISO-8601 variants in order.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

/// Decode a 2xx body into the typed payload.
pub fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let envelope: Envelope<T> = serde_json::from_slice(body).map_err(|e| ApiError::Decoding {
        cause: e.to_string(),
    })?;

    if !envelope.success {
        return Err(ApiError::Server {
            message: envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    envelope.data.ok_or(ApiError::NoData)
}

/// Decode a 2xx body whose payload is a paginated list.
pub fn decode_paginated<T: DeserializeOwned>(body: &[u8]) -> Result<Paginated<T>, ApiError> {
    decode_envelope(body)
}

/// Decode a 2xx body from an endpoint that acknowledges without a payload.
/// Unlike [`decode_envelope`], an absent `data` is fine here.
pub fn decode_ack(body: &[u8]) -> Result<(), ApiError> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| ApiError::Decoding {
            cause: e.to_string(),
        })?;

    if !envelope.success {
        return Err(ApiError::Server {
            message: envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    Ok(())
}

/// Best-effort extraction of a human-readable message from a non-2xx body.
pub fn decode_error_message(body: &[u8]) -> Option<String> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(body).ok()?;
    envelope.error.or(envelope.message)
}

const ISO8601_NO_ZONE: &str = "%Y-%m-%dT%H:%M:%S";

/// Decode a domain date string, trying ISO-8601 with fractional seconds and
/// offset first, then the bare `YYYY-MM-DDTHH:MM:SS` form assumed UTC.
pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, ISO8601_NO_ZONE) {
        return Ok(naive.and_utc());
    }

    Err(ApiError::Decoding {
        cause: format!("unrecognized timestamp format: '{raw}'"),
    })
}

/// `#[serde(with = "envelope::flexible_timestamp")]` for domain date fields.
pub mod flexible_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        decode_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }
}
