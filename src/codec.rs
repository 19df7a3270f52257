//! Tagged byte frames for cache values
//!
//! Encoding tries bincode, then JSON, then a caller supplied text form. The
//! first byte of a frame names the format so decoding never guesses.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::CacheValue;
use crate::error::{CacheError, CacheResult};

const BINCODE_TAG: u8 = b'B';
const JSON_TAG: u8 = b'J';
const TEXT_TAG: u8 = b'T';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Bincode,
    Json,
    Text,
}

impl FrameFormat {
    pub fn of(frame: &[u8]) -> Option<Self> {
        match frame.first()? {
            &BINCODE_TAG => Some(FrameFormat::Bincode),
            &JSON_TAG => Some(FrameFormat::Json),
            &TEXT_TAG => Some(FrameFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    Text(String),
}

pub fn encode<T: Serialize>(
    key: &str,
    value: &T,
    text_fallback: Option<String>,
) -> CacheResult<Vec<u8>> {
    let bincode_error = match bincode::serialize(value) {
        Ok(bytes) => return Ok(frame(BINCODE_TAG, bytes)),
        Err(e) => e,
    };
    tracing::debug!(key, error = %bincode_error, "bincode encoding failed, trying json");

    let json_error = match serde_json::to_vec(value) {
        Ok(bytes) => return Ok(frame(JSON_TAG, bytes)),
        Err(e) => e,
    };
    tracing::debug!(key, error = %json_error, "json encoding failed, falling back to text");

    match text_fallback {
        Some(text) => Ok(frame(TEXT_TAG, text.into_bytes())),
        None => Err(CacheError::Serialization {
            key: key.to_string(),
            details: format!("bincode: {}; json: {}", bincode_error, json_error),
        }),
    }
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> CacheResult<Decoded<T>> {
    let (tag, body) = frame.split_first().ok_or_else(|| CacheError::Codec {
        details: "empty frame".to_string(),
    })?;

    match *tag {
        BINCODE_TAG => bincode::deserialize(body)
            .map(Decoded::Value)
            .map_err(|e| codec_error("bincode", e)),
        JSON_TAG => serde_json::from_slice(body)
            .map(Decoded::Value)
            .map_err(|e| codec_error("json", e)),
        TEXT_TAG => String::from_utf8(body.to_vec())
            .map(Decoded::Text)
            .map_err(|e| codec_error("text", e)),
        other => Err(CacheError::Codec {
            details: format!("unknown frame tag 0x{:02x}", other),
        }),
    }
}

pub fn encode_value(key: &str, value: &CacheValue) -> CacheResult<Vec<u8>> {
    encode(key, value, Some(value.text_repr()))
}

/// Text frames come back as [`CacheValue::Text`].
pub fn decode_value(frame: &[u8]) -> CacheResult<CacheValue> {
    Ok(match decode(frame)? {
        Decoded::Value(value) => value,
        Decoded::Text(text) => CacheValue::Text(text),
    })
}

fn frame(tag: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tag);
    out.extend(body);
    out
}

fn codec_error(format: &str, error: impl std::fmt::Display) -> CacheError {
    CacheError::Codec {
        details: format!("{} frame: {}", format, error),
    }
}
