// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of arbitrary JSON records into intake log items.
//!
//! The whole record, with its `level` rewritten to a Datadog status name, is
//! serialized into the item's `message`. Static metadata from configuration and
//! the record's own `hostname` become the item's reserved attributes.

use serde::Serialize;
use serde_json::{Map, Value};

/// Key under which non-object records are wrapped.
const WRAPPED_MESSAGE_KEY: &str = "msg";

/// One entry of a `POST /api/v2/logs` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogItem {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddsource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddtags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl LogItem {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        LogItem {
            message: message.into(),
            ddsource: None,
            ddtags: None,
            service: None,
            hostname: None,
        }
    }

    /// Bytes this item is charged against the intake limits.
    ///
    /// Sum of the UTF-8 lengths of every string field.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        self.message.len()
            + self.ddsource.as_ref().map_or(0, String::len)
            + self.ddtags.as_ref().map_or(0, String::len)
            + self.hostname.as_ref().map_or(0, String::len)
            + self.service.as_ref().map_or(0, String::len)
    }
}

/// Metadata copied onto every item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticMetadata {
    /// Integration name, e.g. `nodejs`.
    pub ddsource: Option<String>,
    /// Comma separated tags, e.g. `env:prod,team:logs`.
    pub ddtags: Option<String>,
    pub service: Option<String>,
}

/// Maps a record's level to a Datadog status.
///
/// Numeric levels follow the bunyan/pino scale; strings pass through untouched.
/// Anything else is `debug`.
#[must_use]
pub fn convert_level(level: &Value) -> String {
    match level {
        Value::String(level) => level.clone(),
        Value::Number(level) => level.as_f64().map_or("debug", level_name).to_string(),
        _ => "debug".to_string(),
    }
}

fn level_name(level: f64) -> &'static str {
    if level >= 60.0 {
        "fatal"
    } else if level >= 50.0 {
        "error"
    } else if level >= 40.0 {
        "warning"
    } else if level >= 30.0 {
        "log"
    } else if level >= 20.0 {
        "info"
    } else {
        "debug"
    }
}

/// Stateless record to [`LogItem`] converter.
#[derive(Debug, Clone, Default)]
pub struct RecordTransform {
    metadata: StaticMetadata,
}

impl RecordTransform {
    #[must_use]
    pub fn new(metadata: StaticMetadata) -> Self {
        RecordTransform { metadata }
    }

    /// Converts one record, or returns `None` when there is nothing to ship.
    ///
    /// `null` and empty strings are skipped. Objects keep their key order with
    /// `level` replaced in place (or appended when missing). Other values are
    /// wrapped as `{"msg": <value>}`.
    #[must_use]
    pub fn transform(&self, record: Value) -> Option<LogItem> {
        let mut fields = match record {
            Value::Null => return None,
            Value::String(ref s) if s.is_empty() => return None,
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert(WRAPPED_MESSAGE_KEY.to_string(), other);
                fields
            }
        };

        let level = convert_level(fields.get("level").unwrap_or(&Value::Null));
        fields.insert("level".to_string(), Value::String(level));

        let hostname = fields
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_string);

        Some(LogItem {
            message: Value::Object(fields).to_string(),
            ddsource: self.metadata.ddsource.clone(),
            ddtags: self.metadata.ddtags.clone(),
            service: self.metadata.service.clone(),
            hostname,
        })
    }
}
