/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! Read-only channel configuration handed to every subchannel.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Initial delay before reconnecting after the first failed attempt.
pub const INITIAL_RECONNECT_BACKOFF_MS: &str = "grpc.initial_reconnect_backoff_ms";
/// Upper bound on the reconnect delay.
pub const MAX_RECONNECT_BACKOFF_MS: &str = "grpc.max_reconnect_backoff_ms";
/// Minimum time a connection attempt is given before it is abandoned.
pub const MIN_RECONNECT_BACKOFF_MS: &str = "grpc.min_reconnect_backoff_ms";

#[derive(Debug, thiserror::Error)]
pub enum ChannelArgsError {
    #[error("channel args must be a JSON object of bool, integer or string values: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single channel argument value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelArgValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for ChannelArgValue {
    fn from(v: bool) -> Self {
        ChannelArgValue::Bool(v)
    }
}

impl From<i64> for ChannelArgValue {
    fn from(v: i64) -> Self {
        ChannelArgValue::Int(v)
    }
}

impl From<i32> for ChannelArgValue {
    fn from(v: i32) -> Self {
        ChannelArgValue::Int(v.into())
    }
}

impl From<&str> for ChannelArgValue {
    fn from(v: &str) -> Self {
        ChannelArgValue::Str(v.to_string())
    }
}

impl From<String> for ChannelArgValue {
    fn from(v: String) -> Self {
        ChannelArgValue::Str(v)
    }
}

impl Display for ChannelArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelArgValue::Bool(v) => write!(f, "{v}"),
            ChannelArgValue::Int(v) => write!(f, "{v}"),
            ChannelArgValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// An ordered, immutable set of key/value configuration entries.
///
/// Cloning is cheap: clones share the same underlying map.  Updates return a
/// new `ChannelArgs` and leave the original untouched, so a subchannel can
/// hand out references to its args for its whole lifetime.
///
/// Equality and ordering are structural, which lets `ChannelArgs` be part of a
/// subchannel pool key.
#[derive(Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelArgs {
    entries: Arc<BTreeMap<String, ChannelArgValue>>,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses args from a JSON object such as
    /// `{"grpc.initial_reconnect_backoff_ms": 500}`.
    pub fn from_json(json: &str) -> Result<Self, ChannelArgsError> {
        let entries: BTreeMap<String, ChannelArgValue> = serde_json::from_str(json)?;
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// Returns a new ChannelArgs with `key` set to `value`, replacing any
    /// existing value for `key`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<ChannelArgValue>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value.into());
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Returns a new ChannelArgs without `key`.
    pub fn remove(&self, key: &str) -> Self {
        if !self.entries.contains_key(key) {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.remove(key);
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ChannelArgValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            ChannelArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            ChannelArgValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            ChannelArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Interprets an integer entry as a number of milliseconds.  Negative
    /// values are treated as unset.
    pub fn get_duration_ms(&self, key: &str) -> Option<Duration> {
        let ms = self.get_int(key)?;
        u64::try_from(ms).ok().map(Duration::from_millis)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChannelArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Display for ChannelArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}
