//! Control messages
//!
//! Requests and responses exchanged with the operator, keyed by `type`. Every
//! request kind has exactly one response kind.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::executor::{BackResult, IngestPayload};
use crate::host::{Tab, TabId};
use crate::probe::{LinkAction, LinkEntry};

/// A command from the operator
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    ListTabs {},
    ListLinks {
        #[serde(default, deserialize_with = "lenient_tab_id")]
        tab_id: Option<TabId>,
    },
    ClickLink {
        #[serde(default, deserialize_with = "lenient_tab_id")]
        tab_id: Option<TabId>,
        #[serde(default)]
        index: Option<Value>,
    },
    ScrollLink {
        #[serde(default, deserialize_with = "lenient_tab_id")]
        tab_id: Option<TabId>,
        #[serde(default)]
        index: Option<Value>,
    },
    GoBack {
        #[serde(default, deserialize_with = "lenient_tab_id")]
        tab_id: Option<TabId>,
    },
    Capture {
        #[serde(default, deserialize_with = "lenient_tab_id")]
        tab_id: Option<TabId>,
    },
}

impl Request {
    /// Parse an inbound text frame. Invalid JSON and unknown kinds are both
    /// [`Error::MalformedMessage`].
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// The `type` tag of this request
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ListTabs {} => "list_tabs",
            Request::ListLinks { .. } => "list_links",
            Request::ClickLink { .. } => "click_link",
            Request::ScrollLink { .. } => "scroll_link",
            Request::GoBack { .. } => "go_back",
            Request::Capture { .. } => "capture",
        }
    }
}

/// Only integral numbers select a tab; anything else means "active tab".
fn lenient_tab_id<'de, D>(deserializer: D) -> std::result::Result<Option<TabId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
                .map(|f| f as i64)
        })
    }))
}

/// Coerce a raw `index` field to a number.
///
/// Numbers pass through and numeric strings are parsed. Anything absent or
/// non-finite is a missing index, blank strings included. Finite non-integers
/// are out of range.
pub fn coerce_index(raw: Option<&Value>) -> Result<i64> {
    let number = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => {
            if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 {
                Ok(n as i64)
            } else {
                Err(Error::invalid_link_index())
            }
        }
        _ => Err(Error::missing_link_index()),
    }
}

/// Outcome carried by a response: payload or error text
pub type Reply<T> = std::result::Result<T, String>;

/// Convert a command result into a reply, keeping only the error text
pub fn reply<T>(result: Result<T>) -> Reply<T> {
    result.map_err(|e| e.to_string())
}

/// A response to the operator
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Tabs(Reply<Vec<Tab>>),
    Links(Reply<Vec<LinkEntry>>),
    Click(Reply<LinkAction>),
    Scroll(Reply<LinkAction>),
    Back(Reply<BackResult>),
    Capture(Reply<IngestPayload>),
}

impl Response {
    /// The `type` tag of this response
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Tabs(_) => "tabs_result",
            Response::Links(_) => "links_result",
            Response::Click(_) => "click_result",
            Response::Scroll(_) => "scroll_result",
            Response::Back(_) => "back_result",
            Response::Capture(_) => "capture_result",
        }
    }

    /// Whether the command succeeded
    pub fn is_ok(&self) -> bool {
        match self {
            Response::Tabs(r) => r.is_ok(),
            Response::Links(r) => r.is_ok(),
            Response::Click(r) | Response::Scroll(r) => r.is_ok(),
            Response::Back(r) => r.is_ok(),
            Response::Capture(r) => r.is_ok(),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", self.kind())?;
        match self {
            Response::Tabs(reply) => write_reply(&mut map, "tabs", reply)?,
            Response::Links(reply) => write_reply(&mut map, "links", reply)?,
            Response::Click(reply) | Response::Scroll(reply) => {
                write_reply(&mut map, "result", reply)?
            }
            Response::Back(reply) => write_reply(&mut map, "result", reply)?,
            Response::Capture(reply) => write_reply(&mut map, "payload", reply)?,
        }
        map.end()
    }
}

fn write_reply<M, T>(map: &mut M, field: &'static str, reply: &Reply<T>) -> std::result::Result<(), M::Error>
where
    M: SerializeMap,
    T: Serialize,
{
    match reply {
        Ok(value) => {
            map.serialize_entry("ok", &true)?;
            map.serialize_entry(field, value)
        }
        Err(error) => {
            map.serialize_entry("ok", &false)?;
            map.serialize_entry("error", error)
        }
    }
}
