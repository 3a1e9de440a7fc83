// Copyright (c) wormhole contributors.
// Licensed under the MIT license OR Apache 2.0

//! Ordered, case-preserving, multi-value-aware header storage shared by
//! [`crate::frame::RequestFrame`] and [`crate::frame::ResponseFrame`].
//!
//! Headers are a fixed, strongly-typed shape rather than an arbitrary JSON
//! map, but they still need to preserve insertion order and allow repeated
//! header names (`Set-Cookie`, etc.) the way a real HTTP header block does.
//! A `Vec` of pairs is the simplest representation with those properties.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An ordered list of `(name, value)` pairs. Names are compared
/// case-insensitively but stored with their original casing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<(String, String)>);

impl HeaderList {
  pub fn new() -> Self {
    Self(Vec::new())
  }

  pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Returns the first value whose name matches case-insensitively.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Builds a [`HeaderList`] from an iterator of pairs, dropping hop-by-hop
  /// headers before they cross a proxy boundary (`Connection`, `Keep-Alive`,
  /// `TE`, `Transfer-Encoding`, `Upgrade`, and anything prefixed `Proxy-`).
  pub fn from_forwarded<I, K, V>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let mut out = Self::new();
    for (name, value) in pairs {
      let name = name.into();
      if is_hop_by_hop(&name) {
        continue;
      }
      out.push(name, value.into());
    }
    out
  }
}

/// True if `name` must not be forwarded across a proxy boundary.
pub fn is_hop_by_hop(name: &str) -> bool {
  const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "transfer-encoding",
    "upgrade",
  ];
  let lower = name.to_ascii_lowercase();
  HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

/// Wire representation of [`HeaderList`] as a JSON object, the shape used
/// by the control-channel's request/response frames.
/// Order is preserved on both sides: serialization writes entries in the
/// given sequence and `serde_json` visits object members in source order
/// during deserialization regardless of the `preserve_order` feature.
/// Duplicate header names collapse to their last occurrence on the wire —
/// an accepted limitation of representing headers as a plain JSON object
/// rather than an array of pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WireHeaders(pub Vec<(String, String)>);

impl Serialize for WireHeaders {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (name, value) in &self.0 {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for WireHeaders {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct HeadersVisitor;

    impl<'de> Visitor<'de> for HeadersVisitor {
      type Value = WireHeaders;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object mapping header names to values")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, String>()? {
          entries.push((name, value));
        }
        Ok(WireHeaders(entries))
      }
    }

    deserializer.deserialize_map(HeadersVisitor)
  }
}

impl From<HeaderList> for WireHeaders {
  fn from(headers: HeaderList) -> Self {
    WireHeaders(headers.0)
  }
}

impl From<WireHeaders> for HeaderList {
  fn from(headers: WireHeaders) -> Self {
    HeaderList(headers.0)
  }
}

impl IntoIterator for HeaderList {
  type Item = (String, String);
  type IntoIter = std::vec::IntoIter<(String, String)>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}
