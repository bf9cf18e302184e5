//! Input bindings for recipe nodes.
//!
//! A binding names where a node parameter comes from. The source descriptor is
//! a dot path whose first segment is either `external` (the caller payload) or
//! the `outputKey` of an upstream node:
//!
//! ```json
//! {
//!   "topic": "external.brief.topic",
//!   "outline": "outline.sections",
//!   "style": { "source": "external.style", "optional": true }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Root segment addressing the caller-supplied payload.
pub const EXTERNAL_ROOT: &str = "external";

/// A node input binding, written either as a bare descriptor or in long form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputBinding {
  Source(String),
  Detailed {
    source: String,
    #[serde(default)]
    optional: bool,
  },
}

impl InputBinding {
  pub fn source(&self) -> &str {
    match self {
      InputBinding::Source(source) => source,
      InputBinding::Detailed { source, .. } => source,
    }
  }

  pub fn is_optional(&self) -> bool {
    matches!(self, InputBinding::Detailed { optional: true, .. })
  }
}

impl From<&str> for InputBinding {
  fn from(source: &str) -> Self {
    InputBinding::Source(source.to_string())
  }
}

/// A parsed source descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
  External { path: Vec<String> },
  Upstream { output_key: String, path: Vec<String> },
}

impl InputSource {
  /// Parse a descriptor such as `external.a` or `step1.foo.bar`.
  ///
  /// Returns `None` when the descriptor is empty or has an empty segment.
  pub fn parse(descriptor: &str) -> Option<Self> {
    let mut segments = descriptor.split('.');
    let root = segments.next().filter(|s| !s.is_empty())?;
    let path: Vec<String> = segments.map(str::to_string).collect();
    if path.iter().any(|s| s.is_empty()) {
      return None;
    }

    if root == EXTERNAL_ROOT {
      Some(InputSource::External { path })
    } else {
      Some(InputSource::Upstream {
        output_key: root.to_string(),
        path,
      })
    }
  }

  pub fn path(&self) -> &[String] {
    match self {
      InputSource::External { path } => path,
      InputSource::Upstream { path, .. } => path,
    }
  }

  /// The upstream output key, if this source reads a prior node's result.
  pub fn output_key(&self) -> Option<&str> {
    match self {
      InputSource::External { .. } => None,
      InputSource::Upstream { output_key, .. } => Some(output_key),
    }
  }
}

/// Walk a dot path into a JSON value. Objects are indexed by key, arrays by
/// decimal position.
pub fn select_path<'a, S: AsRef<str>>(
  value: &'a serde_json::Value,
  path: &[S],
) -> Option<&'a serde_json::Value> {
  path.iter().try_fold(value, |current, segment| {
    let segment = segment.as_ref();
    match current {
      serde_json::Value::Object(map) => map.get(segment),
      serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    }
  })
}
