//! Explicit addressing into JSON value trees
//!
//! A [`FieldPath`] is a list of object keys and array indices. Its string
//! form (`a.b[0].c`) is the deduplication key for classified field paths and
//! appears verbatim in scenario names.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object member
    Key(String),
    /// Array element
    Index(usize),
}

/// Traversal path into a value tree
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Empty path (addresses the root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Single-key path
    #[inline]
    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Key(name.into())],
        }
    }

    /// Extend with an object key
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(name.into()));
        Self { segments }
    }

    /// Extend with an array index
    #[must_use]
    pub fn index(&self, idx: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(idx));
        Self { segments }
    }

    /// Path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// True for the root path
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path without its last segment
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Nearest object key on the path (skips trailing indices)
    #[must_use]
    pub fn leaf_key(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            PathSegment::Key(k) => Some(k.as_str()),
            PathSegment::Index(_) => None,
        })
    }

    /// Top-level key of the path
    #[must_use]
    pub fn top_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k.as_str()),
            _ => None,
        }
    }

    /// Resolve the path in `value`
    #[must_use]
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve the path mutably
    pub fn get_mut<'v>(&self, value: &'v mut Value) -> Option<&'v mut Value> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => map.get_mut(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Overwrite the value at the path
    ///
    /// Missing intermediate objects are created; the final key is inserted
    /// when absent. Array indices must already exist.
    ///
    /// # Errors
    /// Returns `ModelError::PathNotFound` when an array index is out of
    /// range or a scalar sits where a container is required.
    pub fn set(&self, root: &mut Value, new_value: Value) -> ModelResult<()> {
        let Some((last, prefix)) = self.segments.split_last() else {
            *root = new_value;
            return Ok(());
        };

        let mut current = root;
        for segment in prefix {
            current = match segment {
                PathSegment::Key(k) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    match current {
                        Value::Object(map) => map
                            .entry(k.clone())
                            .or_insert_with(|| Value::Object(Map::new())),
                        _ => return Err(ModelError::PathNotFound(self.to_string())),
                    }
                }
                PathSegment::Index(i) => match current {
                    Value::Array(items) => items
                        .get_mut(*i)
                        .ok_or_else(|| ModelError::PathNotFound(self.to_string()))?,
                    _ => return Err(ModelError::PathNotFound(self.to_string())),
                },
            };
        }

        match (last, current) {
            (PathSegment::Key(k), Value::Object(map)) => {
                map.insert(k.clone(), new_value);
                Ok(())
            }
            (PathSegment::Index(i), Value::Array(items)) if *i < items.len() => {
                items[*i] = new_value;
                Ok(())
            }
            _ => Err(ModelError::PathNotFound(self.to_string())),
        }
    }

    /// Remove the value at the path, returning it
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, _) = self.segments.split_last()?;
        let parent = self.parent()?;
        match (last, parent.get_mut(root)?) {
            (PathSegment::Key(k), Value::Object(map)) => map.remove(k),
            (PathSegment::Index(i), Value::Array(items)) if *i < items.len() => {
                Some(items.remove(*i))
            }
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(k) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
            first = false;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        if s.is_empty() {
            return Ok(Self { segments });
        }
        for part in s.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if key.is_empty() && rest.is_empty() {
                return Err(ModelError::invalid_path(s, "empty segment"));
            }
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped
                    .find(']')
                    .ok_or_else(|| ModelError::invalid_path(s, "unclosed index"))?;
                let idx = stripped[..close]
                    .parse::<usize>()
                    .map_err(|e| ModelError::invalid_path(s, e.to_string()))?;
                segments.push(PathSegment::Index(idx));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(ModelError::invalid_path(s, "trailing characters"));
            }
        }
        Ok(Self { segments })
    }
}

impl Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
