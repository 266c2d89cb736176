//! Typed paths into a state tree.
//!
//! A [`Path`] is a list of segments addressing a location in a nested state
//! tree. The dot-delimited string form (`"player.jade"`, `"inventory.3.id"`)
//! exists only at the API and serialization boundary; internally everything
//! works on parsed segments.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while parsing a path string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path string was empty.
    #[error("empty path")]
    Empty,

    /// A path segment was empty (two consecutive dots, or a trailing dot).
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
}

/// A single step into the state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A key in an object.
    Key(String),
    /// An index into a sequence.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A parsed path into the state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    /// Parses a dot-delimited path string.
    ///
    /// Segments that parse as unsigned integers become index segments; all
    /// other segments are object keys.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(PathError::EmptySegment(raw.to_string()));
            }
            match part.parse::<usize>() {
                Ok(index) => segments.push(PathSegment::Index(index)),
                Err(_) => segments.push(PathSegment::Key(part.to_string())),
            }
        }

        Ok(Self { segments })
    }

    /// Builds a path from already-typed segments.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns a new path with one more key segment appended.
    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self { segments }
    }

    /// Returns a new path with one more index segment appended.
    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Returns true if `self` is equal to `prefix` or nested below it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Returns true if one path is an ancestor of the other (or they are
    /// equal). A change at `player` overlaps a listener at `player.jade`,
    /// and vice versa.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys() {
        let path = Path::parse("player.jade").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("player".to_string()),
                PathSegment::Key("jade".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_index() {
        let path = Path::parse("inventory.3.id").unwrap();
        assert_eq!(path.segments()[1], PathSegment::Index(3));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Path::parse(""), Err(PathError::Empty));
    }

    #[test]
    fn test_parse_empty_segment() {
        assert!(matches!(
            Path::parse("a..b"),
            Err(PathError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let raw = "player.inventory.0.name";
        assert_eq!(Path::parse(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn test_starts_with() {
        let parent = Path::parse("player").unwrap();
        let child = Path::parse("player.jade").unwrap();
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
    }

    #[test]
    fn test_overlaps_both_directions() {
        let parent = Path::parse("player").unwrap();
        let child = Path::parse("player.jade").unwrap();
        let other = Path::parse("settings").unwrap();
        assert!(child.overlaps(&parent));
        assert!(parent.overlaps(&child));
        assert!(!other.overlaps(&parent));
    }

    #[test]
    fn test_serde_as_string() {
        let path = Path::parse("a.b.2").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a.b.2\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
