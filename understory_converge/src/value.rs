// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Persistent state tree.
//!
//! [`Value`] is the application state the engine converges. Containers are
//! reference counted, so cloning a state is cheap and a write only copies the
//! containers on the path from the root to the written leaf (see
//! [`Value::set_at`]). Everything else stays shared with the original.
//!
//! ```rust
//! use understory_converge::{FieldPath, Value};
//!
//! let base = Value::object([("x", Value::from(1.0)), ("meta", Value::object([("tag", "a".into())]))]);
//! let mut next = base.clone();
//! next.set_at(&FieldPath::parse("x").unwrap(), Value::from(2.0)).unwrap();
//!
//! assert_eq!(base.get("x"), Some(&Value::from(1.0)));
//! assert_eq!(next.get("x"), Some(&Value::from(2.0)));
//! // Untouched subtrees are shared, not copied.
//! assert!(base.get("meta").unwrap().ptr_eq(next.get("meta").unwrap()));
//! ```

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::error::DraftError;
use crate::path::FieldPath;

/// Object container: ordered keys for deterministic iteration.
pub type Object = BTreeMap<Box<str>, Value>;

/// A node of the state tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// Immutable string.
    String(Arc<str>),
    /// List of values.
    List(Arc<Vec<Value>>),
    /// Keyed object.
    Object(Arc<Object>),
}

impl Value {
    /// Builds an object from key/value pairs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<Box<str>>,
    {
        Self::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Builds a list.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::List(Arc::new(items.into_iter().collect()))
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the number, if this is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Returns the object entries, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(map) => Some(&**map),
            _ => None,
        }
    }

    /// Returns a direct child of an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_object()?.get(key)
    }

    /// Returns the value at `path`, if every segment resolves.
    #[must_use]
    pub fn get_at(&self, path: &FieldPath) -> Option<&Self> {
        path.segments()
            .iter()
            .try_fold(self, |node, seg| node.get(seg))
    }

    /// Returns `true` if both values share the same container allocation.
    ///
    /// Scalars compare by value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::String(a), Self::String(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }

    /// Writes `value` at `path`, returning the previous value there.
    ///
    /// Shared containers along the path are cloned before mutation; missing
    /// or null intermediate fields become empty objects. Writing through a
    /// scalar or list is an error and leaves `self` untouched.
    pub fn set_at(&mut self, path: &FieldPath, value: Self) -> Result<Option<Self>, DraftError> {
        // Validate first so a failed write never half-clones the path.
        let mut node = Some(&*self);
        for (depth, seg) in path.segments().iter().enumerate() {
            match node {
                None | Some(Self::Null) => break,
                Some(Self::Object(map)) => {
                    node = map.get(&seg[..]);
                }
                Some(_) => {
                    return Err(DraftError::NotAnObject {
                        path: path.clone(),
                        depth,
                    });
                }
            }
        }

        let mut node = self;
        let (last, parents) = path
            .segments()
            .split_last()
            .ok_or(DraftError::EmptyPath)?;
        for seg in parents {
            let map = node.make_object_mut();
            node = map.entry(seg.clone()).or_insert(Self::Null);
        }
        Ok(node.make_object_mut().insert(last.clone(), value))
    }

    /// Removes the entry at `path`, returning it.
    pub(crate) fn remove_at(&mut self, path: &FieldPath) -> Option<Self> {
        let (last, parents) = path.segments().split_last()?;
        let mut node = self;
        for seg in parents {
            let Self::Object(map) = node else {
                return None;
            };
            node = Arc::make_mut(map).get_mut(&seg[..])?;
        }
        let Self::Object(map) = node else {
            return None;
        };
        Arc::make_mut(map).remove(&last[..])
    }

    /// Returns a mutable object map, replacing null with an empty object.
    ///
    /// Callers must have checked that `self` is an object or null.
    fn make_object_mut(&mut self) -> &mut Object {
        if !matches!(self, Self::Object(_)) {
            *self = Self::Object(Arc::new(Object::new()));
        }
        match self {
            Self::Object(map) => Arc::make_mut(map),
            _ => unreachable!("just replaced with an object"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value.into())
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn path(s: &str) -> FieldPath {
        FieldPath::parse(s).unwrap()
    }

    #[test]
    fn get_at_walks_objects() {
        let v = Value::object([("a", Value::object([("b", Value::from(3))]))]);
        assert_eq!(v.get_at(&path("a.b")), Some(&Value::from(3)));
        assert_eq!(v.get_at(&path("a.c")), None);
        assert_eq!(v.get_at(&path("a.b.c")), None);
    }

    #[test]
    fn set_at_copies_only_the_written_path() {
        let base = Value::object([
            ("left", Value::object([("n", Value::from(1))])),
            ("right", Value::object([("n", Value::from(2))])),
        ]);
        let mut next = base.clone();
        let prev = next.set_at(&path("left.n"), Value::from(10)).unwrap();

        assert_eq!(prev, Some(Value::from(1)));
        assert_eq!(base.get_at(&path("left.n")), Some(&Value::from(1)));
        assert_eq!(next.get_at(&path("left.n")), Some(&Value::from(10)));
        assert!(!base.get("left").unwrap().ptr_eq(next.get("left").unwrap()));
        assert!(base.get("right").unwrap().ptr_eq(next.get("right").unwrap()));
    }

    #[test]
    fn set_at_creates_missing_objects() {
        let mut v = Value::object([("a", Value::Null)]);
        assert_eq!(v.set_at(&path("a.b.c"), Value::from(true)).unwrap(), None);
        assert_eq!(v.get_at(&path("a.b.c")), Some(&Value::from(true)));
    }

    #[test]
    fn set_at_through_scalar_fails_without_mutation() {
        let base = Value::object([("a", Value::from(1))]);
        let mut v = base.clone();
        let err = v.set_at(&path("a.b"), Value::from(2)).unwrap_err();
        assert!(matches!(err, DraftError::NotAnObject { depth: 1, .. }));
        assert!(v.ptr_eq(&base));
    }

    #[test]
    fn remove_at_round_trips_a_new_key() {
        let mut v = Value::object([("a", Value::from(1))]);
        v.set_at(&path("b"), Value::from(2)).unwrap();
        assert_eq!(v.remove_at(&path("b")), Some(Value::from(2)));
        assert_eq!(v, Value::object([("a", Value::from(1))]));
    }

    #[test]
    fn display_is_compact() {
        let v = Value::object([("a", Value::list([Value::from(1), "x".into()]))]);
        assert_eq!(v.to_string(), "{a:[1,x]}");
    }
}
