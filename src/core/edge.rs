//! Canonical edge identifiers and causal edge classes.
//!
//! Edges are not stored in the arena; they are inferred from cells and tracked by the
//! [`FoliationIndex`](crate::core::foliation::FoliationIndex). `EdgeKey`:
//!
//! - identifies an edge purely by its two endpoint [`VertexKey`]s
//! - canonicalizes endpoint ordering so `(a, b)` and `(b, a)` map to the same edge
//! - is `Copy`/`Hash`/`Ord` for fast use in sets, maps and index pools

use crate::core::simplex_store::VertexKey;
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::fmt;

/// Canonical identifier for an (undirected) edge.
///
/// # Examples
///
/// ```rust
/// use cdt::core::edge::EdgeKey;
/// use cdt::core::simplex_store::VertexKey;
/// use slotmap::KeyData;
///
/// let a = VertexKey::from(KeyData::from_ffi(1));
/// let b = VertexKey::from(KeyData::from_ffi(2));
/// assert_eq!(EdgeKey::new(a, b), EdgeKey::new(b, a));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    v0: VertexKey,
    v1: VertexKey,
}

impl EdgeKey {
    /// Creates a new canonical edge key.
    ///
    /// The endpoints are reordered so that `v0 <= v1` under the raw slotmap key order.
    #[must_use]
    pub fn new(a: VertexKey, b: VertexKey) -> Self {
        let a_raw = a.data().as_ffi();
        let b_raw = b.data().as_ffi();

        if a_raw <= b_raw {
            Self { v0: a, v1: b }
        } else {
            Self { v0: b, v1: a }
        }
    }

    /// Returns the first (canonical) endpoint.
    #[inline]
    #[must_use]
    pub const fn v0(self) -> VertexKey {
        self.v0
    }

    /// Returns the second (canonical) endpoint.
    #[inline]
    #[must_use]
    pub const fn v1(self) -> VertexKey {
        self.v1
    }

    /// Returns the two endpoints as a tuple.
    #[inline]
    #[must_use]
    pub const fn endpoints(self) -> (VertexKey, VertexKey) {
        (self.v0, self.v1)
    }

    /// Returns `true` if `v` is one of the endpoints.
    #[inline]
    #[must_use]
    pub fn contains(self, v: VertexKey) -> bool {
        self.v0 == v || self.v1 == v
    }
}

impl From<(VertexKey, VertexKey)> for EdgeKey {
    #[inline]
    fn from((a, b): (VertexKey, VertexKey)) -> Self {
        Self::new(a, b)
    }
}

/// Causal character of an edge.
///
/// A spacelike edge joins two vertices on the same timeslice; a timelike edge joins
/// vertices on adjacent timeslices. No other edges are admissible in a foliated complex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeClass {
    /// Endpoints on adjacent timeslices.
    Timelike,
    /// Endpoints on the same timeslice.
    Spacelike,
}

impl EdgeClass {
    /// Both classes, in pool order.
    pub const ALL: [Self; 2] = [Self::Timelike, Self::Spacelike];

    /// Classifies an edge from its endpoint timeslices.
    ///
    /// Returns `None` when the endpoints are two or more slices apart.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cdt::core::edge::EdgeClass;
    ///
    /// assert_eq!(EdgeClass::from_timeslices(3, 3), Some(EdgeClass::Spacelike));
    /// assert_eq!(EdgeClass::from_timeslices(4, 3), Some(EdgeClass::Timelike));
    /// assert_eq!(EdgeClass::from_timeslices(1, 3), None);
    /// ```
    #[must_use]
    pub const fn from_timeslices(a: u32, b: u32) -> Option<Self> {
        match a.abs_diff(b) {
            0 => Some(Self::Spacelike),
            1 => Some(Self::Timelike),
            _ => None,
        }
    }

    /// Dense index used for per-class arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Timelike => 0,
            Self::Spacelike => 1,
        }
    }
}

impl fmt::Display for EdgeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timelike => f.write_str("timelike"),
            Self::Spacelike => f.write_str("spacelike"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn edge_key_is_canonical() {
        let mut vertices: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let a = vertices.insert(());
        let b = vertices.insert(());

        let e1 = EdgeKey::new(a, b);
        let e2 = EdgeKey::new(b, a);

        assert_eq!(e1, e2);
        assert!(e1.v0().data().as_ffi() <= e1.v1().data().as_ffi());
        assert!(e1.contains(a) && e1.contains(b));
    }

    #[test]
    fn edge_key_is_hashable_and_orderable() {
        let mut vertices: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let a = vertices.insert(());
        let b = vertices.insert(());
        let c = vertices.insert(());

        let mut hash_set: std::collections::HashSet<EdgeKey> = std::collections::HashSet::new();
        hash_set.insert(EdgeKey::new(a, b));
        hash_set.insert(EdgeKey::new(b, a));
        hash_set.insert(EdgeKey::new(a, c));
        assert_eq!(hash_set.len(), 2);

        let mut btree_set: std::collections::BTreeSet<EdgeKey> = std::collections::BTreeSet::new();
        btree_set.insert(EdgeKey::from((a, b)));
        btree_set.insert(EdgeKey::from((b, a)));
        btree_set.insert(EdgeKey::from((a, c)));
        assert_eq!(btree_set.len(), 2);
    }

    #[test]
    fn edge_class_from_timeslices() {
        assert_eq!(EdgeClass::from_timeslices(0, 0), Some(EdgeClass::Spacelike));
        assert_eq!(EdgeClass::from_timeslices(0, 1), Some(EdgeClass::Timelike));
        assert_eq!(EdgeClass::from_timeslices(7, 6), Some(EdgeClass::Timelike));
        assert_eq!(EdgeClass::from_timeslices(0, 2), None);
        assert_eq!(EdgeClass::Timelike.to_string(), "timelike");
    }
}
