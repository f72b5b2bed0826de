//! Min/max aggregate tracking for one category
//!
//! Every contributing leaf value is kept in a side table keyed by the
//! leaf's row key. The tracked extreme only moves on strict improvement;
//! when its source leaves, the side table is re-fed in row key order.

use std::collections::BTreeMap;

use crate::index::{binary_sort_key, RowKey, SortKey};
use crate::props::PropValue;

use super::Aggregate;

/// The current extreme and the leaf it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Extreme {
    /// `None` when every contributor lacks a value
    pub value: Option<PropValue>,
    pub source: RowKey,
}

/// Min or max over the leaves of one category
#[derive(Debug, Clone)]
pub struct MinMax {
    aggregate: Aggregate,
    descending: bool,
    current: Option<Extreme>,
    contributions: BTreeMap<RowKey, Option<PropValue>>,
}

impl MinMax {
    /// `descending` is the direction of the aggregate sort column
    pub fn new(aggregate: Aggregate, descending: bool) -> Self {
        Self {
            aggregate,
            descending,
            current: None,
            contributions: BTreeMap::new(),
        }
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn current(&self) -> Option<&Extreme> {
        self.current.as_ref()
    }

    /// Current extreme value, if any contributor has one
    pub fn value(&self) -> Option<&PropValue> {
        self.current.as_ref().and_then(|e| e.value.as_ref())
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Sort key component the category's rows carry for this aggregate
    pub fn sort_component(&self) -> SortKey {
        SortKey::encode(self.value(), self.descending)
    }

    /// Record a new contribution. Returns whether the extreme value changed.
    pub fn add(&mut self, key: RowKey, value: Option<PropValue>) -> bool {
        let before = self.value_bytes();
        self.contributions.insert(key, value.clone());
        self.feed(key, value);
        before != self.value_bytes()
    }

    /// Replace a leaf's contribution. Returns whether the extreme value changed.
    pub fn replace(&mut self, key: RowKey, value: Option<PropValue>) -> bool {
        let before = self.value_bytes();
        self.contributions.insert(key, value.clone());
        if self.current.as_ref().map(|e| e.source) == Some(key) {
            self.recompute();
        } else {
            self.feed(key, value);
        }
        before != self.value_bytes()
    }

    /// Drop a leaf's contribution. Returns whether the extreme value changed.
    pub fn remove(&mut self, key: RowKey) -> bool {
        if self.contributions.remove(&key).is_none() {
            return false;
        }
        let before = self.value_bytes();
        if self.current.as_ref().map(|e| e.source) == Some(key) {
            self.recompute();
        }
        before != self.value_bytes()
    }

    fn recompute(&mut self) {
        self.current = None;
        let contributions: Vec<_> = self
            .contributions
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect();
        for (key, value) in contributions {
            self.feed(key, value);
        }
    }

    /// Strict-improvement rule. A value always beats an absent extreme; an
    /// absent candidate never beats a value.
    fn feed(&mut self, key: RowKey, value: Option<PropValue>) {
        let value = value.filter(|v| !v.is_error());
        let replace = match (&self.current, &value) {
            (None, _) => true,
            (Some(Extreme { value: None, .. }), Some(_)) => true,
            (Some(_), None) => false,
            (Some(Extreme { value: Some(current), .. }), Some(candidate)) => {
                let candidate = binary_sort_key(Some(candidate));
                let current = binary_sort_key(Some(current));
                match self.aggregate {
                    Aggregate::Min => candidate < current,
                    Aggregate::Max => candidate > current,
                }
            }
        };
        if replace {
            self.current = Some(Extreme { value, source: key });
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        binary_sort_key(self.value())
    }
}
