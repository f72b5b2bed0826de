//! Property bags
//!
//! One row's properties as supplied by the row loader. Keys are normalized
//! tags, so an 8-bit and a unicode request for the same string column find
//! the same value.

use std::collections::BTreeMap;

use super::tags::{PropTag, PR_OBJECT_ID};
use super::value::PropValue;

/// Mapping from normalized tag to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    props: BTreeMap<PropTag, PropValue>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `insert`
    pub fn with(mut self, tag: PropTag, value: PropValue) -> Self {
        self.insert(tag, value);
        self
    }

    pub fn insert(&mut self, tag: PropTag, value: PropValue) {
        self.props.insert(tag.normalized(), value);
    }

    pub fn remove(&mut self, tag: PropTag) -> Option<PropValue> {
        self.props.remove(&tag.normalized())
    }

    /// Value for a tag. Error values count as absent.
    pub fn get(&self, tag: PropTag) -> Option<&PropValue> {
        self.get_raw(tag).filter(|value| !value.is_error())
    }

    /// Value for a tag including error values
    pub fn get_raw(&self, tag: PropTag) -> Option<&PropValue> {
        self.props.get(&tag.normalized())
    }

    /// Whether the column is present with a real value
    pub fn contains(&self, tag: PropTag) -> bool {
        self.get(tag).is_some()
    }

    /// Object id from the identity column
    pub fn object_id(&self) -> Option<u32> {
        self.get(PR_OBJECT_ID)
            .and_then(PropValue::as_long)
            .map(|id| id as u32)
    }

    /// Number of rows a multi-valued instance column fans out into (at least one).
    pub fn instance_count(&self, tag: PropTag) -> u32 {
        match self.get(tag) {
            Some(PropValue::MultiValue(values)) if !values.is_empty() => values.len() as u32,
            _ => 1,
        }
    }

    /// Copy of this bag as seen by fan-out row `order`: the multi-valued
    /// column is replaced by its `order`-th element (or removed when the
    /// object has fewer values).
    pub fn instance_row(&self, tag: PropTag, order: u32) -> PropertyBag {
        let mut row = self.clone();
        let element = match self.get(tag) {
            Some(PropValue::MultiValue(values)) => values.get(order as usize).cloned(),
            Some(scalar) if order == 0 => Some(scalar.clone()),
            _ => None,
        };
        match element {
            Some(value) => row.insert(tag, value),
            None => {
                row.remove(tag);
            }
        }
        row
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropTag, &PropValue)> {
        self.props.iter()
    }
}

impl FromIterator<(PropTag, PropValue)> for PropertyBag {
    fn from_iter<T: IntoIterator<Item = (PropTag, PropValue)>>(iter: T) -> Self {
        let mut bag = PropertyBag::new();
        for (tag, value) in iter {
            bag.insert(tag, value);
        }
        bag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::tags::{PR_KEYWORDS, PR_SUBJECT, PT_STRING8, MAPI_E_NOT_FOUND};

    #[test]
    fn test_string8_lookup_matches_unicode() {
        let bag = PropertyBag::new().with(PR_SUBJECT, PropValue::string("hello"));
        let legacy = PR_SUBJECT.with_type(PT_STRING8);
        assert_eq!(bag.get(legacy), Some(&PropValue::string("hello")));
    }

    #[test]
    fn test_error_is_absent() {
        let bag = PropertyBag::new().with(PR_SUBJECT, PropValue::Error(MAPI_E_NOT_FOUND));
        assert!(bag.get(PR_SUBJECT).is_none());
        assert!(bag.get_raw(PR_SUBJECT).is_some());
        assert!(!bag.contains(PR_SUBJECT));
    }

    #[test]
    fn test_object_id() {
        let bag = PropertyBag::new().with(PR_OBJECT_ID, PropValue::Long(42));
        assert_eq!(bag.object_id(), Some(42));
    }

    #[test]
    fn test_instance_rows() {
        let bag = PropertyBag::new().with(
            PR_KEYWORDS,
            PropValue::MultiValue(vec![PropValue::string("red"), PropValue::string("blue")]),
        );
        assert_eq!(bag.instance_count(PR_KEYWORDS), 2);

        let second = bag.instance_row(PR_KEYWORDS, 1);
        assert_eq!(second.get(PR_KEYWORDS), Some(&PropValue::string("blue")));

        let beyond = bag.instance_row(PR_KEYWORDS, 5);
        assert!(beyond.get(PR_KEYWORDS).is_none());
    }

    #[test]
    fn test_instance_count_without_values() {
        let bag = PropertyBag::new();
        assert_eq!(bag.instance_count(PR_KEYWORDS), 1);
    }
}
