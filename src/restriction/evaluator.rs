//! Restriction evaluation against one row
//!
//! Matching is a pure function of (row, restriction, sub-restriction
//! results). The matcher owns the validated tree and its compiled regular
//! expressions; it keeps no per-row state.

use std::collections::HashMap;

use regex::Regex;

use crate::errors::{TableError, TableResult};
use crate::props::tags::{ANR_COLUMNS, PR_ANR};
use crate::props::{fold_case, PropValue, PropertyBag};

use super::ast::{BitmaskOp, ContentFlags, FuzzyLevel, RelOp, Restriction};
use super::compare::{compare_values, type_mismatch};
use super::subrestriction::SubRestrictionResults;

/// Evaluates one restriction against rows
#[derive(Debug, Clone)]
pub struct RowMatcher {
    restriction: Restriction,
    regexes: HashMap<String, Regex>,
}

impl RowMatcher {
    /// Validate the restriction and compile its regular expressions
    pub fn new(restriction: Restriction, max_depth: usize) -> TableResult<Self> {
        restriction.validate(max_depth)?;

        let mut regexes = HashMap::new();
        for pattern in restriction.regex_patterns() {
            if regexes.contains_key(pattern) {
                continue;
            }
            let compiled = Regex::new(pattern).map_err(|e| {
                TableError::invalid_parameter(format!("bad regular expression {:?}: {}", pattern, e))
            })?;
            regexes.insert(pattern.to_string(), compiled);
        }

        Ok(Self {
            restriction,
            regexes,
        })
    }

    pub fn restriction(&self) -> &Restriction {
        &self.restriction
    }

    pub fn has_sub_restrictions(&self) -> bool {
        self.restriction.sub_restriction_count() > 0
    }

    /// Whether `row` satisfies the restriction
    pub fn matches(&self, row: &PropertyBag, subs: &SubRestrictionResults) -> TableResult<bool> {
        let mut ordinal = 0;
        self.eval(&self.restriction, row, subs, &mut ordinal)
    }

    fn eval(
        &self,
        node: &Restriction,
        row: &PropertyBag,
        subs: &SubRestrictionResults,
        ordinal: &mut usize,
    ) -> TableResult<bool> {
        match node {
            Restriction::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if !self.eval(child, row, subs, ordinal)? {
                        skip_ordinals(&children[i + 1..], ordinal);
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Restriction::Or(children) => {
                for (i, child) in children.iter().enumerate() {
                    if self.eval(child, row, subs, ordinal)? {
                        skip_ordinals(&children[i + 1..], ordinal);
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Restriction::Not(child) => Ok(!self.eval(child, row, subs, ordinal)?),
            Restriction::Comment { restriction, .. } => match restriction {
                Some(child) => self.eval(child, row, subs, ordinal),
                None => Err(TableError::invalid_type("comment without restriction")),
            },
            Restriction::Content {
                level,
                flags,
                tag,
                value,
            } => match row.get(*tag) {
                Some(actual) => content_matches(actual, &value.value, *level, *flags),
                None => Ok(false),
            },
            Restriction::Property { relop, tag, value } => {
                if tag.normalized() == PR_ANR.normalized() {
                    return Ok(anr_matches(row, &value.value, *relop));
                }
                let actual = match row.get(*tag) {
                    Some(actual) => actual,
                    None => return Ok(*relop == RelOp::Ne),
                };
                if *relop == RelOp::Re {
                    return self.regex_matches(actual, &value.value);
                }
                property_matches(actual, &value.value, *relop)
            }
            Restriction::CompareProps { relop, tag1, tag2 } => {
                match (row.get(*tag1), row.get(*tag2)) {
                    (Some(a), Some(b)) => Ok(relop.holds(compare_values(a, b, false)?)),
                    _ => Ok(false),
                }
            }
            Restriction::Bitmask { op, tag, mask } => match row.get(*tag) {
                Some(PropValue::Long(v)) => {
                    let masked = (*v as u32) & mask;
                    Ok(match op {
                        BitmaskOp::EqZero => masked == 0,
                        BitmaskOp::NeZero => masked != 0,
                    })
                }
                Some(other) => Err(TableError::invalid_type(format!(
                    "BITMASK on {} value",
                    other.kind().map(|k| k.as_str()).unwrap_or("empty multi-value")
                ))),
                None => Ok(false),
            },
            Restriction::Size { relop, tag, size } => match row.get(*tag) {
                Some(actual) => Ok(relop.holds(actual.byte_size().cmp(&(*size as usize)))),
                None => Ok(false),
            },
            Restriction::Exist { tag } => Ok(row.contains(*tag)),
            Restriction::SubRestriction { .. } => {
                let current = *ordinal;
                *ordinal += 1;
                let object_id = match row.object_id() {
                    Some(id) => id,
                    None => return Ok(false),
                };
                let matched = subs.get(current).ok_or_else(|| {
                    TableError::Internal(format!("sub-restriction {} was not resolved", current))
                })?;
                Ok(matched.contains(&object_id))
            }
        }
    }

    fn regex_matches(&self, actual: &PropValue, pattern: &PropValue) -> TableResult<bool> {
        let (text, pattern) = match (actual, pattern) {
            (PropValue::String(text), PropValue::String(pattern)) => (text, pattern),
            _ => return Err(type_mismatch(actual, pattern)),
        };
        let regex = self
            .regexes
            .get(pattern.as_str())
            .ok_or_else(|| TableError::Internal(format!("regex {:?} not compiled", pattern)))?;
        Ok(regex.is_match(text))
    }
}

fn skip_ordinals(rest: &[Restriction], ordinal: &mut usize) {
    *ordinal += rest.iter().map(Restriction::sub_restriction_count).sum::<usize>();
}

fn content_matches(
    actual: &PropValue,
    pattern: &PropValue,
    level: FuzzyLevel,
    flags: ContentFlags,
) -> TableResult<bool> {
    for element in actual.elements() {
        let hit = match (element, pattern) {
            (PropValue::String(text), PropValue::String(needle)) => {
                if flags.folds() {
                    fuzzy_match(fold_case(text).as_bytes(), fold_case(needle).as_bytes(), level)
                } else {
                    fuzzy_match(text.as_bytes(), needle.as_bytes(), level)
                }
            }
            (PropValue::Binary(bytes), PropValue::Binary(needle)) => {
                fuzzy_match(bytes, needle, level)
            }
            _ => return Err(type_mismatch(element, pattern)),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn fuzzy_match(haystack: &[u8], needle: &[u8], level: FuzzyLevel) -> bool {
    match level {
        FuzzyLevel::Full => haystack == needle,
        FuzzyLevel::Prefix => haystack.starts_with(needle),
        FuzzyLevel::Substring => {
            needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
        }
    }
}

fn property_matches(actual: &PropValue, operand: &PropValue, relop: RelOp) -> TableResult<bool> {
    if operand.is_multi_valued() || !actual.is_multi_valued() {
        return Ok(relop.holds(compare_values(actual, operand, false)?));
    }
    for element in actual.elements() {
        if relop.holds(compare_values(element, operand, false)?) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Ambiguous name resolution: case-insensitive substring over a fixed
/// column list; found counts as equal, not found as less.
fn anr_matches(row: &PropertyBag, operand: &PropValue, relop: RelOp) -> bool {
    let needle = match operand.as_str() {
        Some(needle) => fold_case(needle),
        None => return false,
    };
    let found = ANR_COLUMNS.iter().any(|column| {
        row.get(*column).map_or(false, |value| {
            value
                .elements()
                .iter()
                .filter_map(PropValue::as_str)
                .any(|text| fold_case(text).contains(needle.as_ref()))
        })
    });
    let ordering = if found {
        std::cmp::Ordering::Equal
    } else {
        std::cmp::Ordering::Less
    };
    relop.holds(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::tags::{
        PR_DISPLAY_NAME, PR_KEYWORDS, PR_MESSAGE_FLAGS, PR_MESSAGE_SIZE, PR_OBJECT_ID,
        PR_SENDER_NAME, PR_SUBJECT, PR_SURNAME,
    };
    use crate::restriction::ast::SubObject;
    use std::collections::HashSet;

    fn matcher(r: Restriction) -> RowMatcher {
        RowMatcher::new(r, 16).unwrap()
    }

    fn subject_row(subject: &str) -> PropertyBag {
        PropertyBag::new()
            .with(PR_OBJECT_ID, PropValue::Long(1))
            .with(PR_SUBJECT, PropValue::string(subject))
    }

    fn none() -> SubRestrictionResults {
        SubRestrictionResults::default()
    }

    // =========================================================================
    // CONTENT
    // =========================================================================

    #[test]
    fn test_content_prefix_case_insensitive() {
        let m = matcher(Restriction::content(
            PR_SUBJECT,
            "foo",
            FuzzyLevel::Prefix,
            ContentFlags::ignore_case(),
        ));
        assert!(m.matches(&subject_row("Foobar"), &none()).unwrap());
        assert!(m.matches(&subject_row("FOO"), &none()).unwrap());
        assert!(!m.matches(&subject_row("barfoo"), &none()).unwrap());
    }

    #[test]
    fn test_content_full_requires_equal_length() {
        let m = matcher(Restriction::content(
            PR_SUBJECT,
            "abc",
            FuzzyLevel::Full,
            ContentFlags::default(),
        ));
        assert!(m.matches(&subject_row("abc"), &none()).unwrap());
        assert!(!m.matches(&subject_row("abcd"), &none()).unwrap());
        assert!(!m.matches(&subject_row("ABC"), &none()).unwrap());
    }

    #[test]
    fn test_content_any_element_of_multi_value() {
        let m = matcher(Restriction::content(
            PR_KEYWORDS,
            "urg",
            FuzzyLevel::Substring,
            ContentFlags::default(),
        ));
        let row = PropertyBag::new().with(
            PR_KEYWORDS,
            PropValue::MultiValue(vec![PropValue::string("later"), PropValue::string("urgent")]),
        );
        assert!(m.matches(&row, &none()).unwrap());
    }

    // =========================================================================
    // PROPERTY
    // =========================================================================

    #[test]
    fn test_property_absent_value() {
        let eq = matcher(Restriction::property(RelOp::Eq, PR_SENDER_NAME, PropValue::string("x")));
        let ne = matcher(Restriction::property(RelOp::Ne, PR_SENDER_NAME, PropValue::string("x")));
        let row = subject_row("hello");
        assert!(!eq.matches(&row, &none()).unwrap());
        assert!(ne.matches(&row, &none()).unwrap());
    }

    #[test]
    fn test_property_row_type_mismatch() {
        let m = matcher(Restriction::property(RelOp::Gt, PR_MESSAGE_SIZE, PropValue::Long(10)));
        let row = PropertyBag::new().with(PR_MESSAGE_SIZE, PropValue::string("big"));
        assert!(matches!(
            m.matches(&row, &none()),
            Err(TableError::InvalidType(_))
        ));
    }

    #[test]
    fn test_property_regex() {
        let m = matcher(Restriction::property(RelOp::Re, PR_SUBJECT, PropValue::string("^re: ")));
        assert!(m.matches(&subject_row("re: lunch"), &none()).unwrap());
        assert!(!m.matches(&subject_row("fw: lunch"), &none()).unwrap());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let r = Restriction::property(RelOp::Re, PR_SUBJECT, PropValue::string("(unclosed"));
        assert!(matches!(
            RowMatcher::new(r, 16),
            Err(TableError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_anr_searches_fixed_columns() {
        let m = matcher(Restriction::property(RelOp::Eq, PR_ANR, PropValue::string("smi")));
        let by_surname = PropertyBag::new().with(PR_SURNAME, PropValue::string("Smith"));
        let by_name = PropertyBag::new().with(PR_DISPLAY_NAME, PropValue::string("Jo SMITH"));
        let other = PropertyBag::new().with(PR_SUBJECT, PropValue::string("smith"));
        assert!(m.matches(&by_surname, &none()).unwrap());
        assert!(m.matches(&by_name, &none()).unwrap());
        assert!(!m.matches(&other, &none()).unwrap());

        let not_found = matcher(Restriction::property(RelOp::Lt, PR_ANR, PropValue::string("zz")));
        assert!(not_found.matches(&other, &none()).unwrap());
    }

    // =========================================================================
    // Other leaf kinds
    // =========================================================================

    #[test]
    fn test_bitmask_and_size() {
        let unread = matcher(Restriction::Bitmask {
            op: BitmaskOp::EqZero,
            tag: PR_MESSAGE_FLAGS,
            mask: 1,
        });
        let row = PropertyBag::new().with(PR_MESSAGE_FLAGS, PropValue::Long(0x10));
        assert!(unread.matches(&row, &none()).unwrap());

        let big = matcher(Restriction::Size {
            relop: RelOp::Ge,
            tag: PR_SUBJECT,
            size: 5,
        });
        assert!(big.matches(&subject_row("hello"), &none()).unwrap());
        assert!(!big.matches(&subject_row("hi"), &none()).unwrap());
    }

    #[test]
    fn test_compare_props() {
        let m = matcher(Restriction::CompareProps {
            relop: RelOp::Eq,
            tag1: PR_SUBJECT,
            tag2: PR_SENDER_NAME,
        });
        let same = subject_row("x").with(PR_SENDER_NAME, PropValue::string("x"));
        assert!(m.matches(&same, &none()).unwrap());
        assert!(!m.matches(&subject_row("x"), &none()).unwrap());
    }

    #[test]
    fn test_exist_treats_error_as_absent() {
        let m = matcher(Restriction::exist(PR_SUBJECT));
        let errored = PropertyBag::new().with(PR_SUBJECT, PropValue::Error(0x8004_010F));
        assert!(m.matches(&subject_row(""), &none()).unwrap());
        assert!(!m.matches(&errored, &none()).unwrap());
    }

    // =========================================================================
    // Sub-restrictions
    // =========================================================================

    #[test]
    fn test_sub_restriction_ordinals_survive_short_circuit() {
        let r = Restriction::Or(vec![
            Restriction::exist(PR_SUBJECT),
            Restriction::sub(SubObject::Recipients, Restriction::exist(PR_DISPLAY_NAME)),
            Restriction::sub(SubObject::Attachments, Restriction::exist(PR_DISPLAY_NAME)),
        ]);
        let m = matcher(Restriction::And(vec![
            Restriction::negate(r),
            Restriction::sub(SubObject::Attachments, Restriction::exist(PR_DISPLAY_NAME)),
        ]));

        // Ordinal 2 (the last node) matches object 1 only.
        let subs = SubRestrictionResults::from_sets(vec![
            HashSet::new(),
            HashSet::new(),
            HashSet::from([1]),
        ]);
        let row = PropertyBag::new().with(PR_OBJECT_ID, PropValue::Long(1));
        assert!(m.matches(&row, &subs).unwrap());

        // With a subject the OR short-circuits and the NOT fails.
        assert!(!m.matches(&subject_row("x"), &subs).unwrap());
    }

    #[test]
    fn test_missing_sub_results_is_internal() {
        let m = matcher(Restriction::sub(
            SubObject::Recipients,
            Restriction::exist(PR_DISPLAY_NAME),
        ));
        assert!(matches!(
            m.matches(&subject_row("x"), &none()),
            Err(TableError::Internal(_))
        ));
    }
}
