//! Restriction tree
//!
//! The immutable predicate a table filters on, plus the row-independent
//! checks and walks the table runs when a restriction is installed.

use serde::{Deserialize, Serialize};

use crate::errors::{TableError, TableResult};
use crate::props::tags::{ANR_COLUMNS, PR_ANR};
use crate::props::{PropTag, PropValue, Property, ValueKind};

/// Relational operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// Regular expression match; single-valued string columns only
    Re,
}

impl RelOp {
    /// Whether an ordering of (row value, operand) satisfies the operator.
    ///
    /// `Re` never holds through an ordering.
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            RelOp::Lt => ordering == Less,
            RelOp::Le => ordering != Greater,
            RelOp::Gt => ordering == Greater,
            RelOp::Ge => ordering != Less,
            RelOp::Eq => ordering == Equal,
            RelOp::Ne => ordering != Equal,
            RelOp::Re => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelOp::Lt => "lt",
            RelOp::Le => "le",
            RelOp::Gt => "gt",
            RelOp::Ge => "ge",
            RelOp::Eq => "eq",
            RelOp::Ne => "ne",
            RelOp::Re => "re",
        }
    }
}

/// How much of a string a CONTENT restriction must match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuzzyLevel {
    /// Whole value equals the pattern
    Full,
    /// Value starts with the pattern
    Prefix,
    /// Value contains the pattern
    Substring,
}

/// CONTENT comparison flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlags {
    pub ignore_case: bool,
    pub ignore_nonspace: bool,
    pub loose: bool,
}

impl ContentFlags {
    /// Case-insensitive flags
    pub fn ignore_case() -> Self {
        Self {
            ignore_case: true,
            ..Self::default()
        }
    }

    /// Any flag that requests folded comparison
    pub fn folds(&self) -> bool {
        self.ignore_case || self.ignore_nonspace || self.loose
    }
}

/// BITMASK test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitmaskOp {
    /// `(value & mask) == 0`
    EqZero,
    /// `(value & mask) != 0`
    NeZero,
}

/// Nested object collection a SUB-RESTRICTION looks into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubObject {
    Recipients,
    Attachments,
}

impl SubObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubObject::Recipients => "recipients",
            SubObject::Attachments => "attachments",
        }
    }
}

/// A restriction node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Restriction {
    And(Vec<Restriction>),
    Or(Vec<Restriction>),
    Not(Box<Restriction>),
    Content {
        level: FuzzyLevel,
        flags: ContentFlags,
        tag: PropTag,
        value: Property,
    },
    Property {
        relop: RelOp,
        tag: PropTag,
        value: Property,
    },
    CompareProps {
        relop: RelOp,
        tag1: PropTag,
        tag2: PropTag,
    },
    Bitmask {
        op: BitmaskOp,
        tag: PropTag,
        mask: u32,
    },
    Size {
        relop: RelOp,
        tag: PropTag,
        size: u32,
    },
    Exist {
        tag: PropTag,
    },
    SubRestriction {
        object: SubObject,
        restriction: Box<Restriction>,
    },
    /// Carries extra properties; transparent to matching. A comment without
    /// a restriction is malformed.
    Comment {
        props: Vec<Property>,
        restriction: Option<Box<Restriction>>,
    },
}

impl Restriction {
    /// CONTENT restriction on a string column
    pub fn content(tag: PropTag, pattern: &str, level: FuzzyLevel, flags: ContentFlags) -> Self {
        Restriction::Content {
            level,
            flags,
            tag,
            value: Property::new(tag.scalar(), PropValue::string(pattern)),
        }
    }

    /// PROPERTY restriction with the operand tagged like the column
    pub fn property(relop: RelOp, tag: PropTag, value: PropValue) -> Self {
        Restriction::Property {
            relop,
            tag,
            value: Property::new(tag.scalar(), value),
        }
    }

    pub fn exist(tag: PropTag) -> Self {
        Restriction::Exist { tag }
    }

    pub fn sub(object: SubObject, restriction: Restriction) -> Self {
        Restriction::SubRestriction {
            object,
            restriction: Box::new(restriction),
        }
    }

    pub fn negate(restriction: Restriction) -> Self {
        Restriction::Not(Box::new(restriction))
    }

    /// Row-independent validation: depth limit, operand types, nested
    /// sub-restrictions, malformed comments.
    pub fn validate(&self, max_depth: usize) -> TableResult<()> {
        self.validate_at(1, max_depth, false)
    }

    fn validate_at(&self, depth: usize, max_depth: usize, in_sub: bool) -> TableResult<()> {
        if depth > max_depth {
            return Err(TableError::too_complex(format!(
                "restriction nesting exceeds {} levels",
                max_depth
            )));
        }

        match self {
            Restriction::And(children) | Restriction::Or(children) => children
                .iter()
                .try_for_each(|child| child.validate_at(depth + 1, max_depth, in_sub)),
            Restriction::Not(child) => child.validate_at(depth + 1, max_depth, in_sub),
            Restriction::Comment { restriction, .. } => match restriction {
                Some(child) => child.validate_at(depth + 1, max_depth, in_sub),
                None => Err(TableError::invalid_type("comment without restriction")),
            },
            Restriction::SubRestriction { restriction, .. } => {
                if in_sub {
                    return Err(TableError::too_complex("nested sub-restriction"));
                }
                restriction.validate_at(depth + 1, max_depth, true)
            }
            Restriction::Content { tag, value, .. } => {
                let operand = scalar_operand(value, "CONTENT")?;
                if !matches!(operand, ValueKind::String | ValueKind::Binary) {
                    return Err(TableError::invalid_type(format!(
                        "CONTENT operand is {}",
                        operand.as_str()
                    )));
                }
                expect_kind(*tag, operand, "CONTENT")
            }
            Restriction::Property { relop, tag, value } => {
                let operand = scalar_operand(value, "PROPERTY")?;
                if tag.normalized() == PR_ANR.normalized() {
                    if operand != ValueKind::String || *relop == RelOp::Re {
                        return Err(TableError::invalid_type(
                            "ambiguous name restriction needs a string operand",
                        ));
                    }
                    return Ok(());
                }
                if *relop == RelOp::Re
                    && (tag.is_multi_valued() || tag.kind() != Some(ValueKind::String))
                {
                    return Err(TableError::invalid_type(format!(
                        "regular expression on column {}",
                        tag
                    )));
                }
                expect_kind(*tag, operand, "PROPERTY")
            }
            Restriction::CompareProps { relop, tag1, tag2 } => {
                if *relop == RelOp::Re {
                    return Err(TableError::invalid_type("regular expression in COMPAREPROPS"));
                }
                if tag1.kind() != tag2.kind() {
                    return Err(TableError::invalid_type(format!(
                        "COMPAREPROPS between {} and {}",
                        tag1, tag2
                    )));
                }
                Ok(())
            }
            Restriction::Bitmask { tag, .. } => {
                if tag.is_multi_valued() || tag.kind() != Some(ValueKind::Long) {
                    return Err(TableError::invalid_type(format!(
                        "BITMASK on non-integer column {}",
                        tag
                    )));
                }
                Ok(())
            }
            Restriction::Size { relop, .. } => {
                if *relop == RelOp::Re {
                    return Err(TableError::invalid_type("regular expression in SIZE"));
                }
                Ok(())
            }
            Restriction::Exist { .. } => Ok(()),
        }
    }

    /// Number of SUB-RESTRICTION nodes, not counting any inside another's subtree
    pub fn sub_restriction_count(&self) -> usize {
        match self {
            Restriction::And(children) | Restriction::Or(children) => {
                children.iter().map(Restriction::sub_restriction_count).sum()
            }
            Restriction::Not(child) => child.sub_restriction_count(),
            Restriction::Comment {
                restriction: Some(child),
                ..
            } => child.sub_restriction_count(),
            Restriction::SubRestriction { .. } => 1,
            _ => 0,
        }
    }

    /// SUB-RESTRICTION nodes in pre-order; position is the ordinal the
    /// matcher consults.
    pub fn sub_restrictions(&self) -> Vec<(SubObject, &Restriction)> {
        let mut out = Vec::new();
        self.collect_sub_restrictions(&mut out);
        out
    }

    fn collect_sub_restrictions<'a>(&'a self, out: &mut Vec<(SubObject, &'a Restriction)>) {
        match self {
            Restriction::And(children) | Restriction::Or(children) => {
                for child in children {
                    child.collect_sub_restrictions(out);
                }
            }
            Restriction::Not(child) => child.collect_sub_restrictions(out),
            Restriction::Comment {
                restriction: Some(child),
                ..
            } => child.collect_sub_restrictions(out),
            Restriction::SubRestriction {
                object,
                restriction,
            } => out.push((*object, restriction)),
            _ => {}
        }
    }

    /// Columns a row must carry for this restriction to be evaluated.
    ///
    /// Sub-restriction subtrees are skipped: they read child rows.
    pub fn columns(&self) -> Vec<PropTag> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<PropTag>) {
        match self {
            Restriction::And(children) | Restriction::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Restriction::Not(child) => child.collect_columns(out),
            Restriction::Comment {
                restriction: Some(child),
                ..
            } => child.collect_columns(out),
            Restriction::Comment { .. } | Restriction::SubRestriction { .. } => {}
            Restriction::Property { tag, .. } if tag.normalized() == PR_ANR.normalized() => {
                for column in ANR_COLUMNS {
                    push_column(out, column);
                }
            }
            Restriction::Content { tag, .. }
            | Restriction::Property { tag, .. }
            | Restriction::Bitmask { tag, .. }
            | Restriction::Size { tag, .. }
            | Restriction::Exist { tag } => push_column(out, *tag),
            Restriction::CompareProps { tag1, tag2, .. } => {
                push_column(out, *tag1);
                push_column(out, *tag2);
            }
        }
    }

    /// Regular expression patterns used anywhere in the tree
    pub(crate) fn regex_patterns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Restriction::Property {
                relop: RelOp::Re,
                value,
                ..
            } = node
            {
                if let Some(pattern) = value.value.as_str() {
                    out.push(pattern);
                }
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Restriction)) {
        visit(self);
        match self {
            Restriction::And(children) | Restriction::Or(children) => {
                for child in children {
                    child.walk(visit);
                }
            }
            Restriction::Not(child) => child.walk(visit),
            Restriction::SubRestriction { restriction, .. } => restriction.walk(visit),
            Restriction::Comment {
                restriction: Some(child),
                ..
            } => child.walk(visit),
            _ => {}
        }
    }
}

fn push_column(out: &mut Vec<PropTag>, tag: PropTag) {
    let tag = tag.normalized();
    if !out.contains(&tag) {
        out.push(tag);
    }
}

fn scalar_operand(value: &Property, node: &str) -> TableResult<ValueKind> {
    match value.value.kind() {
        Some(ValueKind::Error) | None => Err(TableError::invalid_type(format!(
            "{} operand has no value",
            node
        ))),
        Some(kind) => Ok(kind),
    }
}

fn expect_kind(tag: PropTag, operand: ValueKind, node: &str) -> TableResult<()> {
    match tag.kind() {
        Some(kind) if kind == operand => Ok(()),
        _ => Err(TableError::invalid_type(format!(
            "{} operand {} does not match column {}",
            node,
            operand.as_str(),
            tag
        ))),
    }
}
