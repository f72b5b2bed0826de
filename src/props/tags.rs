//! Property tags
//!
//! A tag packs a 16-bit property id (high half) and a 16-bit property type
//! (low half). The type carries the multi-value and instance flags.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::ValueKind;

pub const PT_UNSPECIFIED: u16 = 0x0000;
pub const PT_NULL: u16 = 0x0001;
pub const PT_I2: u16 = 0x0002;
pub const PT_LONG: u16 = 0x0003;
pub const PT_FLOAT: u16 = 0x0004;
pub const PT_DOUBLE: u16 = 0x0005;
pub const PT_CURRENCY: u16 = 0x0006;
pub const PT_APPTIME: u16 = 0x0007;
pub const PT_ERROR: u16 = 0x000A;
pub const PT_BOOLEAN: u16 = 0x000B;
pub const PT_OBJECT: u16 = 0x000D;
pub const PT_I8: u16 = 0x0014;
pub const PT_STRING8: u16 = 0x001E;
pub const PT_UNICODE: u16 = 0x001F;
pub const PT_SYSTIME: u16 = 0x0040;
pub const PT_BINARY: u16 = 0x0102;

/// Multi-valued property
pub const MV_FLAG: u16 = 0x1000;
/// One row per value of a multi-valued column
pub const MVI_FLAG: u16 = 0x2000;

/// Error code stored in `PropValue::Error` for columns a row does not have.
pub const MAPI_E_NOT_FOUND: u32 = 0x8004_010F;

/// Message flag bit: message has been read.
pub const MSGFLAG_READ: i32 = 0x0000_0001;

/// Row type values reported in `PR_ROW_TYPE`.
pub const TBL_LEAF_ROW: i32 = 1;
pub const TBL_EMPTY_CATEGORY: i32 = 2;
pub const TBL_EXPANDED_CATEGORY: i32 = 3;
pub const TBL_COLLAPSED_CATEGORY: i32 = 4;

/// A property tag (id + type).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropTag(pub u32);

impl PropTag {
    /// Build a tag from id and type
    pub const fn new(id: u16, prop_type: u16) -> Self {
        PropTag(((id as u32) << 16) | prop_type as u32)
    }

    /// Property id (high 16 bits)
    pub const fn id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Full property type including MV/MVI flags
    pub const fn prop_type(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Same id with a different type
    pub const fn with_type(self, prop_type: u16) -> Self {
        PropTag::new(self.id(), prop_type)
    }

    pub const fn is_multi_valued(self) -> bool {
        self.prop_type() & MV_FLAG != 0
    }

    /// Multi-valued column expanded into one row per value
    pub const fn is_instance(self) -> bool {
        self.prop_type() & MVI_FLAG == MVI_FLAG && self.is_multi_valued()
    }

    /// Type with MV/MVI flags removed and 8-bit strings folded to unicode.
    pub const fn base_type(self) -> u16 {
        let raw = self.prop_type() & !(MV_FLAG | MVI_FLAG);
        if raw == PT_STRING8 {
            PT_UNICODE
        } else {
            raw
        }
    }

    /// Canonical tag used as a property bag key: unicode strings, no instance flag.
    pub const fn normalized(self) -> Self {
        let flags = self.prop_type() & MV_FLAG;
        self.with_type(self.base_type() | flags)
    }

    /// Scalar form of the tag (no MV/MVI flags, unicode strings)
    pub const fn scalar(self) -> Self {
        self.with_type(self.base_type())
    }

    /// The same tag reporting its string type as 8-bit or unicode.
    pub const fn with_string_flavor(self, unicode: bool) -> Self {
        if self.base_type() != PT_UNICODE {
            return self;
        }
        let flags = self.prop_type() & (MV_FLAG | MVI_FLAG);
        let string_type = if unicode { PT_UNICODE } else { PT_STRING8 };
        self.with_type(string_type | flags)
    }

    /// Base value kind of this tag, if the type is a value type
    pub fn kind(self) -> Option<ValueKind> {
        ValueKind::from_prop_type(self.base_type())
    }

    /// Tag with type PT_ERROR, used for columns that could not be produced
    pub const fn as_error(self) -> Self {
        self.with_type(PT_ERROR)
    }
}

impl fmt::Debug for PropTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropTag(0x{:08X})", self.0)
    }
}

impl fmt::Display for PropTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// Message properties
pub const PR_IMPORTANCE: PropTag = PropTag::new(0x0017, PT_LONG);
pub const PR_SUBJECT: PropTag = PropTag::new(0x0037, PT_UNICODE);
pub const PR_SENDER_NAME: PropTag = PropTag::new(0x0C1A, PT_UNICODE);
pub const PR_DISPLAY_TO: PropTag = PropTag::new(0x0E04, PT_UNICODE);
pub const PR_MESSAGE_DELIVERY_TIME: PropTag = PropTag::new(0x0E06, PT_SYSTIME);
pub const PR_MESSAGE_FLAGS: PropTag = PropTag::new(0x0E07, PT_LONG);
pub const PR_MESSAGE_SIZE: PropTag = PropTag::new(0x0E08, PT_LONG);
pub const PR_MESSAGE_RECIPIENTS: PropTag = PropTag::new(0x0E12, PT_OBJECT);
pub const PR_MESSAGE_ATTACHMENTS: PropTag = PropTag::new(0x0E13, PT_OBJECT);
pub const PR_KEYWORDS: PropTag = PropTag::new(0x8000, PT_UNICODE | MV_FLAG);
pub const PR_ATTACH_FILENAME: PropTag = PropTag::new(0x3704, PT_UNICODE);

// Identity and table-computed columns
pub const PR_ROW_TYPE: PropTag = PropTag::new(0x0FF5, PT_LONG);
pub const PR_INSTANCE_KEY: PropTag = PropTag::new(0x0FF6, PT_BINARY);
pub const PR_ENTRYID: PropTag = PropTag::new(0x0FFF, PT_BINARY);
pub const PR_DEPTH: PropTag = PropTag::new(0x3005, PT_LONG);
pub const PR_CONTENT_COUNT: PropTag = PropTag::new(0x3602, PT_LONG);
pub const PR_CONTENT_UNREAD: PropTag = PropTag::new(0x3603, PT_LONG);
/// Server object id of the row's object; the identity column.
pub const PR_OBJECT_ID: PropTag = PropTag::new(0x6711, PT_LONG);

// Addressing properties
pub const PR_DISPLAY_NAME: PropTag = PropTag::new(0x3001, PT_UNICODE);
pub const PR_EMAIL_ADDRESS: PropTag = PropTag::new(0x3003, PT_UNICODE);
pub const PR_RECIPIENT_TYPE: PropTag = PropTag::new(0x0C15, PT_LONG);
pub const PR_ACCOUNT: PropTag = PropTag::new(0x3A00, PT_UNICODE);
pub const PR_OFFICE_TELEPHONE_NUMBER: PropTag = PropTag::new(0x3A08, PT_UNICODE);
pub const PR_SURNAME: PropTag = PropTag::new(0x3A11, PT_UNICODE);
pub const PR_DEPARTMENT_NAME: PropTag = PropTag::new(0x3A18, PT_UNICODE);
pub const PR_OFFICE_LOCATION: PropTag = PropTag::new(0x3A19, PT_UNICODE);
pub const PR_PRIMARY_FAX_NUMBER: PropTag = PropTag::new(0x3A23, PT_UNICODE);
pub const PR_SMTP_ADDRESS: PropTag = PropTag::new(0x39FE, PT_UNICODE);

/// Ambiguous name resolution alias
pub const PR_ANR: PropTag = PropTag::new(0x360C, PT_UNICODE);

/// Columns searched, in order, for an ambiguous-name restriction.
pub const ANR_COLUMNS: [PropTag; 8] = [
    PR_DISPLAY_NAME,
    PR_SMTP_ADDRESS,
    PR_ACCOUNT,
    PR_DEPARTMENT_NAME,
    PR_OFFICE_TELEPHONE_NUMBER,
    PR_OFFICE_LOCATION,
    PR_PRIMARY_FAX_NUMBER,
    PR_SURNAME,
];
