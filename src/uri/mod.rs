//! Identifier parsing.
//!
//! Converts an RFC 7512 style `pkcs11:` URI or one of the legacy compact
//! identifier forms into an [`ObjectQuery`], the structured selection
//! criteria consumed by the resolver.

use std::fmt;

use percent_encoding::{utf8_percent_encode, CONTROLS};
use secrecy::SecretString;

pub mod codec;
mod parser;

pub use self::parser::parse;

//------------ TokenFilter ---------------------------------------------------

/// Token matching attributes from a URI.
///
/// Every field is optional; a field that is set must compare equal (exact,
/// case-sensitive) to the corresponding token attribute for the token to
/// match. A filter with no fields set matches every token-bearing slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenFilter {
    pub label: Option<String>,
    pub manufacturer: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
}

impl TokenFilter {
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.manufacturer.is_none()
            && self.serial.is_none()
            && self.model.is_none()
    }
}

//------------ ObjectQuery ---------------------------------------------------

/// The structured selection criteria parsed from an identifier.
///
/// Constructed per lookup call and discarded afterwards. The PIN, if any,
/// is held behind [`SecretString`] and is taken out of the query by the
/// engine before slot matching starts.
#[derive(Debug, Default)]
pub struct ObjectQuery {
    /// Slot to search, from the legacy `<slot>:<id>` and `slot_<n>` forms.
    pub slot_number: Option<u64>,

    /// Object id to match; empty means any.
    pub object_id: Vec<u8>,

    /// Object label to match.
    pub object_label: Option<String>,

    /// Token attributes to match; `None` for legacy identifiers.
    pub token_filter: Option<TokenFilter>,

    /// PIN carried inline (`pin-value`) or read from a file (`pin-source`).
    pub pin: Option<SecretString>,
}

impl PartialEq for ObjectQuery {
    fn eq(&self, other: &Self) -> bool {
        use secrecy::ExposeSecret;
        let pin_eq = match (&self.pin, &other.pin) {
            (None, None) => true,
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            _ => false,
        };
        self.slot_number == other.slot_number
            && self.object_id == other.object_id
            && self.object_label == other.object_label
            && self.token_filter == other.token_filter
            && pin_eq
    }
}

impl fmt::Display for ObjectQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(nr) = self.slot_number {
            write!(f, " slot={}", nr)?;
        }
        if !self.object_id.is_empty() {
            write!(f, " id={}", hex::encode_upper(&self.object_id))?;
        }
        if let Some(label) = &self.object_label {
            write!(f, " label={}", utf8_percent_encode(label, CONTROLS))?;
        }
        if let Some(filter) = &self.token_filter {
            if let Some(token) = &filter.label {
                write!(f, " token={}", utf8_percent_encode(token, CONTROLS))?;
            }
            if let Some(serial) = &filter.serial {
                write!(f, " serial={}", utf8_percent_encode(serial, CONTROLS))?;
            }
        }
        Ok(())
    }
}

//------------ ParseError ----------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The identifier matches none of the legacy compact forms.
    MalformedLegacyId,

    /// A hex field contains a character outside `[0-9a-fA-F:]`.
    InvalidHexDigit(char),

    /// A `%` escape with fewer than two hex digits after it.
    TruncatedEscape,

    /// The decoded object id exceeds the id capacity.
    IdTooLong,

    /// The decoded PIN exceeds the PIN capacity.
    PinTooLong,

    /// A URI attribute key this parser does not recognize.
    UnrecognizedAttribute(String),

    /// A `type=`/`object-type=` value other than cert, public or private.
    UnknownObjectType(String),

    /// More than one `pin-value`/`pin-source` attribute.
    DuplicatePinAttribute,

    /// A `pin-source` referring to a pipe command.
    UnsupportedPinSource,

    /// A `pin-source` file that could not be read.
    PinSourceUnreadable(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::MalformedLegacyId => {
                write!(f, "identifier format not recognized")
            }
            ParseError::InvalidHexDigit(c) => {
                write!(f, "invalid character '{}' in hex string", c)
            }
            ParseError::TruncatedEscape => write!(f, "truncated %-escape"),
            ParseError::IdTooLong => write!(f, "id string too long"),
            ParseError::PinTooLong => write!(f, "PIN too long"),
            ParseError::UnrecognizedAttribute(key) => {
                write!(f, "unrecognized URI attribute '{}'", key)
            }
            ParseError::UnknownObjectType(value) => {
                write!(f, "unknown object type '{}'", value)
            }
            ParseError::DuplicatePinAttribute => {
                write!(f, "PIN specified more than once")
            }
            ParseError::UnsupportedPinSource => {
                write!(f, "unsupported pin-source syntax")
            }
            ParseError::PinSourceUnreadable(path) => {
                write!(f, "could not read pin-source {}", path)
            }
        }
    }
}

impl std::error::Error for ParseError {}
