use std::fs;

use log::error;
use secrecy::SecretString;

use crate::constants::{MAX_ID_LEN, MAX_PIN_LENGTH, URI_SCHEME};
use crate::uri::codec;
use crate::uri::{ObjectQuery, ParseError, TokenFilter};

//------------ Entry point ---------------------------------------------------

/// Parses an identifier into an [`ObjectQuery`].
///
/// Identifiers beginning with the `pkcs11:` scheme (case-insensitive) are
/// parsed as structured URIs; everything else goes through the legacy
/// compact grammar.
pub fn parse(identifier: &str) -> Result<ObjectQuery, ParseError> {
    match identifier.get(..URI_SCHEME.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(URI_SCHEME) => {
            parse_uri(&identifier[URI_SCHEME.len()..])
        }
        _ => parse_legacy(identifier),
    }
}

//------------ Structured URIs -----------------------------------------------

fn parse_uri(attributes: &str) -> Result<ObjectQuery, ParseError> {
    let mut query = ObjectQuery::default();
    let mut filter = TokenFilter::default();
    let mut pin_seen = false;

    for attribute in attributes.split(|c| c == ';' || c == '?' || c == '&') {
        if attribute.is_empty() {
            continue;
        }
        let (key, value) = attribute
            .split_once('=')
            .ok_or_else(|| ParseError::UnrecognizedAttribute(attribute.to_string()))?;
        match key {
            "model" => filter.model = Some(codec::decode_escaped_string(value)?),
            "manufacturer" => {
                filter.manufacturer = Some(codec::decode_escaped_string(value)?)
            }
            "token" => filter.label = Some(codec::decode_escaped_string(value)?),
            "serial" => filter.serial = Some(codec::decode_escaped_string(value)?),
            "object" => {
                query.object_label = Some(codec::decode_escaped_string(value)?)
            }
            "id" => {
                let text = codec::decode_escaped_string(value)?;
                query.object_id = codec::hex_to_bytes(&text, MAX_ID_LEN)?;
            }
            "pin-value" => {
                if pin_seen {
                    return Err(ParseError::DuplicatePinAttribute);
                }
                pin_seen = true;
                let pin = codec::decode_escaped_string(value)?;
                if pin.len() > MAX_PIN_LENGTH {
                    return Err(ParseError::PinTooLong);
                }
                query.pin = Some(SecretString::new(pin));
            }
            "pin-source" => {
                if pin_seen {
                    return Err(ParseError::DuplicatePinAttribute);
                }
                pin_seen = true;
                query.pin = Some(parse_pin_source(value)?);
            }
            "type" | "object-type" => match value {
                // accepted, but the object kind is decided by the caller
                "cert" | "public" | "private" => {}
                other => {
                    return Err(ParseError::UnknownObjectType(other.to_string()))
                }
            },
            other => {
                return Err(ParseError::UnrecognizedAttribute(other.to_string()))
            }
        }
    }

    query.token_filter = Some(filter);
    Ok(query)
}

fn parse_pin_source(value: &str) -> Result<SecretString, ParseError> {
    let source = codec::decode_escaped_string(value)?;
    let file_prefix = source
        .get(..5)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("file:"));
    if file_prefix {
        read_pin_file(&source[5..])
    } else if source.starts_with('|') {
        error!("Unsupported pin-source syntax");
        Err(ParseError::UnsupportedPinSource)
    } else {
        // 'pin-source=/foo/bar' is commonly used
        read_pin_file(&source)
    }
}

fn read_pin_file(path: &str) -> Result<SecretString, ParseError> {
    let text = fs::read_to_string(path).map_err(|err| {
        error!("Could not open file {}", path);
        ParseError::PinSourceUnreadable(format!("{}: {}", path, err))
    })?;
    let mut pin = text.lines().next().unwrap_or("").to_string();
    if pin.len() > MAX_PIN_LENGTH {
        let mut end = MAX_PIN_LENGTH;
        while !pin.is_char_boundary(end) {
            end -= 1;
        }
        pin.truncate(end);
    }
    Ok(SecretString::new(pin))
}

//------------ Legacy identifiers --------------------------------------------

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(|b| b.is_ascii_digit()).count()
}

fn parse_slot_number(digits: &str) -> Result<u64, ParseError> {
    digits.parse().map_err(|_| ParseError::MalformedLegacyId)
}

fn parse_legacy(identifier: &str) -> Result<ObjectQuery, ParseError> {
    let mut query = ObjectQuery::default();

    if identifier.is_empty() {
        return Err(ParseError::MalformedLegacyId);
    }

    // first: pure hex number (id, slot is undefined)
    if identifier.bytes().all(is_hex) {
        query.object_id = codec::hex_to_bytes(identifier, MAX_ID_LEN)?;
        return Ok(query);
    }

    // second: <slot>:<id>, slot is a decimal int
    let digits = leading_digits(identifier);
    if digits > 0 {
        let rest = identifier[digits..]
            .strip_prefix(':')
            .ok_or(ParseError::MalformedLegacyId)?;
        query.slot_number = Some(parse_slot_number(&identifier[..digits])?);
        if !rest.is_empty() {
            if !rest.bytes().all(is_hex) {
                return Err(ParseError::MalformedLegacyId);
            }
            query.object_id = codec::hex_to_bytes(rest, MAX_ID_LEN)?;
        }
        return Ok(query);
    }

    // third: id_<id>, slot is undefined
    if let Some(rest) = identifier.strip_prefix("id_") {
        if !rest.bytes().all(is_hex) {
            return Err(ParseError::MalformedLegacyId);
        }
        query.object_id = codec::hex_to_bytes(rest, MAX_ID_LEN)?;
        return Ok(query);
    }

    // label_<label>, slot is undefined
    if let Some(rest) = identifier.strip_prefix("label_") {
        query.object_label = Some(rest.to_string());
        return Ok(query);
    }

    // last try: it has to be slot_<slot>, optionally followed by
    // -id_<id> or -label_<label>
    let rest = identifier
        .strip_prefix("slot_")
        .ok_or(ParseError::MalformedLegacyId)?;
    let digits = leading_digits(rest);
    if digits == 0 {
        return Err(ParseError::MalformedLegacyId);
    }
    query.slot_number = Some(parse_slot_number(&rest[..digits])?);
    let tail = &rest[digits..];
    if tail.is_empty() {
        return Ok(query);
    }
    let tail = tail.strip_prefix('-').ok_or(ParseError::MalformedLegacyId)?;

    if let Some(hex_part) = tail.strip_prefix("id_") {
        if !hex_part.bytes().all(is_hex) {
            return Err(ParseError::MalformedLegacyId);
        }
        query.object_id = codec::hex_to_bytes(hex_part, MAX_ID_LEN)?;
        return Ok(query);
    }
    if let Some(label) = tail.strip_prefix("label_") {
        query.object_label = Some(label.to_string());
        return Ok(query);
    }

    Err(ParseError::MalformedLegacyId)
}

//------------ Tests ---------------------------------------------------------
