//! Shared limits and fixed protocol values.

/// Scheme prefix of RFC 7512 style identifiers, compared case-insensitively.
pub const URI_SCHEME: &str = "pkcs11:";

/// Longest PIN accepted from any source (URI attribute, file, prompt).
pub const MAX_PIN_LENGTH: usize = 32;

/// Longest object id accepted from an identifier, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Capacity of the bounded buffer that receives decrypted output from the
/// token before it is copied into the caller's buffer.
pub const MAX_DECRYPT_LEN: usize = 20480;
