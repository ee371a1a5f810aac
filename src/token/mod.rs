//! The token collaborator boundary.
//!
//! Everything that actually talks to a security token lives behind the
//! [`TokenProvider`] trait: slot enumeration, login, object enumeration and
//! the sign/decrypt primitives. This crate only decides *which* slot, object
//! and mechanism to use; a provider backed by a real PKCS#11 module (or by
//! anything else that behaves like one) supplies the transport.

use std::fmt;

use chrono::{DateTime, Utc};
use openssl::error::ErrorStack;
use openssl::x509::X509;
use secrecy::SecretString;

use crate::crypto::mechanism::Mechanism;

#[cfg(test)]
pub(crate) mod mock;

//------------ Identifiers ---------------------------------------------------

/// Numeric id of a slot, as reported by the token module.
pub type SlotId = u64;

/// Opaque handle of an object within its slot session.
///
/// Handles are only valid for the duration of the resolution call that
/// produced them; they must not be kept once the enumerating session may
/// have closed.
pub type ObjectHandle = u64;

//------------ Slots and tokens ----------------------------------------------

/// Attributes and policy flags of a token present in a slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer: String,
    pub serial: String,
    pub model: String,

    /// The token has been initialized.
    pub initialized: bool,

    /// The user PIN has been set.
    pub user_pin_set: bool,

    /// Cryptographic operations require a prior login.
    pub login_required: bool,

    /// The token is read-only.
    pub read_only: bool,

    /// The token has a protected authentication path (e.g. an external
    /// keypad); logging in passes no PIN through this crate.
    pub secure_login: bool,
}

/// A slot as reported by the provider, with its token if one is present.
#[derive(Clone, Debug)]
pub struct Slot {
    pub id: SlotId,
    pub description: String,
    pub token: Option<TokenInfo>,
}

impl Slot {
    /// The token label for diagnostics, never empty.
    pub fn token_label(&self) -> &str {
        match &self.token {
            Some(token) if !token.label.is_empty() => &token.label,
            _ => "no label",
        }
    }
}

//------------ Objects -------------------------------------------------------

/// A certificate resident on a token.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub handle: ObjectHandle,
    pub id: Vec<u8>,
    pub label: Option<String>,

    /// End of the certificate's validity, if the provider could determine it.
    pub not_after: Option<DateTime<Utc>>,

    /// The DER encoded certificate.
    pub der: Vec<u8>,
}

impl Certificate {
    /// Parses the DER encoding into the host framework's certificate type.
    pub fn to_x509(&self) -> Result<X509, ErrorStack> {
        X509::from_der(&self.der)
    }

    /// Expiry text for diagnostics.
    pub fn expiry_text(&self) -> String {
        match self.not_after {
            Some(when) => when.to_rfc2822(),
            None => "No expiry information available".to_string(),
        }
    }
}

/// A public or private key resident on a token.
#[derive(Clone, Debug)]
pub struct Key {
    pub handle: ObjectHandle,
    pub id: Vec<u8>,
    pub label: Option<String>,

    /// Private keys sign and decrypt; public keys verify and encrypt.
    pub private: bool,

    /// The object is only visible or usable after login.
    pub needs_login: bool,

    /// The token demands a fresh authentication before every use of this
    /// key (`CKA_ALWAYS_AUTHENTICATE`).
    pub always_authenticate: bool,

    /// Modulus length in bits.
    pub bits: usize,
}

/// Search criteria for object enumeration; unset fields are wildcards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectTemplate {
    pub id: Option<Vec<u8>>,
    pub label: Option<String>,
}

//------------ TokenError ----------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// The token rejected or failed an operation.
    OperationFailed(String),

    /// The token rejected the presented PIN.
    PinIncorrect,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenError::OperationFailed(msg) => write!(f, "token error: {}", msg),
            TokenError::PinIncorrect => write!(f, "PIN incorrect"),
        }
    }
}

impl std::error::Error for TokenError {}

//------------ TokenProvider -------------------------------------------------

/// The transport to the token module.
///
/// All calls are synchronous and expected to return in bounded time; this
/// crate adds no timeout or cancellation layer on top. A provider manages
/// one session per slot internally; `sign_init`/`sign` and
/// `decrypt_init`/`decrypt` operate on that session, and the caller
/// serializes them (see the resolver's RSA operation gate).
pub trait TokenProvider {
    /// Lists all slots, with token attributes for slots holding a token.
    fn enumerate_slots(&self) -> Result<Vec<Slot>, TokenError>;

    /// Whether the slot's session is already authenticated.
    fn is_logged_in(&self, slot: SlotId) -> Result<bool, TokenError>;

    /// Logs the user in. `None` means the token gathers the credential
    /// itself through its protected authentication path.
    fn login(&self, slot: SlotId, pin: Option<&str>) -> Result<(), TokenError>;

    /// Enumerates certificates matching the template.
    fn enumerate_certificates(
        &self,
        slot: SlotId,
        template: &ObjectTemplate,
    ) -> Result<Vec<Certificate>, TokenError>;

    /// Enumerates public or private keys matching the template.
    fn enumerate_keys(
        &self,
        slot: SlotId,
        template: &ObjectTemplate,
        private: bool,
    ) -> Result<Vec<Key>, TokenError>;

    /// Starts a signing operation with the given mechanism and key.
    fn sign_init(
        &self,
        slot: SlotId,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError>;

    /// Executes the signing primitive started by `sign_init`.
    fn sign(&self, slot: SlotId, data: &[u8]) -> Result<Vec<u8>, TokenError>;

    /// Starts a decryption operation with the given mechanism and key.
    fn decrypt_init(
        &self,
        slot: SlotId,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError>;

    /// Executes the decryption primitive started by `decrypt_init`.
    fn decrypt(&self, slot: SlotId, data: &[u8]) -> Result<Vec<u8>, TokenError>;
}

//------------ PinEntry ------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PinError(pub String);

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not obtain PIN: {}", self.0)
    }
}

impl std::error::Error for PinError {}

/// The interactive PIN acquisition collaborator.
pub trait PinEntry {
    fn prompt_pin(&self, token_label: &str) -> Result<SecretString, PinError>;
}

/// Prompts for a PIN on the controlling terminal without echo.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPinEntry;

impl PinEntry for TerminalPinEntry {
    fn prompt_pin(&self, token_label: &str) -> Result<SecretString, PinError> {
        let prompt = format!("PKCS#11 token PIN ({}): ", token_label);
        let pin = rpassword::prompt_password(prompt)
            .map_err(|err| PinError(err.to_string()))?;
        if pin.is_empty() {
            return Err(PinError("no PIN code was entered".to_string()));
        }
        Ok(SecretString::new(pin))
    }
}
