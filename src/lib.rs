//! The _keylocator_ library crate.
//!
//! Locates certificates and keys on PKCS#11 style security tokens by
//! RFC 7512 URI or legacy slot/id string, and adapts RSA-PSS signing and
//! RSA-OAEP/PKCS#1 decryption onto the token. The token transport and the
//! software fallback are collaborators supplied by the embedding
//! application; see [`token::TokenProvider`] and [`crypto::SoftwareRsa`].

pub mod config;
pub mod constants;
pub mod crypto;
pub mod resolver;
pub mod token;
pub mod uri;

pub use crate::config::EngineConfig;
pub use crate::crypto::rsa::{PssSaltLen, RsaContext, RsaPadding, TokenKey};
pub use crate::crypto::{Attempt, CryptoError, RsaDispatcher, SoftwareRsa};
pub use crate::resolver::{Engine, ResolveError};
pub use crate::token::{
    Certificate, Key, PinEntry, Slot, SlotId, TerminalPinEntry, TokenInfo,
    TokenProvider,
};
pub use crate::uri::{ObjectQuery, ParseError, TokenFilter};
