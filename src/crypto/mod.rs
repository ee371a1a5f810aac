//! The RSA mechanism adapter.
//!
//! Sign and decrypt requests carrying a token-bound key are translated into
//! token mechanisms and executed by the provider; requests the hardware
//! path cannot serve are delegated untouched to the caller's software
//! implementation. [`Attempt::Delegate`] is a control signal, never an
//! error surfaced to the end caller.

use std::fmt;

use crate::resolver::{AuthError, Engine};
use crate::token::{TokenError, TokenProvider};

pub mod mechanism;
pub mod rsa;

use self::rsa::RsaContext;

//------------ Attempt -------------------------------------------------------

/// The outcome of offering an operation to the hardware path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The hardware path performed the operation.
    Handled(T),

    /// The hardware path does not apply; run the software implementation
    /// with the original arguments.
    Delegate,
}

impl<T> Attempt<T> {
    pub fn is_delegate(&self) -> bool {
        matches!(self, Attempt::Delegate)
    }
}

//------------ CryptoError ---------------------------------------------------

#[derive(Debug)]
pub enum CryptoError {
    /// The token rejected or failed the operation.
    Token(TokenError),

    /// A just-in-time authentication failed.
    Auth(AuthError),

    /// The output does not fit the available buffer. Nothing has been
    /// written to the caller's buffer.
    BufferTooSmall { needed: usize, available: usize },

    /// Deriving the maximum PSS salt length underflowed.
    SaltLenUnderflow,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::Token(err) => err.fmt(f),
            CryptoError::Auth(err) => err.fmt(f),
            CryptoError::BufferTooSmall { needed, available } => write!(
                f,
                "output buffer ({} bytes) too small, need {}",
                available, needed
            ),
            CryptoError::SaltLenUnderflow => {
                write!(f, "derived PSS salt length is negative")
            }
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<TokenError> for CryptoError {
    fn from(err: TokenError) -> Self {
        CryptoError::Token(err)
    }
}

impl From<AuthError> for CryptoError {
    fn from(err: AuthError) -> Self {
        CryptoError::Auth(err)
    }
}

//------------ SoftwareRsa ---------------------------------------------------

/// The software fallback collaborator: the host framework's original RSA
/// implementation. `out` of `None` is a size query, mirroring the hardware
/// path. Returns the produced (or required) output length.
pub trait SoftwareRsa {
    fn sign(
        &self,
        context: &RsaContext,
        out: Option<&mut [u8]>,
        tbs: &[u8],
    ) -> Result<usize, CryptoError>;

    fn decrypt(
        &self,
        context: &RsaContext,
        out: Option<&mut [u8]>,
        input: &[u8],
    ) -> Result<usize, CryptoError>;
}

//------------ RsaDispatcher -------------------------------------------------

/// Tries the hardware path first and falls through to the software
/// implementation on [`Attempt::Delegate`].
pub struct RsaDispatcher<'a, P: TokenProvider> {
    engine: &'a Engine<P>,
    fallback: &'a dyn SoftwareRsa,
}

impl<'a, P: TokenProvider> RsaDispatcher<'a, P> {
    pub fn new(engine: &'a Engine<P>, fallback: &'a dyn SoftwareRsa) -> Self {
        RsaDispatcher { engine, fallback }
    }

    pub fn sign(
        &self,
        context: &RsaContext,
        mut out: Option<&mut [u8]>,
        tbs: &[u8],
    ) -> Result<usize, CryptoError> {
        match self.engine.rsa_sign(context, out.as_deref_mut(), tbs)? {
            Attempt::Handled(len) => Ok(len),
            Attempt::Delegate => self.fallback.sign(context, out, tbs),
        }
    }

    pub fn decrypt(
        &self,
        context: &RsaContext,
        mut out: Option<&mut [u8]>,
        input: &[u8],
    ) -> Result<usize, CryptoError> {
        match self.engine.rsa_decrypt(context, out.as_deref_mut(), input)? {
            Attempt::Handled(len) => Ok(len),
            Attempt::Delegate => self.fallback.decrypt(context, out, input),
        }
    }
}

//------------ Tests ---------------------------------------------------------
