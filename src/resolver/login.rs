//! Login coordination and PIN caching.

use std::fmt;

use log::{error, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::resolver::Engine;
use crate::token::{Slot, SlotId, TokenInfo, TokenProvider};

//------------ AuthState -----------------------------------------------------

/// The engine's cached credential.
///
/// The PIN lives behind [`SecretString`] and is overwritten when dropped.
/// A forced PIN (set by the caller or carried in a URI) survives
/// secure-login tokens; a PIN cached from an interactive prompt does not.
#[derive(Debug, Default)]
pub struct AuthState {
    pin: Option<SecretString>,
    forced: bool,
}

impl AuthState {
    pub fn set_pin(&mut self, pin: SecretString, forced: bool) {
        self.pin = Some(pin);
        self.forced = forced;
    }

    /// Erases the cached PIN. Dropping the secret zeroizes its bytes.
    pub fn clear(&mut self) {
        self.pin = None;
        self.forced = false;
    }

    pub fn pin(&self) -> Option<&SecretString> {
        self.pin.as_ref()
    }

    pub fn forced(&self) -> bool {
        self.forced
    }
}

//------------ AuthError -----------------------------------------------------

#[derive(Clone, Debug)]
pub enum AuthError {
    /// The token rejected the login.
    LoginFailed(String),

    /// No PIN could be obtained.
    NoPin(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::LoginFailed(msg) => write!(f, "login failed: {}", msg),
            AuthError::NoPin(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

//------------ Login coordination --------------------------------------------

impl<P: TokenProvider> Engine<P> {
    /// Makes sure a PIN is cached, asking the PIN entry collaborator if
    /// there is none yet.
    fn obtain_pin(&self, token_label: &str) -> Result<(), AuthError> {
        let mut auth = self.auth.write().unwrap();
        if auth.pin().is_some() {
            return Ok(());
        }
        let pin = self
            .pin_entry
            .prompt_pin(token_label)
            .map_err(|err| {
                error!("No PIN code was entered");
                AuthError::NoPin(err.to_string())
            })?;
        auth.set_pin(pin, false);
        Ok(())
    }

    /// Logs into the token if necessary.
    ///
    /// Login is skipped when the token does not require it (and login is not
    /// forced), or when the slot already reports an authenticated state;
    /// some tokens reject a redundant re-authentication. Tokens with a
    /// protected authentication path log in with no PIN unless one was
    /// explicitly forced. A failed login always erases the cached PIN so
    /// the next attempt prompts again.
    pub(crate) fn ensure_logged_in(
        &self,
        slot: &Slot,
        token: &TokenInfo,
    ) -> Result<(), AuthError> {
        if !(self.force_login || token.login_required) {
            return Ok(());
        }
        match self.provider.is_logged_in(slot.id) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => {
                warn!("Unable to check if already logged in: {}", err);
            }
        }

        if token.secure_login && !self.auth.read().unwrap().forced() {
            // Free any PIN cached by an earlier prompt; the token gathers
            // the credential itself.
            self.auth.write().unwrap().clear();
        } else {
            self.obtain_pin(&token.label)?;
        }

        self.login_with_cached_pin(slot.id)
    }

    /// The just-in-time authentication demanded by keys marked
    /// always-authenticate. Unlike [`Self::ensure_logged_in`] this never
    /// short-circuits on an already authenticated session.
    pub(crate) fn reauthenticate(
        &self,
        slot: SlotId,
        token_label: &str,
    ) -> Result<(), AuthError> {
        self.obtain_pin(token_label)?;
        self.login_with_cached_pin(slot)
    }

    fn login_with_cached_pin(&self, slot: SlotId) -> Result<(), AuthError> {
        let result = {
            let auth = self.auth.read().unwrap();
            let pin = auth.pin().map(|pin| pin.expose_secret().as_str());
            self.provider.login(slot, pin)
        };
        if let Err(err) = result {
            // Login failed, so free the PIN if present.
            self.auth.write().unwrap().clear();
            error!("Login failed: {}", err);
            return Err(AuthError::LoginFailed(err.to_string()));
        }
        Ok(())
    }
}

//------------ Tests ---------------------------------------------------------
