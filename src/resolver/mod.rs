//! The resolution engine.
//!
//! An [`Engine`] owns the token provider, the cached credential state and
//! the RSA operation gate, and turns identifier strings into credential
//! objects. It is the explicit context object every call goes through;
//! there is no process-global state.

use std::fmt;
use std::sync::RwLock;

use log::{debug, error, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::EngineConfig;
use crate::crypto::rsa::RsaGate;
use crate::token::{
    Certificate, Key, ObjectTemplate, PinEntry, Slot, TokenError, TokenProvider,
};
use crate::uri::{self, ObjectQuery, ParseError};

pub mod matcher;
pub mod selector;

mod login;

pub use self::login::{AuthError, AuthState};

//------------ ResolveError --------------------------------------------------

#[derive(Debug)]
pub enum ResolveError {
    /// The identifier could not be parsed. Never retried.
    Parse(ParseError),

    /// No candidate slot, no matching token or no matching object. A caller
    /// may retry with a different identifier.
    NotFound(&'static str),

    /// Logging into the token failed; the cached PIN has been erased.
    Login(AuthError),

    /// The provider failed an operation.
    Token(TokenError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolveError::Parse(err) => err.fmt(f),
            ResolveError::NotFound(kind) => write!(f, "{} not found", kind),
            ResolveError::Login(err) => err.fmt(f),
            ResolveError::Token(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<ParseError> for ResolveError {
    fn from(err: ParseError) -> Self {
        ResolveError::Parse(err)
    }
}

impl From<AuthError> for ResolveError {
    fn from(err: AuthError) -> Self {
        ResolveError::Login(err)
    }
}

impl From<TokenError> for ResolveError {
    fn from(err: TokenError) -> Self {
        ResolveError::Token(err)
    }
}

//------------ Engine --------------------------------------------------------

/// The resolution engine.
pub struct Engine<P> {
    pub(crate) provider: P,
    pub(crate) pin_entry: Box<dyn PinEntry>,
    pub(crate) auth: RwLock<AuthState>,
    pub(crate) rsa_gate: RsaGate,
    pub(crate) force_login: bool,
}

impl<P: TokenProvider> Engine<P> {
    pub fn new(provider: P, pin_entry: Box<dyn PinEntry>) -> Self {
        Engine {
            provider,
            pin_entry,
            auth: RwLock::new(AuthState::default()),
            rsa_gate: RsaGate::default(),
            force_login: false,
        }
    }

    /// Creates an engine and applies the configuration to it.
    pub fn build(provider: P, pin_entry: Box<dyn PinEntry>, config: EngineConfig) -> Self {
        let mut engine = Engine::new(provider, pin_entry);
        engine.force_login = config.force_login;
        if let Some(pin) = config.pin {
            engine.auth.write().unwrap().set_pin(pin, true);
        }
        engine
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Installs a caller-supplied PIN, marking it forced: it is used even
    /// for tokens with a protected authentication path and survives until
    /// a login fails or the engine is torn down.
    pub fn set_pin(&self, pin: SecretString) {
        self.auth.write().unwrap().set_pin(pin, true);
    }

    /// Always attempt a login, even when the token claims none is needed.
    pub fn set_force_login(&mut self, force_login: bool) {
        self.force_login = force_login;
    }

    /// Erases all cached credential state.
    pub fn clear_pin(&self) {
        self.auth.write().unwrap().clear();
    }
}

//------------ Resolution ----------------------------------------------------

impl<P: TokenProvider> Engine<P> {
    /// Resolves an identifier to a certificate.
    pub fn resolve_certificate(&self, identifier: &str) -> Result<Certificate, ResolveError> {
        self.load_object(identifier, "certificate", |engine, slot, query| {
            engine.find_certificate(slot, query)
        })
    }

    /// Resolves an identifier to a public key.
    pub fn resolve_public_key(&self, identifier: &str) -> Result<Key, ResolveError> {
        self.load_object(identifier, "public key", |engine, slot, query| {
            engine.find_key(slot, query, false)
        })
    }

    /// Resolves an identifier to a private key.
    pub fn resolve_private_key(&self, identifier: &str) -> Result<Key, ResolveError> {
        self.load_object(identifier, "private key", |engine, slot, query| {
            engine.find_key(slot, query, true)
        })
    }

    fn find_certificate(
        &self,
        slot: &Slot,
        query: &ObjectQuery,
    ) -> Result<Option<Certificate>, TokenError> {
        let certs = self
            .provider
            .enumerate_certificates(slot.id, &query_template(query))?;
        Ok(selector::select_certificate(
            certs,
            &query.object_id,
            query.object_label.as_deref(),
        ))
    }

    fn find_key(
        &self,
        slot: &Slot,
        query: &ObjectQuery,
        private: bool,
    ) -> Result<Option<Key>, TokenError> {
        let kind = if private { "private" } else { "public" };
        let keys = self
            .provider
            .enumerate_keys(slot.id, &query_template(query), private)?;
        Ok(selector::select_key(
            keys,
            &query.object_id,
            query.object_label.as_deref(),
            kind,
        ))
    }

    fn load_object<T, F>(
        &self,
        identifier: &str,
        kind: &'static str,
        find: F,
    ) -> Result<T, ResolveError>
    where
        F: Fn(&Self, &Slot, &ObjectQuery) -> Result<Option<T>, TokenError>,
    {
        let mut query = uri::parse(identifier).map_err(|err| {
            error!(
                "The {} ID is not a valid PKCS#11 URI; \
                 the PKCS#11 URI format is defined by RFC 7512 \
                 (the legacy identifier format is also still accepted)",
                kind
            );
            err
        })?;

        if let Some(pin) = query.pin.take() {
            if !pin.expose_secret().is_empty() {
                self.set_pin(pin);
            }
        }

        // In several tokens certificates are marked as private, so a search
        // without login can come up empty. Try without login first (unless
        // login is forced), then retry with login.
        if !self.force_login {
            match self.try_load_object(&query, kind, false, &find) {
                Ok(Some(object)) => return Ok(object),
                Ok(None) => {}
                Err(err) => {
                    debug!("search without login failed: {}", err);
                }
            }
        }

        match self.try_load_object(&query, kind, true, &find)? {
            Some(object) => Ok(object),
            None => {
                error!("The {} was not found at: {}", kind, identifier);
                Err(ResolveError::NotFound(kind))
            }
        }
    }

    fn try_load_object<T, F>(
        &self,
        query: &ObjectQuery,
        kind: &'static str,
        login: bool,
        find: &F,
    ) -> Result<Option<T>, ResolveError>
    where
        F: Fn(&Self, &Slot, &ObjectQuery) -> Result<Option<T>, TokenError>,
    {
        info!(
            "Looking in slots for {} {} login:{}",
            kind,
            if login { "with" } else { "without" },
            query
        );

        let slots = self.provider.enumerate_slots()?;
        let candidates = matcher::match_slots(query, &slots);

        if candidates.is_empty() {
            if query.token_filter.is_some() {
                error!("No matching token was found for {}", kind);
            } else if let Some(slot_nr) = query.slot_number {
                error!("The {} was not found on slot {}", kind, slot_nr);
            } else {
                error!("No tokens found");
            }
            return Ok(None);
        }

        if !login {
            // Find a public object: no login, first match across candidates.
            let slots = candidates.into_slots();
            for slot in &slots {
                self.log_found(slot);
                if let Some(object) = find(self, slot, query)? {
                    return Ok(Some(object));
                }
            }
            return Ok(None);
        }

        // Only try to login if a single slot matched, to avoid trying the
        // PIN against all matching slots.
        if candidates.len() == 1 {
            let slots = candidates.into_slots();
            let slot = &slots[0];
            self.log_found(slot);
            return self.login_and_find(slot, query, find);
        }

        let (init_slots, uninit_slots) = candidates.partition_initialized();

        if init_slots.len() == 1 {
            let slot = &init_slots[0];
            self.log_found(slot);
            return self.login_and_find(slot, query, find);
        }

        if init_slots.len() > 1 {
            warn!(
                "Multiple matching slots ({}); will not try to login",
                init_slots.len()
            );
            for (m, slot) in init_slots.iter().enumerate() {
                warn!("- [{}] {}: {}", m + 1, slot.description, slot.token_label());
            }
        }

        // Uninitialized tokens, user PIN is unset: search without login.
        for slot in &uninit_slots {
            self.log_found(slot);
            if let Some(object) = find(self, slot, query)? {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    fn login_and_find<T, F>(
        &self,
        slot: &Slot,
        query: &ObjectQuery,
        find: &F,
    ) -> Result<Option<T>, ResolveError>
    where
        F: Fn(&Self, &Slot, &ObjectQuery) -> Result<Option<T>, TokenError>,
    {
        let token = match &slot.token {
            Some(token) => token,
            None => {
                error!("Empty slot found: {}", slot.description);
                return Ok(None);
            }
        };
        if token.login_required || self.force_login {
            if let Err(err) = self.ensure_logged_in(slot, token) {
                error!("Login to token failed: {}", err);
                return Err(err.into());
            }
        }
        find(self, slot, query).map_err(ResolveError::Token)
    }

    fn log_found(&self, slot: &Slot) {
        info!("Found slot:  {}", slot.description);
        info!("Found token: {}", slot.token_label());
    }
}

fn query_template(query: &ObjectQuery) -> ObjectTemplate {
    ObjectTemplate {
        id: if query.object_id.is_empty() {
            None
        } else {
            Some(query.object_id.clone())
        },
        label: query.object_label.clone(),
    }
}

//------------ Tests ---------------------------------------------------------
