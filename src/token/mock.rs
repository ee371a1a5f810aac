//! A scriptable in-memory provider for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use secrecy::SecretString;

use crate::crypto::mechanism::Mechanism;
use crate::token::{
    Certificate, Key, ObjectHandle, ObjectTemplate, PinEntry, PinError, Slot, SlotId,
    TokenError, TokenProvider,
};

//------------ MockProvider --------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct MockProvider {
    pub slots: Vec<Slot>,
    pub certs: HashMap<SlotId, Vec<Certificate>>,
    pub public_keys: HashMap<SlotId, Vec<Key>>,
    pub private_keys: HashMap<SlotId, Vec<Key>>,

    /// Returned by `sign`.
    pub sign_result: Vec<u8>,

    /// Returned by `decrypt`.
    pub decrypt_result: Vec<u8>,

    logged_in: RwLock<HashSet<SlotId>>,
    login_gated: RwLock<HashSet<SlotId>>,
    login_calls: RwLock<Vec<(SlotId, Option<String>)>>,
    fail_next_login: RwLock<Option<TokenError>>,
    fail_next_sign: RwLock<Option<TokenError>>,
    sign_inits: RwLock<Vec<(SlotId, Mechanism, ObjectHandle)>>,
    decrypt_inits: RwLock<Vec<(SlotId, Mechanism, ObjectHandle)>>,
    sign_count: AtomicU32,
    decrypt_count: AtomicU32,
    seen_templates: RwLock<Vec<ObjectTemplate>>,
}

impl MockProvider {
    pub fn with_slots(slots: Vec<Slot>) -> Self {
        MockProvider {
            slots,
            ..Default::default()
        }
    }

    pub fn mark_logged_in(&self, slot: SlotId) {
        self.logged_in.write().unwrap().insert(slot);
    }

    pub fn forget_logins(&self) {
        self.logged_in.write().unwrap().clear();
    }

    /// Makes the slot's private objects invisible until after login, the
    /// way tokens marking objects private behave.
    pub fn gate_private_objects(&self, slot: SlotId) {
        self.login_gated.write().unwrap().insert(slot);
    }

    pub fn fail_next_login(&self, err: TokenError) {
        *self.fail_next_login.write().unwrap() = Some(err);
    }

    pub fn fail_next_sign(&self, err: TokenError) {
        *self.fail_next_sign.write().unwrap() = Some(err);
    }

    pub fn login_calls(&self) -> Vec<(SlotId, Option<String>)> {
        self.login_calls.read().unwrap().clone()
    }

    pub fn sign_inits(&self) -> Vec<(SlotId, Mechanism, ObjectHandle)> {
        self.sign_inits.read().unwrap().clone()
    }

    pub fn decrypt_inits(&self) -> Vec<(SlotId, Mechanism, ObjectHandle)> {
        self.decrypt_inits.read().unwrap().clone()
    }

    pub fn sign_count(&self) -> u32 {
        self.sign_count.load(Ordering::SeqCst)
    }

    pub fn decrypt_count(&self) -> u32 {
        self.decrypt_count.load(Ordering::SeqCst)
    }

    pub fn seen_templates(&self) -> Vec<ObjectTemplate> {
        self.seen_templates.read().unwrap().clone()
    }
}

impl TokenProvider for MockProvider {
    fn enumerate_slots(&self) -> Result<Vec<Slot>, TokenError> {
        Ok(self.slots.clone())
    }

    fn is_logged_in(&self, slot: SlotId) -> Result<bool, TokenError> {
        Ok(self.logged_in.read().unwrap().contains(&slot))
    }

    fn login(&self, slot: SlotId, pin: Option<&str>) -> Result<(), TokenError> {
        self.login_calls
            .write()
            .unwrap()
            .push((slot, pin.map(String::from)));
        if let Some(err) = self.fail_next_login.write().unwrap().take() {
            return Err(err);
        }
        self.logged_in.write().unwrap().insert(slot);
        Ok(())
    }

    fn enumerate_certificates(
        &self,
        slot: SlotId,
        template: &ObjectTemplate,
    ) -> Result<Vec<Certificate>, TokenError> {
        self.seen_templates.write().unwrap().push(template.clone());
        Ok(self.certs.get(&slot).cloned().unwrap_or_default())
    }

    fn enumerate_keys(
        &self,
        slot: SlotId,
        template: &ObjectTemplate,
        private: bool,
    ) -> Result<Vec<Key>, TokenError> {
        self.seen_templates.write().unwrap().push(template.clone());
        if private
            && self.login_gated.read().unwrap().contains(&slot)
            && !self.logged_in.read().unwrap().contains(&slot)
        {
            return Ok(Vec::new());
        }
        let keys = if private {
            &self.private_keys
        } else {
            &self.public_keys
        };
        Ok(keys.get(&slot).cloned().unwrap_or_default())
    }

    fn sign_init(
        &self,
        slot: SlotId,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError> {
        self.sign_inits.write().unwrap().push((slot, *mechanism, key));
        Ok(())
    }

    fn sign(&self, slot: SlotId, _data: &[u8]) -> Result<Vec<u8>, TokenError> {
        let _ = slot;
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next_sign.write().unwrap().take() {
            return Err(err);
        }
        Ok(self.sign_result.clone())
    }

    fn decrypt_init(
        &self,
        slot: SlotId,
        mechanism: &Mechanism,
        key: ObjectHandle,
    ) -> Result<(), TokenError> {
        self.decrypt_inits
            .write()
            .unwrap()
            .push((slot, *mechanism, key));
        Ok(())
    }

    fn decrypt(&self, slot: SlotId, _data: &[u8]) -> Result<Vec<u8>, TokenError> {
        let _ = slot;
        self.decrypt_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.decrypt_result.clone())
    }
}

//------------ StaticPinEntry ------------------------------------------------

/// A PIN entry that hands out a fixed PIN and counts how often it is asked.
#[derive(Debug)]
pub(crate) struct StaticPinEntry {
    pin: String,
    prompts: Arc<AtomicU32>,
}

impl StaticPinEntry {
    pub fn new(pin: &str) -> Self {
        StaticPinEntry {
            pin: pin.to_string(),
            prompts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicU32> {
        self.prompts.clone()
    }
}

impl PinEntry for StaticPinEntry {
    fn prompt_pin(&self, _token_label: &str) -> Result<SecretString, PinError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(SecretString::new(self.pin.clone()))
    }
}

//------------ Builders ------------------------------------------------------

pub(crate) fn token_info(label: &str) -> crate::token::TokenInfo {
    crate::token::TokenInfo {
        label: label.to_string(),
        manufacturer: "Example Corp".to_string(),
        serial: "0001".to_string(),
        model: "Mk I".to_string(),
        initialized: true,
        user_pin_set: true,
        login_required: false,
        read_only: false,
        secure_login: false,
    }
}

pub(crate) fn slot(id: SlotId, label: Option<&str>) -> Slot {
    Slot {
        id,
        description: format!("mock slot {}", id),
        token: label.map(token_info),
    }
}
