//! RSA sign/decrypt against a token-resident key.
//!
//! A cryptographic operation context carries the padding configuration the
//! host framework set up plus, optionally, a bound token key. The engine
//! translates the configuration into a token mechanism, runs the two-phase
//! init/execute protocol against the provider, and keeps the shared
//! operation state consistent across concurrent callers.

use std::fmt;
use std::sync::{Condvar, Mutex};

use log::{debug, error};
use openssl::hash::MessageDigest;

use crate::constants::MAX_DECRYPT_LEN;
use crate::crypto::mechanism::{self, Mechanism, OaepParams, PssParams};
use crate::crypto::{Attempt, CryptoError};
use crate::resolver::Engine;
use crate::token::{Key, ObjectHandle, Slot, SlotId, TokenProvider};

//------------ Padding configuration -----------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RsaPadding {
    /// PKCS#1 v1.5.
    Pkcs1v15,

    /// RSA-PSS; the only padding the hardware signing path serves.
    Pss,

    /// RSA-OAEP; served by the hardware decryption path.
    Oaep,

    /// No padding.
    Raw,
}

/// The configured PSS salt length, including the two sentinel values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PssSaltLen {
    /// An explicit salt length in bytes.
    Explicit(u64),

    /// Use the size of the signature digest.
    DigestSize,

    /// Use the maximum the key allows:
    /// `key_size_bytes - digest_size - 2`, less one when the key bit
    /// length is 1 mod 8.
    Maximum,
}

//------------ TokenKey ------------------------------------------------------

/// A resolved private key bound into an operation context.
#[derive(Clone, Debug)]
pub struct TokenKey {
    pub slot: SlotId,
    pub handle: ObjectHandle,

    /// Modulus length in bits.
    pub bits: usize,

    /// The token demands a login immediately before every use of this key.
    pub always_authenticate: bool,

    /// Label of the owning token, for PIN prompts.
    pub token_label: String,
}

impl TokenKey {
    pub fn new(slot: &Slot, key: &Key) -> Self {
        TokenKey {
            slot: slot.id,
            handle: key.handle,
            bits: key.bits,
            always_authenticate: key.always_authenticate,
            token_label: slot.token_label().to_string(),
        }
    }

    /// The modulus length in bytes; also the signature length.
    pub fn size_bytes(&self) -> usize {
        (self.bits + 7) / 8
    }
}

//------------ RsaContext ----------------------------------------------------

/// The state of one RSA operation context in the host framework.
#[derive(Clone)]
pub struct RsaContext {
    pub padding: RsaPadding,

    /// The signature digest.
    pub signature_md: Option<MessageDigest>,

    /// The MGF1 digest; defaults to the signature/OAEP digest when unset.
    pub mgf1_md: Option<MessageDigest>,

    pub salt_len: PssSaltLen,

    /// The OAEP digest.
    pub oaep_md: Option<MessageDigest>,

    key: Option<TokenKey>,
}

impl RsaContext {
    pub fn new() -> Self {
        RsaContext {
            padding: RsaPadding::Pkcs1v15,
            signature_md: None,
            mgf1_md: None,
            salt_len: PssSaltLen::DigestSize,
            oaep_md: None,
            key: None,
        }
    }

    /// Binds a token-resident key; sign/decrypt calls on a context without
    /// one are always delegated to the software implementation.
    pub fn bind_token_key(&mut self, key: TokenKey) {
        self.key = Some(key);
    }

    pub fn token_key(&self) -> Option<&TokenKey> {
        self.key.as_ref()
    }
}

impl Default for RsaContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RsaContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RsaContext")
            .field("padding", &self.padding)
            .field("salt_len", &self.salt_len)
            .field("key", &self.key)
            .finish()
    }
}

//------------ RsaGate -------------------------------------------------------

/// The shared sign/decrypt operation state.
///
/// One underlying token session is reused across all threads of the engine,
/// and the token's init/execute protocol does not support interleaving.
/// `held` marks the gate as owned across calls: a successful size probe
/// keeps it, so the following real call runs against the mechanism that is
/// already initialized. Any terminal call or error releases it.
#[derive(Debug, Default)]
pub(crate) struct RsaGate {
    state: Mutex<OpState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct OpState {
    held: bool,
    sign_initialized: bool,
    decrypt_initialized: bool,
}

fn release(gate: &RsaGate, st: &mut OpState) {
    st.held = false;
    gate.released.notify_one();
}

//------------ Parameter derivation ------------------------------------------

fn derive_pss_params(
    context: &RsaContext,
    key: &TokenKey,
) -> Result<Option<PssParams>, CryptoError> {
    let sig_md = match context.signature_md {
        Some(md) => md,
        None => return Ok(None),
    };
    let mgf_md = context.mgf1_md.unwrap_or(sig_md);

    let salt_len = match context.salt_len {
        PssSaltLen::Explicit(len) => len,
        PssSaltLen::DigestSize => sig_md.size() as u64,
        PssSaltLen::Maximum => {
            let mut salt = key.size_bytes() as i64 - sig_md.size() as i64 - 2;
            if key.bits % 8 == 1 {
                salt -= 1;
            }
            if salt < 0 {
                error!("integer underflow computing PSS salt length");
                return Err(CryptoError::SaltLenUnderflow);
            }
            salt as u64
        }
    };

    let hash_alg = match mechanism::digest_mechanism(sig_md) {
        Some(code) => code,
        None => return Ok(None),
    };
    let mgf = match mechanism::digest_mgf1(mgf_md) {
        Some(code) => code,
        None => return Ok(None),
    };
    Ok(Some(PssParams { hash_alg, mgf, salt_len }))
}

fn derive_oaep_params(context: &RsaContext) -> Option<OaepParams> {
    let oaep_md = context.oaep_md?;
    let mgf_md = context.mgf1_md.unwrap_or(oaep_md);
    let hash_alg = mechanism::digest_mechanism(oaep_md)?;
    let mgf = mechanism::digest_mgf1(mgf_md)?;
    Some(OaepParams { hash_alg, mgf })
}

//------------ Signing and decryption ----------------------------------------

impl<P: TokenProvider> Engine<P> {
    /// Offers a signing request to the hardware path.
    ///
    /// `out` of `None` is a size query: it initializes the mechanism,
    /// reports the signature length and keeps the operation state for the
    /// following real call. Anything the hardware path cannot serve comes
    /// back as [`Attempt::Delegate`] with the token untouched.
    pub fn rsa_sign(
        &self,
        context: &RsaContext,
        out: Option<&mut [u8]>,
        tbs: &[u8],
    ) -> Result<Attempt<usize>, CryptoError> {
        let key = match context.token_key() {
            Some(key) => key,
            None => return Ok(Attempt::Delegate),
        };
        let sig_md = match context.signature_md {
            Some(md) => md,
            None => return Ok(Attempt::Delegate),
        };
        if tbs.len() != sig_md.size() {
            return Ok(Attempt::Delegate);
        }

        let mut st = self.rsa_gate.state.lock().unwrap();
        if !st.sign_initialized {
            // PKCS#1 v1.5 and raw signing always go to software
            if context.padding != RsaPadding::Pss {
                return Ok(Attempt::Delegate);
            }
            let params = match derive_pss_params(context, key)? {
                Some(params) => params,
                None => return Ok(Attempt::Delegate),
            };
            debug!(
                "sign init: hash={:#06x} mgf={} salt_len={}",
                params.hash_alg, params.mgf, params.salt_len
            );

            while st.held {
                st = self.rsa_gate.released.wait(st).unwrap();
            }
            st.held = true;

            if let Err(err) = self.provider.sign_init(
                key.slot,
                &Mechanism::RsaPkcsPss(params),
                key.handle,
            ) {
                release(&self.rsa_gate, &mut st);
                return Err(err.into());
            }
            if key.always_authenticate {
                if let Err(err) = self.reauthenticate(key.slot, &key.token_label) {
                    release(&self.rsa_gate, &mut st);
                    return Err(err.into());
                }
            }
        }

        let probe = out.is_none();
        let result = match out {
            None => Ok(key.size_bytes()),
            Some(buf) => match self.provider.sign(key.slot, tbs) {
                Ok(signature) => {
                    if buf.len() < signature.len() {
                        Err(CryptoError::BufferTooSmall {
                            needed: signature.len(),
                            available: buf.len(),
                        })
                    } else {
                        buf[..signature.len()].copy_from_slice(&signature);
                        Ok(signature.len())
                    }
                }
                Err(err) => Err(err.into()),
            },
        };

        st.sign_initialized = result.is_ok() && probe;
        if !st.sign_initialized {
            release(&self.rsa_gate, &mut st);
        }
        result.map(Attempt::Handled)
    }

    /// The explicit size query for a signing request.
    pub fn rsa_sign_len(
        &self,
        context: &RsaContext,
        tbs: &[u8],
    ) -> Result<Attempt<usize>, CryptoError> {
        self.rsa_sign(context, None, tbs)
    }

    /// Offers a decryption request to the hardware path.
    ///
    /// Supports OAEP and raw PKCS#1 v1.5 mechanisms. The decrypted output
    /// is bounded by [`MAX_DECRYPT_LEN`]; a caller buffer smaller than the
    /// actual plaintext fails without a partial write. `out` of `None` is a
    /// size query with the same state retention as for signing.
    pub fn rsa_decrypt(
        &self,
        context: &RsaContext,
        out: Option<&mut [u8]>,
        input: &[u8],
    ) -> Result<Attempt<usize>, CryptoError> {
        let key = match context.token_key() {
            Some(key) => key,
            None => return Ok(Attempt::Delegate),
        };

        let mut st = self.rsa_gate.state.lock().unwrap();
        if !st.decrypt_initialized {
            let mech = match context.padding {
                RsaPadding::Oaep => match derive_oaep_params(context) {
                    Some(params) => Mechanism::RsaPkcsOaep(params),
                    None => return Ok(Attempt::Delegate),
                },
                RsaPadding::Pkcs1v15 => Mechanism::RsaPkcs,
                _ => return Ok(Attempt::Delegate),
            };

            while st.held {
                st = self.rsa_gate.released.wait(st).unwrap();
            }
            st.held = true;

            if let Err(err) = self.provider.decrypt_init(key.slot, &mech, key.handle) {
                release(&self.rsa_gate, &mut st);
                return Err(err.into());
            }
        }

        // unlike signing, re-authentication applies to every call
        if key.always_authenticate {
            if let Err(err) = self.reauthenticate(key.slot, &key.token_label) {
                release(&self.rsa_gate, &mut st);
                return Err(err.into());
            }
        }

        let probe = out.is_none();
        let result = match self.provider.decrypt(key.slot, input) {
            Ok(plain) => {
                if plain.len() > MAX_DECRYPT_LEN {
                    Err(CryptoError::BufferTooSmall {
                        needed: plain.len(),
                        available: MAX_DECRYPT_LEN,
                    })
                } else {
                    match out {
                        None => Ok(plain.len()),
                        Some(buf) => {
                            if buf.len() < plain.len() {
                                error!(
                                    "output buffer ({} bytes) too small, need {}",
                                    buf.len(),
                                    plain.len()
                                );
                                Err(CryptoError::BufferTooSmall {
                                    needed: plain.len(),
                                    available: buf.len(),
                                })
                            } else {
                                buf[..plain.len()].copy_from_slice(&plain);
                                Ok(plain.len())
                            }
                        }
                    }
                }
            }
            Err(err) => Err(err.into()),
        };

        st.decrypt_initialized = result.is_ok() && probe;
        if !st.decrypt_initialized {
            release(&self.rsa_gate, &mut st);
        }
        result.map(Attempt::Handled)
    }

    /// The explicit size query for a decryption request.
    pub fn rsa_decrypt_len(
        &self,
        context: &RsaContext,
        input: &[u8],
    ) -> Result<Attempt<usize>, CryptoError> {
        self.rsa_decrypt(context, None, input)
    }
}

//------------ Tests ---------------------------------------------------------
