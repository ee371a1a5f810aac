//! Mechanism descriptors handed to the token.
//!
//! The numeric values are the PKCS#11 v2.40 assignments; they are what a
//! provider backed by a real token module puts on the wire.

use openssl::hash::MessageDigest;
use openssl::nid::Nid;

//------------ Mechanism and MGF type codes ----------------------------------

pub type MechanismType = u64;
pub type MgfType = u64;

pub const CKM_RSA_PKCS: MechanismType = 0x0000_0001;
pub const CKM_RSA_PKCS_OAEP: MechanismType = 0x0000_0009;
pub const CKM_RSA_PKCS_PSS: MechanismType = 0x0000_000d;
pub const CKM_SHA_1: MechanismType = 0x0000_0220;
pub const CKM_SHA256: MechanismType = 0x0000_0250;
pub const CKM_SHA224: MechanismType = 0x0000_0255;
pub const CKM_SHA384: MechanismType = 0x0000_0260;
pub const CKM_SHA512: MechanismType = 0x0000_0270;

pub const CKG_MGF1_SHA1: MgfType = 0x0000_0001;
pub const CKG_MGF1_SHA256: MgfType = 0x0000_0002;
pub const CKG_MGF1_SHA384: MgfType = 0x0000_0003;
pub const CKG_MGF1_SHA512: MgfType = 0x0000_0004;
pub const CKG_MGF1_SHA224: MgfType = 0x0000_0005;

//------------ Parameter blocks ----------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PssParams {
    pub hash_alg: MechanismType,
    pub mgf: MgfType,
    pub salt_len: u64,
}

/// OAEP parameters. The label ("source data") is always empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OaepParams {
    pub hash_alg: MechanismType,
    pub mgf: MgfType,
}

//------------ Mechanism -----------------------------------------------------

/// An operation descriptor: the mechanism plus its auxiliary parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    /// Raw PKCS#1 v1.5 (`CKM_RSA_PKCS`), no parameters.
    RsaPkcs,

    /// RSA-PSS (`CKM_RSA_PKCS_PSS`).
    RsaPkcsPss(PssParams),

    /// RSA-OAEP (`CKM_RSA_PKCS_OAEP`).
    RsaPkcsOaep(OaepParams),
}

impl Mechanism {
    pub fn mechanism_type(&self) -> MechanismType {
        match self {
            Mechanism::RsaPkcs => CKM_RSA_PKCS,
            Mechanism::RsaPkcsPss(_) => CKM_RSA_PKCS_PSS,
            Mechanism::RsaPkcsOaep(_) => CKM_RSA_PKCS_OAEP,
        }
    }
}

//------------ Digest mapping ------------------------------------------------

/// Maps a digest to its hash mechanism code; `None` for digests the token
/// mechanisms do not cover.
pub fn digest_mechanism(md: MessageDigest) -> Option<MechanismType> {
    let nid = md.type_();
    if nid == Nid::SHA1 {
        Some(CKM_SHA_1)
    } else if nid == Nid::SHA224 {
        Some(CKM_SHA224)
    } else if nid == Nid::SHA256 {
        Some(CKM_SHA256)
    } else if nid == Nid::SHA384 {
        Some(CKM_SHA384)
    } else if nid == Nid::SHA512 {
        Some(CKM_SHA512)
    } else {
        None
    }
}

/// Maps a digest to its MGF1 function code.
pub fn digest_mgf1(md: MessageDigest) -> Option<MgfType> {
    let nid = md.type_();
    if nid == Nid::SHA1 {
        Some(CKG_MGF1_SHA1)
    } else if nid == Nid::SHA224 {
        Some(CKG_MGF1_SHA224)
    } else if nid == Nid::SHA256 {
        Some(CKG_MGF1_SHA256)
    } else if nid == Nid::SHA384 {
        Some(CKG_MGF1_SHA384)
    } else if nid == Nid::SHA512 {
        Some(CKG_MGF1_SHA512)
    } else {
        None
    }
}

//------------ Tests ---------------------------------------------------------
