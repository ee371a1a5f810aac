//! Object selection policies.
//!
//! Certificates and keys deliberately tie-break differently: among several
//! matching certificates the one expiring last wins, while among several
//! matching keys the *last* one in enumeration order wins. Both policies are
//! load-bearing for existing deployments and must not be unified.

use log::{error, info};

use crate::token::{Certificate, Key};

//------------ Shared criteria matching --------------------------------------

fn criteria_match(
    obj_id: &[u8],
    obj_label: Option<&str>,
    want_id: &[u8],
    want_label: Option<&str>,
) -> bool {
    match (want_label, !want_id.is_empty()) {
        (Some(label), true) => obj_label == Some(label) && obj_id == want_id,
        (Some(label), false) => obj_label == Some(label),
        (None, true) => obj_id == want_id,
        (None, false) => false,
    }
}

//------------ Certificate selection -----------------------------------------

/// Picks the better of two certificates: the one expiring later, with the
/// larger DER encoding as the deterministic tie-break. A certificate
/// without expiry information loses.
fn better_cert(a: Certificate, b: Certificate) -> Certificate {
    let (a_time, b_time) = match (a.not_after, b.not_after) {
        (None, _) => return b,
        (_, None) => return a,
        (Some(at), Some(bt)) => (at, bt),
    };
    if a_time > b_time {
        a
    } else if b_time > a_time {
        b
    } else if a.der <= b.der {
        b
    } else {
        a
    }
}

/// Selects one certificate from the enumerated set.
///
/// With an id and/or label given, every certificate matching all given
/// criteria competes and the one expiring latest wins. Without criteria the
/// first certificate carrying a non-empty id is returned, falling back to
/// the first certificate overall.
pub fn select_certificate(
    mut certs: Vec<Certificate>,
    id: &[u8],
    label: Option<&str>,
) -> Option<Certificate> {
    if certs.is_empty() {
        info!("No certificate found.");
        return None;
    }
    info!(
        "Found {} certificate{}:",
        certs.len(),
        if certs.len() == 1 { "" } else { "s" }
    );
    for (m, cert) in certs.iter().enumerate() {
        info!(
            "  {:2}    id={} label={} expiry={}",
            m + 1,
            hex::encode_upper(&cert.id),
            cert.label.as_deref().unwrap_or(""),
            cert.expiry_text()
        );
    }

    let (which, selected) = if !id.is_empty() || label.is_some() {
        let mut selected: Option<Certificate> = None;
        for cert in certs {
            if criteria_match(&cert.id, cert.label.as_deref(), id, label) {
                selected = Some(match selected {
                    None => cert,
                    Some(previous) => better_cert(previous, cert),
                });
            }
        }
        ("longest expiry matching", selected)
    } else {
        match certs.iter().position(|cert| !cert.id.is_empty()) {
            Some(pos) => ("first (with id present)", Some(certs.swap_remove(pos))),
            None => ("first", Some(certs.swap_remove(0))),
        }
    };

    match &selected {
        Some(cert) => info!(
            "Returning {} certificate: id={} label={} expiry={}",
            which,
            hex::encode_upper(&cert.id),
            cert.label.as_deref().unwrap_or(""),
            cert.expiry_text()
        ),
        None => error!("No matching certificate returned."),
    }
    selected
}

//------------ Key selection -------------------------------------------------

/// Selects one key from the enumerated set.
///
/// With an id and/or label given, the *last* key matching all given
/// criteria in enumeration order wins. Without criteria the first key is
/// returned.
pub fn select_key(keys: Vec<Key>, id: &[u8], label: Option<&str>, kind: &str) -> Option<Key> {
    if keys.is_empty() {
        info!("No {} key found.", kind);
        return None;
    }
    info!(
        "Found {} {} key{}:",
        keys.len(),
        kind,
        if keys.len() == 1 { "" } else { "s" }
    );
    for (m, key) in keys.iter().enumerate() {
        info!(
            "  {:2} {}{} id={} label={}",
            m + 1,
            if key.private { 'P' } else { ' ' },
            if key.needs_login { 'L' } else { ' ' },
            hex::encode_upper(&key.id),
            key.label.as_deref().unwrap_or("")
        );
    }

    let (which, selected) = if !id.is_empty() || label.is_some() {
        let mut selected = None;
        for key in keys {
            if criteria_match(&key.id, key.label.as_deref(), id, label) {
                selected = Some(key);
            }
        }
        ("last matching", selected)
    } else {
        ("first", keys.into_iter().next())
    };

    match &selected {
        Some(key) => info!(
            "Returning {} {} key: id={} label={}",
            which,
            kind,
            hex::encode_upper(&key.id),
            key.label.as_deref().unwrap_or("")
        ),
        None => error!("No matching {} key returned.", kind),
    }
    selected
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn cert(id: &[u8], label: Option<&str>, expires_in_days: i64, der: &[u8]) -> Certificate {
        Certificate {
            handle: 0,
            id: id.to_vec(),
            label: label.map(String::from),
            not_after: Some(Utc::now() + Duration::days(expires_in_days)),
            der: der.to_vec(),
        }
    }

    fn key(id: &[u8], label: Option<&str>) -> Key {
        Key {
            handle: 0,
            id: id.to_vec(),
            label: label.map(String::from),
            private: true,
            needs_login: false,
            always_authenticate: false,
            bits: 2048,
        }
    }

    #[test]
    fn certificate_latest_expiry_wins_regardless_of_order() {
        let a = cert(b"\x01", None, 300, b"aaa");
        let b = cert(b"\x01", None, 30, b"bbb");

        let picked =
            select_certificate(vec![a.clone(), b.clone()], b"\x01", None).unwrap();
        assert_eq!(picked.der, b"aaa");
        let picked = select_certificate(vec![b, a], b"\x01", None).unwrap();
        assert_eq!(picked.der, b"aaa");
    }

    #[test]
    fn certificate_expiry_tie_breaks_on_encoding() {
        let when = Utc::now() + Duration::days(90);
        let mut a = cert(b"\x01", None, 0, b"zzz");
        a.not_after = Some(when);
        let mut b = cert(b"\x01", None, 0, b"aaa");
        b.not_after = Some(when);

        // larger encoded form wins, independent of enumeration order
        let picked =
            select_certificate(vec![a.clone(), b.clone()], b"\x01", None).unwrap();
        assert_eq!(picked.der, b"zzz");
        let picked = select_certificate(vec![b, a], b"\x01", None).unwrap();
        assert_eq!(picked.der, b"zzz");
    }

    #[test]
    fn certificate_without_expiry_loses() {
        let mut a = cert(b"\x01", None, 30, b"aaa");
        a.not_after = None;
        let b = cert(b"\x01", None, 1, b"bbb");
        let picked = select_certificate(vec![a, b], b"\x01", None).unwrap();
        assert_eq!(picked.der, b"bbb");
    }

    #[test]
    fn certificate_criteria_are_anded() {
        let a = cert(b"\x01", Some("web"), 10, b"aaa");
        let b = cert(b"\x01", Some("mail"), 99, b"bbb");
        let picked =
            select_certificate(vec![a, b], b"\x01", Some("web")).unwrap();
        assert_eq!(picked.der, b"aaa");
    }

    #[test]
    fn certificate_no_criteria_prefers_nonempty_id() {
        let no_id = cert(b"", None, 10, b"aaa");
        let with_id = cert(b"\x09", None, 1, b"bbb");
        let picked =
            select_certificate(vec![no_id.clone(), with_id], b"", None).unwrap();
        assert_eq!(picked.id, b"\x09");

        let picked = select_certificate(vec![no_id], b"", None).unwrap();
        assert_eq!(picked.der, b"aaa");
    }

    #[test]
    fn certificate_no_match_is_none() {
        let a = cert(b"\x01", None, 10, b"aaa");
        assert!(select_certificate(vec![a], b"\x02", None).is_none());
        assert!(select_certificate(Vec::new(), b"", None).is_none());
    }

    #[test]
    fn key_last_match_wins_and_order_matters() {
        let keys = vec![
            key(b"\x01", Some("a")),
            key(b"\x01", Some("b")),
            key(b"\x01", Some("c")),
        ];
        let mut reversed = keys.clone();
        reversed.reverse();

        let picked = select_key(keys, b"\x01", None, "private").unwrap();
        assert_eq!(picked.label.as_deref(), Some("c"));
        let picked = select_key(reversed, b"\x01", None, "private").unwrap();
        assert_eq!(picked.label.as_deref(), Some("a"));
    }

    #[test]
    fn key_no_criteria_takes_first() {
        let keys = vec![key(b"\x01", Some("a")), key(b"\x02", Some("b"))];
        let picked = select_key(keys, b"", None, "public").unwrap();
        assert_eq!(picked.label.as_deref(), Some("a"));
    }

    #[test]
    fn key_label_and_id_are_anded() {
        let keys = vec![key(b"\x01", Some("a")), key(b"\x02", Some("a"))];
        let picked = select_key(keys, b"\x01", Some("a"), "private").unwrap();
        assert_eq!(picked.id, b"\x01");
        assert!(select_key(
            vec![key(b"\x01", Some("a"))],
            b"\x01",
            Some("other"),
            "private"
        )
        .is_none());
    }
}
