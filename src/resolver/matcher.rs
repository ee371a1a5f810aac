//! Candidate slot matching.

use log::info;

use crate::token::{Slot, TokenInfo};
use crate::uri::{ObjectQuery, TokenFilter};

//------------ CandidateSet --------------------------------------------------

/// The slots surviving filtering, in enumeration order.
///
/// Slots without a token never become candidates, though they still show up
/// in the diagnostic listing.
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    slots: Vec<Slot>,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn into_slots(self) -> Vec<Slot> {
        self.slots
    }

    /// Splits the candidates into slots with initialized and uninitialized
    /// tokens, keeping enumeration order within each group.
    pub fn partition_initialized(self) -> (Vec<Slot>, Vec<Slot>) {
        self.slots
            .into_iter()
            .partition(|slot| slot.token.as_ref().map_or(false, |t| t.initialized))
    }
}

//------------ Matching ------------------------------------------------------

/// Human-readable state flags of a slot, for the diagnostic listing only.
pub fn token_flags(slot: &Slot) -> String {
    let token = match &slot.token {
        Some(token) => token,
        None => return "no token".to_string(),
    };
    let mut flags = Vec::new();
    if !token.initialized {
        flags.push("uninitialized");
    } else if !token.user_pin_set {
        flags.push("no pin");
    }
    if token.login_required {
        flags.push("login");
    }
    if token.read_only {
        flags.push("ro");
    }
    flags.join(", ")
}

/// Whether a token matches the filter: every set filter field must equal
/// the corresponding token attribute exactly.
pub fn filter_matches(filter: &TokenFilter, token: &TokenInfo) -> bool {
    fn field(want: &Option<String>, have: &str) -> bool {
        match want {
            None => true,
            Some(want) => want == have,
        }
    }
    field(&filter.label, &token.label)
        && field(&filter.manufacturer, &token.manufacturer)
        && field(&filter.serial, &token.serial)
        && field(&filter.model, &token.model)
}

/// Selects candidate slots for a query in a single pass.
///
/// A slot is a candidate when the query's slot number equals its id, or when
/// the query's token filter matches its token. When the query carries no
/// slot number and no filter at all, the search falls back to every
/// token-bearing slot.
pub fn match_slots(query: &ObjectQuery, slots: &[Slot]) -> CandidateSet {
    let mut matched = Vec::new();

    for slot in slots {
        let mut found = false;

        if query.slot_number == Some(slot.id) {
            found = true;
        }
        if let (Some(filter), Some(token)) = (&query.token_filter, &slot.token) {
            if filter_matches(filter, token) {
                found = true;
            }
        }

        info!(
            "- [{}] {:<25.25}  {:<36}  ({})",
            slot.id,
            slot.description,
            token_flags(slot),
            slot.token_label()
        );

        // Ignore slots without tokens. Some modules allow objects on
        // uninitialized tokens, so those stay in.
        if found && slot.token.is_some() {
            matched.push(slot.clone());
        }
    }

    if matched.is_empty() && query.slot_number.is_none() && query.token_filter.is_none() {
        matched = slots.iter().filter(|s| s.token.is_some()).cloned().collect();
    }

    CandidateSet { slots: matched }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn token(label: &str) -> TokenInfo {
        TokenInfo {
            label: label.to_string(),
            manufacturer: "ACME".to_string(),
            serial: "0001".to_string(),
            model: "X9".to_string(),
            initialized: true,
            user_pin_set: true,
            login_required: false,
            read_only: false,
            secure_login: false,
        }
    }

    fn slot(id: u64, label: Option<&str>) -> Slot {
        Slot {
            id,
            description: format!("slot {}", id),
            token: label.map(token),
        }
    }

    fn query() -> ObjectQuery {
        ObjectQuery::default()
    }

    #[test]
    fn matches_by_slot_number() {
        let slots = vec![slot(0, Some("a")), slot(1, Some("b")), slot(2, None)];
        let mut q = query();
        q.slot_number = Some(1);
        let set = match_slots(&q, &slots);
        let matched = set.into_slots();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, 1);
    }

    #[test]
    fn slot_number_miss_does_not_fall_back() {
        let slots = vec![slot(0, Some("a")), slot(1, Some("b"))];
        let mut q = query();
        q.slot_number = Some(9);
        assert!(match_slots(&q, &slots).is_empty());
    }

    #[test]
    fn tokenless_slot_never_matches() {
        let slots = vec![slot(3, None)];
        let mut q = query();
        q.slot_number = Some(3);
        assert!(match_slots(&q, &slots).is_empty());

        // the filter cannot match it either
        let mut q = query();
        q.token_filter = Some(TokenFilter::default());
        assert!(match_slots(&q, &slots).is_empty());
    }

    #[test]
    fn matches_by_filter_fields() {
        let slots = vec![slot(0, Some("tok a")), slot(1, Some("tok b"))];

        let mut q = query();
        q.token_filter = Some(TokenFilter {
            label: Some("tok b".to_string()),
            ..Default::default()
        });
        let matched = match_slots(&q, &slots).into_slots();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, 1);

        // a mismatching field disqualifies even if the label matches
        let mut q = query();
        q.token_filter = Some(TokenFilter {
            label: Some("tok b".to_string()),
            serial: Some("9999".to_string()),
            ..Default::default()
        });
        assert!(match_slots(&q, &slots).is_empty());
    }

    #[test]
    fn empty_filter_matches_all_token_slots() {
        let slots = vec![slot(0, Some("a")), slot(1, None), slot(2, Some("c"))];
        let mut q = query();
        q.token_filter = Some(TokenFilter::default());
        let matched = match_slots(&q, &slots).into_slots();
        assert_eq!(matched.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn no_criteria_falls_back_to_all_tokens() {
        let slots = vec![slot(0, None), slot(1, Some("a")), slot(2, Some("b"))];
        let matched = match_slots(&query(), &slots).into_slots();
        assert_eq!(matched.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn partition_splits_on_initialized() {
        let mut uninit = token("u");
        uninit.initialized = false;
        let slots = vec![
            Slot { id: 0, description: "s0".to_string(), token: Some(token("a")) },
            Slot { id: 1, description: "s1".to_string(), token: Some(uninit) },
            Slot { id: 2, description: "s2".to_string(), token: Some(token("c")) },
        ];
        let set = match_slots(&query(), &slots);
        let (init, uninit) = set.partition_initialized();
        assert_eq!(init.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(uninit.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn flags_text() {
        let mut t = token("a");
        t.login_required = true;
        t.read_only = true;
        let s = Slot { id: 0, description: String::new(), token: Some(t) };
        assert_eq!(token_flags(&s), "login, ro");

        let mut t = token("a");
        t.initialized = false;
        let s = Slot { id: 0, description: String::new(), token: Some(t) };
        assert_eq!(token_flags(&s), "uninitialized");

        let mut t = token("a");
        t.user_pin_set = false;
        let s = Slot { id: 0, description: String::new(), token: Some(t) };
        assert_eq!(token_flags(&s), "no pin");

        let s = Slot { id: 0, description: String::new(), token: None };
        assert_eq!(token_flags(&s), "no token");
    }
}
