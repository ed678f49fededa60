//! Fuzz target for the effect-bundle payload parsers
//!
//! Every structured string inside a bundle comes from the crypto core or the
//! broker and may be garbage.
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - A parsed ping round-trips through its `hash:timestamp` form
//! - Parsed contact info never has an empty pubkey or an empty route hint
//! - A stored user state that parses re-encodes to an equal state

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use switchboard_core::{
    is_batch_topic, ContactInfo, MsgsCounts, Ping, SentStatus, SettledStatus, UserState,
};

#[derive(Debug, Arbitrary)]
enum Input {
    Settled(String),
    Sent(String),
    Counts(String),
    Own(String),
    Inviter(String),
    Ping(String),
    Topic(String),
    Stored(String),
    Delta(Vec<u8>),
}

fuzz_target!(|input: Input| {
    match input {
        Input::Settled(raw) => {
            if let Ok(status) = SettledStatus::parse(&raw) {
                let _ = status.is_complete();
            }
        },
        Input::Sent(raw) => {
            let _ = SentStatus::parse(&raw);
        },
        Input::Counts(raw) => {
            if let Ok(counts) = MsgsCounts::parse(&raw) {
                let _ = (counts.contacts_total(), counts.messages_total(), counts.newest_index());
            }
        },
        Input::Own(raw) => check_contact(ContactInfo::parse_own(&raw)),
        Input::Inviter(raw) => check_contact(ContactInfo::parse_inviter(&raw)),
        Input::Ping(raw) => {
            if let Ok(ping) = Ping::parse(&raw) {
                let again = Ping::parse(&format!("{}:{}", ping.payment_hash, ping.timestamp));
                assert_eq!(again.ok(), Some(ping));
            }
        },
        Input::Topic(topic) => {
            let _ = is_batch_topic(&topic);
        },
        Input::Stored(raw) => {
            if let Ok(state) = UserState::from_stored(&raw) {
                let stored = state.to_stored().expect("parsed state must re-encode");
                let again = UserState::from_stored(&stored).expect("re-encoded state must parse");
                assert_eq!(again, state);
            }
        },
        Input::Delta(delta) => {
            let mut state = UserState::new();
            if let Ok(applied) = state.apply_delta(&delta) {
                assert!(state.len() <= applied);
            }
        },
    }
});

fn check_contact(parsed: Result<ContactInfo, switchboard_core::ParseError>) {
    if let Ok(info) = parsed {
        assert!(!info.pubkey.is_empty());
        assert!(info.route_hint.as_deref().is_none_or(|h| !h.is_empty()));
    }
}
