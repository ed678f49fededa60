//! Session lifecycle integration tests.
//!
//! Covers account creation, the subscription bootstrap, the single guarded
//! reconnect, disconnect cleanup and app-start re-priming.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use switchboard_client::{
    ClientError, ConnectionStatus, CoreCall, EngineEvent, Mnemonic, OutgoingMessage, OwnerInfo,
    ParsedInvite, TransportEvent,
};
use switchboard_core::{ContactInfo, EffectBundle, MessageType, Msg, Publish};
use switchboard_harness::{Harness, init_test_tracing, scripted_core::TEST_MNEMONIC};

/// Helper: initial setup answer carrying our contact info and subscriptions
fn initial_setup() -> EffectBundle {
    EffectBundle {
        my_contact_info: Some("02me_03lsp_1x2x3".to_string()),
        subscription_topics: vec!["02me/0/res/#".to_string()],
        ..EffectBundle::default()
    }
}

/// Oracle: connection statuses observed by the listener, in order
fn verify_statuses(h: &Harness, expected: &[ConnectionStatus]) {
    assert_eq!(h.listener.statuses(), expected, "unexpected status sequence");
}

#[tokio::test(start_paused = true)]
async fn create_account_bootstraps_subscriptions() {
    init_test_tracing();
    let h = Harness::new(1);
    h.core.respond("initial_setup", initial_setup());

    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    verify_statuses(&h, &[ConnectionStatus::Connecting, ConnectionStatus::Connected]);
    assert_eq!(h.transport.subscriptions(), ["02me/0/res/#"]);
    assert!(h.listener.events().contains(&EngineEvent::OwnerRegistered {
        pubkey: "02me".to_string(),
        route_hint: Some("03lsp_1x2x3".to_string()),
        restoring: false,
        production: false,
        router: None,
        default_tribe: None,
    }));

    let names: Vec<&str> = h.core.calls().iter().map(CoreCall::name).collect();
    assert_eq!(names, ["initial_setup", "fetch_pings"]);
    assert_eq!(h.core.calls()[0], CoreCall::InitialSetup {
        device: "switchboard".to_string(),
        invite_code: None,
    });

    let generated = h.listener.events_where(|e| matches!(e, EngineEvent::MnemonicGenerated(_)));
    assert_eq!(generated, [EngineEvent::MnemonicGenerated(Mnemonic::new(TEST_MNEMONIC))]);
}

#[tokio::test(start_paused = true)]
async fn connect_options_carry_derived_credentials() {
    init_test_tracing();
    let h = Harness::new(2);
    h.session.create_account("alice", "mixer.example:1999", None).await.unwrap();

    let options = h.transport.last_connect().unwrap();
    assert_eq!(options.endpoint.host, "mixer.example");
    assert_eq!(options.endpoint.port, 1999);
    assert!(!options.endpoint.tls);
    assert!(options.username.starts_with("xpub-regtest-"));
    assert!(options.password.starts_with("sig-"));
    assert!(options.client_id.starts_with("switchboard_"));
}

#[tokio::test(start_paused = true)]
async fn every_core_call_gets_a_strictly_increasing_time() {
    init_test_tracing();
    let h = Harness::new(3);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;
    for _ in 0..3 {
        h.session.mark_read("02bob", 4).await.unwrap();
    }

    let times: Vec<u64> = h.core.contexts().iter().map(|c| c.unique_time).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "times not increasing: {times:?}");
}

#[tokio::test(start_paused = true)]
async fn invite_code_primes_dashboard_and_mixer() {
    init_test_tracing();
    let h = Harness::new(4);
    h.core.set_invite(ParsedInvite {
        lsp_host: Some("invited.example".to_string()),
        initial_tribe: Some("tribe-json".to_string()),
        inviter_contact_info: Some("02inviter_03lsp_9x9x9".to_string()),
    });
    // Setup echoes the same inviter: no second bootstrap.
    h.core.respond("initial_setup", EffectBundle {
        inviter_contact_info: Some("02inviter_03lsp_9x9x9".to_string()),
        ..EffectBundle::default()
    });

    h.session.create_account("alice", "localhost", Some("invite-code")).await.unwrap();
    h.settle().await;

    assert_eq!(h.session.mixer_address().as_deref(), Some("invited.example"));
    let inviter = ContactInfo {
        pubkey: "02inviter".to_string(),
        route_hint: Some("03lsp_9x9x9".to_string()),
    };
    let events = h.listener.events();
    assert!(events.contains(&EngineEvent::PendingInviter(inviter)));
    assert!(events.contains(&EngineEvent::InitialTribe("tribe-json".to_string())));
    assert_eq!(h.core.calls_named("initial_setup"), [CoreCall::InitialSetup {
        device: "switchboard".to_string(),
        invite_code: Some("invite-code".to_string()),
    }]);
}

#[tokio::test(start_paused = true)]
async fn new_inviter_reruns_bootstrap() {
    init_test_tracing();
    let h = Harness::new(5);
    h.core.respond("initial_setup", EffectBundle {
        inviter_contact_info: Some("02someone".to_string()),
        ..EffectBundle::default()
    });

    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    assert_eq!(h.core.calls_named("initial_setup").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn first_failure_triggers_exactly_one_reconnect() {
    init_test_tracing();
    let h = Harness::new(6);
    h.transport.fail_next_connect("refused");
    h.transport.fail_next_connect("refused again");

    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.transport.connect_count(), 2);
    assert!(!h.session.is_connected());
    assert_eq!(h.listener.errors(), [
        ClientError::Connect { reason: "refused".to_string() },
        ClientError::Connect { reason: "refused again".to_string() },
    ]);

    // The caller decides when to try again.
    h.session.reconnect_with_backoff().await.unwrap();
    h.settle().await;
    assert_eq!(h.transport.connect_count(), 3);
    assert!(h.session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_connected_only_refreshes() {
    init_test_tracing();
    let h = Harness::new(7);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    h.session.reconnect_with_backoff().await.unwrap();
    h.settle().await;

    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.core.calls_named("read_markers").len(), 1);
    assert_eq!(h.core.calls_named("mute_levels").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_reported_and_reconnects_once() {
    init_test_tracing();
    let h = Harness::new(8);
    h.core.respond("initial_setup", initial_setup());
    h.core.respond("initial_setup", initial_setup());
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    assert!(h.transport.inject(TransportEvent::ConnectionLost { reason: "eof".to_string() }));
    h.settle().await;

    assert!(h.session.is_connected());
    assert_eq!(h.transport.connect_count(), 2);
    assert_eq!(h.listener.errors(), [ClientError::ConnectionLost { reason: "eof".to_string() }]);
    verify_statuses(&h, &[
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
        ConnectionStatus::Disconnected,
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
    ]);
    // The fresh broker session was bootstrapped again.
    assert_eq!(h.core.calls_named("initial_setup").len(), 2);
    assert_eq!(h.transport.subscriptions(), ["02me/0/res/#", "02me/0/res/#"]);

    // The guard is spent: a second loss waits for the caller.
    assert!(h.transport.inject(TransportEvent::ConnectionLost { reason: "eof".to_string() }));
    h.settle().await;
    assert!(!h.session.is_connected());
    assert!(h.session.has_session());
    assert_eq!(h.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn caller_reconnect_after_lost_connection_bootstraps_again() {
    init_test_tracing();
    let h = Harness::new(13);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    // The automatic attempt is never acknowledged.
    h.transport.set_manual_connect(true);
    assert!(h.transport.inject(TransportEvent::ConnectionLost { reason: "eof".to_string() }));
    h.settle().await;
    assert!(!h.session.is_connected());
    assert_eq!(h.transport.connect_count(), 2);

    h.transport.set_manual_connect(false);
    h.core.respond("initial_setup", initial_setup());
    h.session.reconnect_with_backoff().await.unwrap();
    h.settle().await;

    assert!(h.session.is_connected());
    assert_eq!(h.transport.connect_count(), 3);
    assert_eq!(h.transport.disconnect_count(), 1);
    assert_eq!(h.core.calls_named("initial_setup").len(), 2);
    assert_eq!(h.core.calls_named("fetch_pings").len(), 2);
    assert_eq!(h.transport.subscriptions(), ["02me/0/res/#"]);
    assert_eq!(h.listener.statuses().last(), Some(&ConnectionStatus::Connected));
}

#[tokio::test(start_paused = true)]
async fn failed_publish_spends_the_single_reconnect() {
    init_test_tracing();
    let h = Harness::new(14);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    let sent = EffectBundle {
        publishes: vec![Publish::new("02me/0/req/send", b"m".to_vec())],
        ..EffectBundle::default()
    };
    h.core.respond("send", sent.clone());
    h.core.respond("send", sent);
    h.transport.fail_next_publish("rejected");
    h.transport.fail_next_publish("rejected again");
    let message = OutgoingMessage {
        recipient: "02bob".to_string(),
        msg_type: MessageType::Message,
        content: "{}".to_string(),
        amount_sats: None,
        is_tribe: false,
    };

    h.session.send_message(message.clone()).await.unwrap();
    h.settle().await;

    assert_eq!(h.listener.errors(), [ClientError::Publish {
        topic: "02me/0/req/send".to_string(),
        reason: "rejected".to_string(),
    }]);
    assert_eq!(h.transport.connect_count(), 2);
    assert!(h.session.is_connected());
    assert_eq!(h.core.calls_named("initial_setup").len(), 2);

    h.session.send_message(message).await.unwrap();
    h.settle().await;

    assert_eq!(h.listener.errors().len(), 2);
    assert_eq!(h.transport.connect_count(), 2);
    assert!(h.transport.published_to("02me/0/req/send").is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_subscribe_reconnects_and_subscribes_again() {
    init_test_tracing();
    let h = Harness::new(15);
    h.core.respond("initial_setup", initial_setup());
    h.core.respond("initial_setup", initial_setup());
    h.transport.fail_next_subscribe("denied");

    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    assert_eq!(h.listener.errors(), [ClientError::Subscribe { reason: "denied".to_string() }]);
    assert_eq!(h.transport.connect_count(), 2);
    assert!(h.session.is_connected());
    assert_eq!(h.transport.subscriptions(), ["02me/0/res/#"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_pending_state() {
    init_test_tracing();
    let h = Harness::new(9);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;
    h.core.respond("send", EffectBundle {
        ping: Some("hash:5".to_string()),
        msgs: vec![Msg { index: Some("3".to_string()), ..Msg::default() }],
        settlement: Some(Publish::new("settle", Vec::new())),
        ..EffectBundle::default()
    });
    let message = OutgoingMessage {
        recipient: "02bob".to_string(),
        msg_type: MessageType::Message,
        content: "{}".to_string(),
        amount_sats: None,
        is_tribe: false,
    };
    h.session.send_message(message.clone()).await.unwrap();
    assert_eq!(h.session.pending_settlements(), 1);
    assert_eq!(h.session.liveness_entries(), 1);

    h.session.disconnect().await;

    assert_eq!(h.session.pending_settlements(), 0);
    assert_eq!(h.session.liveness_entries(), 0);
    assert!(!h.session.has_session());
    assert_eq!(h.transport.disconnect_count(), 1);
    assert_eq!(h.listener.statuses().last(), Some(&ConnectionStatus::Disconnected));
    assert_eq!(h.session.send_message(message).await, Err(ClientError::NoSession));
}

#[tokio::test(start_paused = true)]
async fn initialize_when_connected_reprimes_dashboard() {
    init_test_tracing();
    let h = Harness::new(10);
    h.core.set_invite(ParsedInvite {
        initial_tribe: Some("tribe-json".to_string()),
        ..ParsedInvite::default()
    });
    h.session.create_account("alice", "localhost", Some("code")).await.unwrap();
    h.settle().await;
    h.listener.clear();

    h.session
        .initialize_and_subscribe("localhost", Mnemonic::new(TEST_MNEMONIC), OwnerInfo::default())
        .await
        .unwrap();

    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.listener.events(), [
        EngineEvent::InitialTribe("tribe-json".to_string()),
        EngineEvent::Connection(ConnectionStatus::Connected),
    ]);
    assert_eq!(h.core.calls_named("read_markers").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_connection_events_are_dropped() {
    init_test_tracing();
    let h = Harness::new(11);
    h.transport.set_manual_connect(true);
    h.session.create_account("alice", "localhost", None).await.unwrap();
    h.settle().await;

    // A second session supersedes the first attempt's channel.
    h.session.disconnect().await;
    h.session
        .initialize_and_subscribe("localhost", Mnemonic::new(TEST_MNEMONIC), OwnerInfo::default())
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.transport.connect_count(), 2);

    assert!(h.transport.inject_into(0, TransportEvent::Connected));
    h.settle().await;
    assert!(!h.session.is_connected());

    assert!(h.transport.inject(TransportEvent::Connected));
    h.settle().await;
    assert!(h.session.is_connected());
    assert_eq!(h.core.calls_named("initial_setup").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn bad_mnemonic_fails_initialization() {
    init_test_tracing();
    let h = Harness::new(12);
    let result = h
        .session
        .initialize_and_subscribe("localhost", Mnemonic::new("too short"), OwnerInfo::default())
        .await;

    assert!(matches!(result, Err(ClientError::KeyDerivation { .. })));
    assert_eq!(h.transport.connect_count(), 0);
    assert!(matches!(h.listener.errors()[..], [ClientError::KeyDerivation { .. }]));
}
