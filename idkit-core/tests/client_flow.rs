//! End-to-end flows through the dispatcher over in-memory collaborators.

use std::sync::Arc;

use tempfile::TempDir;

use idkit_core::{
    Call, ClaimEntry, Completion, Dispatcher, KdfParams, Ledger as _, MemoryConnector, Password,
    Payload, ProofStatus, CODE_OK,
};

const SURI: &str = "//alice";

struct Harness {
    dispatcher: Arc<Dispatcher<MemoryConnector>>,
    ledger: idkit_core::MemoryLedger,
    _tmp: TempDir,
}

async fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let connector = MemoryConnector::with_kdf(KdfParams::insecure_fast());
    let ledger = connector.ledger();
    let dispatcher = Dispatcher::new(connector);

    let completion = roundtrip(
        &dispatcher,
        Call::Init {
            base_path: tmp.path().into(),
        },
    )
    .await;
    assert_eq!(completion.code(), CODE_OK);

    Harness {
        dispatcher,
        ledger,
        _tmp: tmp,
    }
}

async fn roundtrip(dispatcher: &Arc<Dispatcher<MemoryConnector>>, call: Call) -> Completion {
    let (channel, rx) = dispatcher.dispatch(call);
    let completion = rx.await.expect("exactly one terminal message");
    assert_eq!(completion.channel, channel);
    completion
}

async fn payload(dispatcher: &Arc<Dispatcher<MemoryConnector>>, call: Call) -> Payload {
    let completion = roundtrip(dispatcher, call).await;
    assert_eq!(completion.code(), CODE_OK, "{:?}", completion.result);
    completion.result.expect("success payload")
}

fn text(payload: Payload) -> String {
    match payload {
        Payload::Text(text) => text,
        other => panic!("expected text payload, got {other:?}"),
    }
}

#[tokio::test]
async fn full_device_key_and_proof_lifecycle() {
    let h = harness().await;

    assert_eq!(
        payload(&h.dispatcher, Call::HasDeviceKey).await,
        Payload::Bool(false)
    );

    let account = text(
        payload(
            &h.dispatcher,
            Call::SetKey {
                suri: Some(SURI.into()),
                password: Password::from("password"),
                phrase: None,
            },
        )
        .await,
    );

    assert_eq!(
        payload(&h.dispatcher, Call::HasDeviceKey).await,
        Payload::Bool(true)
    );
    assert_eq!(
        text(payload(&h.dispatcher, Call::SignerAccountId).await),
        account
    );

    // prove github ownership; the proof document names the handle
    let document = text(
        payload(
            &h.dispatcher,
            Call::ProveIdentity {
                service: 1,
                id: "octocat".into(),
            },
        )
        .await,
    );
    assert!(document.contains("octocat"));

    let account_id = idkit_core::AccountId::from_hex(&account).unwrap();
    let uid = h
        .ledger
        .uid_for_account(&account_id)
        .await
        .unwrap()
        .expect("first proof mints a uid");

    // the identifier becomes resolvable once the ledger binds it
    h.ledger.bind_identifier("octocat@github", uid);
    assert_eq!(
        payload(
            &h.dispatcher,
            Call::ResolveUid {
                identifier: "octocat@github".into()
            }
        )
        .await,
        Payload::OptionalUid(Some(uid))
    );

    // an unknown handle is a valid "not found", not an error
    assert_eq!(
        payload(
            &h.dispatcher,
            Call::ResolveUid {
                identifier: "nonexistent-handle".into()
            }
        )
        .await,
        Payload::OptionalUid(None)
    );

    let Payload::Record(record) = payload(
        &h.dispatcher,
        Call::Identity {
            uid: uid.to_string(),
        },
    )
    .await
    else {
        panic!("expected a record payload");
    };
    assert_eq!(record.owner, Some(account_id));
    assert_eq!(record.claims.len(), 1);
    assert!(matches!(
        record.claims[0],
        ClaimEntry::Resolved {
            status: ProofStatus::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn paperkey_and_revocation_update_the_record() {
    let h = harness().await;
    let account = text(
        payload(
            &h.dispatcher,
            Call::SetKey {
                suri: Some(SURI.into()),
                password: Password::from("password"),
                phrase: None,
            },
        )
        .await,
    );
    text(
        payload(
            &h.dispatcher,
            Call::ProveIdentity {
                service: 1,
                id: "octocat".into(),
            },
        )
        .await,
    );

    let phrase = text(payload(&h.dispatcher, Call::AddPaperkey).await);
    assert_eq!(phrase.split_whitespace().count(), 24);

    payload(
        &h.dispatcher,
        Call::RevokeIdentity {
            service: 1,
            id: "octocat".into(),
        },
    )
    .await;

    let account_id = idkit_core::AccountId::from_hex(&account).unwrap();
    let uid = h
        .ledger
        .uid_for_account(&account_id)
        .await
        .unwrap()
        .unwrap();
    let Payload::Record(record) = payload(
        &h.dispatcher,
        Call::Identity {
            uid: uid.to_string(),
        },
    )
    .await
    else {
        panic!("expected a record payload");
    };

    assert_eq!(record.paperkeys.len(), 1);
    assert_eq!(record.claims.len(), 2, "ownership + revocation");
    assert!(matches!(
        record.claims[0],
        ClaimEntry::Resolved {
            status: ProofStatus::Rejected,
            ..
        }
    ));
}

#[tokio::test]
async fn locked_client_refuses_proofs_without_network_calls() {
    let h = harness().await;
    payload(
        &h.dispatcher,
        Call::SetKey {
            suri: Some(SURI.into()),
            password: Password::from("password"),
            phrase: None,
        },
    )
    .await;
    payload(&h.dispatcher, Call::Lock).await;

    let before = h.ledger.calls();
    let completion = roundtrip(
        &h.dispatcher,
        Call::ProveIdentity {
            service: 1,
            id: "octocat".into(),
        },
    )
    .await;
    assert_eq!(completion.code(), 19, "locked-state error");
    assert_eq!(h.ledger.calls(), before, "no ledger call while locked");

    assert!(h
        .dispatcher
        .last_error_message()
        .expect("failure recorded")
        .contains("locked"));
    assert_eq!(
        h.dispatcher.last_error_length(),
        h.dispatcher.last_error_message().unwrap().len()
    );
}

#[tokio::test]
async fn unknown_service_tag_fails_with_code_16() {
    let h = harness().await;
    payload(
        &h.dispatcher,
        Call::SetKey {
            suri: Some(SURI.into()),
            password: Password::from("password"),
            phrase: None,
        },
    )
    .await;
    let completion = roundtrip(
        &h.dispatcher,
        Call::ProveIdentity {
            service: 42,
            id: "octocat".into(),
        },
    )
    .await;
    assert_eq!(completion.code(), 16);
}

#[tokio::test]
async fn mnemonic_restore_reproduces_the_account() {
    let phrase = idkit_core::keystore::generate_mnemonic().to_string();

    let mut accounts = Vec::new();
    for _ in 0..2 {
        let h = harness().await;
        accounts.push(text(
            payload(
                &h.dispatcher,
                Call::SetKey {
                    suri: None,
                    password: Password::from("password"),
                    phrase: Some(phrase.clone()),
                },
            )
            .await,
        ));
    }
    assert_eq!(accounts[0], accounts[1]);
}

#[tokio::test]
async fn wrong_unlock_reports_fail_to_unlock() {
    let h = harness().await;
    payload(
        &h.dispatcher,
        Call::SetKey {
            suri: Some(SURI.into()),
            password: Password::from("password"),
            phrase: None,
        },
    )
    .await;
    payload(&h.dispatcher, Call::Lock).await;

    for _ in 0..5 {
        let completion = roundtrip(
            &h.dispatcher,
            Call::Unlock {
                password: Password::from("wrong password"),
            },
        )
        .await;
        assert_eq!(completion.code(), 14);
    }

    assert_eq!(
        payload(&h.dispatcher, Call::HasDeviceKey).await,
        Payload::Bool(true)
    );
    payload(
        &h.dispatcher,
        Call::Unlock {
            password: Password::from("password"),
        },
    )
    .await;
}
