//! Concurrent interleavings of dispatched calls.
//!
//! The contract under test: every channel resolves exactly once, the
//! pending registry drains, and key-state mutations serialize so the
//! client always lands in a coherent state.

use std::sync::Arc;

use tempfile::TempDir;

use idkit_core::{Call, Dispatcher, KdfParams, MemoryConnector, Password, Payload, CODE_OK};

async fn initialized_dispatcher() -> (Arc<Dispatcher<MemoryConnector>>, TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let tmp = TempDir::new().expect("tempdir");
    let dispatcher = Dispatcher::new(MemoryConnector::with_kdf(KdfParams::insecure_fast()));
    let (_, rx) = dispatcher.dispatch(Call::Init {
        base_path: tmp.path().into(),
    });
    assert_eq!(rx.await.expect("init completes").code(), CODE_OK);
    (dispatcher, tmp)
}

fn call_for(i: usize) -> Call {
    match i % 6 {
        0 => Call::Lock,
        1 => Call::Unlock {
            password: Password::from("password"),
        },
        2 => Call::Unlock {
            password: Password::from("wrong password"),
        },
        3 => Call::HasDeviceKey,
        4 => Call::SignerAccountId,
        _ => Call::ResolveUid {
            identifier: format!("handle-{i}"),
        },
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_interleavings_never_leak_or_double_complete() {
    let (dispatcher, _tmp) = initialized_dispatcher().await;

    let (_, rx) = dispatcher.dispatch(Call::SetKey {
        suri: Some("//alice".into()),
        password: Password::from("password"),
        phrase: None,
    });
    assert_eq!(rx.await.expect("set_key completes").code(), CODE_OK);

    let mut receivers = Vec::new();
    for i in 0..200 {
        receivers.push(dispatcher.dispatch(call_for(i)).1);
    }

    let mut completions = 0usize;
    for rx in receivers {
        // a oneshot receiver yields at most once; receiving at all proves
        // the channel was neither leaked nor double-completed
        let completion = rx.await.expect("exactly one terminal message");
        match completion.code() {
            // lock/unlock outcomes depend on interleaving; the codes must
            // stay within the documented set
            1 | 14 | 19 | 20 => {}
            other => panic!("unexpected code {other}: {:?}", completion.result),
        }
        completions += 1;
    }
    assert_eq!(completions, 200);
    assert_eq!(dispatcher.pending_len(), 0, "no pending request leaked");

    // the client is still coherent: a clean unlock must succeed
    let (_, rx) = dispatcher.dispatch(Call::Unlock {
        password: Password::from("password"),
    });
    assert_eq!(rx.await.expect("unlock completes").code(), CODE_OK);
    let (_, rx) = dispatcher.dispatch(Call::SignerAccountId);
    let completion = rx.await.expect("signer completes");
    assert_eq!(completion.code(), CODE_OK);
    assert!(matches!(completion.result, Ok(Payload::Text(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_complete_while_mutations_are_in_flight() {
    let (dispatcher, _tmp) = initialized_dispatcher().await;
    let (_, rx) = dispatcher.dispatch(Call::SetKey {
        suri: Some("//alice".into()),
        password: Password::from("password"),
        phrase: None,
    });
    assert_eq!(rx.await.expect("set_key completes").code(), CODE_OK);

    // interleave a mutation (unlock does real KDF work) with reads
    let slow = dispatcher.dispatch(Call::Unlock {
        password: Password::from("password"),
    });
    let mut reads = Vec::new();
    for _ in 0..32 {
        reads.push(dispatcher.dispatch(Call::HasDeviceKey).1);
    }

    for rx in reads {
        let completion = rx.await.expect("read completes");
        assert_eq!(completion.code(), CODE_OK);
        assert!(matches!(completion.result, Ok(Payload::Bool(true))));
    }
    assert_eq!(slow.1.await.expect("unlock completes").code(), CODE_OK);
    assert_eq!(dispatcher.pending_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_inits_initialize_exactly_once() {
    let tmp = TempDir::new().expect("tempdir");
    let dispatcher = Dispatcher::new(MemoryConnector::with_kdf(KdfParams::insecure_fast()));

    let mut receivers = Vec::new();
    for _ in 0..8 {
        receivers.push(
            dispatcher
                .dispatch(Call::Init {
                    base_path: tmp.path().into(),
                })
                .1,
        );
    }

    let mut ok = 0usize;
    let mut already = 0usize;
    for rx in receivers {
        match rx.await.expect("init completes").code() {
            CODE_OK => ok += 1,
            8 => already += 1,
            other => panic!("unexpected init code {other}"),
        }
    }
    assert_eq!(ok, 1, "exactly one init wins");
    assert_eq!(already, 7);
    assert!(dispatcher.client().await.is_some());
}
