mod support;

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ta_crypto::AudioKey;
use ta_proto::login::{AuthenticationType, Credentials, ErrorCode};
use ta_proto::{FileId, ItemGid, PacketType};
use ta_session::{
    open_audio_stream, open_stream, AudioKeyProvider, Session, SessionError, SessionState,
};
use ta_store::DiskCache;
use tempfile::tempdir;

use support::{sample_bytes, wait_for, FakeAp, Script, ServedFile, PASSWORD};

const FILE: FileId = FileId([0x11; 20]);
const GID: ItemGid = ItemGid([0x22; 16]);
const KEY: [u8; 16] = [0x33; 16];

fn alice() -> Credentials {
    Credentials::with_password("alice", PASSWORD)
}

fn script_with_file(len: usize, chunk_size: usize) -> Script {
    let mut files = HashMap::new();
    files.insert(FILE, ServedFile::new(GID, KEY, sample_bytes(len, 7), chunk_size));
    Script {
        files,
        ..Script::default()
    }
}

#[tokio::test]
async fn login_exposes_welcome_and_country_code() {
    let ap = FakeAp::start(Script::default()).await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.username().as_deref(), Some("alice"));
    wait_for(|| session.country_code().is_some()).await;
    assert_eq!(session.country_code().as_deref(), Some("SE"));

    // The server pings right after the welcome.
    wait_for(|| ap.counters.pongs.load(Ordering::SeqCst) == 1).await;
    session.close();
}

#[tokio::test]
async fn bad_credentials_fail_connect_with_reason() {
    let ap = FakeAp::start(Script {
        login_failure: Some(ErrorCode::BadCredentials),
        ..Script::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let err = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        SessionError::Authentication {
            code: ErrorCode::BadCredentials,
            ..
        }
    ));
    assert_eq!(err.auth_reason(), Some("bad credentials"));
    assert_eq!(ap.connections(), 1);
}

#[tokio::test]
async fn handshake_rejection_is_an_authentication_error() {
    let ap = FakeAp::start(Script {
        reject_handshake: Some(2),
        ..Script::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let err = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SessionError::Authentication {
            code: ErrorCode::TryAnotherAp,
            ..
        }
    ));
}

#[tokio::test]
async fn untrusted_signature_aborts_handshake() {
    let ap = FakeAp::start(Script {
        wrong_signature: true,
        ..Script::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let err = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Handshake(_)), "got {err:?}");
    assert!(ap.counters.logins.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mac_failure_reconnects_once_with_stored_credentials() {
    let ap = FakeAp::start(Script {
        corrupt_first_connection: true,
        ..Script::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .unwrap();

    wait_for(|| session.reconnect_count() == 1 && session.state() == SessionState::Ready).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.reconnect_count(), 1);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(ap.connections(), 2);
    assert_eq!(
        *ap.counters.logins.lock(),
        vec![
            AuthenticationType::UserPass,
            AuthenticationType::StoredCredentials
        ]
    );
    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_reconnect_keeps_session_closed() {
    let ap = FakeAp::start(Script {
        corrupt_first_connection: true,
        reconnect_delay: Some(Duration::from_millis(300)),
        ..Script::default()
    })
    .await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .unwrap();

    wait_for(|| session.state() == SessionState::Connecting && ap.connections() == 2).await;
    session.close();

    // The delayed handshake and login finish after the close.
    wait_for(|| ap.counters.logins.lock().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.reconnect_count(), 1);
    assert!(matches!(
        session.send(PacketType::Pong, vec![0; 4]).await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn audio_key_is_fetched_and_refusal_surfaces() {
    let ap = FakeAp::start(script_with_file(64, 4096)).await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .unwrap();

    let key = session.audio_keys().audio_key(GID, FILE).await.unwrap();
    assert_eq!(key, AudioKey(KEY));

    let err = session
        .audio_keys()
        .audio_key(GID, FileId([0x99; 20]))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AudioKey(_)));
    // One request for the good key, two for the refused one.
    assert_eq!(ap.counters.key_requests.load(Ordering::SeqCst), 3);
    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_reads_whole_file_and_second_read_comes_from_cache() {
    let chunk_size = 4096;
    let len = 3 * chunk_size + 100;
    let ap = FakeAp::start(script_with_file(len, chunk_size)).await;
    let dir = tempdir().unwrap();
    let config = ap.config(chunk_size, dir.path());
    let cache = DiskCache::open(&config.cache, chunk_size).unwrap();
    let session = Session::connect(config, ap.source(), alice()).await.unwrap();
    let expected = sample_bytes(len, 7);

    let mut stream = open_audio_stream(&session, FILE, GID, Some(&cache)).await.unwrap();
    assert_eq!(stream.size(), len as u64);
    let first = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    })
    .await
    .unwrap();
    assert_eq!(first, expected);
    assert_eq!(ap.chunk_requests(), 4);
    assert!(cache.contains(&FILE));

    let mut stream = open_audio_stream(&session, FILE, GID, Some(&cache)).await.unwrap();
    let second = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    })
    .await
    .unwrap();
    assert_eq!(second, expected);
    assert_eq!(ap.chunk_requests(), 4);
    session.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_session_releases_a_blocked_read() {
    let chunk_size = 4096;
    let mut script = script_with_file(3 * chunk_size, chunk_size);
    script.withhold_from = Some(chunk_size as u64);
    let ap = FakeAp::start(script).await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(chunk_size, dir.path()), ap.source(), alice())
        .await
        .unwrap();

    let mut stream = open_audio_stream(&session, FILE, GID, None).await.unwrap();
    let reader = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        stream.read_to_end(&mut out)
    });

    wait_for(|| ap.chunk_requests() >= 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reader.is_finished(), "read finished without chunk 1");

    session.close();
    let result = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("reader still blocked after close")
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_file_fails_open_after_retries() {
    let ap = FakeAp::start(Script::default()).await;
    let dir = tempdir().unwrap();
    let config = ap.config(4096, dir.path());
    let retries = config.stream.max_chunk_retries as usize;
    let session = Session::connect(config, ap.source(), alice()).await.unwrap();

    let err = open_stream(&session, FileId([0x44; 20]), None, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Io(_)), "got {err:?}");
    assert_eq!(ap.chunk_requests(), 1 + retries);
    session.close();
}

#[tokio::test]
async fn closed_session_rejects_work() {
    let ap = FakeAp::start(Script::default()).await;
    let dir = tempdir().unwrap();
    let session = Session::connect(ap.config(4096, dir.path()), ap.source(), alice())
        .await
        .unwrap();
    let mut states = session.subscribe_state();

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(*states.borrow_and_update(), SessionState::Closed);
    assert!(matches!(
        session.send(PacketType::Pong, vec![0; 4]).await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(
        session.audio_keys().audio_key(GID, FILE).await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(session.ready().await, Err(SessionError::Closed)));
}
