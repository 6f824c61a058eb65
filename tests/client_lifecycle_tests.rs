//! Client lifecycle against an in-process stub driver: registration,
//! version gating, timeouts, and handle release.

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use common::StubDriver;
use tern::{cnc, memory::MappedFile, Context, Tern, TernError, PUBLICATION_CLOSED};

fn test_context(dir: &std::path::Path) -> Context {
    common::init_tracing();
    Context::new()
        .with_dir(dir)
        .with_keepalive_interval(Duration::from_millis(20))
        .with_driver_timeout(Duration::from_millis(300))
        .with_resource_linger(Duration::from_millis(50))
}

#[test]
fn test_add_and_find_publication() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_publication("tern:ipc", 1001).unwrap();

    // non-blocking: absent until the driver has answered
    assert!(client.find_publication(registration_id).unwrap().is_none());

    let publication = common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_publication(registration_id).unwrap()
    });

    assert_eq!(publication.stream_id(), 1001);
    assert_eq!(publication.channel(), "tern:ipc");
    assert_eq!(publication.session_id(), 7_000);
    assert_eq!(publication.registration_id(), registration_id);
    assert!(!publication.is_closed());

    // a second find returns the same materialized handle
    let again = client.find_publication(registration_id).unwrap().unwrap();
    assert_eq!(again.session_id(), publication.session_id());
}

#[test]
fn test_add_and_find_subscription() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_subscription("tern:ipc", 2002).unwrap();
    assert!(client.find_subscription(registration_id).unwrap().is_none());

    let subscription = common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_subscription(registration_id).unwrap()
    });

    assert_eq!(subscription.stream_id(), 2002);
    assert_eq!(subscription.channel(), "tern:ipc");
    assert_eq!(subscription.image_count(), 0);
    assert!(!subscription.is_connected());
}

#[test]
fn test_connect_fails_on_cnc_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let _driver = StubDriver::start(dir.path());

    // rewrite the version the way an older driver would have
    let mapped = MappedFile::map_existing(cnc::file_path(dir.path())).unwrap();
    mapped
        .atomic_buffer()
        .put_i32(cnc::CNC_VERSION_FIELD_OFFSET, cnc::CNC_VERSION - 1);

    let err = Tern::connect(test_context(dir.path())).unwrap_err();
    assert!(matches!(
        err,
        TernError::CncVersionMismatch { expected, actual }
            if expected == cnc::CNC_VERSION && actual == cnc::CNC_VERSION - 1
    ));
}

#[test]
fn test_registration_error_is_surfaced_then_consumed() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_publication("tern:bogus", 1).unwrap();

    // reject it by hand instead of servicing normally
    driver.transmit_error(registration_id, 1, "invalid channel");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let err = loop {
        driver.service_without_responses();
        match client.find_publication(registration_id) {
            Err(e) => break e,
            Ok(None) => {
                assert!(std::time::Instant::now() < deadline, "rejection never surfaced");
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(Some(_)) => panic!("rejected registration must not materialize"),
        }
    };

    match err {
        TernError::Registration {
            correlation_id,
            code,
            message,
        } => {
            assert_eq!(correlation_id, registration_id);
            assert_eq!(code, 1);
            assert_eq!(message, "invalid channel");
        }
        other => panic!("unexpected error {other}"),
    }

    // consumed on observation: the id is now unknown
    assert!(client.find_publication(registration_id).unwrap().is_none());
}

#[test]
fn test_registration_times_out_without_driver_response() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let context = test_context(dir.path()).with_driver_timeout(Duration::from_millis(150));
    let client = Tern::connect(context).unwrap();

    let registration_id = client.add_publication("tern:ipc", 1).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let err = loop {
        // stay alive but never answer the registration
        driver.service_without_responses();
        match client.find_publication(registration_id) {
            Err(e) => break e,
            Ok(None) => {
                assert!(std::time::Instant::now() < deadline, "registration never timed out");
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(Some(_)) => panic!("driver never answered, nothing to find"),
        }
    };

    assert!(matches!(err, TernError::Registration { code, .. } if code < 0));
}

#[test]
fn test_driver_timeout_is_fatal_and_closes_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let timeouts = Arc::new(AtomicUsize::new(0));
    let errors_sink = Arc::clone(&errors);
    let timeouts_sink = Arc::clone(&timeouts);

    let context = test_context(dir.path())
        .with_driver_timeout(Duration::from_millis(200))
        .with_error_handler(move |e| {
            if matches!(e, TernError::DriverTimeout { .. }) {
                timeouts_sink.fetch_add(1, Ordering::SeqCst);
            }
            errors_sink.lock().unwrap().push(e.to_string());
        });
    let client = Tern::connect(context).unwrap();

    let registration_id = client.add_publication("tern:ipc", 1001).unwrap();
    let publication = common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_publication(registration_id).unwrap()
    });
    assert!(publication.offer(b"while alive") > 0);

    // freeze the driver heartbeat and wait out the timeout
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while client.is_driver_active() {
        assert!(std::time::Instant::now() < deadline, "driver timeout never fired");
        std::thread::sleep(Duration::from_millis(10));
    }

    // terminal error delivered exactly once, all handles closed
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert!(!errors.lock().unwrap().is_empty());
    assert!(publication.is_closed());
    assert_eq!(publication.offer(b"after timeout"), PUBLICATION_CLOSED);
    assert!(matches!(
        client.add_publication("tern:ipc", 1),
        Err(TernError::DriverTimeout { .. })
    ));
}

#[test]
fn test_keepalives_flow_to_driver() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    common::pump_until(&mut driver, Duration::from_secs(5), |d| {
        (d.keepalive_count >= 2).then_some(())
    });
    assert!(client.is_driver_active());
}

#[test]
fn test_publication_close_releases_registration() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_publication("tern:ipc", 1001).unwrap();
    let publication = common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_publication(registration_id).unwrap()
    });

    publication.close();
    assert_eq!(publication.offer(b"closed"), PUBLICATION_CLOSED);

    common::pump_until(&mut driver, Duration::from_secs(5), |d| {
        d.removed_publications
            .contains(&registration_id)
            .then_some(())
    });

    // the registration is gone from the client side too
    assert!(client.find_publication(registration_id).unwrap().is_none());
}

#[test]
fn test_subscription_close_releases_registration() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_subscription("tern:ipc", 1001).unwrap();
    let subscription = common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_subscription(registration_id).unwrap()
    });

    subscription.close();
    assert!(subscription.is_closed());

    common::pump_until(&mut driver, Duration::from_secs(5), |d| {
        d.removed_subscriptions
            .contains(&registration_id)
            .then_some(())
    });
}

#[test]
fn test_client_close_joins_conductor() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = StubDriver::start(dir.path());
    let mut client = Tern::connect(test_context(dir.path())).unwrap();

    let registration_id = client.add_publication("tern:ipc", 1).unwrap();
    common::pump_until(&mut driver, Duration::from_secs(5), |_| {
        client.find_publication(registration_id).unwrap()
    });

    client.close();
    client.close();
}
