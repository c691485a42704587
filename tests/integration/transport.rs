//! Transport integration tests
//!
//! Position in seconds, locate with clamping, and rolling state.

use crate::helpers::*;
use approx::assert_relative_eq;
use midirelay::prelude::*;

#[test]
fn test_set_time_locates_server() {
    let (server, client) = test_client("seq");
    let transport = client.transport();

    transport.set_time(2.0).unwrap();
    assert_eq!(server.transport_frame(), 96000);
    assert_relative_eq!(transport.time().unwrap(), 2.0, epsilon = FRAME_EPSILON);
}

/// Negative times locate to the start.
#[test]
fn test_negative_time_clamped() {
    let (server, client) = test_client("seq");
    client.transport().set_time(3.0).unwrap();
    client.transport().set_time(-1.5).unwrap();
    assert_eq!(server.transport_frame(), 0);
    assert_eq!(client.transport().time().unwrap(), 0.0);
}

/// A refused locate is logged, not returned.
#[test]
fn test_refused_locate_keeps_position() {
    init_tracing();
    let (server, client) = test_client("seq");
    client.transport().set_time(1.0).unwrap();
    server.refuse_locate(true);

    client.transport().set_time(5.0).unwrap();
    assert_eq!(server.transport_frame(), 48000);
}

#[test]
fn test_start_stop_rolling() {
    let (_server, client) = test_client("seq");
    let transport = client.transport();
    assert!(!transport.is_rolling().unwrap());

    transport.start().unwrap();
    assert!(transport.is_rolling().unwrap());
    transport.stop().unwrap();
    assert!(!transport.is_rolling().unwrap());

    transport.set_rolling(true).unwrap();
    assert!(transport.is_rolling().unwrap());
    transport.set_rolling(false).unwrap();
    assert!(!transport.is_rolling().unwrap());
}

/// Time only advances while rolling.
#[test]
fn test_time_follows_cycles() {
    let (server, client) = test_client("seq");
    client.activate().unwrap();
    let transport = client.transport();

    server.run_cycles(2, TEST_BLOCK_SIZE);
    assert_eq!(transport.time().unwrap(), 0.0);

    transport.start().unwrap();
    server.run_cycles(3, TEST_BLOCK_SIZE);
    assert_relative_eq!(
        transport.time().unwrap(),
        (3 * TEST_BLOCK_SIZE) as f64 / TEST_SAMPLE_RATE as f64,
        epsilon = FRAME_EPSILON / 10.0
    );
}

#[test]
fn test_transport_opens_client() {
    let (server, client) = test_client("seq");
    client.transport().time().unwrap();
    assert!(client.is_open());
    assert!(server.is_open());
}
