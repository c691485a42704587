//! Client integration tests
//!
//! Lifecycle, port registration and lookup, listing, connections, and the
//! per-direction channel limit.

use crate::helpers::*;
use midirelay::prelude::*;
use midirelay::ServerError;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Nothing touches the server until a call needs it.
#[test]
fn test_client_opens_lazily() {
    init_tracing();
    let (server, client) = test_client("seq");
    assert!(!client.is_open());
    assert!(!server.is_open());

    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    assert!(client.is_open());
    assert_eq!(server.client_name().as_deref(), Some("seq"));
    assert_eq!(out.name(), "seq:out");
    assert!(out.is_mine());
    assert!(out.channel().is_some());
    assert!(!client.is_active());
}

#[test]
fn test_activate_and_deactivate() {
    let (server, client) = test_client("seq");
    client.activate().unwrap();
    assert!(client.is_open());
    assert!(client.is_active());
    assert!(server.is_active());
    assert!(server.has_handler());

    // Idempotent
    client.activate().unwrap();
    assert!(client.is_active());

    client.deactivate().unwrap();
    assert!(!client.is_active());
    assert!(!server.is_active());
    assert!(client.is_open());
}

/// A refused process callback disables MIDI but not activation.
#[test]
fn test_refused_handler_still_activates() {
    init_tracing();
    let (server, client) = test_client("seq");
    server.refuse_process_handler(true);

    client.activate().unwrap();
    assert!(client.is_active());
    assert!(server.is_active());
    assert!(!server.has_handler());
    assert!(server.run_cycle(TEST_BLOCK_SIZE).is_none());
}

#[test]
fn test_unavailable_server_is_an_error() {
    let (server, client) = test_client("seq");
    server.set_available(false);

    assert_eq!(
        client.open().unwrap_err(),
        Error::Server(ServerError::Unavailable)
    );
    assert!(client.port("out", PortFlags::IS_OUTPUT).is_err());
    assert!(client.activate().is_err());
    assert!(!client.is_open());
}

#[test]
fn test_close_is_idempotent() {
    let (server, client) = test_client("seq");
    client.activate().unwrap();

    client.close().unwrap();
    assert!(!client.is_open());
    assert!(!client.is_active());
    assert!(!server.is_open());
    assert!(!server.has_handler());

    client.close().unwrap();
    assert!(!client.is_open());
}

/// Dropping the client disconnects it from the server.
#[test]
fn test_drop_closes_connection() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0x90, 60, 100], 10.0).unwrap();
    assert!(server.is_active());

    drop(out);
    drop(client);
    assert!(!server.is_open());
    assert!(!server.is_active());
    assert!(!server.has_handler());
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Asking for the same short name twice returns the port registered first.
#[test]
fn test_port_lookup_reuses_existing() {
    let (_server, client) = test_client("seq");
    let first = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let second = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let by_full_name = client.port("seq:out", PortFlags::IS_OUTPUT).unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.id(), by_full_name.id());
    assert_eq!(first.channel(), second.channel());
    assert_eq!(client.ports(&PortQuery::new()).unwrap().len(), 1);
}

#[test]
fn test_port_without_direction_is_not_managed() {
    let (_server, client) = test_client("seq");
    let port = client.port("monitor", PortFlags::CAN_MONITOR).unwrap();
    assert!(port.is_mine());
    assert!(port.channel().is_none());
}

#[test]
fn test_ports_listing_and_filters() {
    let (server, client) = test_client("seq");
    server.add_external_port(
        "system:midi_capture_1",
        PortFlags::IS_OUTPUT | PortFlags::IS_PHYSICAL,
    );
    server.add_external_port(
        "system:midi_playback_1",
        PortFlags::IS_INPUT | PortFlags::IS_PHYSICAL,
    );
    client.port("in", PortFlags::IS_INPUT).unwrap();

    assert_eq!(client.ports(&PortQuery::new()).unwrap().len(), 3);

    let mine = client.ports(&PortQuery::new().mine_only(true)).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].name(), "seq:in");

    let physical = client
        .ports(&PortQuery::new().flags(PortFlags::IS_PHYSICAL))
        .unwrap();
    assert_eq!(physical.len(), 2);
    assert!(physical.iter().all(|port| !port.is_mine()));

    let capture = client.ports(&PortQuery::new().name("capture")).unwrap();
    assert_eq!(capture.len(), 1);
    assert_eq!(capture[0].name(), "system:midi_capture_1");

    let midi_inputs = PortQuery::new()
        .flags(PortFlags::IS_INPUT)
        .port_type("midi");
    let inputs = client.ports(&midi_inputs).unwrap();
    assert_eq!(inputs.len(), 2);
    assert!(client
        .ports(&PortQuery::new().port_type("audio"))
        .unwrap()
        .is_empty());
}

/// Past the channel limit a port is still created but cannot carry MIDI.
#[test]
fn test_unmanaged_port_past_limit() {
    init_tracing();
    let (server, client) = test_client_with_limit("seq", 1);
    let first = client.port("out1", PortFlags::IS_OUTPUT).unwrap();
    let second = client.port("out2", PortFlags::IS_OUTPUT).unwrap();
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();

    assert!(first.channel().is_some());
    assert!(second.channel().is_none());
    assert!(second.is_mine());
    assert!(server.port_name(second.id()).is_some());
    // Input channels have their own limit
    assert!(input.channel().is_some());

    assert_eq!(
        second.send(&[0x90, 60, 100], 0.0).unwrap_err(),
        Error::Unmanaged {
            port: "seq:out2".to_string()
        }
    );
    // Clearing an unmanaged port is a no-op
    second.clear_send().unwrap();
    first.send(&[0x90, 60, 100], 0.0).unwrap();
}

/// Unregistering frees the channel slot for the next port.
#[test]
fn test_unregister_frees_channel_slot() {
    let (server, client) = test_client_with_limit("seq", 1);
    let first = client.port("out1", PortFlags::IS_OUTPUT).unwrap();
    let id = first.id();
    first.unregister().unwrap();
    assert!(server.port_name(id).is_none());

    let second = client.port("out2", PortFlags::IS_OUTPUT).unwrap();
    assert!(second.channel().is_some());
}

/// A port the server refuses to remove stays registered and keeps sending.
#[test]
fn test_refused_unregister_keeps_channel() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let id = out.id();
    let channel = out.channel();
    out.send(&[0x90, 60, 100], 0.0).unwrap();

    server.refuse_unregister(true);
    assert!(matches!(
        out.unregister().unwrap_err(),
        Error::Server(ServerError::Failed { .. })
    ));
    assert!(server.port_name(id).is_some());

    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    assert_eq!(out.id(), id);
    assert_eq!(out.channel(), channel);
    out.send(&[0x80, 60, 0], 0.0).unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(
        emitted_in_cycle(&server, id, 0),
        vec![(0, vec![0x90, 60, 100]), (1, vec![0x80, 60, 0])]
    );
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

#[test]
fn test_connect_counts_existing_as_success() {
    let (server, client) = test_client("seq");
    server.add_external_port("system:midi_capture_1", PortFlags::IS_OUTPUT);
    let capture = client
        .port("system:midi_capture_1", PortFlags::empty())
        .unwrap();
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();
    assert!(!capture.is_mine());

    assert!(client.connect(&capture, &input).unwrap());
    assert!(client.is_active());
    assert!(client.connect(&capture, &input).unwrap());

    let connected = input.connections().unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].name(), "system:midi_capture_1");
    assert_eq!(capture.connections().unwrap()[0].name(), "seq:in");

    assert!(client.disconnect(&capture, &input).unwrap());
    assert!(input.connections().unwrap().is_empty());
}

/// A refused connect or disconnect is reported as `false`, not an error.
#[test]
fn test_failed_connect_returns_false() {
    init_tracing();
    let (_server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();

    assert!(!client.disconnect(&out, &input).unwrap());

    let stale = client
        .ports(&PortQuery::new().name("seq:in"))
        .unwrap()
        .remove(0);
    input.unregister().unwrap();
    assert!(!client.connect(&out, &stale).unwrap());
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[test]
fn test_log_stats_reports_and_resets() {
    init_tracing();
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0xF8], 0.0).unwrap();

    server.set_write_buffers_available(false);
    server.run_cycle(TEST_BLOCK_SIZE);
    let stats = client.stats();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.write_buffer_unavailable, 1);
    assert!(stats.has_failures());

    let logged = client.log_stats();
    assert_eq!(logged, stats);
    assert_eq!(client.stats().blocks, 0);

    // The event survived the skipped block
    server.set_write_buffers_available(true);
    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(server.emitted(out.id()).len(), 1);
    assert_eq!(client.stats().events_sent, 1);
}
