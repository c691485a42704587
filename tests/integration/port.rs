//! Port integration tests
//!
//! Send/receive timing through full process cycles, direction and ownership
//! rules, clearing, and degraded server buffers.

use crate::helpers::*;
use approx::assert_relative_eq;
use midirelay::core::Error as CoreError;
use midirelay::prelude::*;
use midirelay::ProcessStatus;
use proptest::prelude::*;

/// Seconds that convert back to exactly `frames` despite truncation.
fn at_frame(frames: u32) -> f64 {
    (frames as f64 + 0.5) / TEST_SAMPLE_RATE as f64
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Note on at time 0 lands at offset 0 of the next block.
#[test]
fn test_send_at_block_start() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0x90, 0x40, 0x7F], 0.0).unwrap();

    assert_eq!(
        server.run_cycle(TEST_BLOCK_SIZE),
        Some(ProcessStatus::Continue)
    );
    assert_eq!(
        emitted_in_cycle(&server, out.id(), 0),
        vec![(0, vec![0x90, 0x40, 0x7F])]
    );
    assert_eq!(client.stats().events_sent, 1);

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(server.emitted(out.id()).len(), 1);
}

#[test]
fn test_send_orders_by_time() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[3], at_frame(300)).unwrap();
    out.send(&[1], at_frame(10)).unwrap();
    out.send(&[2], at_frame(200)).unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(
        emitted_in_cycle(&server, out.id(), 0),
        vec![(10, vec![1]), (200, vec![2]), (300, vec![3])]
    );
}

/// Two events at the same time never share an offset.
#[test]
fn test_send_collision_bump() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0x90, 60, 100], at_frame(48)).unwrap();
    out.send(&[0x90, 64, 100], at_frame(48)).unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(
        emitted_in_cycle(&server, out.id(), 0),
        vec![(48, vec![0x90, 60, 100]), (49, vec![0x90, 64, 100])]
    );
}

/// An event two blocks and `k` frames out goes out in the third block at `k`.
#[test]
fn test_send_rebases_across_blocks() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let time = at_frame(2 * TEST_BLOCK_SIZE + 100);
    out.send(&[0xFC], time).unwrap();

    server.run_cycles(2, TEST_BLOCK_SIZE);
    assert!(server.emitted(out.id()).is_empty());

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(
        emitted_in_cycle(&server, out.id(), 2),
        vec![(100, vec![0xFC])]
    );
}

/// Server buffers are reused; events from one block never show up again.
#[test]
fn test_output_buffer_cleared_every_block() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0xF8], 0.0).unwrap();

    server.run_cycles(3, TEST_BLOCK_SIZE);
    let emitted = server.emitted(out.id());
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].cycle, 0);
}

/// A full server buffer drops the event and counts it.
#[test]
fn test_full_write_buffer_drops_event() {
    let (server, client) = test_client("seq");
    server.set_buffer_bytes(4);
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    out.send(&[0x90, 60, 100], 0.0).unwrap();
    out.send(&[0x80, 60, 0], 0.0).unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(
        emitted_in_cycle(&server, out.id(), 0),
        vec![(0, vec![0x90, 60, 100])]
    );
    let stats = client.stats();
    assert_eq!(stats.events_sent, 1);
    assert_eq!(stats.reserve_failures, 1);

    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(server.emitted(out.id()).len(), 1);
}

#[test]
fn test_ports_do_not_share_send_queues() {
    let (server, client) = test_client("seq");
    let a = client.port("a", PortFlags::IS_OUTPUT).unwrap();
    let b = client.port("b", PortFlags::IS_OUTPUT).unwrap();
    a.send(&[1], at_frame(5)).unwrap();
    b.send(&[2], at_frame(5)).unwrap();
    a.clear_send().unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert!(server.emitted(a.id()).is_empty());
    assert_eq!(emitted_in_cycle(&server, b.id(), 0), vec![(5, vec![2])]);
}

#[test]
fn test_unregister_discards_queued_events() {
    let (server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let id = out.id();
    out.send(&[0xF8], 0.0).unwrap();
    out.unregister().unwrap();

    server.run_cycle(TEST_BLOCK_SIZE);
    assert!(server.emitted(id).is_empty());
    assert_eq!(client.stats().events_sent, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Distinct in-block times come out sorted at exactly the requested offsets.
    #[test]
    fn prop_distinct_times_emitted_sorted(
        frames in proptest::collection::btree_set(0u32..TEST_BLOCK_SIZE, 1..32)
    ) {
        let (server, client) = test_client("seq");
        let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
        // Enqueue in reverse so ordering comes from the queue
        for (index, frame) in frames.iter().rev().enumerate() {
            out.send(&[index as u8], at_frame(*frame)).unwrap();
        }
        server.run_cycle(TEST_BLOCK_SIZE);

        let offsets: Vec<u32> = server
            .emitted(out.id())
            .into_iter()
            .map(|event| event.frame_offset)
            .collect();
        let expected: Vec<u32> = frames.into_iter().collect();
        prop_assert_eq!(offsets, expected);
    }
}

// ---------------------------------------------------------------------------
// Receiving
// ---------------------------------------------------------------------------

/// An event at offset 100 while the transport sits at 48000 reads back at
/// (48000 + 100) / 48000 seconds.
#[test]
fn test_receive_stamps_transport_time() {
    let (server, client) = test_client("seq");
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();
    client.transport().set_time(1.0).unwrap();
    client.activate().unwrap();

    server.inject(input.id(), 100, &[0x90, 60, 100]);
    server.run_cycle(TEST_BLOCK_SIZE);

    let event = input.receive().unwrap().expect("event should be queued");
    assert_eq!(event.payload.as_slice(), &[0x90, 60, 100]);
    assert_relative_eq!(event.time_seconds, 48100.0 / 48000.0, epsilon = 1e-9);
    assert!(input.receive().unwrap().is_none());
}

#[test]
fn test_receive_fifo_across_blocks() {
    let (server, client) = test_client("seq");
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();
    client.activate().unwrap();
    client.transport().start().unwrap();

    server.inject(input.id(), 10, &[1]);
    server.inject(input.id(), 20, &[2]);
    server.run_cycle(TEST_BLOCK_SIZE);
    server.inject(input.id(), 5, &[3]);
    server.run_cycle(TEST_BLOCK_SIZE);

    let received: Vec<(u8, f64)> = std::iter::from_fn(|| input.receive().unwrap())
        .map(|event| (event.payload[0], event.time_seconds))
        .collect();
    assert_eq!(received.len(), 3);
    let expected_frames = [10.0, 20.0, TEST_BLOCK_SIZE as f64 + 5.0];
    for (index, (byte, time)) in received.iter().enumerate() {
        assert_eq!(*byte as usize, index + 1);
        assert_relative_eq!(
            *time,
            expected_frames[index] / TEST_SAMPLE_RATE as f64,
            epsilon = FRAME_EPSILON / 10.0
        );
    }
}

#[test]
fn test_receive_on_two_ports_is_independent() {
    let (server, client) = test_client("seq");
    let a = client.port("a", PortFlags::IS_INPUT).unwrap();
    let b = client.port("b", PortFlags::IS_INPUT).unwrap();
    client.activate().unwrap();

    server.inject(a.id(), 0, &[1]);
    server.inject(b.id(), 1, &[2]);
    server.inject(a.id(), 2, &[3]);
    server.run_cycle(TEST_BLOCK_SIZE);

    assert_eq!(b.receive().unwrap().unwrap().payload.as_slice(), &[2]);
    assert!(b.receive().unwrap().is_none());
    assert_eq!(a.receive().unwrap().unwrap().payload.as_slice(), &[1]);
    assert_eq!(a.receive().unwrap().unwrap().payload.as_slice(), &[3]);
}

#[test]
fn test_clear_receive_is_idempotent() {
    let (server, client) = test_client("seq");
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();
    input.clear_receive().unwrap();
    client.activate().unwrap();

    server.inject(input.id(), 0, &[1]);
    server.run_cycle(TEST_BLOCK_SIZE);
    input.clear_receive().unwrap();
    input.clear_receive().unwrap();
    assert!(input.receive().unwrap().is_none());

    server.inject(input.id(), 0, &[2]);
    server.run_cycle(TEST_BLOCK_SIZE);
    assert_eq!(input.receive().unwrap().unwrap().payload.as_slice(), &[2]);
}

#[test]
fn test_missing_read_buffer_is_counted() {
    let (server, client) = test_client("seq");
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();
    client.activate().unwrap();
    server.set_read_buffers_available(false);

    server.inject(input.id(), 0, &[1]);
    server.run_cycle(TEST_BLOCK_SIZE);
    assert!(input.receive().unwrap().is_none());
    assert_eq!(client.stats().read_buffer_unavailable, 1);
}

// ---------------------------------------------------------------------------
// Direction and ownership
// ---------------------------------------------------------------------------

#[test]
fn test_direction_rules() {
    let (_server, client) = test_client("seq");
    let out = client.port("out", PortFlags::IS_OUTPUT).unwrap();
    let input = client.port("in", PortFlags::IS_INPUT).unwrap();

    assert_eq!(
        input.send(&[0xF8], 0.0).unwrap_err(),
        Error::Core(CoreError::InvalidDirection {
            expected: Direction::Output
        })
    );
    assert_eq!(
        out.receive().unwrap_err(),
        Error::Core(CoreError::InvalidDirection {
            expected: Direction::Input
        })
    );
    assert!(input.clear_send().is_err());
    assert!(out.clear_receive().is_err());
}

/// Ports owned by other clients can be connected but not used for MIDI.
#[test]
fn test_foreign_port_cannot_send_or_receive() {
    let (server, client) = test_client("seq");
    server.add_external_port("system:midi_playback_1", PortFlags::IS_INPUT);
    server.add_external_port("system:midi_capture_1", PortFlags::IS_OUTPUT);
    let playback = client
        .port("system:midi_playback_1", PortFlags::IS_OUTPUT)
        .unwrap();
    let capture = client
        .port("system:midi_capture_1", PortFlags::IS_INPUT)
        .unwrap();

    // Lookup wins over the requested flags
    assert_eq!(playback.flags(), PortFlags::IS_INPUT);
    assert!(!playback.is_mine());
    assert!(playback.channel().is_none());

    let not_mine = |name: &str| Error::NotMine {
        port: name.to_string(),
    };
    assert_eq!(
        playback.receive().unwrap_err(),
        not_mine("system:midi_playback_1")
    );
    assert_eq!(
        capture.send(&[0xF8], 0.0).unwrap_err(),
        not_mine("system:midi_capture_1")
    );
    assert_eq!(
        capture.unregister().unwrap_err(),
        not_mine("system:midi_capture_1")
    );
}
