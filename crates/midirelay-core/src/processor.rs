//! Real-time entry point, invoked by the server once per block.

use crate::config::LockPolicy;
use crate::receive_queue::ReceiveQueue;
use crate::registry::{ChannelRegistry, Direction};
use crate::scope::{ProcessHandler, ProcessScope, ProcessStatus};
use crate::send_queue::SendQueue;
use crate::stats::ProcessStats;
use std::sync::Arc;

/// Drains the send queue into output buffers and fills the receive queue from
/// input buffers, for every registered channel.
///
/// RT-safe apart from the queue mutexes (see `LockPolicy`). Never logs:
/// per-channel failures are counted in `ProcessStats` and the block still
/// succeeds.
pub struct BlockProcessor {
    registry: Arc<ChannelRegistry>,
    send: Arc<SendQueue>,
    receive: Arc<ReceiveQueue>,
    stats: Arc<ProcessStats>,
    policy: LockPolicy,
}

impl BlockProcessor {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        send: Arc<SendQueue>,
        receive: Arc<ReceiveQueue>,
        stats: Arc<ProcessStats>,
        policy: LockPolicy,
    ) -> Self {
        Self {
            registry,
            send,
            receive,
            stats,
            policy,
        }
    }

    pub fn process(&self, scope: &mut dyn ProcessScope, block_size: u32) -> ProcessStatus {
        if block_size == 0 {
            return ProcessStatus::Continue;
        }
        self.stats.add_blocks(1);

        let policy = self.policy;
        let outputs = self.registry.snapshot(Direction::Output);
        for entry in outputs.iter() {
            let Some(buffer) = scope.write_buffer(entry.port, block_size) else {
                self.stats.add_write_unavailable(1);
                continue;
            };
            buffer.clear();
            let outcome = self.send.drain(entry.id, block_size, buffer, policy);
            self.stats.add_sent(outcome.emitted as u64);
            let reserve_failures = outcome.reserve_failures as u64;
            self.stats.add_reserve_failures(reserve_failures);
            if outcome.contended {
                self.stats.add_lock_contended(1);
            }
        }

        let inputs = self.registry.snapshot(Direction::Input);
        if inputs.is_empty() {
            return ProcessStatus::Continue;
        }
        let block_start = scope.transport_frame();
        for entry in inputs.iter() {
            let Some(buffer) = scope.read_buffer(entry.port, block_size) else {
                self.stats.add_read_unavailable(1);
                continue;
            };
            let outcome = self.receive.fill(entry.id, buffer, block_start, policy);
            self.stats.add_received(outcome.received as u64);
            self.stats.add_read_failures(outcome.read_failures as u64);
            self.stats.add_receive_dropped(outcome.dropped as u64);
            if outcome.contended {
                self.stats.add_lock_contended(1);
            }
        }

        ProcessStatus::Continue
    }
}

impl ProcessHandler for BlockProcessor {
    fn process(&self, scope: &mut dyn ProcessScope, block_size: u32) -> ProcessStatus {
        BlockProcessor::process(self, scope, block_size)
    }
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProcessor")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .finish()
    }
}
