//! # MAC FIFOs
//!
//! Bounded, priority-keyed queues between the upper layer and the return
//! schedulers, and delay queues on the satellite forwarding path. Elements
//! carry the tick they entered and the tick they become eligible to leave,
//! which the satellite uses to emulate propagation delay.

use crate::error::DvbError;
use crate::types::{CrKind, QosId, TimeMs};
use std::collections::VecDeque;

/// Payloads stored in a FIFO must expose their wire length for the stats.
pub trait FifoPayload {
    fn len_bytes(&self) -> usize;
}

impl FifoPayload for crate::frame::DvbFrame {
    fn len_bytes(&self) -> usize {
        self.len_bytes()
    }
}

impl FifoPayload for crate::encap::NetPacket {
    fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

/// One queued element.
#[derive(Debug, Clone)]
pub struct FifoElement<T> {
    pub payload: T,
    pub tick_in: TimeMs,
    pub tick_out: TimeMs,
}

/// Counters of a FIFO, reset on demand by the stats period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStats {
    pub in_length_bytes: u64,
    pub out_length_bytes: u64,
    pub current_length_bytes: u64,
    pub current_pkt_nbr: usize,
    pub drop_pkt_nbr: u64,
    pub drop_bytes: u64,
}

/// A bounded MAC FIFO.
#[derive(Debug)]
pub struct MacFifo<T> {
    name: String,
    priority: QosId,
    cr_kind: CrKind,
    max_size: usize,
    queue: VecDeque<FifoElement<T>>,
    stats: FifoStats,
}

impl<T: FifoPayload> MacFifo<T> {
    pub fn new(name: &str, priority: QosId, cr_kind: CrKind, max_size: usize) -> Self {
        MacFifo {
            name: name.to_string(),
            priority,
            cr_kind,
            max_size,
            queue: VecDeque::new(),
            stats: FifoStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> QosId {
        self.priority
    }

    pub fn cr_kind(&self) -> CrKind {
        self.cr_kind
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bytes currently queued.
    pub fn current_length_bytes(&self) -> u64 {
        self.stats.current_length_bytes
    }

    /// Push an element. A full FIFO refuses the element, counts the drop
    /// and returns `FifoFull`; the producer keeps ownership decisions.
    pub fn push(&mut self, payload: T, tick_in: TimeMs, tick_out: TimeMs) -> Result<(), DvbError> {
        let len = payload.len_bytes() as u64;
        if self.queue.len() >= self.max_size {
            self.stats.drop_pkt_nbr += 1;
            self.stats.drop_bytes += len;
            return Err(DvbError::FifoFull);
        }
        self.stats.in_length_bytes += len;
        self.stats.current_length_bytes += len;
        self.queue.push_back(FifoElement {
            payload,
            tick_in,
            tick_out,
        });
        self.stats.current_pkt_nbr = self.queue.len();
        Ok(())
    }

    /// Requeue an element at the head, bypassing the size bound. Used when
    /// a scheduler took an element it could not fit in the current frame.
    pub fn push_front(&mut self, element: FifoElement<T>) {
        let len = element.payload.len_bytes() as u64;
        self.stats.current_length_bytes += len;
        self.queue.push_front(element);
        self.stats.current_pkt_nbr = self.queue.len();
    }

    /// Pop the head element unconditionally.
    pub fn pop(&mut self) -> Option<FifoElement<T>> {
        let element = self.queue.pop_front()?;
        let len = element.payload.len_bytes() as u64;
        self.stats.out_length_bytes += len;
        self.stats.current_length_bytes -= len;
        self.stats.current_pkt_nbr = self.queue.len();
        Some(element)
    }

    /// Pop the head element only when its tick-out has elapsed. Ordering is
    /// strictly FIFO: a later element never overtakes a blocked head.
    pub fn pop_ready(&mut self, now: TimeMs) -> Option<FifoElement<T>> {
        if self.queue.front()?.tick_out <= now {
            self.pop()
        } else {
            None
        }
    }

    /// The tick-out of the head element, if any.
    pub fn head_tick_out(&self) -> Option<TimeMs> {
        self.queue.front().map(|e| e.tick_out)
    }

    pub fn stats(&self) -> FifoStats {
        self.stats
    }

    /// Return the stats and reset the period counters, keeping the gauges.
    pub fn stats_and_reset(&mut self) -> FifoStats {
        let snapshot = self.stats;
        self.stats.in_length_bytes = 0;
        self.stats.out_length_bytes = 0;
        self.stats.drop_pkt_nbr = 0;
        self.stats.drop_bytes = 0;
        snapshot
    }
}
