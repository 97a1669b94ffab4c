//! # Slotted Aloha — Terminal Side
//!
//! Draws random slots for outgoing packets and their replicas, keeps the
//! packets waiting for acknowledgement, and retransmits after a backoff
//! window up to the configured retransmission budget.

use crate::encap::NetPacket;
use crate::error::DvbError;
use crate::fifo::MacFifo;
use crate::frame::{DvbFrame, SalohaCtrl, SalohaFrame, SalohaPacketData};
use crate::saloha::{Backoff, SalohaConfig};
use crate::types::{CrKind, QosId, TalId, TimeSf};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, VecDeque};

/// Counters exported by the terminal scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlottedAlohaTalStats {
    pub sent_packets: u64,
    pub retransmissions: u64,
    pub acked_packets: u64,
    pub dropped_packets: u64,
    pub waiting_ack: usize,
}

#[derive(Debug, Clone)]
struct PendingPacket {
    packet: SalohaPacketData,
    sent_saf: u64,
    retransmissions: u16,
}

pub struct SlottedAlohaTal {
    tal_id: TalId,
    config: SalohaConfig,
    /// Total slots of the category over one Slotted-Aloha frame.
    nb_slots: u16,
    /// Next PDU sequence number.
    base_seq: u16,
    /// Packets sent and waiting for their ACK, per QoS.
    wait_ack: BTreeMap<QosId, Vec<PendingPacket>>,
    /// Timed-out packets with their attempt count so far.
    retransmission_packets: VecDeque<(SalohaPacketData, u16)>,
    backoff: Backoff,
    /// Count of Slotted-Aloha frames seen so far.
    saf_counter: u64,
    rng: StdRng,
    stats: SlottedAlohaTalStats,
}

impl SlottedAlohaTal {
    pub fn new(tal_id: TalId, config: SalohaConfig, nb_slots: u16) -> Self {
        Self::with_seed(tal_id, config, nb_slots, rand::random())
    }

    /// Deterministic constructor for tests.
    pub fn with_seed(tal_id: TalId, config: SalohaConfig, nb_slots: u16, seed: u64) -> Self {
        let backoff = Backoff::new(config.backoff_cw_max, config.backoff_multiple);
        SlottedAlohaTal {
            tal_id,
            config,
            nb_slots,
            base_seq: 0,
            wait_ack: BTreeMap::new(),
            retransmission_packets: VecDeque::new(),
            backoff,
            saf_counter: 0,
            rng: StdRng::seed_from_u64(seed),
            stats: SlottedAlohaTalStats::default(),
        }
    }

    pub fn stats(&self) -> SlottedAlohaTalStats {
        let mut stats = self.stats;
        stats.waiting_ack = self.wait_ack.values().map(Vec::len).sum();
        stats
    }

    /// Schedule one Slotted-Aloha frame. Returns nothing when `sfn` does
    /// not open a Slotted-Aloha frame.
    pub fn schedule(
        &mut self,
        fifos: &mut BTreeMap<QosId, MacFifo<NetPacket>>,
        sfn: TimeSf,
    ) -> Result<Vec<DvbFrame>, DvbError> {
        if !self.config.is_sa_frame(sfn) {
            return Ok(Vec::new());
        }
        self.saf_counter += 1;
        self.check_timeouts();
        self.backoff.tick();

        let mut frame = SalohaFrame::new();
        let mut used_slots: Vec<u16> = Vec::new();

        // retransmissions first, gated by the backoff window
        if self.backoff.is_ready() {
            while frame.packets.len() < usize::from(self.config.nb_max_packets) {
                let (mut packet, attempts) = match self.retransmission_packets.pop_front() {
                    Some(entry) => entry,
                    None => break,
                };
                let replicas = match self.draw_slots(&mut used_slots) {
                    Some(replicas) => replicas,
                    None => {
                        self.retransmission_packets.push_front((packet, attempts));
                        break;
                    }
                };
                packet.replicas = replicas;
                self.stats.retransmissions += 1;
                self.push_wait_ack(packet.clone(), attempts);
                frame.packets.push(packet);
            }
        }

        // then fresh traffic from the Slotted-Aloha FIFOs
        'fifos: for fifo in fifos.values_mut() {
            if fifo.cr_kind() != CrKind::Saloha {
                continue;
            }
            while frame.packets.len() < usize::from(self.config.nb_max_packets) {
                let element = match fifo.pop() {
                    Some(element) => element,
                    None => break,
                };
                let replicas = match self.draw_slots(&mut used_slots) {
                    Some(replicas) => replicas,
                    None => {
                        fifo.push_front(element);
                        break 'fifos;
                    }
                };
                let packet = self.add_saloha_header(element.payload, replicas);
                self.push_wait_ack(packet.clone(), 0);
                frame.packets.push(packet);
            }
        }

        if frame.packets.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.sent_packets += frame.packets.len() as u64;
        debug!(
            "ST{}: Slotted Aloha frame with {} packets on {} slots",
            self.tal_id,
            frame.packets.len(),
            self.nb_slots
        );
        Ok(vec![DvbFrame::SalohaData(frame)])
    }

    /// Process an ACK frame: acknowledged packets leave the wait queue.
    pub fn on_rcv_ack(&mut self, ctrl: &SalohaCtrl) {
        for ack in &ctrl.acks {
            if ack.tal_id != self.tal_id {
                continue;
            }
            for pending in self.wait_ack.values_mut() {
                let before = pending.len();
                pending.retain(|p| p.packet.pdu_seq != ack.pdu_seq);
                if pending.len() < before {
                    self.stats.acked_packets += 1;
                    self.backoff.on_success();
                }
            }
        }
    }

    /// Wrap an encapsulated packet into a Slotted-Aloha data packet.
    fn add_saloha_header(&mut self, packet: NetPacket, replicas: Vec<u16>) -> SalohaPacketData {
        let pdu_seq = self.base_seq;
        self.base_seq = self.base_seq.wrapping_add(1);
        SalohaPacketData {
            tal_id: self.tal_id,
            qos: packet.qos,
            pdu_seq,
            pdu_count: 1,
            replicas,
            payload: packet.data,
        }
    }

    /// Draw `nb_replicas` distinct unused slot indices, or None when the
    /// remaining slot space cannot host a full replica set.
    fn draw_slots(&mut self, used_slots: &mut Vec<u16>) -> Option<Vec<u16>> {
        let nb_replicas = usize::from(self.config.nb_replicas.max(1));
        let free: Vec<u16> =
            (0..self.nb_slots).filter(|s| !used_slots.contains(s)).collect();
        if free.len() < nb_replicas {
            return None;
        }
        let mut replicas: Vec<u16> = free
            .choose_multiple(&mut self.rng, nb_replicas)
            .copied()
            .collect();
        replicas.sort_unstable();
        used_slots.extend_from_slice(&replicas);
        Some(replicas)
    }

    fn push_wait_ack(&mut self, packet: SalohaPacketData, retransmissions: u16) {
        self.wait_ack
            .entry(packet.qos)
            .or_default()
            .push(PendingPacket {
                packet,
                sent_saf: self.saf_counter,
                retransmissions,
            });
    }

    /// Move timed-out packets to the retransmission queue, dropping the
    /// ones that exhausted their budget, and widen the backoff window.
    fn check_timeouts(&mut self) {
        let timeout = u64::from(self.config.timeout_saf.max(1));
        let saf_counter = self.saf_counter;
        let max_retransmissions = self.config.nb_max_retransmissions;
        let mut lost = 0u64;
        let mut to_retransmit: Vec<(SalohaPacketData, u16)> = Vec::new();

        for pending in self.wait_ack.values_mut() {
            let mut kept = Vec::with_capacity(pending.len());
            for mut entry in pending.drain(..) {
                if saf_counter.saturating_sub(entry.sent_saf) < timeout {
                    kept.push(entry);
                    continue;
                }
                entry.retransmissions += 1;
                if entry.retransmissions > max_retransmissions {
                    lost += 1;
                    warn!(
                        "ST{}: dropping PDU {} after {} retransmissions",
                        entry.packet.tal_id, entry.packet.pdu_seq, max_retransmissions
                    );
                } else {
                    to_retransmit.push((entry.packet, entry.retransmissions));
                }
            }
            *pending = kept;
        }

        if !to_retransmit.is_empty() || lost > 0 {
            self.backoff.on_collision(&mut self.rng);
        }
        self.stats.dropped_packets += lost;
        self.retransmission_packets.extend(to_retransmit);
    }
}
