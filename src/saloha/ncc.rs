//! # Slotted Aloha — Gateway Side
//!
//! Accumulates the packets received over one Slotted-Aloha frame, resolves
//! slot collisions with successive interference cancellation, delivers the
//! surviving packets upward in deterministic order and acknowledges them.

use crate::encap::{NetBurst, NetPacket};
use crate::error::DvbError;
use crate::frame::{DvbFrame, SalohaAck, SalohaCtrl, SalohaFrame, SalohaPacketData};
use crate::saloha::SalohaConfig;
use crate::types::{QosId, TalId, TimeSf};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

/// Delivery bound of the per-terminal reorder buffer before a gap is
/// declared lost and skipped.
const REORDER_WINDOW: usize = 64;

/// Counters exported by the gateway scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlottedAlohaNccStats {
    pub received_packets: u64,
    pub collided_slots: u64,
    pub lost_packets: u64,
    pub delivered_packets: u64,
    pub acked_pdus: u64,
}

/// Per-terminal reception context: duplicate filtering and in-order
/// propagation per QoS.
#[derive(Debug, Default)]
struct TerminalSalohaContext {
    expected_seq: HashMap<QosId, u16>,
    reorder: BTreeMap<(QosId, u16), NetPacket>,
}

/// Per-category accumulation over the current Slotted-Aloha frame.
#[derive(Debug)]
struct CategoryState {
    nb_slots: u16,
    packets: Vec<SalohaPacketData>,
}

pub struct SlottedAlohaNcc {
    config: SalohaConfig,
    categories: BTreeMap<String, CategoryState>,
    terminals: BTreeMap<TalId, TerminalSalohaContext>,
    stats: SlottedAlohaNccStats,
}

impl SlottedAlohaNcc {
    pub fn new(config: SalohaConfig) -> Self {
        SlottedAlohaNcc {
            config,
            categories: BTreeMap::new(),
            terminals: BTreeMap::new(),
            stats: SlottedAlohaNccStats::default(),
        }
    }

    /// Declare a category with its carrier count; the slot space of one
    /// Slotted-Aloha frame is `slots_per_carrier * carriers`.
    pub fn add_category(&mut self, label: &str, carriers_number: u32) {
        let nb_slots = (u32::from(self.config.slots_per_carrier) * carriers_number)
            .min(u32::from(u16::MAX)) as u16;
        self.categories.insert(
            label.to_string(),
            CategoryState {
                nb_slots,
                packets: Vec::new(),
            },
        );
    }

    pub fn nb_slots(&self, label: &str) -> Option<u16> {
        self.categories.get(label).map(|c| c.nb_slots)
    }

    /// Register a terminal context at logon.
    pub fn add_terminal(&mut self, tal_id: TalId) {
        self.terminals.entry(tal_id).or_default();
    }

    pub fn stats(&self) -> SlottedAlohaNccStats {
        self.stats
    }

    /// Accumulate a received Slotted-Aloha data frame into its category.
    pub fn on_rcv_frame(&mut self, label: &str, frame: &SalohaFrame) -> Result<(), DvbError> {
        let category = self.categories.get_mut(label).ok_or_else(|| {
            DvbError::StateViolation(format!("Slotted Aloha frame for unknown category {label}"))
        })?;
        for packet in &frame.packets {
            if packet.replicas.is_empty() {
                return Err(DvbError::FrameMalformed(
                    "Slotted Aloha packet without replicas".into(),
                ));
            }
            if packet.replicas.iter().any(|s| *s >= category.nb_slots) {
                return Err(DvbError::FrameMalformed(format!(
                    "Slotted Aloha replica slot out of range (>= {})",
                    category.nb_slots
                )));
            }
            if !self.terminals.contains_key(&packet.tal_id) {
                warn!(
                    "Slotted Aloha packet from unregistered ST{}, registering it",
                    packet.tal_id
                );
                self.terminals.entry(packet.tal_id).or_default();
            }
            self.stats.received_packets += 1;
            category.packets.push(packet.clone());
        }
        Ok(())
    }

    /// Close the Slotted-Aloha frame at superframe `sfn`: resolve
    /// collisions per category, deliver the decoded packets upward and
    /// build the ACK frames.
    pub fn schedule(&mut self, sfn: TimeSf) -> Result<(NetBurst, Vec<DvbFrame>), DvbError> {
        if !self.config.is_sa_frame(sfn) {
            return Ok((NetBurst::new(), Vec::new()));
        }
        let mut burst = NetBurst::new();
        let mut control_frames = Vec::new();

        let labels: Vec<String> = self.categories.keys().cloned().collect();
        for label in labels {
            let packets = match self.categories.get_mut(&label) {
                Some(category) => std::mem::take(&mut category.packets),
                None => continue,
            };
            if packets.is_empty() {
                continue;
            }
            let accepted = self.remove_collisions(&label, packets);
            if accepted.is_empty() {
                continue;
            }

            let mut ctrl = SalohaCtrl::new();
            for packet in accepted {
                ctrl.acks.push(SalohaAck {
                    tal_id: packet.tal_id,
                    pdu_seq: packet.pdu_seq,
                });
                self.stats.acked_pdus += 1;
                self.propagate(packet, &mut burst);
            }
            control_frames.push(DvbFrame::SalohaCtrl(ctrl));
        }
        self.stats.delivered_packets += burst.len() as u64;
        Ok((burst, control_frames))
    }

    /// Collision resolution with successive interference cancellation: a
    /// slot with a single occupant decodes its packet, the packet's other
    /// replicas free their slots, and freed slots may decode in turn.
    /// Packets whose every replica stays collided are lost.
    fn remove_collisions(
        &mut self,
        label: &str,
        packets: Vec<SalohaPacketData>,
    ) -> Vec<SalohaPacketData> {
        // duplicate receptions of the same PDU collapse onto one entry
        let mut unique: Vec<SalohaPacketData> = Vec::new();
        for packet in packets {
            if !unique
                .iter()
                .any(|p| p.tal_id == packet.tal_id && p.pdu_seq == packet.pdu_seq)
            {
                unique.push(packet);
            }
        }

        // slot occupancy from the replica annotations
        let mut slots: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        for (index, packet) in unique.iter().enumerate() {
            for &slot in &packet.replicas {
                slots.entry(slot).or_default().push(index);
            }
        }
        let collided_before = slots.values().filter(|o| o.len() >= 2).count() as u64;
        self.stats.collided_slots += collided_before;

        let mut accepted = vec![false; unique.len()];
        let mut removed = vec![false; unique.len()];
        // single ascending pass repeated until the cancellation settles
        loop {
            let mut progress = false;
            for occupants in slots.values() {
                let alive: Vec<usize> = occupants
                    .iter()
                    .copied()
                    .filter(|i| !removed[*i])
                    .collect();
                if alive.len() == 1 && !accepted[alive[0]] {
                    accepted[alive[0]] = true;
                    removed[alive[0]] = true;
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }

        let lost = accepted.iter().filter(|a| !**a).count() as u64;
        if lost > 0 {
            debug!("category {label}: {lost} Slotted Aloha packets lost to collisions");
        }
        self.stats.lost_packets += lost;

        let mut decoded: Vec<SalohaPacketData> = unique
            .into_iter()
            .zip(accepted)
            .filter_map(|(packet, ok)| ok.then_some(packet))
            .collect();
        // deterministic delivery order: first replica slot, then terminal
        decoded.sort_by(|a, b| {
            a.first_replica()
                .cmp(&b.first_replica())
                .then(a.tal_id.cmp(&b.tal_id))
                .then(a.pdu_seq.cmp(&b.pdu_seq))
        });
        decoded
    }

    /// Per-terminal in-order propagation with duplicate filtering. A gap
    /// older than the reorder window is declared lost and skipped.
    fn propagate(&mut self, packet: SalohaPacketData, burst: &mut NetBurst) {
        let context = self.terminals.entry(packet.tal_id).or_default();
        let expected = context.expected_seq.entry(packet.qos).or_insert(0);
        let qos = packet.qos;
        let tal_id = packet.tal_id;

        if seq_before(packet.pdu_seq, *expected) {
            debug!(
                "ST{}: duplicate Slotted Aloha PDU {} (expected {})",
                tal_id, packet.pdu_seq, *expected
            );
            return;
        }
        if packet.pdu_seq != *expected {
            context.reorder.insert(
                (qos, packet.pdu_seq),
                NetPacket::new(packet.payload, qos, tal_id, 0),
            );
            // a gap that outgrew the window will not fill anymore
            if context.reorder.len() > REORDER_WINDOW {
                let oldest = context.reorder.keys().next().map(|&(_, seq)| seq);
                if let Some(seq) = oldest {
                    warn!("ST{tal_id}: skipping lost PDUs up to {seq}");
                    *context.expected_seq.entry(qos).or_insert(0) = seq;
                    Self::drain_reorder(context, qos, burst);
                }
            }
            return;
        }

        burst.push(NetPacket::new(packet.payload, qos, tal_id, 0));
        *expected = expected.wrapping_add(1);
        Self::drain_reorder(context, qos, burst);
    }

    fn drain_reorder(context: &mut TerminalSalohaContext, qos: QosId, burst: &mut NetBurst) {
        loop {
            let expected = *context.expected_seq.entry(qos).or_insert(0);
            match context.reorder.remove(&(qos, expected)) {
                Some(packet) => {
                    burst.push(packet);
                    context.expected_seq.insert(qos, expected.wrapping_add(1));
                }
                None => break,
            }
        }
    }
}

/// True when `seq` is before `expected` in wrapping sequence space.
fn seq_before(seq: u16, expected: u16) -> bool {
    seq != expected && expected.wrapping_sub(seq) < u16::MAX / 2
}
