//! # SCPC Scheduler
//!
//! Single Channel Per Carrier terminals bypass DAMA entirely: a dedicated
//! carrier drains their FIFOs at a constant rate, one tick per SCPC
//! carrier duration. Frames leave as BBFrames since the SCPC return link
//! is DVB-S2.

use crate::encap::{pack_burst_payload, NetPacket};
use crate::error::DvbError;
use crate::fifo::MacFifo;
use crate::fmt::FmtDefinitionTable;
use crate::frame::{BbFrame, DvbFrame};
use crate::types::{CarrierId, CrKind, FmtId, QosId, RateSymps};
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct ScpcScheduler {
    carrier_id: CarrierId,
    symbol_rate_symps: RateSymps,
    carrier_duration: Duration,
    fmt_table: Arc<FmtDefinitionTable>,
    modcod: FmtId,
    /// Fractional symbol budget carried between ticks.
    carry_sym: f64,
}

impl ScpcScheduler {
    pub fn new(
        carrier_id: CarrierId,
        symbol_rate_symps: RateSymps,
        carrier_duration: Duration,
        fmt_table: Arc<FmtDefinitionTable>,
        modcod: FmtId,
    ) -> Result<Self, DvbError> {
        if !fmt_table.contains(modcod) {
            return Err(DvbError::UnknownModcod(modcod));
        }
        Ok(ScpcScheduler {
            carrier_id,
            symbol_rate_symps,
            carrier_duration,
            fmt_table,
            modcod,
            carry_sym: 0.0,
        })
    }

    pub fn carrier_id(&self) -> CarrierId {
        self.carrier_id
    }

    pub fn carrier_duration(&self) -> Duration {
        self.carrier_duration
    }

    pub fn set_modcod(&mut self, modcod: FmtId) -> Result<(), DvbError> {
        if !self.fmt_table.contains(modcod) {
            return Err(DvbError::UnknownModcod(modcod));
        }
        self.modcod = modcod;
        Ok(())
    }

    /// One SCPC timer tick: drain the SCPC FIFOs into BBFrames within the
    /// fixed symbol budget of the carrier duration.
    pub fn schedule(
        &mut self,
        fifos: &mut BTreeMap<QosId, MacFifo<NetPacket>>,
    ) -> Result<Vec<DvbFrame>, DvbError> {
        let fmt = self.fmt_table.get(self.modcod)?;
        let budget = f64::from(self.symbol_rate_symps) * self.carrier_duration.as_secs_f64()
            + self.carry_sym;
        let mut budget_sym = budget.floor();
        self.carry_sym = budget - budget_sym;

        let mut packets: Vec<NetPacket> = Vec::new();
        for fifo in fifos.values_mut() {
            if fifo.cr_kind() != CrKind::Scpc {
                continue;
            }
            while let Some(element) = fifo.pop() {
                let cost_sym =
                    (element.payload.data.len() as f64 * 8.0 / fmt.bits_per_symbol()).ceil();
                if cost_sym > budget_sym {
                    fifo.push_front(element);
                    break;
                }
                budget_sym -= cost_sym;
                packets.push(element.payload);
            }
        }

        if packets.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "SCPC carrier {}: {} packets scheduled",
            self.carrier_id,
            packets.len()
        );
        let mut bbframe = BbFrame::new(self.modcod);
        bbframe.payload = pack_burst_payload(&packets);
        Ok(vec![DvbFrame::BbFrame(bbframe)])
    }
}
