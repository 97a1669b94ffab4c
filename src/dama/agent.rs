//! # DAMA Agent (terminal side)
//!
//! Owns the logon state machine, builds the SAC capacity requests from the
//! MAC FIFO activity, applies the TTP received from the NCC and schedules
//! the return-link bursts frame by frame.

use crate::encap::{pack_burst_payload, NetPacket};
use crate::error::DvbError;
use crate::fifo::{FifoPayload, MacFifo};
use crate::fmt::FmtDefinitionTable;
use crate::frame::{DvbBurst, DvbFrame, LogonRequest, LogonResponse, Sac, Ttp};
use crate::types::{CarrierId, CrKind, FmtId, GroupId, RateKbps, TalId, TimeSf, VolKb};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The logon state machine of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalState {
    Init,
    WaitLogonResp,
    Running,
}

/// Event emitted towards the upper block once the session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkUp {
    pub group_id: GroupId,
    pub tal_id: TalId,
}

/// Outcome of a received SOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SofOutcome {
    /// Normal tick: schedule the frame.
    Normal,
    /// The superframe count regressed: the NCC rebooted, log on again.
    NccReboot,
}

/// Static configuration of the agent.
#[derive(Debug, Clone)]
pub struct DamaAgentConfig {
    pub mac_id: TalId,
    pub cra_kbps: RateKbps,
    pub max_rbdc_kbps: RateKbps,
    pub max_vbdc_kb: VolKb,
    pub sync_period_frame: TimeSf,
    pub frame_duration: Duration,
    pub is_scpc: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Allocation {
    rbdc_kbps: RateKbps,
    vbdc_kb: VolKb,
    fca_kbps: RateKbps,
}

pub struct DamaAgent {
    config: DamaAgentConfig,
    state: TalState,
    tal_id: TalId,
    group_id: GroupId,
    obr_slot_frame: TimeSf,
    fmt_table: Arc<FmtDefinitionTable>,
    current_fmt: FmtId,
    carrier_id: CarrierId,
    super_frame_counter: TimeSf,
    first_sof_seen: bool,
    /// TTP allocations are applied one superframe after reception.
    pending_alloc: Option<Allocation>,
    current_alloc: Allocation,
    /// Granted VBDC volume not yet consumed by the scheduler.
    vbdc_remaining_kb: VolKb,
    /// Fractional symbol remainder of the rate budget, kept across frames.
    rate_credit_sym: f64,
    /// Cumulative input bytes per RBDC FIFO at the last SAC.
    rbdc_in_snapshot: HashMap<String, u64>,
    /// Cumulative input bytes per VBDC FIFO at the last SAC.
    vbdc_in_snapshot: HashMap<String, u64>,
}

impl DamaAgent {
    pub fn new(config: DamaAgentConfig, fmt_table: Arc<FmtDefinitionTable>) -> Result<Self, DvbError> {
        let current_fmt = fmt_table.min_id()?;
        let obr_slot_frame = if config.sync_period_frame > 0 {
            config.mac_id % config.sync_period_frame
        } else {
            0
        };
        Ok(DamaAgent {
            tal_id: config.mac_id,
            obr_slot_frame,
            config,
            state: TalState::Init,
            group_id: 0,
            fmt_table,
            current_fmt,
            carrier_id: 0,
            super_frame_counter: 0,
            first_sof_seen: false,
            pending_alloc: None,
            current_alloc: Allocation::default(),
            vbdc_remaining_kb: 0,
            rate_credit_sym: 0.0,
            rbdc_in_snapshot: HashMap::new(),
            vbdc_in_snapshot: HashMap::new(),
        })
    }

    pub fn state(&self) -> TalState {
        self.state
    }

    pub fn tal_id(&self) -> TalId {
        self.tal_id
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn current_fmt(&self) -> FmtId {
        self.current_fmt
    }

    pub fn set_current_fmt(&mut self, fmt_id: FmtId) {
        self.current_fmt = fmt_id;
    }

    pub fn carrier_id(&self) -> CarrierId {
        self.carrier_id
    }

    pub fn super_frame_counter(&self) -> TimeSf {
        self.super_frame_counter
    }

    /// Start the session: emit the first logon request.
    pub fn start(&mut self) -> LogonRequest {
        self.state = TalState::WaitLogonResp;
        info!(
            "send a logon request with MAC ID {} to NCC",
            self.config.mac_id
        );
        self.build_logon_request()
    }

    fn build_logon_request(&self) -> LogonRequest {
        LogonRequest::new(
            self.config.mac_id,
            self.config.cra_kbps.min(u32::from(u16::MAX)) as u16,
            self.config.max_rbdc_kbps.min(u32::from(u16::MAX)) as u16,
            self.config.max_vbdc_kb.min(u32::from(u16::MAX)) as u16,
            self.config.is_scpc,
        )
    }

    /// Logon timer expiry: resend the request while waiting for the NCC.
    /// The timer is not rearmed once the session is running.
    pub fn on_logon_timer(&mut self) -> Option<LogonRequest> {
        if self.state == TalState::WaitLogonResp {
            warn!(
                "no answer to the logon request we sent for MAC ID {}, send a new logon request",
                self.config.mac_id
            );
            Some(self.build_logon_request())
        } else {
            None
        }
    }

    /// Logon response reception: transition to running and report LINK_UP.
    pub fn on_logon_resp(&mut self, response: &LogonResponse) -> LinkUp {
        self.group_id = response.group_id;
        self.tal_id = response.logon_id;
        self.state = TalState::Running;
        info!("login complete with MAC {}", self.config.mac_id);
        LinkUp {
            group_id: self.group_id,
            tal_id: self.tal_id,
        }
    }

    /// SOF reception: slave the local superframe count to the NCC, detect a
    /// NCC reboot (regression that is not a wrap), and rotate the pending
    /// TTP allocation into use for the starting superframe.
    pub fn here_is_sof(&mut self, sfn: TimeSf) -> SofOutcome {
        if self.first_sof_seen
            && sfn < self.super_frame_counter
            && (sfn != 0 || self.super_frame_counter != TimeSf::MAX)
        {
            warn!(
                "SF#{}: it seems NCC rebooted => flush buffer & resend a logon request",
                self.super_frame_counter
            );
            self.super_frame_counter = sfn;
            self.state = TalState::WaitLogonResp;
            self.pending_alloc = None;
            self.current_alloc = Allocation::default();
            self.vbdc_remaining_kb = 0;
            return SofOutcome::NccReboot;
        }
        self.first_sof_seen = true;
        self.super_frame_counter = sfn;

        if let Some(allocation) = self.pending_alloc.take() {
            self.vbdc_remaining_kb = self.vbdc_remaining_kb.saturating_add(allocation.vbdc_kb);
            self.current_alloc = allocation;
        }
        SofOutcome::Normal
    }

    /// TTP reception: record the allocation addressed to this terminal for
    /// the next superframe.
    pub fn here_is_ttp(&mut self, ttp: &Ttp) -> Result<(), DvbError> {
        if self.state != TalState::Running {
            return Err(DvbError::StateViolation(
                "TTP received before logon completion".into(),
            ));
        }
        let assignment = match ttp.assignment_for(self.tal_id) {
            Some(assignment) => assignment,
            None => {
                debug!(
                    "SF#{}: TTP without assignment for ST{}",
                    ttp.sfn, self.tal_id
                );
                return Ok(());
            }
        };
        let rate = assignment.total_rate();
        let rbdc = rate.saturating_sub(self.config.cra_kbps);
        self.pending_alloc = Some(Allocation {
            rbdc_kbps: rbdc,
            vbdc_kb: assignment.total_volume(),
            fca_kbps: 0,
        });
        debug!(
            "SF#{}: ST{} assignment rate {} kb/s, volume {} kb",
            ttp.sfn,
            self.tal_id,
            assignment.rate_kbps,
            assignment.volume_kb
        );
        Ok(())
    }

    /// True when this frame is the terminal's OBR slot for SAC emission.
    pub fn is_sac_slot(&self) -> bool {
        self.config.sync_period_frame > 0
            && self.super_frame_counter % self.config.sync_period_frame == self.obr_slot_frame
    }

    /// Build the SAC from the FIFO activity since the previous one. RBDC
    /// follows the recent ingress rate of RBDC-tagged FIFOs, VBDC requests
    /// the newly arrived backlog of VBDC-tagged FIFOs.
    pub fn build_sac(
        &mut self,
        fifos: &BTreeMap<crate::types::QosId, MacFifo<NetPacket>>,
        cn_db: f64,
    ) -> Option<Sac> {
        if self.state != TalState::Running {
            return None;
        }
        let mut sac = Sac::new(self.tal_id, self.group_id);
        sac.cn_db = cn_db;

        let elapsed = self.config.frame_duration.as_secs_f64()
            * f64::from(self.config.sync_period_frame.max(1));
        let mut rbdc_delta_bytes = 0u64;
        let mut vbdc_delta_bytes = 0u64;
        for fifo in fifos.values() {
            let in_bytes = fifo.stats().in_length_bytes;
            match fifo.cr_kind() {
                CrKind::DamaRbdc => {
                    let last = self
                        .rbdc_in_snapshot
                        .insert(fifo.name().to_string(), in_bytes)
                        .unwrap_or(0);
                    rbdc_delta_bytes += in_bytes.saturating_sub(last);
                }
                CrKind::DamaVbdc => {
                    let last = self
                        .vbdc_in_snapshot
                        .insert(fifo.name().to_string(), in_bytes)
                        .unwrap_or(0);
                    vbdc_delta_bytes += in_bytes.saturating_sub(last);
                }
                _ => {}
            }
        }

        let rbdc_kbps = (rbdc_delta_bytes as f64 * 8.0 / 1000.0 / elapsed).ceil() as u32;
        sac.rbdc_kbps = rbdc_kbps.min(self.config.max_rbdc_kbps).min(u32::from(u16::MAX)) as u16;
        let vbdc_kb = (vbdc_delta_bytes as f64 * 8.0 / 1000.0).ceil() as u32;
        sac.vbdc_kb = vbdc_kb.min(self.config.max_vbdc_kb).min(u32::from(u16::MAX)) as u16;

        debug!(
            "SF#{}: SAC rbdc {} kb/s, vbdc {} kb",
            self.super_frame_counter, sac.rbdc_kbps, sac.vbdc_kb
        );
        Some(sac)
    }

    /// Schedule the return frame: compute the symbol budget from the current
    /// allocation and drain the FIFOs by priority into one DVB-RCS2 burst.
    /// Unused rate budget is forfeited apart from its fractional symbol.
    pub fn return_schedule(
        &mut self,
        fifos: &mut BTreeMap<crate::types::QosId, MacFifo<NetPacket>>,
    ) -> Result<Vec<DvbFrame>, DvbError> {
        if self.state != TalState::Running {
            return Ok(Vec::new());
        }
        let fmt = self.fmt_table.get(self.current_fmt)?;
        let total_rate = self.config.cra_kbps
            + self.current_alloc.rbdc_kbps
            + self.current_alloc.fca_kbps;
        let rate_budget = fmt.rate_to_volume_sym(total_rate, self.config.frame_duration)
            + self.rate_credit_sym;
        let rate_budget_sym = rate_budget.floor();
        self.rate_credit_sym = rate_budget - rate_budget_sym;

        let vbdc_budget_sym =
            (f64::from(self.vbdc_remaining_kb) * 1000.0 / fmt.bits_per_symbol()).floor();
        let mut budget_sym = rate_budget_sym + vbdc_budget_sym;
        let mut used_sym = 0.0;

        let mut packets: Vec<NetPacket> = Vec::new();
        for fifo in fifos.values_mut() {
            if matches!(fifo.cr_kind(), CrKind::Saloha | CrKind::Scpc) {
                continue;
            }
            while let Some(element) = fifo.pop() {
                let cost_sym =
                    (element.payload.len_bytes() as f64 * 8.0 / fmt.bits_per_symbol()).ceil();
                if cost_sym > budget_sym {
                    fifo.push_front(element);
                    break;
                }
                budget_sym -= cost_sym;
                used_sym += cost_sym;
                packets.push(element.payload);
            }
        }

        // volume consumed beyond the rate budget is drawn from VBDC
        let beyond_rate_sym = (used_sym - rate_budget_sym).max(0.0);
        let vbdc_used_kb = (beyond_rate_sym * fmt.bits_per_symbol() / 1000.0).ceil() as VolKb;
        self.vbdc_remaining_kb = self.vbdc_remaining_kb.saturating_sub(vbdc_used_kb);

        if packets.is_empty() {
            return Ok(Vec::new());
        }
        let mut burst = DvbBurst::new(self.current_fmt);
        burst.nb_packets = packets.len() as u16;
        burst.payload = pack_burst_payload(&packets);
        debug!(
            "SF#{}: scheduled {} packets in one burst ({} symbols used)",
            self.super_frame_counter,
            burst.nb_packets,
            used_sym
        );
        Ok(vec![DvbFrame::DvbBurst(burst)])
    }

    /// Flush queued traffic, used when the NCC session is reset.
    pub fn delete_packets(
        &mut self,
        fifos: &mut BTreeMap<crate::types::QosId, MacFifo<NetPacket>>,
    ) {
        for fifo in fifos.values_mut() {
            while fifo.pop().is_some() {}
        }
    }
}
