//! # DAMA Controller (NCC side)
//!
//! Aggregates the capacity requests of logged-on terminals and computes the
//! Terminal Burst Time Plan once per superframe. Allocation runs in four
//! priority-ordered passes over each terminal category: CRA, RBDC, VBDC
//! and finally FCA on whatever rate is left.

use crate::band::BandPlan;
use crate::dama::context::DamaContext;
use crate::error::DvbError;
use crate::fmt::FmtDefinitionTable;
use crate::frame::{LogonRequest, LogonResponse, Sac, Ttp, TtpAssignment};
use crate::types::{
    is_valid_tal_id, AccessType, GroupId, RateKbps, SpotId, TalId, TimeSf, VolKb,
};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Counters exported by the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct DamaCtrlStats {
    pub logged_terminals: usize,
    pub total_cra_kbps: u64,
    pub total_rbdc_alloc_kbps: u64,
    pub total_vbdc_alloc_kb: u64,
    pub rejected_logons: u64,
    pub discarded_sacs: u64,
}

pub struct DamaController {
    spot_id: SpotId,
    superframe_duration: Duration,
    fmt_table: Arc<FmtDefinitionTable>,
    band: BandPlan,
    contexts: BTreeMap<TalId, DamaContext>,
    group_ids: HashMap<String, GroupId>,
    next_group_id: GroupId,
    rbdc_timeout_sf: TimeSf,
    fca_enabled: bool,
    stats: DamaCtrlStats,
}

impl DamaController {
    pub fn new(
        spot_id: SpotId,
        superframe_duration: Duration,
        fmt_table: Arc<FmtDefinitionTable>,
        band: BandPlan,
        rbdc_timeout_sf: TimeSf,
        fca_enabled: bool,
    ) -> Result<Self, DvbError> {
        if band.access_type() != AccessType::Dama {
            return Err(DvbError::ConfigInvalid(
                "DAMA controller needs a DAMA band plan".into(),
            ));
        }
        Ok(DamaController {
            spot_id,
            superframe_duration,
            fmt_table,
            band,
            contexts: BTreeMap::new(),
            group_ids: HashMap::new(),
            next_group_id: 0,
            rbdc_timeout_sf,
            fca_enabled,
            stats: DamaCtrlStats::default(),
        })
    }

    pub fn spot_id(&self) -> SpotId {
        self.spot_id
    }

    pub fn band(&self) -> &BandPlan {
        &self.band
    }

    pub fn band_mut(&mut self) -> &mut BandPlan {
        &mut self.band
    }

    pub fn context(&self, tal_id: TalId) -> Option<&DamaContext> {
        self.contexts.get(&tal_id)
    }

    pub fn stats(&self) -> DamaCtrlStats {
        let mut stats = self.stats;
        stats.logged_terminals = self.contexts.len();
        stats
    }

    /// Handle a terminal logon: allocate a category slot, register the DAMA
    /// context and answer with the assigned group id. Reserved ids and id
    /// collisions are rejected.
    pub fn on_logon(&mut self, request: &LogonRequest) -> Result<LogonResponse, DvbError> {
        let tal_id = request.mac;
        if !is_valid_tal_id(tal_id) {
            self.stats.rejected_logons += 1;
            return Err(DvbError::StateViolation(format!(
                "logon with reserved terminal id {tal_id}"
            )));
        }
        if self.contexts.contains_key(&tal_id) {
            self.stats.rejected_logons += 1;
            return Err(DvbError::StateViolation(format!(
                "terminal {tal_id} is already logged on"
            )));
        }

        let label = self.band.register_terminal(tal_id).ok_or_else(|| {
            self.stats.rejected_logons += 1;
            DvbError::StateViolation(format!("no category accepts terminal {tal_id}"))
        })?;
        let category = self
            .band
            .category(&label)
            .ok_or_else(|| DvbError::ConfigInvalid(format!("category {label} vanished")))?;

        // CRA is capped by what the category can physically carry
        let max_rate = category.max_rate_kbps()?;
        let cra_kbps = RateKbps::from(request.rt_bandwidth_kbps).min(max_rate);
        if cra_kbps < RateKbps::from(request.rt_bandwidth_kbps) {
            warn!(
                "CRA of ST{} capped to {} kb/s by category {} (requested {})",
                tal_id, cra_kbps, label, request.rt_bandwidth_kbps
            );
        }

        let mut context = DamaContext::new(
            tal_id,
            &label,
            cra_kbps,
            RateKbps::from(request.max_rbdc_kbps),
            self.rbdc_timeout_sf,
            VolKb::from(request.max_vbdc_kb),
        );
        context.set_cra_allocation(cra_kbps);
        if let Some(carrier_id) = category.first_carrier_id() {
            context.set_carrier_id(carrier_id);
        }
        context.set_current_fmt(self.fmt_table.min_id()?);
        context.set_required_fmt(self.fmt_table.min_id()?);
        self.contexts.insert(tal_id, context);

        let group_id = match self.group_ids.get(&label).copied() {
            Some(id) => id,
            None => {
                self.next_group_id += 1;
                self.group_ids.insert(label.clone(), self.next_group_id);
                self.next_group_id
            }
        };

        info!(
            "ST{} logged on in category {} with CRA {} kb/s, group {}",
            tal_id, label, cra_kbps, group_id
        );
        Ok(LogonResponse {
            logon_id: tal_id,
            group_id,
        })
    }

    /// Drop the context of a departed terminal.
    pub fn on_logoff(&mut self, tal_id: TalId) {
        if let Some(context) = self.contexts.remove(&tal_id) {
            let label = context.category().to_string();
            self.band.unregister_terminal(tal_id, &label);
            info!("ST{tal_id} logged off from category {label}");
        }
    }

    /// Process a SAC. A SAC for an unknown terminal is a state violation;
    /// the caller logs it and drops the frame.
    pub fn on_sac(&mut self, sac: &Sac) -> Result<(), DvbError> {
        let context = match self.contexts.get_mut(&sac.tal_id) {
            Some(context) => context,
            None => {
                self.stats.discarded_sacs += 1;
                return Err(DvbError::StateViolation(format!(
                    "SAC from unknown terminal {}",
                    sac.tal_id
                )));
            }
        };
        context.set_required_rbdc(RateKbps::from(sac.rbdc_kbps));
        if sac.vbdc_kb > 0 {
            context.add_required_vbdc(VolKb::from(sac.vbdc_kb));
        }

        // refresh the return MODCOD from the reported C/N
        let required = self.fmt_table.best_id_for_cn(sac.cn_db)?;
        context.set_required_fmt(required);
        let label = context.category().to_string();
        if let Some(group) = self.band.category(&label).and_then(|c| c.fmt_group()) {
            let nearest = group.get_nearest(required)?;
            if let Some(context) = self.contexts.get_mut(&sac.tal_id) {
                context.set_current_fmt(nearest);
            }
        }
        Ok(())
    }

    /// Superframe tick: advance every RBDC timeout timer.
    pub fn on_frame_tick(&mut self) {
        for context in self.contexts.values_mut() {
            context.decrement_timer();
        }
    }

    /// Run the allocation passes and build the TTP for superframe `sfn`.
    pub fn compute_ttp(&mut self, sfn: TimeSf) -> Result<Ttp, DvbError> {
        let mut ttp = Ttp::new(sfn);
        self.stats.total_cra_kbps = 0;
        self.stats.total_rbdc_alloc_kbps = 0;
        self.stats.total_vbdc_alloc_kb = 0;

        let labels: Vec<String> = self.band.categories().keys().cloned().collect();
        for label in labels {
            self.allocate_category(&label)?;
            let category = match self.band.category(&label) {
                Some(category) => category,
                None => continue,
            };
            for &tal_id in category.terminals() {
                let context = match self.contexts.get(&tal_id) {
                    Some(context) => context,
                    None => continue,
                };
                let rate = context.total_rate_allocation();
                let volume = context.total_volume_allocation();
                self.stats.total_cra_kbps += u64::from(context.cra_allocation());
                self.stats.total_rbdc_alloc_kbps += u64::from(context.rbdc_allocation());
                self.stats.total_vbdc_alloc_kb += u64::from(volume);
                ttp.assignments.push(TtpAssignment {
                    tal_id,
                    access_type: AccessType::Dama,
                    rate_kbps: rate.min(u32::from(u16::MAX)) as u16,
                    volume_kb: volume.min(u32::from(u16::MAX)) as u16,
                    start_slot: 0,
                    slot_count: 0,
                });
            }
        }
        debug!(
            "SF#{sfn}: TTP with {} assignments on spot {}",
            ttp.assignments.len(),
            self.spot_id
        );
        Ok(ttp)
    }

    /// The four allocation passes over one category.
    fn allocate_category(&mut self, label: &str) -> Result<(), DvbError> {
        let category = match self.band.category(label) {
            Some(category) => category,
            None => return Ok(()),
        };
        let mut remaining_sym = category.total_capacity_sym() as f64;
        let terminals: Vec<TalId> = category.terminals().to_vec();
        let duration = self.superframe_duration;

        if category.carriers_number() == 0 {
            // carriers were all reallocated away: contexts stay but nothing
            // beyond CRA can be granted
            warn!("category {label} has no carriers left for DAMA allocation");
        }

        // ---- CRA pass: deterministic, runs even on exhausted categories
        for &tal_id in &terminals {
            let context = match self.contexts.get_mut(&tal_id) {
                Some(context) => context,
                None => continue,
            };
            let cra = context.required_cra();
            context.set_cra_allocation(cra);
            context.set_fca_allocation(0);
            let fmt = self.fmt_table.get(context.current_fmt())?;
            remaining_sym -= fmt.rate_to_volume_sym(cra, duration);
        }
        if remaining_sym < 0.0 {
            warn!("category {label}: CRA overcommits the category capacity");
            remaining_sym = 0.0;
        }

        // ---- RBDC pass: highest credit first, terminal id breaks ties
        let mut rbdc_order: Vec<TalId> = terminals
            .iter()
            .copied()
            .filter(|t| self.contexts.contains_key(t))
            .collect();
        rbdc_order.sort_by(|a, b| {
            let credit_a = self.contexts[a].rbdc_credit();
            let credit_b = self.contexts[b].rbdc_credit();
            credit_b
                .partial_cmp(&credit_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        for tal_id in rbdc_order {
            let context = match self.contexts.get_mut(&tal_id) {
                Some(context) => context,
                None => continue,
            };
            let request = context.required_rbdc();
            if request == 0 {
                context.set_rbdc_allocation(0);
                continue;
            }
            let fmt = self.fmt_table.get(context.current_fmt())?;
            let needed_sym = fmt.rate_to_volume_sym(request, duration);
            if needed_sym <= remaining_sym {
                context.set_rbdc_allocation(request);
                context.set_rbdc_credit(0.0);
                remaining_sym -= needed_sym;
            } else {
                let grant =
                    fmt.volume_sym_to_rate(remaining_sym, duration).floor() as RateKbps;
                let granted_sym = fmt.rate_to_volume_sym(grant, duration);
                context.set_rbdc_allocation(grant);
                context.add_rbdc_credit(f64::from(request - grant));
                remaining_sym -= granted_sym;
            }
        }

        // ---- VBDC pass: biggest backlog first
        let mut vbdc_order: Vec<TalId> = terminals
            .iter()
            .copied()
            .filter(|t| self.contexts.contains_key(t))
            .collect();
        vbdc_order.sort_by(|a, b| {
            let req_a = self.contexts[a].required_vbdc();
            let req_b = self.contexts[b].required_vbdc();
            req_b.cmp(&req_a).then(a.cmp(b))
        });
        for tal_id in vbdc_order {
            let context = match self.contexts.get_mut(&tal_id) {
                Some(context) => context,
                None => continue,
            };
            let request_kb = context.required_vbdc();
            if request_kb == 0 {
                context.set_vbdc_allocation(0);
                continue;
            }
            let fmt = self.fmt_table.get(context.current_fmt())?;
            let needed_sym = f64::from(request_kb) * 1000.0 / fmt.bits_per_symbol();
            let grant_kb = if needed_sym <= remaining_sym {
                request_kb
            } else {
                (remaining_sym * fmt.bits_per_symbol() / 1000.0).floor() as VolKb
            };
            let granted_sym = f64::from(grant_kb) * 1000.0 / fmt.bits_per_symbol();
            context.set_vbdc_allocation(grant_kb);
            remaining_sym -= granted_sym;
        }

        // ---- FCA pass: split the leftover rate among RBDC requesters
        if self.fca_enabled && remaining_sym > 0.0 {
            let eligible: Vec<TalId> = terminals
                .iter()
                .copied()
                .filter(|t| {
                    self.contexts
                        .get(t)
                        .map(|c| c.required_rbdc() > 0)
                        .unwrap_or(false)
                })
                .collect();
            if !eligible.is_empty() {
                let share_sym = remaining_sym / eligible.len() as f64;
                for tal_id in eligible {
                    let context = match self.contexts.get_mut(&tal_id) {
                        Some(context) => context,
                        None => continue,
                    };
                    let fmt = self.fmt_table.get(context.current_fmt())?;
                    let fca = fmt.volume_sym_to_rate(share_sym, duration).floor() as RateKbps;
                    context.set_fca_allocation(fca);
                    remaining_sym -= fmt.rate_to_volume_sym(fca, duration);
                }
            }
        }

        Ok(())
    }
}
