//! # DAMA Terminal Context
//!
//! The per-terminal state the NCC keeps between SACs and TTPs: requests,
//! allocations, the RBDC credit and its timeout timer, and the MODCOD the
//! return link currently supports.

use crate::types::{CarrierId, FmtId, RateKbps, TalId, TimeSf, VolKb};
use log::debug;

#[derive(Debug, Clone)]
pub struct DamaContext {
    tal_id: TalId,
    category: String,
    carrier_id: CarrierId,

    cra_request_kbps: RateKbps,
    cra_alloc_kbps: RateKbps,
    max_rbdc_kbps: RateKbps,
    rbdc_timeout_sf: TimeSf,
    max_vbdc_kb: VolKb,

    rbdc_request_kbps: RateKbps,
    rbdc_alloc_kbps: RateKbps,
    rbdc_credit: f64,
    timer_sf: TimeSf,

    vbdc_request_kb: VolKb,
    vbdc_alloc_kb: VolKb,

    fca_alloc_kbps: RateKbps,

    /// The MODCOD currently used on the return link.
    current_fmt: FmtId,
    /// The MODCOD the measured C/N would support.
    required_fmt: FmtId,
}

impl DamaContext {
    pub fn new(
        tal_id: TalId,
        category: &str,
        cra_kbps: RateKbps,
        max_rbdc_kbps: RateKbps,
        rbdc_timeout_sf: TimeSf,
        max_vbdc_kb: VolKb,
    ) -> Self {
        DamaContext {
            tal_id,
            category: category.to_string(),
            carrier_id: 0,
            cra_request_kbps: cra_kbps,
            cra_alloc_kbps: 0,
            max_rbdc_kbps,
            rbdc_timeout_sf,
            max_vbdc_kb,
            rbdc_request_kbps: 0,
            rbdc_alloc_kbps: 0,
            rbdc_credit: 0.0,
            timer_sf: 0,
            vbdc_request_kb: 0,
            vbdc_alloc_kb: 0,
            fca_alloc_kbps: 0,
            current_fmt: 0,
            required_fmt: 0,
        }
    }

    pub fn tal_id(&self) -> TalId {
        self.tal_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn set_category(&mut self, label: &str) {
        self.category = label.to_string();
    }

    pub fn carrier_id(&self) -> CarrierId {
        self.carrier_id
    }

    pub fn set_carrier_id(&mut self, carrier_id: CarrierId) {
        self.carrier_id = carrier_id;
    }

    pub fn required_cra(&self) -> RateKbps {
        self.cra_request_kbps
    }

    pub fn set_required_cra(&mut self, val_kbps: RateKbps) {
        self.cra_request_kbps = val_kbps;
        debug!("required CRA is {} kb/s for ST{}", val_kbps, self.tal_id);
    }

    pub fn cra_allocation(&self) -> RateKbps {
        self.cra_alloc_kbps
    }

    pub fn set_cra_allocation(&mut self, val_kbps: RateKbps) {
        self.cra_alloc_kbps = val_kbps;
        debug!("allocated CRA is {} kb/s for ST{}", val_kbps, self.tal_id);
    }

    pub fn max_rbdc(&self) -> RateKbps {
        self.max_rbdc_kbps
    }

    pub fn set_max_rbdc(&mut self, val_kbps: RateKbps) {
        self.max_rbdc_kbps = val_kbps;
    }

    pub fn max_vbdc(&self) -> VolKb {
        self.max_vbdc_kb
    }

    pub fn rbdc_timeout(&self) -> TimeSf {
        self.rbdc_timeout_sf
    }

    pub fn update_rbdc_timeout(&mut self, timeout_sf: TimeSf) {
        self.rbdc_timeout_sf = timeout_sf;
    }

    /// Record a new RBDC request: the value is clamped to max RBDC, the
    /// credit restarts from zero and the timeout timer is rearmed.
    pub fn set_required_rbdc(&mut self, val_kbps: RateKbps) {
        self.rbdc_request_kbps = val_kbps.min(self.max_rbdc_kbps);
        self.rbdc_credit = 0.0;
        self.timer_sf = self.rbdc_timeout_sf;
        debug!(
            "new RBDC request {} kb/s, credit {:.2}, timer {} for ST{}",
            self.rbdc_request_kbps, self.rbdc_credit, self.timer_sf, self.tal_id
        );
    }

    pub fn required_rbdc(&self) -> RateKbps {
        self.rbdc_request_kbps
    }

    pub fn set_rbdc_allocation(&mut self, val_kbps: RateKbps) {
        self.rbdc_alloc_kbps = val_kbps;
        debug!(
            "RBDC allocation {} kb/s, request {} kb/s, credit {:.2} for ST{}",
            val_kbps, self.rbdc_request_kbps, self.rbdc_credit, self.tal_id
        );
    }

    pub fn rbdc_allocation(&self) -> RateKbps {
        self.rbdc_alloc_kbps
    }

    pub fn rbdc_credit(&self) -> f64 {
        self.rbdc_credit
    }

    pub fn set_rbdc_credit(&mut self, credit: f64) {
        self.rbdc_credit = credit;
    }

    pub fn add_rbdc_credit(&mut self, credit: f64) {
        self.rbdc_credit += credit;
    }

    pub fn timer(&self) -> TimeSf {
        self.timer_sf
    }

    /// Advance the RBDC timeout by one superframe; at zero the pending
    /// request expires.
    pub fn decrement_timer(&mut self) {
        self.timer_sf = self.timer_sf.saturating_sub(1);
        if self.timer_sf == 0 && self.rbdc_request_kbps > 0 {
            debug!("RBDC request of ST{} timed out", self.tal_id);
            self.rbdc_request_kbps = 0;
            self.rbdc_credit = 0.0;
        }
    }

    /// Accumulate a VBDC request, clamped to the configured maximum.
    pub fn add_required_vbdc(&mut self, val_kb: VolKb) {
        self.vbdc_request_kb = (self.vbdc_request_kb + val_kb).min(self.max_vbdc_kb);
        debug!(
            "new VBDC request {} kb for ST{}",
            self.vbdc_request_kb, self.tal_id
        );
    }

    pub fn required_vbdc(&self) -> VolKb {
        self.vbdc_request_kb
    }

    /// Record a VBDC allocation; the unsatisfied volume stays pending.
    pub fn set_vbdc_allocation(&mut self, val_kb: VolKb) {
        self.vbdc_alloc_kb = val_kb;
        self.vbdc_request_kb = self.vbdc_request_kb.saturating_sub(val_kb);
        debug!(
            "VBDC allocation {} kb, request {} kb for ST{}",
            self.vbdc_alloc_kb, self.vbdc_request_kb, self.tal_id
        );
    }

    pub fn vbdc_allocation(&self) -> VolKb {
        self.vbdc_alloc_kb
    }

    pub fn set_fca_allocation(&mut self, val_kbps: RateKbps) {
        self.fca_alloc_kbps = val_kbps;
    }

    pub fn fca_allocation(&self) -> RateKbps {
        self.fca_alloc_kbps
    }

    /// Total rate granted this superframe: CRA + RBDC + FCA.
    pub fn total_rate_allocation(&self) -> RateKbps {
        self.cra_alloc_kbps + self.rbdc_alloc_kbps + self.fca_alloc_kbps
    }

    pub fn total_volume_allocation(&self) -> VolKb {
        self.vbdc_alloc_kb
    }

    pub fn current_fmt(&self) -> FmtId {
        self.current_fmt
    }

    pub fn set_current_fmt(&mut self, fmt_id: FmtId) {
        self.current_fmt = fmt_id;
    }

    pub fn required_fmt(&self) -> FmtId {
        self.required_fmt
    }

    pub fn set_required_fmt(&mut self, fmt_id: FmtId) {
        self.required_fmt = fmt_id;
    }
}
