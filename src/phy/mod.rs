//! # Physical Layer Pipeline
//!
//! Per-link C/N accounting and the reception-side MODCOD check: every
//! frame carrying a MODCOD is compared against the minimal condition of
//! that MODCOD, and frames below it go through the error-insertion policy
//! that marks them corrupted. Frames without a MODCOD pass through but
//! keep their C/N for the receiver's ACM loop.

use crate::carrier::CarrierEnvelope;
use crate::error::DvbError;
use crate::fmt::FmtDefinitionTable;
use crate::frame::DvbFrame;
use log::{debug, info};
use std::sync::Arc;

/// Minimal-condition model: the C/N floor under which a frame is at risk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MinimalCondition {
    /// Threshold follows the required Es/N0 of the frame MODCOD (ACM).
    Modcod,
    /// Fixed threshold in dB whatever the MODCOD.
    Constant(f64),
}

/// Error-insertion policy applied when the C/N is below the minimal
/// condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorInsertion {
    /// Hard gate: below the threshold the frame is corrupted.
    Gate,
    /// No insertion at all; frames always pass.
    None,
}

/// Counters of the attenuation pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhyStats {
    /// Frames marked corrupted.
    pub drops: u64,
    /// Last minimal-condition threshold, in dB.
    pub minimal_condition_db: f64,
    /// Frames processed, MODCOD-bearing or not.
    pub processed: u64,
}

/// Combine the C/N of two cascaded links (values in dB).
pub fn combine_cn(cn1_db: f64, cn2_db: f64) -> f64 {
    let lin1 = 10f64.powf(-cn1_db / 10.0);
    let lin2 = 10f64.powf(-cn2_db / 10.0);
    -10.0 * (lin1 + lin2).log10()
}

pub struct AttenuationHandler {
    minimal_condition: MinimalCondition,
    error_insertion: ErrorInsertion,
    fmt_table: Arc<FmtDefinitionTable>,
    stats: PhyStats,
}

impl AttenuationHandler {
    pub fn new(
        minimal_condition: MinimalCondition,
        error_insertion: ErrorInsertion,
        fmt_table: Arc<FmtDefinitionTable>,
    ) -> Self {
        AttenuationHandler {
            minimal_condition,
            error_insertion,
            fmt_table,
            stats: PhyStats::default(),
        }
    }

    pub fn stats(&self) -> PhyStats {
        self.stats
    }

    /// Process one received frame. Returns true when the frame was marked
    /// corrupted. Non-MODCOD frames are never corrupted here; they keep
    /// their C/N for the control plane.
    pub fn process(
        &mut self,
        envelope: &mut CarrierEnvelope,
        frame: &mut DvbFrame,
    ) -> Result<bool, DvbError> {
        self.stats.processed += 1;

        let modcod_id = match frame.modcod_id() {
            Some(id) => id,
            // attenuated but not MODCOD-encoded, cannot be dropped
            None => return Ok(false),
        };
        let cn_total = envelope.cn_db;
        debug!("receive frame with MODCOD {modcod_id}, total C/N = {cn_total:.2}");

        let min_cn = match self.minimal_condition {
            MinimalCondition::Modcod => self.fmt_table.required_es_n0(modcod_id)?,
            MinimalCondition::Constant(threshold) => threshold,
        };
        self.stats.minimal_condition_db = min_cn;
        debug!("minimal condition value for MODCOD {modcod_id}: {min_cn:.2} dB");

        let corrupt = match self.error_insertion {
            ErrorInsertion::Gate => cn_total < min_cn,
            ErrorInsertion::None => false,
        };
        if !corrupt {
            return Ok(false);
        }

        if let Some(payload) = frame.payload_mut() {
            scramble(payload);
        }
        envelope.corrupted = true;
        self.stats.drops += 1;
        info!("received frame was corrupted (C/N {cn_total:.2} dB < {min_cn:.2} dB)");
        Ok(true)
    }
}

/// Deterministic payload scramble used by the error insertion.
fn scramble(payload: &mut [u8]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= 0x55u8.rotate_left((index % 8) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BbFrame;

    fn envelope(cn_db: f64) -> CarrierEnvelope {
        CarrierEnvelope {
            spot_id: 1,
            carrier_id: 0,
            corrupted: false,
            cn_db,
        }
    }

    #[test]
    fn cn_combination_is_dominated_by_the_worst_link() {
        let total = combine_cn(10.0, 10.0);
        assert!((total - 6.9897).abs() < 1e-3);
        let skewed = combine_cn(30.0, 5.0);
        assert!((skewed - 5.0).abs() < 0.02);
    }

    #[test]
    fn below_threshold_frame_is_corrupted() {
        let table = Arc::new(FmtDefinitionTable::default_s2());
        let mut handler =
            AttenuationHandler::new(MinimalCondition::Modcod, ErrorInsertion::Gate, table);
        let mut bbframe = BbFrame::new(6); // requires 3.10 dB
        bbframe.payload = vec![1, 2, 3];
        let mut frame = DvbFrame::BbFrame(bbframe);
        let mut env = envelope(2.0);
        assert!(handler.process(&mut env, &mut frame).unwrap());
        assert!(env.corrupted);
        assert_eq!(handler.stats().drops, 1);
        assert!((handler.stats().minimal_condition_db - 3.10).abs() < 1e-9);
    }

    #[test]
    fn control_frames_pass_untouched() {
        let table = Arc::new(FmtDefinitionTable::default_s2());
        let mut handler =
            AttenuationHandler::new(MinimalCondition::Modcod, ErrorInsertion::Gate, table);
        let mut frame = DvbFrame::Sof(crate::frame::Sof::new(3));
        let mut env = envelope(-20.0);
        assert!(!handler.process(&mut env, &mut frame).unwrap());
        assert!(!env.corrupted);
        assert_eq!(handler.stats().drops, 0);
    }
}
