//! # Transparent Satellite Forwarding
//!
//! The satellite keeps one structure per gateway with three delay FIFOs
//! (logon, control, data). Received frames are queued with a tick-out of
//! now plus the one-way propagation delay; the forward timer pops every
//! ready element in FIFO order towards the downlink carrier. SOF frames
//! bypass the delay FIFOs entirely to preserve synchronisation, and
//! BBFrames pass through with their MODCOD untouched.
//!
//! Each per-gateway structure is touched by the upward path (reception
//! counters) and the downward path (pops and probes), so it lives behind
//! its own mutex.

use crate::carrier::CarrierEnvelope;
use crate::constants::{
    MSG_TYPE_SAC, MSG_TYPE_SESSION_LOGON_REQ, MSG_TYPE_SESSION_LOGON_RESP, MSG_TYPE_SOF,
    MSG_TYPE_SYNC, MSG_TYPE_TTP,
};
use crate::error::DvbError;
use crate::fifo::MacFifo;
use crate::frame::DvbFrame;
use crate::types::{CarrierId, CrKind, SpotId, TimeMs};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The forwarding FIFO classes, popped in this order on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FifoClass {
    Logon,
    Control,
    Data,
}

/// Carrier routing of one gateway on the satellite.
#[derive(Debug, Clone, Copy)]
pub struct SatGwCarriers {
    /// Downlink carrier for logon responses and requests.
    pub logon_out: CarrierId,
    /// Downlink carrier for control frames (SOF, TTP, SAC, ACKs).
    pub control_out: CarrierId,
    /// Downlink carrier for data frames.
    pub data_out: CarrierId,
}

/// Counters of one gateway structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct SatGwStats {
    pub l2_bytes_in: u64,
    pub l2_bytes_out: u64,
    pub forwarded_frames: u64,
}

struct SatGw {
    spot_id: SpotId,
    carriers: SatGwCarriers,
    logon_fifo: MacFifo<(CarrierEnvelope, DvbFrame)>,
    control_fifo: MacFifo<(CarrierEnvelope, DvbFrame)>,
    data_fifo: MacFifo<(CarrierEnvelope, DvbFrame)>,
    stats: SatGwStats,
}

impl crate::fifo::FifoPayload for (CarrierEnvelope, DvbFrame) {
    fn len_bytes(&self) -> usize {
        self.1.len_bytes()
    }
}

impl SatGw {
    fn new(spot_id: SpotId, carriers: SatGwCarriers, fifo_size: usize) -> Self {
        SatGw {
            spot_id,
            carriers,
            logon_fifo: MacFifo::new("sat.logon", 0, CrKind::None, fifo_size),
            control_fifo: MacFifo::new("sat.control", 1, CrKind::None, fifo_size),
            data_fifo: MacFifo::new("sat.data", 2, CrKind::None, fifo_size),
            stats: SatGwStats::default(),
        }
    }

    fn classify(frame: &DvbFrame) -> FifoClass {
        match frame.msg_type() {
            MSG_TYPE_SESSION_LOGON_REQ | MSG_TYPE_SESSION_LOGON_RESP => FifoClass::Logon,
            MSG_TYPE_SOF | MSG_TYPE_SYNC | MSG_TYPE_SAC | MSG_TYPE_TTP => FifoClass::Control,
            _ => FifoClass::Data,
        }
    }

    fn out_carrier(&self, class: FifoClass) -> CarrierId {
        match class {
            FifoClass::Logon => self.carriers.logon_out,
            FifoClass::Control => self.carriers.control_out,
            FifoClass::Data => self.carriers.data_out,
        }
    }
}

/// The satellite forwarding engine.
pub struct SatelliteForwarder {
    gws: BTreeMap<SpotId, Mutex<SatGw>>,
    one_way_delay_ms: TimeMs,
}

impl SatelliteForwarder {
    pub fn new(one_way_delay_ms: TimeMs) -> Self {
        SatelliteForwarder {
            gws: BTreeMap::new(),
            one_way_delay_ms,
        }
    }

    pub fn add_gw(&mut self, spot_id: SpotId, carriers: SatGwCarriers, fifo_size: usize) {
        self.gws
            .insert(spot_id, Mutex::new(SatGw::new(spot_id, carriers, fifo_size)));
    }

    pub fn one_way_delay_ms(&self) -> TimeMs {
        self.one_way_delay_ms
    }

    pub fn gw_stats(&self, spot_id: SpotId) -> Option<SatGwStats> {
        let gw = self.gws.get(&spot_id)?;
        let gw = gw.lock().ok()?;
        Some(gw.stats)
    }

    /// Handle one received frame. SOF frames are forwarded immediately on
    /// the control carrier; everything else enters the delay FIFO of its
    /// class. Returns the frames to emit right away.
    pub fn on_rcv_frame(
        &self,
        envelope: CarrierEnvelope,
        frame: DvbFrame,
        now: TimeMs,
    ) -> Result<Vec<(CarrierId, CarrierEnvelope, DvbFrame)>, DvbError> {
        let gw = self.gws.get(&envelope.spot_id).ok_or_else(|| {
            DvbError::StateViolation(format!(
                "no gateway for spot {} on the satellite",
                envelope.spot_id
            ))
        })?;
        let mut gw = gw
            .lock()
            .map_err(|_| DvbError::Other("satellite gateway mutex poisoned".into()))?;
        gw.stats.l2_bytes_in += frame.len_bytes() as u64;

        if frame.msg_type() == MSG_TYPE_SOF {
            // shared-state delivery keeps superframe timing exact
            let carrier = gw.carriers.control_out;
            gw.stats.forwarded_frames += 1;
            return Ok(vec![(carrier, envelope, frame)]);
        }

        let class = SatGw::classify(&frame);
        let tick_out = now + self.one_way_delay_ms;
        let fifo = match class {
            FifoClass::Logon => &mut gw.logon_fifo,
            FifoClass::Control => &mut gw.control_fifo,
            FifoClass::Data => &mut gw.data_fifo,
        };
        if let Err(err) = fifo.push((envelope, frame), now, tick_out) {
            warn!("satellite spot {}: {}", gw.spot_id, err);
            return Err(err);
        }
        Ok(Vec::new())
    }

    /// Forward-timer tick: pop every element whose tick-out elapsed, per
    /// gateway, class by class, preserving FIFO order inside each class.
    pub fn on_fwd_timer(&self, now: TimeMs) -> Vec<(CarrierId, CarrierEnvelope, DvbFrame)> {
        let mut out = Vec::new();
        for gw in self.gws.values() {
            let mut gw = match gw.lock() {
                Ok(gw) => gw,
                Err(_) => continue,
            };
            for class in [FifoClass::Logon, FifoClass::Control, FifoClass::Data] {
                let carrier = gw.out_carrier(class);
                loop {
                    let element = {
                        let fifo = match class {
                            FifoClass::Logon => &mut gw.logon_fifo,
                            FifoClass::Control => &mut gw.control_fifo,
                            FifoClass::Data => &mut gw.data_fifo,
                        };
                        fifo.pop_ready(now)
                    };
                    match element {
                        Some(element) => {
                            let (envelope, frame) = element.payload;
                            gw.stats.l2_bytes_out += frame.len_bytes() as u64;
                            gw.stats.forwarded_frames += 1;
                            debug!(
                                "spot {}: forward frame type 0x{:02X} on carrier {}",
                                gw.spot_id,
                                frame.msg_type(),
                                carrier
                            );
                            out.push((carrier, envelope, frame));
                        }
                        None => break,
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Sof, Sync};

    fn forwarder() -> SatelliteForwarder {
        let mut forwarder = SatelliteForwarder::new(250);
        forwarder.add_gw(
            1,
            SatGwCarriers {
                logon_out: 10,
                control_out: 11,
                data_out: 12,
            },
            16,
        );
        forwarder
    }

    fn envelope() -> CarrierEnvelope {
        CarrierEnvelope::new(1, 3)
    }

    #[test]
    fn sof_bypasses_the_delay() {
        let forwarder = forwarder();
        let immediate = forwarder
            .on_rcv_frame(envelope(), DvbFrame::Sof(Sof::new(9)), 1000)
            .unwrap();
        assert_eq!(immediate.len(), 1);
        assert_eq!(immediate[0].0, 11);
    }

    #[test]
    fn delayed_frames_wait_for_their_tick_out() {
        let forwarder = forwarder();
        forwarder
            .on_rcv_frame(envelope(), DvbFrame::Sync(Sync { sfn: 1 }), 1000)
            .unwrap();
        assert!(forwarder.on_fwd_timer(1100).is_empty());
        let out = forwarder.on_fwd_timer(1250);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 11);
    }

    #[test]
    fn unknown_spot_is_a_state_violation() {
        let forwarder = forwarder();
        let mut env = envelope();
        env.spot_id = 9;
        assert!(matches!(
            forwarder.on_rcv_frame(env, DvbFrame::Sof(Sof::new(0)), 0),
            Err(DvbError::StateViolation(_))
        ));
    }
}
