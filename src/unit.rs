//! # Unit Converter
//!
//! Rate and volume conversions between bits, kilobits and symbols for a
//! given frame duration and modulation efficiency. The efficiency is the
//! useful-bit density of the current MODCOD (modulation bits per symbol
//! scaled by the coding rate).

use crate::fmt::FmtDefinition;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UnitConverter {
    frame_duration: Duration,
    efficiency: f64,
    efficiency_inv: f64,
}

impl UnitConverter {
    pub fn new(frame_duration: Duration, efficiency: f64) -> Self {
        let mut converter = UnitConverter {
            frame_duration,
            efficiency: 0.0,
            efficiency_inv: 0.0,
        };
        converter.set_modulation_efficiency(efficiency);
        converter
    }

    /// Build a converter from the MODCOD currently in use.
    pub fn for_modcod(frame_duration: Duration, definition: &FmtDefinition) -> Self {
        Self::new(frame_duration, definition.bits_per_symbol())
    }

    pub fn set_frame_duration(&mut self, duration: Duration) {
        self.frame_duration = duration;
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn set_modulation_efficiency(&mut self, efficiency: f64) {
        self.efficiency = efficiency;
        self.efficiency_inv = if efficiency > 0.0 {
            1.0 / efficiency
        } else {
            0.0
        };
    }

    /// Update the efficiency from a new MODCOD selection.
    pub fn set_modcod(&mut self, definition: &FmtDefinition) {
        self.set_modulation_efficiency(definition.bits_per_symbol());
    }

    pub fn modulation_efficiency(&self) -> f64 {
        self.efficiency
    }

    pub fn bits_to_sym(&self, vol_b: u64) -> u64 {
        (vol_b as f64 * self.efficiency_inv).ceil() as u64
    }

    pub fn sym_to_bits(&self, vol_sym: u64) -> u64 {
        (vol_sym as f64 * self.efficiency).floor() as u64
    }

    pub fn kbits_to_sym(&self, vol_kb: u32) -> u64 {
        (f64::from(vol_kb) * 1000.0 * self.efficiency_inv).ceil() as u64
    }

    pub fn sym_to_kbits(&self, vol_sym: u64) -> u32 {
        (vol_sym as f64 * self.efficiency / 1000.0).ceil() as u32
    }

    pub fn bps_to_symps(&self, rate_bps: u64) -> u64 {
        (rate_bps as f64 * self.efficiency_inv).ceil() as u64
    }

    pub fn symps_to_bps(&self, rate_symps: u64) -> u64 {
        (rate_symps as f64 * self.efficiency).floor() as u64
    }

    pub fn kbps_to_symps(&self, rate_kbps: u32) -> u64 {
        (f64::from(rate_kbps) * 1000.0 * self.efficiency_inv).ceil() as u64
    }

    pub fn symps_to_kbps(&self, rate_symps: u64) -> u32 {
        (rate_symps as f64 * self.efficiency / 1000.0).ceil() as u32
    }

    /// Symbols available in one frame at a symbol rate of `rate_symps`.
    pub fn symps_to_sym_per_frame(&self, rate_symps: u64) -> u64 {
        (rate_symps as f64 * self.frame_duration.as_secs_f64()).floor() as u64
    }

    /// Per-frame count to per-second rate.
    pub fn pf_to_ps(&self, per_frame: u32) -> u32 {
        if self.frame_duration.is_zero() {
            return 0;
        }
        (f64::from(per_frame) / self.frame_duration.as_secs_f64()).ceil() as u32
    }

    /// Per-second rate to per-frame count.
    pub fn ps_to_pf(&self, per_second: u32) -> u32 {
        (f64::from(per_second) * self.frame_duration.as_secs_f64()).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_conversions_round_up() {
        let converter = UnitConverter::new(Duration::from_millis(53), 2.0);
        assert_eq!(converter.bits_to_sym(3), 2);
        assert_eq!(converter.kbits_to_sym(1), 500);
        assert_eq!(converter.sym_to_kbits(500), 1);
    }

    #[test]
    fn frame_rate_conversions() {
        let converter = UnitConverter::new(Duration::from_millis(100), 1.0);
        assert_eq!(converter.ps_to_pf(100), 10);
        assert_eq!(converter.pf_to_ps(10), 100);
    }
}
