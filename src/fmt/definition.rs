//! # FMT Definitions
//!
//! A MODCOD (modulation + coding) definition associates an id with the
//! parameters the scheduler and the physical layer need: modulation order,
//! coding rate, spectral efficiency and the Es/N0 the demodulator requires.
//! Definitions live in an [`FmtDefinitionTable`] ordered by robustness.

use crate::error::DvbError;
use crate::types::{FmtId, RateKbps, RateSymps, VolKb, VolSym};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Modulation schemes supported on the emulated links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "BPSK")]
    Bpsk,
    #[serde(rename = "Pi/2BPSK")]
    Pi2Bpsk,
    #[serde(rename = "QPSK")]
    Qpsk,
    #[serde(rename = "8PSK")]
    Psk8,
    #[serde(rename = "16APSK")]
    Apsk16,
    #[serde(rename = "32APSK")]
    Apsk32,
}

impl Modulation {
    /// Raw modulation efficiency in bits per symbol, before coding.
    pub fn bits_per_symbol(self) -> u32 {
        match self {
            Modulation::Bpsk | Modulation::Pi2Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Psk8 => 3,
            Modulation::Apsk16 => 4,
            Modulation::Apsk32 => 5,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DvbError> {
        match name {
            "BPSK" => Ok(Modulation::Bpsk),
            "Pi/2BPSK" => Ok(Modulation::Pi2Bpsk),
            "QPSK" => Ok(Modulation::Qpsk),
            "8PSK" => Ok(Modulation::Psk8),
            "16APSK" => Ok(Modulation::Apsk16),
            "32APSK" => Ok(Modulation::Apsk32),
            other => Err(DvbError::ConfigInvalid(format!(
                "unknown modulation: {other}"
            ))),
        }
    }
}

/// One MODCOD definition.
#[derive(Debug, Clone)]
pub struct FmtDefinition {
    id: FmtId,
    modulation: Modulation,
    coding_rate: String,
    coding_rate_value: f64,
    spectral_efficiency: f64,
    required_es_n0_db: f64,
    /// Burst length in symbols, set for DVB-RCS2 waveforms only.
    burst_length_sym: Option<VolSym>,
}

fn parse_coding_rate(rate: &str) -> Result<f64, DvbError> {
    let mut parts = rate.split('/');
    let num = parts.next().and_then(|p| p.trim().parse::<f64>().ok());
    let den = match parts.next() {
        Some(p) => p.trim().parse::<f64>().ok(),
        None => Some(1.0),
    };
    match (num, den) {
        (Some(n), Some(d)) if d > 0.0 && n > 0.0 && n <= d => Ok(n / d),
        _ => Err(DvbError::ConfigInvalid(format!(
            "invalid coding rate: {rate}"
        ))),
    }
}

impl FmtDefinition {
    pub fn new(
        id: FmtId,
        modulation: Modulation,
        coding_rate: &str,
        spectral_efficiency: f64,
        required_es_n0_db: f64,
        burst_length_sym: Option<VolSym>,
    ) -> Result<Self, DvbError> {
        let coding_rate_value = parse_coding_rate(coding_rate)?;
        Ok(FmtDefinition {
            id,
            modulation,
            coding_rate: coding_rate.to_string(),
            coding_rate_value,
            spectral_efficiency,
            required_es_n0_db,
            burst_length_sym,
        })
    }

    pub fn id(&self) -> FmtId {
        self.id
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    pub fn coding_rate(&self) -> &str {
        &self.coding_rate
    }

    pub fn spectral_efficiency(&self) -> f64 {
        self.spectral_efficiency
    }

    pub fn required_es_n0(&self) -> f64 {
        self.required_es_n0_db
    }

    pub fn burst_length_sym(&self) -> Option<VolSym> {
        self.burst_length_sym
    }

    /// Useful bits carried by one symbol: modulation efficiency scaled by
    /// the coding rate.
    pub fn bits_per_symbol(&self) -> f64 {
        f64::from(self.modulation.bits_per_symbol()) * self.coding_rate_value
    }

    /// Convert a volume in kilobits to symbols, rounding up.
    pub fn kbits_to_sym(&self, vol_kb: VolKb) -> VolSym {
        (f64::from(vol_kb) * 1000.0 / self.bits_per_symbol()).ceil() as VolSym
    }

    /// Convert a volume in symbols to kilobits, rounding up.
    pub fn sym_to_kbits(&self, vol_sym: VolSym) -> VolKb {
        (f64::from(vol_sym) * self.bits_per_symbol() / 1000.0).ceil() as VolKb
    }

    /// Convert a rate in kb/s to symbols per second, rounding up.
    pub fn kbps_to_symps(&self, rate_kbps: RateKbps) -> RateSymps {
        (f64::from(rate_kbps) * 1000.0 / self.bits_per_symbol()).ceil() as RateSymps
    }

    /// Convert a rate in symbols per second to kb/s, rounding up.
    pub fn symps_to_kbps(&self, rate_symps: RateSymps) -> RateKbps {
        (f64::from(rate_symps) * self.bits_per_symbol() / 1000.0).ceil() as RateKbps
    }

    /// Symbols needed to sustain `rate_kbps` over `duration`, as an exact
    /// floating-point volume. The fractional part matters to the schedulers,
    /// which carry it between frames.
    pub fn rate_to_volume_sym(&self, rate_kbps: RateKbps, duration: Duration) -> f64 {
        f64::from(rate_kbps) * 1000.0 * duration.as_secs_f64() / self.bits_per_symbol()
    }

    /// The rate in kb/s that a symbol volume represents over `duration`.
    pub fn volume_sym_to_rate(&self, vol_sym: f64, duration: Duration) -> f64 {
        vol_sym * self.bits_per_symbol() / (1000.0 * duration.as_secs_f64())
    }
}

/// Table of MODCOD definitions, keyed by id.
///
/// Iteration order by robustness (ascending required Es/N0) is derived on
/// demand; the least robust id is the one with the highest Es/N0 requirement.
#[derive(Debug, Clone, Default)]
pub struct FmtDefinitionTable {
    definitions: BTreeMap<FmtId, FmtDefinition>,
}

impl FmtDefinitionTable {
    pub fn new() -> Self {
        FmtDefinitionTable {
            definitions: BTreeMap::new(),
        }
    }

    /// Add a definition. Duplicate ids are a configuration error.
    pub fn add(&mut self, definition: FmtDefinition) -> Result<(), DvbError> {
        let id = definition.id();
        if self.definitions.contains_key(&id) {
            return Err(DvbError::ConfigInvalid(format!(
                "duplicate MODCOD id {id} in FMT definitions"
            )));
        }
        self.definitions.insert(id, definition);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn contains(&self, id: FmtId) -> bool {
        self.definitions.contains_key(&id)
    }

    pub fn get(&self, id: FmtId) -> Result<&FmtDefinition, DvbError> {
        self.definitions.get(&id).ok_or(DvbError::UnknownModcod(id))
    }

    /// Required Es/N0 in dB for a MODCOD id.
    pub fn required_es_n0(&self, id: FmtId) -> Result<f64, DvbError> {
        Ok(self.get(id)?.required_es_n0())
    }

    /// Ids sorted by ascending required Es/N0 (most robust first).
    pub fn ids_by_robustness(&self) -> Vec<FmtId> {
        let mut ids: Vec<FmtId> = self.definitions.keys().copied().collect();
        ids.sort_by(|a, b| {
            let ea = self.definitions[a].required_es_n0();
            let eb = self.definitions[b].required_es_n0();
            ea.partial_cmp(&eb).unwrap_or(std::cmp::Ordering::Equal)
        });
        ids
    }

    /// The least robust MODCOD of the table (highest required Es/N0).
    pub fn max_id(&self) -> Result<FmtId, DvbError> {
        self.ids_by_robustness()
            .last()
            .copied()
            .ok_or_else(|| DvbError::ConfigInvalid("empty FMT definition table".into()))
    }

    /// The most robust MODCOD of the table (lowest required Es/N0).
    pub fn min_id(&self) -> Result<FmtId, DvbError> {
        self.ids_by_robustness()
            .first()
            .copied()
            .ok_or_else(|| DvbError::ConfigInvalid("empty FMT definition table".into()))
    }

    /// ACM selection: the highest-efficiency MODCOD whose required Es/N0 is
    /// below or equal to the measured C/N. Falls back to the most robust
    /// MODCOD when the link is below every threshold.
    pub fn best_id_for_cn(&self, cn_db: f64) -> Result<FmtId, DvbError> {
        let mut best: Option<&FmtDefinition> = None;
        for definition in self.definitions.values() {
            if definition.required_es_n0() <= cn_db {
                let better = match best {
                    None => true,
                    Some(current) => {
                        definition.spectral_efficiency() > current.spectral_efficiency()
                    }
                };
                if better {
                    best = Some(definition);
                }
            }
        }
        match best {
            Some(definition) => Ok(definition.id()),
            None => self.min_id(),
        }
    }

    /// The default forward-link (DVB-S2) MODCOD table.
    pub fn default_s2() -> Self {
        DEFAULT_S2.clone()
    }

    /// The default return-link (DVB-RCS2) MODCOD table, 536-symbol bursts.
    pub fn default_rcs2() -> Self {
        DEFAULT_RCS2.clone()
    }
}

static DEFAULT_S2: Lazy<FmtDefinitionTable> = Lazy::new(|| {
    let rows: &[(FmtId, Modulation, &str, f64, f64)] = &[
        (1, Modulation::Qpsk, "1/4", 0.490, -2.35),
        (2, Modulation::Qpsk, "1/3", 0.656, -1.24),
        (3, Modulation::Qpsk, "2/5", 0.789, -0.30),
        (4, Modulation::Qpsk, "1/2", 0.988, 1.00),
        (5, Modulation::Qpsk, "3/5", 1.188, 2.23),
        (6, Modulation::Qpsk, "2/3", 1.322, 3.10),
        (7, Modulation::Qpsk, "3/4", 1.487, 4.03),
        (8, Modulation::Qpsk, "4/5", 1.587, 4.68),
        (9, Modulation::Qpsk, "5/6", 1.654, 5.18),
        (10, Modulation::Psk8, "3/5", 1.779, 5.50),
        (11, Modulation::Psk8, "2/3", 1.980, 6.62),
        (12, Modulation::Psk8, "3/4", 2.228, 7.91),
        (13, Modulation::Apsk16, "2/3", 2.637, 8.97),
        (14, Modulation::Apsk16, "3/4", 2.966, 10.21),
        (15, Modulation::Apsk16, "4/5", 3.165, 11.03),
        (16, Modulation::Apsk16, "5/6", 3.300, 11.61),
        (17, Modulation::Apsk32, "3/4", 3.703, 12.73),
        (18, Modulation::Apsk32, "4/5", 3.951, 13.64),
    ];
    build_table(rows, None)
});

static DEFAULT_RCS2: Lazy<FmtDefinitionTable> = Lazy::new(|| {
    let rows: &[(FmtId, Modulation, &str, f64, f64)] = &[
        (3, Modulation::Qpsk, "1/3", 0.667, 0.22),
        (4, Modulation::Qpsk, "1/2", 1.000, 2.34),
        (5, Modulation::Qpsk, "2/3", 1.333, 4.29),
        (6, Modulation::Qpsk, "3/4", 1.500, 5.36),
        (7, Modulation::Qpsk, "5/6", 1.667, 6.68),
        (8, Modulation::Psk8, "2/3", 2.000, 8.08),
        (9, Modulation::Psk8, "3/4", 2.250, 9.31),
    ];
    build_table(rows, Some(536))
});

fn build_table(
    rows: &[(FmtId, Modulation, &str, f64, f64)],
    burst_length_sym: Option<VolSym>,
) -> FmtDefinitionTable {
    let mut table = FmtDefinitionTable::new();
    for &(id, modulation, rate, eff, esn0) in rows {
        // static rows, every entry is valid by construction
        if let Ok(def) = FmtDefinition::new(id, modulation, rate, eff, esn0, burst_length_sym) {
            let _ = table.add(def);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_rate_parses_fractions() {
        assert!((parse_coding_rate("1/2").unwrap() - 0.5).abs() < 1e-9);
        assert!((parse_coding_rate("3/4").unwrap() - 0.75).abs() < 1e-9);
        assert!(parse_coding_rate("4/3").is_err());
        assert!(parse_coding_rate("x/2").is_err());
    }

    #[test]
    fn conversions_are_consistent() {
        // QPSK 1/2 carries exactly one useful bit per symbol.
        let def = FmtDefinition::new(4, Modulation::Qpsk, "1/2", 1.0, 2.34, None).unwrap();
        assert_eq!(def.kbits_to_sym(8), 8000);
        assert_eq!(def.sym_to_kbits(8000), 8);
        assert_eq!(def.kbps_to_symps(512), 512_000);
    }

    #[test]
    fn acm_selection_prefers_efficiency() {
        let table = FmtDefinitionTable::default_s2();
        // Between QPSK 2/3 (3.10 dB) and QPSK 3/4 (4.03 dB).
        assert_eq!(table.best_id_for_cn(3.5).unwrap(), 6);
        // Below every threshold: most robust.
        assert_eq!(table.best_id_for_cn(-10.0).unwrap(), 1);
        // Above every threshold: least robust.
        assert_eq!(table.best_id_for_cn(20.0).unwrap(), table.max_id().unwrap());
    }
}
