//! # Carriers Group
//!
//! A carriers group is a set of identical carriers inside a terminal
//! category: same symbol rate, same access type, same FMT group. VCM
//! carriers additionally split one carrier into several MODCOD regions
//! with fixed ratios.

use crate::error::DvbError;
use crate::fmt::FmtGroup;
use crate::types::{AccessType, RateKbps, RateSymps, VolSym};
use std::sync::Arc;
use std::time::Duration;

/// One VCM region of a carrier: an FMT group and its time-share ratio.
#[derive(Debug, Clone)]
pub struct VcmEntry {
    pub fmt_group: Arc<FmtGroup>,
    pub ratio: u32,
}

#[derive(Debug, Clone)]
pub struct CarriersGroup {
    carriers_id: u8,
    fmt_group: Arc<FmtGroup>,
    ratio: u32,
    symbol_rate_symps: RateSymps,
    access_type: AccessType,
    carriers_number: u32,
    /// Capacity of one carrier over a superframe, in symbols.
    capacity_sym: VolSym,
    vcm: Vec<VcmEntry>,
}

impl CarriersGroup {
    pub fn new(
        carriers_id: u8,
        fmt_group: Arc<FmtGroup>,
        ratio: u32,
        symbol_rate_symps: RateSymps,
        access_type: AccessType,
    ) -> Self {
        CarriersGroup {
            carriers_id,
            fmt_group,
            ratio,
            symbol_rate_symps,
            access_type,
            carriers_number: 0,
            capacity_sym: 0,
            vcm: Vec::new(),
        }
    }

    pub fn carriers_id(&self) -> u8 {
        self.carriers_id
    }

    pub fn fmt_group(&self) -> &Arc<FmtGroup> {
        &self.fmt_group
    }

    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    pub fn set_ratio(&mut self, ratio: u32) {
        self.ratio = ratio;
    }

    pub fn symbol_rate(&self) -> RateSymps {
        self.symbol_rate_symps
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn carriers_number(&self) -> u32 {
        self.carriers_number
    }

    pub fn set_carriers_number(&mut self, number: u32) {
        self.carriers_number = number;
    }

    /// Capacity of one carrier per superframe, in symbols.
    pub fn capacity_sym(&self) -> VolSym {
        self.capacity_sym
    }

    pub fn set_capacity_sym(&mut self, capacity: VolSym) {
        self.capacity_sym = capacity;
    }

    /// Compute and store the per-carrier capacity for a superframe duration.
    pub fn update_capacity(&mut self, superframe_duration: Duration) {
        self.capacity_sym =
            (f64::from(self.symbol_rate_symps) * superframe_duration.as_secs_f64()) as VolSym;
    }

    /// Total capacity of the group per superframe, in symbols.
    pub fn total_capacity_sym(&self) -> u64 {
        u64::from(self.carriers_number) * u64::from(self.capacity_sym)
    }

    /// Add a VCM region. A VCM carrier with several regions is legal only
    /// for DAMA and TDM access; callers enforce this at band-plan build.
    pub fn add_vcm(&mut self, fmt_group: Arc<FmtGroup>, ratio: u32) {
        if !self.vcm.is_empty() {
            self.ratio += ratio;
        }
        self.vcm.push(VcmEntry { fmt_group, ratio });
    }

    pub fn vcm(&self) -> &[VcmEntry] {
        &self.vcm
    }

    pub fn is_vcm(&self) -> bool {
        self.vcm.len() > 1
    }

    /// The maximum rate the whole group can carry, using the least robust
    /// MODCOD of its FMT group.
    pub fn max_rate_kbps(&self) -> Result<RateKbps, DvbError> {
        let max_id = self.fmt_group.max_fmt_id();
        let definition = self.fmt_group.modcod_definitions().get(max_id)?;
        let per_carrier =
            definition.symps_to_kbps(self.symbol_rate_symps);
        Ok(per_carrier * self.carriers_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::FmtDefinitionTable;

    fn group() -> CarriersGroup {
        let table = Arc::new(FmtDefinitionTable::default_rcs2());
        let fmt_group = Arc::new(FmtGroup::new(1, "4", table).unwrap());
        CarriersGroup::new(0, fmt_group, 10, 1_000_000, AccessType::Dama)
    }

    #[test]
    fn capacity_follows_superframe_duration() {
        let mut carriers = group();
        carriers.update_capacity(Duration::from_millis(500));
        assert_eq!(carriers.capacity_sym(), 500_000);
        carriers.set_carriers_number(3);
        assert_eq!(carriers.total_capacity_sym(), 1_500_000);
    }

    #[test]
    fn vcm_entries_accumulate_ratio() {
        let mut carriers = group();
        let table = Arc::new(FmtDefinitionTable::default_rcs2());
        let extra = Arc::new(FmtGroup::new(2, "5", table).unwrap());
        carriers.add_vcm(carriers.fmt_group().clone(), 10);
        assert_eq!(carriers.ratio(), 10);
        carriers.add_vcm(extra, 5);
        assert_eq!(carriers.ratio(), 15);
        assert!(carriers.is_vcm());
    }
}
