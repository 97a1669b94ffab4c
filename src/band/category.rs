//! # Terminal Category
//!
//! A terminal category is a named bucket of carriers groups sharing one
//! intended access type, plus the terminals affected to it. Carriers of
//! other access types are kept aside until band computation, since the
//! weighted bandwidth split runs over the whole declared band.

use crate::band::carriers::CarriersGroup;
use crate::error::DvbError;
use crate::fmt::FmtGroup;
use crate::types::{AccessType, RateKbps, RateSymps, TalId};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TerminalCategory {
    label: String,
    desired_access: AccessType,
    carriers_groups: Vec<CarriersGroup>,
    /// Carriers with another access type, needed only for band computation.
    other_carriers: Vec<CarriersGroup>,
    terminals: Vec<TalId>,
    /// symbol rate -> number of carriers, for the reallocation walk.
    symbol_rate_list: BTreeMap<RateSymps, u32>,
}

impl TerminalCategory {
    pub fn new(label: &str, desired_access: AccessType) -> Self {
        TerminalCategory {
            label: label.to_string(),
            desired_access,
            carriers_groups: Vec::new(),
            other_carriers: Vec::new(),
            terminals: Vec::new(),
            symbol_rate_list: BTreeMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn desired_access(&self) -> AccessType {
        self.desired_access
    }

    /// Weighted sum of ratio x symbol rate over every carriers group, in
    /// kilo-symbols per second (the bandplan is expressed in kHz).
    pub fn weighted_sum(&self) -> f64 {
        let groups = self.carriers_groups.iter().chain(self.other_carriers.iter());
        groups
            .map(|c| f64::from(c.ratio()) * f64::from(c.symbol_rate()))
            .sum::<f64>()
            / 1e3
    }

    /// Total occupation ratio over every carriers group.
    pub fn total_ratio(&self) -> u32 {
        self.carriers_groups
            .iter()
            .chain(self.other_carriers.iter())
            .map(CarriersGroup::ratio)
            .sum()
    }

    /// Number of carriers with the desired access type.
    pub fn carriers_number(&self) -> u32 {
        self.carriers_groups
            .iter()
            .map(CarriersGroup::carriers_number)
            .sum()
    }

    /// Total symbol rate across every group, including other access types.
    pub fn total_symbol_rate(&self) -> u64 {
        self.carriers_groups
            .iter()
            .chain(self.other_carriers.iter())
            .map(|c| u64::from(c.carriers_number()) * u64::from(c.symbol_rate()))
            .sum()
    }

    /// Total capacity per superframe for the desired access type, in symbols.
    pub fn total_capacity_sym(&self) -> u64 {
        self.carriers_groups
            .iter()
            .map(CarriersGroup::total_capacity_sym)
            .sum()
    }

    /// Sum of the maximum rates of the desired-access carriers.
    pub fn max_rate_kbps(&self) -> Result<RateKbps, DvbError> {
        let mut total = 0;
        for carriers in &self.carriers_groups {
            total += carriers.max_rate_kbps()?;
        }
        Ok(total)
    }

    /// Add a carriers group declaration. A declaration with a carriers id
    /// already present is a VCM region of that carrier.
    pub fn add_carriers_group(
        &mut self,
        carriers_id: u8,
        fmt_group: Arc<FmtGroup>,
        ratio: u32,
        symbol_rate_symps: RateSymps,
        access_type: AccessType,
    ) {
        for carriers in self
            .carriers_groups
            .iter_mut()
            .chain(self.other_carriers.iter_mut())
        {
            if carriers.carriers_id() == carriers_id {
                carriers.add_vcm(fmt_group, ratio);
                return;
            }
        }

        let mut group = CarriersGroup::new(
            carriers_id,
            fmt_group.clone(),
            ratio,
            symbol_rate_symps,
            access_type,
        );
        group.add_vcm(fmt_group, ratio);
        if access_type == self.desired_access {
            self.carriers_groups.push(group);
        } else {
            self.other_carriers.push(group);
        }
        self.symbol_rate_list.entry(symbol_rate_symps).or_insert(0);
    }

    /// Set the number and per-superframe capacity of the carriers in each
    /// group, splitting `carriers_number` according to group ratios.
    pub fn update_carriers_groups(
        &mut self,
        carriers_number: u32,
        superframe_duration: Duration,
    ) {
        let total_ratio = self.total_ratio();
        let mut carriers_number = carriers_number;

        if (carriers_number as usize) < self.carriers_groups.len() {
            warn!(
                "not enough carriers for category {} that contains {} groups, \
                 increase carriers number to the number of groups",
                self.label,
                self.carriers_groups.len()
            );
            carriers_number = self.carriers_groups.len() as u32;
        }

        for carriers in &mut self.carriers_groups {
            let share = f64::from(carriers_number) * f64::from(carriers.ratio())
                / f64::from(total_ratio.max(1));
            let number = (share.round() as u32).max(1);
            carriers.set_carriers_number(number);
            carriers.update_capacity(superframe_duration);
            info!(
                "carrier group {}: {} carriers of {} sym/s, {} sym per superframe",
                carriers.carriers_id(),
                number,
                carriers.symbol_rate(),
                carriers.capacity_sym()
            );
            *self.symbol_rate_list.entry(carriers.symbol_rate()).or_insert(0) += number;
        }
        // other carriers only mattered for the weighted split
        self.other_carriers.clear();
    }

    pub fn add_terminal(&mut self, tal_id: TalId) {
        if !self.terminals.contains(&tal_id) {
            self.terminals.push(tal_id);
        }
    }

    pub fn remove_terminal(&mut self, tal_id: TalId) -> bool {
        match self.terminals.iter().position(|t| *t == tal_id) {
            Some(index) => {
                self.terminals.remove(index);
                true
            }
            None => {
                warn!("ST{} not registered on category {}", tal_id, self.label);
                false
            }
        }
    }

    pub fn terminals(&self) -> &[TalId] {
        &self.terminals
    }

    pub fn carriers_groups(&self) -> &[CarriersGroup] {
        &self.carriers_groups
    }

    pub fn carriers_groups_mut(&mut self) -> &mut [CarriersGroup] {
        &mut self.carriers_groups
    }

    /// The symbol rate -> carriers count table of the category.
    pub fn symbol_rate_list(&self) -> &BTreeMap<RateSymps, u32> {
        &self.symbol_rate_list
    }

    /// The FMT group shared by the category carriers, if any.
    pub fn fmt_group(&self) -> Option<&Arc<FmtGroup>> {
        self.carriers_groups.first().map(CarriersGroup::fmt_group)
    }

    pub fn highest_carrier_id(&self) -> u8 {
        self.carriers_groups
            .iter()
            .map(CarriersGroup::carriers_id)
            .max()
            .unwrap_or(0)
    }

    /// First carrier id usable by a terminal of this category.
    pub fn first_carrier_id(&self) -> Option<u8> {
        self.carriers_groups.first().map(CarriersGroup::carriers_id)
    }

    /// Remove `number` carriers of the given symbol rate, returning the
    /// occupation ratio they carried. Partial removals scale the group
    /// ratio proportionally.
    pub fn deallocate_carriers(
        &mut self,
        symbol_rate: RateSymps,
        number: u32,
    ) -> Result<u32, DvbError> {
        let mut remaining = number;
        let mut associated_ratio = 0;

        for carriers in &mut self.carriers_groups {
            if remaining == 0 {
                break;
            }
            if carriers.symbol_rate() != symbol_rate {
                continue;
            }
            let actual = carriers.carriers_number();
            if actual == 0 {
                continue;
            }
            let ratio = carriers.ratio();
            if actual <= remaining {
                remaining -= actual;
                carriers.set_carriers_number(0);
                carriers.set_ratio(0);
                associated_ratio += ratio;
            } else {
                let kept = actual - remaining;
                let new_ratio =
                    ((f64::from(ratio) * f64::from(kept) / f64::from(actual)) + 0.5).floor() as u32;
                associated_ratio += ratio - new_ratio;
                carriers.set_ratio(new_ratio);
                carriers.set_carriers_number(kept);
                remaining = 0;
            }
        }

        if remaining > 0 {
            return Err(DvbError::InsufficientBand(format!(
                "category {} cannot release {} carriers at {} sym/s",
                self.label, number, symbol_rate
            )));
        }
        if let Some(count) = self.symbol_rate_list.get_mut(&symbol_rate) {
            *count = count.saturating_sub(number);
        }
        Ok(associated_ratio)
    }

    /// Add `number` carriers of the given symbol rate carrying `ratio`.
    /// Merges into an existing group with the same symbol rate, otherwise
    /// creates a new group reusing the category FMT group (or `model` when
    /// the category is empty, as for a drained reservoir).
    pub fn allocate_carriers(
        &mut self,
        symbol_rate: RateSymps,
        number: u32,
        ratio: u32,
        superframe_duration: Duration,
        model: Option<Arc<FmtGroup>>,
    ) -> Result<(), DvbError> {
        let next_id = self.highest_carrier_id().wrapping_add(1);
        let existing = self
            .carriers_groups
            .iter()
            .position(|c| c.symbol_rate() == symbol_rate);
        if let Some(index) = existing {
            let carriers = &mut self.carriers_groups[index];
            carriers.set_carriers_number(carriers.carriers_number() + number);
            carriers.set_ratio(carriers.ratio() + ratio);
            if carriers.capacity_sym() == 0 {
                carriers.update_capacity(superframe_duration);
            }
        } else {
            let fmt_group = self
                .fmt_group()
                .cloned()
                .or(model)
                .ok_or_else(|| {
                    DvbError::InsufficientBand(format!(
                        "category {} has no carriers group to model new carriers on",
                        self.label
                    ))
                })?;
            let mut group = CarriersGroup::new(
                next_id,
                fmt_group.clone(),
                ratio,
                symbol_rate,
                self.desired_access,
            );
            group.add_vcm(fmt_group, ratio);
            group.set_carriers_number(number);
            group.update_capacity(superframe_duration);
            self.carriers_groups.push(group);
        }
        *self.symbol_rate_list.entry(symbol_rate).or_insert(0) += number;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::FmtDefinitionTable;

    fn fmt_group(id: u32) -> Arc<FmtGroup> {
        let table = Arc::new(FmtDefinitionTable::default_rcs2());
        Arc::new(FmtGroup::new(id, "4", table).unwrap())
    }

    #[test]
    fn weighted_sum_counts_other_access() {
        let mut category = TerminalCategory::new("Standard", AccessType::Dama);
        category.add_carriers_group(0, fmt_group(1), 10, 1_000_000, AccessType::Dama);
        category.add_carriers_group(1, fmt_group(2), 10, 500_000, AccessType::Aloha);
        // (10 * 1e6 + 10 * 5e5) / 1e3
        assert!((category.weighted_sum() - 15_000.0).abs() < 1e-9);
        assert_eq!(category.total_ratio(), 20);
    }

    #[test]
    fn update_assigns_at_least_one_carrier_per_group() {
        let mut category = TerminalCategory::new("Standard", AccessType::Dama);
        category.add_carriers_group(0, fmt_group(1), 100, 1_000_000, AccessType::Dama);
        category.add_carriers_group(1, fmt_group(2), 1, 1_000_000, AccessType::Dama);
        category.update_carriers_groups(2, Duration::from_secs(1));
        for carriers in category.carriers_groups() {
            assert!(carriers.carriers_number() >= 1);
        }
    }

    #[test]
    fn deallocate_partial_scales_ratio() {
        let mut category = TerminalCategory::new("SNO", AccessType::Dama);
        category.add_carriers_group(0, fmt_group(1), 100, 1_000_000, AccessType::Dama);
        category.update_carriers_groups(4, Duration::from_secs(1));
        let ratio = category.deallocate_carriers(1_000_000, 2).unwrap();
        assert_eq!(ratio, 50);
        assert_eq!(category.carriers_number(), 2);
    }
}
