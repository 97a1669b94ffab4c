//! # Band Planner
//!
//! Splits a spot bandplan into terminal categories and concrete carriers
//! groups under a weighted ratio policy, applies terminal affectation, and
//! moves carriers between a category and the `"SNO"` reservoir on dynamic
//! reallocation requests.

pub mod carriers;
pub mod category;

pub use carriers::CarriersGroup;
pub use category::TerminalCategory;

use crate::constants::RESERVOIR_CATEGORY;
use crate::error::DvbError;
use crate::fmt::{FmtDefinitionTable, FmtGroup};
use crate::types::{AccessType, RateKbps, RateSymps, TalId};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// One carrier line of a spot bandplan declaration.
#[derive(Debug, Clone)]
pub struct CarrierSpec {
    pub category: String,
    pub access_type: AccessType,
    pub symbol_rate_symps: RateSymps,
    /// (FMT group spec, ratio) entries; more than one entry means VCM.
    pub format_ratios: Vec<(String, u32)>,
}

/// The spot-level inputs of the band computation.
#[derive(Debug, Clone)]
pub struct BandConfig {
    pub bandwidth_khz: u32,
    pub roll_off: f64,
    pub superframe_duration: Duration,
    pub carriers: Vec<CarrierSpec>,
}

/// The computed band plan for one access type of a spot.
#[derive(Debug)]
pub struct BandPlan {
    access_type: AccessType,
    superframe_duration: Duration,
    categories: BTreeMap<String, TerminalCategory>,
    terminal_affectation: HashMap<TalId, Option<String>>,
    default_category: Option<String>,
    fmt_groups: Vec<Arc<FmtGroup>>,
}

impl BandPlan {
    /// Build the band plan for `access_type` from a spot declaration.
    ///
    /// Every declared carrier participates in the weighted split; only the
    /// categories that end up with carriers of the desired access type are
    /// kept. Terminals without an explicit affectation fall back to the
    /// named default category when one exists.
    pub fn compute(
        config: &BandConfig,
        access_type: AccessType,
        fmt_def: &Arc<FmtDefinitionTable>,
        affectation: &HashMap<TalId, String>,
        default_category: Option<&str>,
    ) -> Result<Self, DvbError> {
        let mut categories: BTreeMap<String, TerminalCategory> = BTreeMap::new();
        let mut fmt_groups = Vec::new();
        let mut group_id = 0u32;

        for (carrier_id, carrier) in config.carriers.iter().enumerate() {
            let carrier_id = carrier_id as u8;
            let is_vcm = carrier.format_ratios.len() > 1;
            for (fmt_ids, ratio) in &carrier.format_ratios {
                let group = if carrier.access_type == access_type {
                    group_id += 1;
                    let group = Arc::new(FmtGroup::new(group_id, fmt_ids, fmt_def.clone())?);
                    if (is_vcm || access_type == AccessType::Aloha) && group.len() > 1 {
                        return Err(DvbError::ConfigInvalid(
                            "carrier cannot have more than one MODCOD for Slotted Aloha or VCM"
                                .into(),
                        ));
                    }
                    if is_vcm
                        && !matches!(carrier.access_type, AccessType::Dama | AccessType::Tdm)
                    {
                        return Err(DvbError::ConfigInvalid(format!(
                            "VCM carriers are only allowed for DAMA or TDM, not {}",
                            carrier.access_type
                        )));
                    }
                    fmt_groups.push(group.clone());
                    group
                } else {
                    // other-access carriers only weigh in the band split;
                    // their FMT groups are never consulted
                    Arc::new(FmtGroup::new(0, fmt_ids, fmt_def.clone())?)
                };

                info!(
                    "new carriers: category={}, Rs={}, FMTs={}, ratio={}, access type={}",
                    carrier.category, carrier.symbol_rate_symps, fmt_ids, ratio,
                    carrier.access_type
                );

                let category = categories
                    .entry(carrier.category.clone())
                    .or_insert_with(|| TerminalCategory::new(&carrier.category, access_type));
                category.add_carriers_group(
                    carrier_id,
                    group,
                    *ratio,
                    carrier.symbol_rate_symps,
                    carrier.access_type,
                );
            }
        }

        compute_bandplan(
            config.bandwidth_khz,
            config.roll_off,
            config.superframe_duration,
            &mut categories,
        )?;

        // drop categories with no carriers of the desired access type
        categories.retain(|label, category| {
            if category.carriers_number() == 0 {
                debug!("skip category {label} with no carriers of the desired access type");
                false
            } else {
                true
            }
        });

        let default_category = default_category
            .filter(|name| categories.contains_key(*name))
            .map(str::to_string);
        if default_category.is_none() {
            info!("no default category for access type {access_type}");
        }

        let mut terminal_affectation = HashMap::new();
        for (&tal_id, name) in affectation {
            match categories.get_mut(name) {
                Some(category) => {
                    category.add_terminal(tal_id);
                    terminal_affectation.insert(tal_id, Some(name.clone()));
                }
                None => {
                    info!(
                        "could not find category {name} for terminal {tal_id} affectation, \
                         it is maybe concerned by another access type"
                    );
                    // keep an explicit no-category affectation so the
                    // default category is not applied to this terminal
                    terminal_affectation.insert(tal_id, None);
                }
            }
        }

        Ok(BandPlan {
            access_type,
            superframe_duration: config.superframe_duration,
            categories,
            terminal_affectation,
            default_category,
            fmt_groups,
        })
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn categories(&self) -> &BTreeMap<String, TerminalCategory> {
        &self.categories
    }

    pub fn categories_mut(&mut self) -> &mut BTreeMap<String, TerminalCategory> {
        &mut self.categories
    }

    pub fn category(&self, label: &str) -> Option<&TerminalCategory> {
        self.categories.get(label)
    }

    pub fn fmt_groups(&self) -> &[Arc<FmtGroup>] {
        &self.fmt_groups
    }

    /// The category a terminal belongs to: its explicit affectation, or the
    /// default category when it has none.
    pub fn category_for(&self, tal_id: TalId) -> Option<&str> {
        match self.terminal_affectation.get(&tal_id) {
            Some(Some(label)) => Some(label.as_str()),
            Some(None) => None,
            None => self.default_category.as_deref(),
        }
    }

    /// Register a terminal into its category at logon.
    pub fn register_terminal(&mut self, tal_id: TalId) -> Option<String> {
        let label = self.category_for(tal_id)?.to_string();
        self.categories.get_mut(&label)?.add_terminal(tal_id);
        Some(label)
    }

    pub fn unregister_terminal(&mut self, tal_id: TalId, label: &str) {
        if let Some(category) = self.categories.get_mut(label) {
            category.remove_terminal(tal_id);
        }
    }

    /// Grow `label` to sustain `new_rate_kbps`, taking carriers from the
    /// `"SNO"` reservoir, largest symbol rate first. Carriers are moved
    /// whole; when the remainder cannot be met by a smaller carrier, one
    /// next-larger carrier is taken instead and the overshoot stays with
    /// the target.
    pub fn allocate_band(&mut self, label: &str, new_rate_kbps: RateKbps) -> Result<(), DvbError> {
        let needed_symps = self.rate_to_symps(label, new_rate_kbps)?;
        let current: u64 = self
            .category(label)
            .map(|c| c.total_symbol_rate())
            .unwrap_or(0);
        if needed_symps <= current {
            debug!("category {label} already sustains {new_rate_kbps} kb/s");
            return Ok(());
        }
        let mut delta = needed_symps - current;

        // plan the moves against the reservoir symbol-rate table
        let reservoir = self.categories.get(RESERVOIR_CATEGORY).ok_or_else(|| {
            DvbError::InsufficientBand("no reservoir category in the band plan".into())
        })?;
        let mut moves: Vec<(RateSymps, u32)> = Vec::new();
        let available: Vec<(RateSymps, u32)> = reservoir
            .symbol_rate_list()
            .iter()
            .rev()
            .map(|(rs, count)| (*rs, *count))
            .collect();
        for (rs, count) in &available {
            if delta == 0 || *count == 0 {
                continue;
            }
            let wanted = (delta / u64::from(*rs)) as u32;
            let take = wanted.min(*count);
            if take > 0 {
                moves.push((*rs, take));
                delta -= u64::from(take) * u64::from(*rs);
            }
        }
        if delta > 0 {
            // remainder: smallest reservoir carrier at least as large
            let topper = available
                .iter()
                .rev()
                .find(|(rs, count)| u64::from(*rs) >= delta && *count > 0)
                .map(|(rs, _)| *rs);
            match topper {
                Some(rs) => {
                    match moves.iter().position(|(r, _)| *r == rs) {
                        Some(index) => moves[index].1 += 1,
                        None => moves.push((rs, 1)),
                    }
                    delta = 0;
                }
                None => {
                    return Err(DvbError::InsufficientBand(format!(
                        "reservoir exhausted while growing category {label} to {new_rate_kbps} kb/s"
                    )));
                }
            }
        }
        debug_assert_eq!(delta, 0);

        let duration = self.superframe_duration;
        for (rs, count) in moves {
            let ratio = self
                .categories
                .get_mut(RESERVOIR_CATEGORY)
                .ok_or_else(|| DvbError::InsufficientBand("reservoir category vanished".into()))?
                .deallocate_carriers(rs, count)?;
            self.categories
                .get_mut(label)
                .ok_or_else(|| DvbError::ConfigInvalid(format!("unknown category {label}")))?
                .allocate_carriers(rs, count, ratio, duration, None)?;
            info!("moved {count} carriers of {rs} sym/s from {RESERVOIR_CATEGORY} to {label}");
        }
        Ok(())
    }

    /// Shrink `label` towards `new_rate_kbps`, releasing whole carriers to
    /// the `"SNO"` reservoir, largest first, never dropping the category
    /// below the target rate.
    pub fn release_band(&mut self, label: &str, new_rate_kbps: RateKbps) -> Result<(), DvbError> {
        let needed_symps = self.rate_to_symps(label, new_rate_kbps)?;
        let current: u64 = self
            .category(label)
            .map(|c| c.total_symbol_rate())
            .unwrap_or(0);
        if current <= needed_symps {
            debug!("category {label} already at or below {new_rate_kbps} kb/s");
            return Ok(());
        }
        let mut delta = current - needed_symps;

        let target = self
            .categories
            .get(label)
            .ok_or_else(|| DvbError::ConfigInvalid(format!("unknown category {label}")))?;
        let mut moves: Vec<(RateSymps, u32)> = Vec::new();
        let available: Vec<(RateSymps, u32)> = target
            .symbol_rate_list()
            .iter()
            .rev()
            .map(|(rs, count)| (*rs, *count))
            .collect();
        for (rs, count) in &available {
            if delta == 0 || *count == 0 {
                continue;
            }
            let wanted = (delta / u64::from(*rs)) as u32;
            let take = wanted.min(*count);
            if take > 0 {
                moves.push((*rs, take));
                delta -= u64::from(take) * u64::from(*rs);
            }
        }
        // carriers are not subdivided: a remainder smaller than every
        // remaining carrier stays with the target category

        let duration = self.superframe_duration;
        let model = self
            .categories
            .get(label)
            .and_then(TerminalCategory::fmt_group)
            .cloned();
        if !self.categories.contains_key(RESERVOIR_CATEGORY) {
            self.categories.insert(
                RESERVOIR_CATEGORY.to_string(),
                TerminalCategory::new(RESERVOIR_CATEGORY, self.access_type),
            );
        }
        for (rs, count) in moves {
            let ratio = self
                .categories
                .get_mut(label)
                .ok_or_else(|| DvbError::ConfigInvalid(format!("unknown category {label}")))?
                .deallocate_carriers(rs, count)?;
            self.categories
                .get_mut(RESERVOIR_CATEGORY)
                .ok_or_else(|| DvbError::InsufficientBand("reservoir category vanished".into()))?
                .allocate_carriers(rs, count, ratio, duration, model.clone())?;
            info!("released {count} carriers of {rs} sym/s from {label} to {RESERVOIR_CATEGORY}");
        }
        Ok(())
    }

    /// Convert a target rate to symbols per second using the least robust
    /// MODCOD available to the category.
    fn rate_to_symps(&self, label: &str, rate_kbps: RateKbps) -> Result<u64, DvbError> {
        let category = self
            .categories
            .get(label)
            .ok_or_else(|| DvbError::ConfigInvalid(format!("unknown category {label}")))?;
        let group = category.fmt_group().ok_or_else(|| {
            DvbError::InsufficientBand(format!("category {label} has no carriers"))
        })?;
        let definition = group.modcod_definitions().get(group.max_fmt_id())?;
        Ok(u64::from(definition.kbps_to_symps(rate_kbps)))
    }
}

/// Compute the number of carriers of every category from the weighted
/// ratios, then derive per-carrier capacities.
pub fn compute_bandplan(
    bandwidth_khz: u32,
    roll_off: f64,
    superframe_duration: Duration,
    categories: &mut BTreeMap<String, TerminalCategory>,
) -> Result<(), DvbError> {
    let weighted_sum_ksymps: f64 = categories.values().map(TerminalCategory::weighted_sum).sum();
    debug!("weighted ratio sum: {weighted_sum_ksymps} ksym/s");

    if weighted_sum_ksymps == 0.0 {
        return Err(DvbError::ConfigInvalid("weighted ratio sum is 0".into()));
    }

    for category in categories.values_mut() {
        let ratio = category.total_ratio();
        let mut carriers_number = ((f64::from(ratio) / weighted_sum_ksymps)
            * (f64::from(bandwidth_khz) / (1.0 + roll_off)))
            .round() as u32;
        if carriers_number == 0 {
            warn!("band is too small for one carrier, increase band for one carrier");
            carriers_number = 1;
        }
        info!(
            "number of carriers for category {}: {}",
            category.label(),
            carriers_number
        );
        category.update_carriers_groups(carriers_number, superframe_duration);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_carrier_config(access: AccessType) -> BandConfig {
        BandConfig {
            bandwidth_khz: 1_000,
            roll_off: 0.2,
            superframe_duration: Duration::from_millis(500),
            carriers: vec![CarrierSpec {
                category: "Standard".into(),
                access_type: access,
                symbol_rate_symps: 1_000_000,
                format_ratios: vec![("4".into(), 100)],
            }],
        }
    }

    #[test]
    fn aloha_single_carrier_in_one_mhz() {
        let table = Arc::new(FmtDefinitionTable::default_rcs2());
        let plan = BandPlan::compute(
            &single_carrier_config(AccessType::Aloha),
            AccessType::Aloha,
            &table,
            &HashMap::new(),
            None,
        )
        .unwrap();
        let category = plan.category("Standard").unwrap();
        // round(100 / 100_000 * 1_000 / 1.2) = round(0.83) = 1
        assert_eq!(category.carriers_number(), 1);
    }

    #[test]
    fn vcm_is_rejected_for_aloha() {
        let mut config = single_carrier_config(AccessType::Aloha);
        config.carriers[0]
            .format_ratios
            .push(("5".into(), 10));
        let table = Arc::new(FmtDefinitionTable::default_rcs2());
        let result = BandPlan::compute(
            &config,
            AccessType::Aloha,
            &table,
            &HashMap::new(),
            None,
        );
        assert!(result.is_err());
    }
}
