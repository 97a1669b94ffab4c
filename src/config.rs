//! # Topology and Infrastructure Configuration
//!
//! Configuration is read-only: topology describes the emulated satellite
//! system (spots, bandplans, DAMA and Slotted-Aloha parameters), the
//! infrastructure file maps entities and carriers to UDP addresses. Both
//! are deserialised with serde; semantic validation happens here and any
//! violation is fatal at initialisation.

use crate::band::{BandConfig, CarrierSpec};
use crate::constants::{DAMA_ALGORITHM_LEGACY, DEFAULT_RBDC_TIMEOUT_SF, DEFAULT_SYNC_PERIOD_FRAME};
use crate::error::DvbError;
use crate::saloha::SalohaConfig;
use crate::types::{AccessType, RateKbps, RateSymps, SpotId, TalId, VolKb};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// One carrier declaration of a spot bandplan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    pub category: String,
    pub access_type: AccessType,
    pub symbol_rate_symps: RateSymps,
    /// (FMT group spec, ratio); several entries make the carrier VCM.
    pub format_ratios: Vec<(String, u32)>,
}

/// DAMA control-plane parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DamaConfig {
    /// Allocation algorithm name; only "Legacy" is supported.
    pub algorithm: String,
    #[serde(default = "default_sync_period")]
    pub sync_period_frame: u16,
    #[serde(default = "default_rbdc_timeout")]
    pub rbdc_timeout_sf: u16,
    #[serde(default)]
    pub fca_enabled: bool,
}

fn default_sync_period() -> u16 {
    DEFAULT_SYNC_PERIOD_FRAME
}

fn default_rbdc_timeout() -> u16 {
    DEFAULT_RBDC_TIMEOUT_SF
}

impl Default for DamaConfig {
    fn default() -> Self {
        DamaConfig {
            algorithm: DAMA_ALGORITHM_LEGACY.to_string(),
            sync_period_frame: default_sync_period(),
            rbdc_timeout_sf: default_rbdc_timeout(),
            fca_enabled: false,
        }
    }
}

/// One spot of the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotConfig {
    pub id: SpotId,
    pub bandwidth_khz: u32,
    pub roll_off: f64,
    pub superframe_duration_ms: u64,
    #[serde(default = "default_frames_per_superframe")]
    pub frames_per_superframe: u16,
    pub carriers: Vec<CarrierConfig>,
    #[serde(default)]
    pub default_category: Option<String>,
    /// Explicit terminal -> category affectation.
    #[serde(default)]
    pub terminal_affectation: HashMap<TalId, String>,
}

fn default_frames_per_superframe() -> u16 {
    1
}

impl SpotConfig {
    pub fn superframe_duration(&self) -> Duration {
        Duration::from_millis(self.superframe_duration_ms)
    }

    pub fn frame_duration(&self) -> Duration {
        self.superframe_duration() / u32::from(self.frames_per_superframe.max(1))
    }

    /// The band-planner view of this spot.
    pub fn band_config(&self) -> BandConfig {
        BandConfig {
            bandwidth_khz: self.bandwidth_khz,
            roll_off: self.roll_off,
            superframe_duration: self.superframe_duration(),
            carriers: self
                .carriers
                .iter()
                .map(|c| CarrierSpec {
                    category: c.category.clone(),
                    access_type: c.access_type,
                    symbol_rate_symps: c.symbol_rate_symps,
                    format_ratios: c.format_ratios.clone(),
                })
                .collect(),
        }
    }
}

/// Per-terminal service parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub tal_id: TalId,
    #[serde(default)]
    pub cra_kbps: RateKbps,
    #[serde(default)]
    pub max_rbdc_kbps: RateKbps,
    #[serde(default)]
    pub max_vbdc_kb: VolKb,
    #[serde(default)]
    pub is_scpc: bool,
}

/// The whole emulated system description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub spots: Vec<SpotConfig>,
    #[serde(default)]
    pub dama: DamaConfig,
    #[serde(default)]
    pub saloha: SalohaConfig,
    #[serde(default)]
    pub terminals: Vec<TerminalConfig>,
}

impl TopologyConfig {
    /// Load and validate a topology file.
    pub fn load(path: &Path) -> Result<Self, DvbError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DvbError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: TopologyConfig = serde_json::from_str(&content).map_err(|e| {
            DvbError::ConfigInvalid(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DvbError> {
        if self.dama.algorithm != DAMA_ALGORITHM_LEGACY {
            return Err(DvbError::ConfigInvalid(format!(
                "unsupported DAMA algorithm {}, only {} is available",
                self.dama.algorithm, DAMA_ALGORITHM_LEGACY
            )));
        }
        if self.spots.is_empty() {
            return Err(DvbError::ConfigInvalid("topology without spots".into()));
        }
        for spot in &self.spots {
            if spot.carriers.is_empty() {
                return Err(DvbError::ConfigInvalid(format!(
                    "spot {} has no carriers",
                    spot.id
                )));
            }
            if spot.superframe_duration_ms == 0 {
                return Err(DvbError::ConfigInvalid(format!(
                    "spot {} has a zero superframe duration",
                    spot.id
                )));
            }
            if !(0.0..=1.0).contains(&spot.roll_off) {
                return Err(DvbError::ConfigInvalid(format!(
                    "spot {} roll-off {} out of [0, 1]",
                    spot.id, spot.roll_off
                )));
            }
        }
        Ok(())
    }

    pub fn spot(&self, spot_id: SpotId) -> Result<&SpotConfig, DvbError> {
        self.spots
            .iter()
            .find(|s| s.id == spot_id)
            .ok_or_else(|| DvbError::ConfigInvalid(format!("unknown spot {spot_id}")))
    }

    pub fn terminal(&self, tal_id: TalId) -> Option<&TerminalConfig> {
        self.terminals.iter().find(|t| t.tal_id == tal_id)
    }
}

/// One UDP carrier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierEndpoint {
    pub carrier_id: u8,
    pub address: SocketAddr,
}

/// One emulated entity of the infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub kind: EntityKind,
    pub id: u16,
    /// The UDP address the entity binds.
    pub bind_address: SocketAddr,
    /// Outgoing carriers of the entity.
    #[serde(default)]
    pub carriers: Vec<CarrierEndpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Gw,
    St,
    Sat,
}

impl std::str::FromStr for EntityKind {
    type Err = DvbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "gw" => Ok(EntityKind::Gw),
            "st" => Ok(EntityKind::St),
            "sat" => Ok(EntityKind::Sat),
            other => Err(DvbError::ConfigInvalid(format!(
                "unknown entity kind {other}, expected gw, st or sat"
            ))),
        }
    }
}

/// The infrastructure description: entities and the emulated delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    pub entities: Vec<EntityConfig>,
    #[serde(default = "default_delay_ms")]
    pub one_way_delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    250
}

impl InfrastructureConfig {
    pub fn load(path: &Path) -> Result<Self, DvbError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DvbError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: InfrastructureConfig = serde_json::from_str(&content).map_err(|e| {
            DvbError::ConfigInvalid(format!("cannot parse {}: {e}", path.display()))
        })?;
        if config.entities.is_empty() {
            return Err(DvbError::ConfigInvalid(
                "infrastructure without entities".into(),
            ));
        }
        Ok(config)
    }

    pub fn entity(&self, kind: EntityKind, id: u16) -> Result<&EntityConfig, DvbError> {
        self.entities
            .iter()
            .find(|e| e.kind == kind && e.id == id)
            .ok_or_else(|| {
                DvbError::ConfigInvalid(format!("no entity {kind:?}:{id} in the infrastructure"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_topology() -> TopologyConfig {
        TopologyConfig {
            spots: vec![SpotConfig {
                id: 1,
                bandwidth_khz: 1000,
                roll_off: 0.2,
                superframe_duration_ms: 500,
                frames_per_superframe: 1,
                carriers: vec![CarrierConfig {
                    category: "Standard".into(),
                    access_type: AccessType::Dama,
                    symbol_rate_symps: 1_000_000,
                    format_ratios: vec![("4".into(), 100)],
                }],
                default_category: Some("Standard".into()),
                terminal_affectation: HashMap::new(),
            }],
            dama: DamaConfig::default(),
            saloha: SalohaConfig::default(),
            terminals: Vec::new(),
        }
    }

    #[test]
    fn legacy_is_the_only_algorithm() {
        let mut config = minimal_topology();
        config.dama.algorithm = "RrmQos".into();
        assert!(matches!(
            config.validate(),
            Err(DvbError::ConfigInvalid(_))
        ));
        config.dama.algorithm = DAMA_ALGORITHM_LEGACY.into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn roll_off_is_bounded() {
        let mut config = minimal_topology();
        config.spots[0].roll_off = 1.5;
        assert!(config.validate().is_err());
    }
}
