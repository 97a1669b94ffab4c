//! # dvbsat-rs - A Rust Crate for DVB-S2/RCS2 Satellite Network Emulation
//!
//! The dvbsat-rs crate emulates a satellite access network at layer 2: a
//! gateway (the NCC), satellite terminals and a transparent satellite
//! exchange DVB frames over UDP carriers representing RF channels.
//!
//! ## Features
//!
//! - Return-link MAC control plane: terminal logon, SAC capacity requests,
//!   DAMA allocation (CRA, RBDC, VBDC, FCA) and TTP broadcast
//! - Time-frequency band planning with weighted ratios, terminal
//!   categories and dynamic carrier reallocation
//! - Slotted-Aloha random access with replicas, interference cancellation
//!   and acknowledgements
//! - SCPC constant-rate scheduling for terminals that bypass DAMA
//! - Physical-layer emulation: per-link C/N, ACM MODCOD selection,
//!   minimal-condition check and error insertion
//! - Transparent satellite forwarding with per-gateway delay FIFOs
//!
//! ## Usage
//!
//! ```rust
//! use dvbsat_rs::{
//!     DvbError, DvbFrame, FmtDefinitionTable, FmtGroup,
//!     init_logger, log_info,
//! };
//! ```

pub mod band;
pub mod carrier;
pub mod config;
pub mod constants;
pub mod dama;
pub mod encap;
pub mod entity;
pub mod error;
pub mod fifo;
pub mod fmt;
pub mod frame;
pub mod logging;
pub mod phy;
pub mod saloha;
pub mod sat;
pub mod scpc;
pub mod types;
pub mod unit;

pub use crate::error::DvbError;
pub use crate::logging::{init_logger, log_info};

// Core frame types
pub use frame::{
    BbFrame, DvbBurst, DvbFrame, LogonRequest, LogonResponse, Sac, SalohaCtrl, SalohaFrame,
    Sof, Ttp, TtpAssignment,
};

// FMT handling
pub use fmt::{FmtDefinition, FmtDefinitionTable, FmtGroup, Modulation};

// Band planning
pub use band::{BandConfig, BandPlan, CarrierSpec, CarriersGroup, TerminalCategory};

// Control plane
pub use dama::{DamaAgent, DamaAgentConfig, DamaContext, DamaController, LinkUp, TalState};
pub use saloha::{SalohaConfig, SlottedAlohaNcc, SlottedAlohaTal};

// Queues and packets
pub use encap::{EncapHandler, EncapRegistry, NetBurst, NetPacket};
pub use fifo::{FifoStats, MacFifo};

// Physical layer
pub use phy::{combine_cn, AttenuationHandler, ErrorInsertion, MinimalCondition};

// Entities
pub use entity::{GatewayEntity, SatelliteEntity, TerminalEntity};
