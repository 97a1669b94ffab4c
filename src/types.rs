//! # Core Emulator Types
//!
//! Scalar aliases and small shared enums used across the DVB stack. The
//! aliases keep the unit of a value visible at the type level (kb/s versus
//! sym/s versus kb) without the cost of newtypes on every arithmetic step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal identifier. Valid terminal ids are 5-bit values (0..=30);
/// 31 is reserved for broadcast. Carried as u16 on the wire.
pub type TalId = u16;

/// Group identifier, assigned by the NCC at logon.
pub type GroupId = u16;

/// Spot (beam) identifier.
pub type SpotId = u8;

/// Class-of-service identifier (3-bit).
pub type QosId = u8;

/// Carrier identifier inside a spot.
pub type CarrierId = u8;

/// MODCOD identifier in an FMT definition table.
pub type FmtId = u8;

/// Rate in kilobits per second.
pub type RateKbps = u32;

/// Rate in symbols per second.
pub type RateSymps = u32;

/// Volume in kilobits.
pub type VolKb = u32;

/// Volume in symbols.
pub type VolSym = u32;

/// Time expressed in superframes.
pub type TimeSf = u16;

/// Time expressed in milliseconds since an arbitrary origin.
pub type TimeMs = u64;

/// The reserved broadcast terminal id (all ones on 5 bits).
pub const BROADCAST_TAL_ID: TalId = 0x1F;

/// Largest valid (non-broadcast) terminal id.
pub const MAX_TAL_ID: TalId = 30;

/// The access type of a carriers group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessType {
    /// DAMA-controlled return carriers (DVB-RCS2).
    Dama,
    /// Forward-link TDM carriers (DVB-S2).
    Tdm,
    /// Slotted-Aloha random access return carriers.
    Aloha,
    /// Single Channel Per Carrier return carriers.
    Scpc,
    /// Any other access type, kept only for band computation.
    Other,
}

impl AccessType {
    /// Wire encoding of the access type in TTP assignments.
    pub fn to_wire(self) -> u8 {
        match self {
            AccessType::Dama => 0,
            AccessType::Tdm => 1,
            AccessType::Aloha => 2,
            AccessType::Scpc => 3,
            AccessType::Other => 4,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccessType::Dama),
            1 => Some(AccessType::Tdm),
            2 => Some(AccessType::Aloha),
            3 => Some(AccessType::Scpc),
            4 => Some(AccessType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessType::Dama => "DAMA",
            AccessType::Tdm => "TDM",
            AccessType::Aloha => "ALOHA",
            AccessType::Scpc => "SCPC",
            AccessType::Other => "OTHER",
        };
        write!(f, "{name}")
    }
}

/// The kind of capacity request a MAC FIFO feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrKind {
    /// Rate-based dynamic capacity requests.
    DamaRbdc,
    /// Volume-based dynamic capacity requests.
    DamaVbdc,
    /// Slotted-Aloha random access, no capacity request.
    Saloha,
    /// Constant-rate SCPC, no capacity request.
    Scpc,
    /// No request at all (CRA-only traffic).
    None,
}

/// Returns true for a terminal id that a station may log on with.
pub fn is_valid_tal_id(tal_id: TalId) -> bool {
    tal_id <= MAX_TAL_ID
}
