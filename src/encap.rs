//! # Encapsulation Contract
//!
//! The emulator core hands network packets to an encapsulation codec and
//! receives bursts back. Concrete codecs (GSE, RLE, AAL5/ATM) live behind
//! the [`EncapHandler`] trait; the core only depends on the contract. The
//! registry is an explicit value built at startup and passed by reference,
//! never a process-wide singleton.

use crate::error::DvbError;
use crate::types::{QosId, TalId};
use std::collections::HashMap;

/// A network packet crossing the encapsulation boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetPacket {
    pub qos: QosId,
    pub src_tal_id: TalId,
    pub dst_tal_id: TalId,
    pub data: Vec<u8>,
}

impl NetPacket {
    pub fn new(data: Vec<u8>, qos: QosId, src_tal_id: TalId, dst_tal_id: TalId) -> Self {
        NetPacket {
            qos,
            src_tal_id,
            dst_tal_id,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A burst of packets with exclusive ownership; the caller ends its
/// lifetime after enqueueing it.
pub type NetBurst = Vec<NetPacket>;

/// Per-context flush delays returned by `encapsulate`, in milliseconds.
pub type FlushDelays = HashMap<u8, u64>;

/// Capability contract of an encapsulation codec.
pub trait EncapHandler: Send {
    /// The registry key of the codec.
    fn name(&self) -> &str;

    /// Fixed packet length in bytes, or 0 for variable-length codecs.
    fn fixed_length(&self) -> usize;

    /// Encapsulate a burst, possibly retaining fragments in internal
    /// contexts; the map gives the flush timers to arm.
    fn encapsulate(&mut self, burst: NetBurst) -> Result<(NetBurst, FlushDelays), DvbError>;

    /// Reassemble packets out of a received burst.
    fn deencapsulate(&mut self, burst: NetBurst) -> Result<NetBurst, DvbError>;

    /// Flush one retention context after its timer fired.
    fn flush(&mut self, context_id: u8) -> Result<NetBurst, DvbError>;

    /// Build a packet of this codec from raw bytes.
    fn build(
        &self,
        data: &[u8],
        qos: QosId,
        src_tal_id: TalId,
        dst_tal_id: TalId,
    ) -> Result<NetPacket, DvbError>;

    /// Restrict deencapsulation to packets addressed to a terminal.
    fn set_filter_tal_id(&mut self, tal_id: TalId);
}

/// A transparent length-preserving codec. It keeps the contract honest in
/// the emulated path without modelling a real fragmentation scheme.
#[derive(Debug, Default)]
pub struct BasicEncap {
    filter_tal_id: Option<TalId>,
}

impl BasicEncap {
    pub fn new() -> Self {
        BasicEncap::default()
    }
}

impl EncapHandler for BasicEncap {
    fn name(&self) -> &str {
        "basic"
    }

    fn fixed_length(&self) -> usize {
        0
    }

    fn encapsulate(&mut self, burst: NetBurst) -> Result<(NetBurst, FlushDelays), DvbError> {
        Ok((burst, FlushDelays::new()))
    }

    fn deencapsulate(&mut self, burst: NetBurst) -> Result<NetBurst, DvbError> {
        match self.filter_tal_id {
            Some(tal_id) => Ok(burst
                .into_iter()
                .filter(|p| p.dst_tal_id == tal_id || p.dst_tal_id == crate::types::BROADCAST_TAL_ID)
                .collect()),
            None => Ok(burst),
        }
    }

    fn flush(&mut self, _context_id: u8) -> Result<NetBurst, DvbError> {
        Ok(NetBurst::new())
    }

    fn build(
        &self,
        data: &[u8],
        qos: QosId,
        src_tal_id: TalId,
        dst_tal_id: TalId,
    ) -> Result<NetPacket, DvbError> {
        Ok(NetPacket::new(data.to_vec(), qos, src_tal_id, dst_tal_id))
    }

    fn set_filter_tal_id(&mut self, tal_id: TalId) {
        self.filter_tal_id = Some(tal_id);
    }
}

/// Serialise a burst of packets into a DVB burst payload. Each packet is
/// framed as `len: u16 | qos: u8 | src: u16 | dst: u16 | data` so the
/// receiver can rebuild the packets without codec knowledge.
pub fn pack_burst_payload(packets: &[NetPacket]) -> Vec<u8> {
    let mut payload = Vec::new();
    for packet in packets {
        payload.extend_from_slice(&(packet.data.len() as u16).to_be_bytes());
        payload.push(packet.qos);
        payload.extend_from_slice(&packet.src_tal_id.to_be_bytes());
        payload.extend_from_slice(&packet.dst_tal_id.to_be_bytes());
        payload.extend_from_slice(&packet.data);
    }
    payload
}

/// Rebuild the packets of a DVB burst payload.
pub fn parse_burst_payload(mut payload: &[u8]) -> Result<NetBurst, DvbError> {
    let mut packets = NetBurst::new();
    while !payload.is_empty() {
        if payload.len() < 7 {
            return Err(DvbError::FrameMalformed(
                "truncated packet header in burst payload".into(),
            ));
        }
        let len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
        let qos = payload[2];
        let src = u16::from_be_bytes([payload[3], payload[4]]);
        let dst = u16::from_be_bytes([payload[5], payload[6]]);
        payload = &payload[7..];
        if payload.len() < len {
            return Err(DvbError::FrameMalformed(
                "truncated packet data in burst payload".into(),
            ));
        }
        packets.push(NetPacket::new(payload[..len].to_vec(), qos, src, dst));
        payload = &payload[len..];
    }
    Ok(packets)
}

/// The registry of encapsulation codecs, built once at startup.
#[derive(Default)]
pub struct EncapRegistry {
    handlers: HashMap<String, Box<dyn EncapHandler>>,
}

impl EncapRegistry {
    /// A registry pre-loaded with the built-in codec.
    pub fn with_builtin() -> Self {
        let mut registry = EncapRegistry::default();
        registry.register(Box::new(BasicEncap::new()));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn EncapHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut (dyn EncapHandler + '_), DvbError> {
        match self.handlers.get_mut(name) {
            Some(handler) => Ok(handler.as_mut()),
            None => Err(DvbError::ConfigInvalid(format!(
                "unknown encapsulation codec: {name}"
            ))),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_broadcast() {
        let mut codec = BasicEncap::new();
        codec.set_filter_tal_id(5);
        let burst = vec![
            NetPacket::new(vec![1], 0, 1, 5),
            NetPacket::new(vec![2], 0, 1, 6),
            NetPacket::new(vec![3], 0, 1, crate::types::BROADCAST_TAL_ID),
        ];
        let kept = codec.deencapsulate(burst).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn registry_rejects_unknown_codec() {
        let mut registry = EncapRegistry::with_builtin();
        assert!(registry.get_mut("basic").is_ok());
        assert!(registry.get_mut("gse").is_err());
    }
}
