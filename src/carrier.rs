//! # UDP Carrier Layer
//!
//! Carriers are UDP flows representing RF channels. Each datagram wraps a
//! DVB frame with a small envelope carrying the spot, the carrier id, the
//! corrupted flag and the C/N measured on the emulated link. The envelope
//! C/N uses the same fixed-point encoding as the SAC ACM field.

use crate::error::DvbError;
use crate::frame::{hcnton, ncntoh, DvbFrame};
use crate::types::{CarrierId, SpotId};
use bytes::{BufMut, BytesMut};
use log::warn;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Envelope length: spot, carrier, length, corrupted flag, C/N word.
const ENVELOPE_LEN: usize = 1 + 1 + 2 + 1 + 4;

/// Per-frame metadata added by the carrier layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarrierEnvelope {
    pub spot_id: SpotId,
    pub carrier_id: CarrierId,
    pub corrupted: bool,
    pub cn_db: f64,
}

impl CarrierEnvelope {
    pub fn new(spot_id: SpotId, carrier_id: CarrierId) -> Self {
        CarrierEnvelope {
            spot_id,
            carrier_id,
            corrupted: false,
            cn_db: 0.0,
        }
    }
}

/// Serialise an envelope and its frame into one datagram payload.
pub fn pack_carrier(envelope: &CarrierEnvelope, frame: &DvbFrame) -> BytesMut {
    let body = frame.pack();
    let mut buf = BytesMut::with_capacity(ENVELOPE_LEN + body.len());
    buf.put_u8(envelope.spot_id);
    buf.put_u8(envelope.carrier_id);
    buf.put_u16(body.len() as u16);
    buf.put_u8(u8::from(envelope.corrupted));
    buf.put_u32(hcnton(envelope.cn_db));
    buf.put_slice(&body);
    buf
}

/// Parse a datagram back into its envelope and frame.
pub fn parse_carrier(input: &[u8]) -> Result<(CarrierEnvelope, DvbFrame), DvbError> {
    if input.len() < ENVELOPE_LEN {
        return Err(DvbError::FrameMalformed("truncated carrier envelope".into()));
    }
    let spot_id = input[0];
    let carrier_id = input[1];
    let length = usize::from(u16::from_be_bytes([input[2], input[3]]));
    let corrupted = input[4] != 0;
    let cn_db = ncntoh(u32::from_be_bytes([input[5], input[6], input[7], input[8]]));
    let body = &input[ENVELOPE_LEN..];
    if body.len() < length {
        return Err(DvbError::FrameMalformed(format!(
            "carrier envelope announces {length} bytes, {} received",
            body.len()
        )));
    }
    let frame = DvbFrame::from_bytes(&body[..length])?;
    Ok((
        CarrierEnvelope {
            spot_id,
            carrier_id,
            corrupted,
            cn_db,
        },
        frame,
    ))
}

/// One UDP endpoint multiplexing the carriers of an entity. Outgoing
/// carriers map to destination addresses; anything received is handed to
/// the caller with its parsed envelope.
pub struct UdpCarrierSet {
    socket: UdpSocket,
    destinations: HashMap<CarrierId, SocketAddr>,
    buffer: Vec<u8>,
}

impl UdpCarrierSet {
    pub async fn bind(local: SocketAddr) -> Result<Self, DvbError> {
        let socket = UdpSocket::bind(local).await?;
        Ok(UdpCarrierSet {
            socket,
            destinations: HashMap::new(),
            buffer: vec![0u8; 65_536],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DvbError> {
        Ok(self.socket.local_addr()?)
    }

    /// Route an outgoing carrier id to a peer address.
    pub fn add_destination(&mut self, carrier_id: CarrierId, address: SocketAddr) {
        self.destinations.insert(carrier_id, address);
    }

    /// Send one frame on a carrier. Unknown carriers are a transient
    /// error: the control plane retries through its timers.
    pub async fn send_frame(
        &self,
        envelope: &CarrierEnvelope,
        frame: &DvbFrame,
    ) -> Result<(), DvbError> {
        let address = self.destinations.get(&envelope.carrier_id).ok_or_else(|| {
            DvbError::TransientIo(format!(
                "no destination for carrier {}",
                envelope.carrier_id
            ))
        })?;
        let datagram = pack_carrier(envelope, frame);
        self.socket.send_to(&datagram, address).await?;
        Ok(())
    }

    /// Receive the next well-formed frame. Malformed datagrams are logged
    /// at warning level and skipped, per the steady-state error policy.
    pub async fn recv_frame(&mut self) -> Result<(CarrierEnvelope, DvbFrame), DvbError> {
        loop {
            let (len, peer) = self.socket.recv_from(&mut self.buffer).await?;
            match parse_carrier(&self.buffer[..len]) {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    warn!("dropping malformed datagram from {peer}: {err}");
                }
            }
        }
    }
}
