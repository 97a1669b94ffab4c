//! Slotted-Aloha frames: data frames carrying replica-annotated packets
//! and control frames carrying acknowledgement lists.

use crate::constants::{MSG_TYPE_SALOHA_CTRL, MSG_TYPE_SALOHA_DATA};
use crate::types::{QosId, TalId};
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// One Slotted-Aloha data packet. The header lists the slot indices of all
/// of its replicas, so a single reception is enough to locate every copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalohaPacketData {
    pub tal_id: TalId,
    pub qos: QosId,
    /// Per-terminal PDU sequence number, acknowledged as a unit.
    pub pdu_seq: u16,
    /// Number of packets composing the PDU.
    pub pdu_count: u16,
    /// Global slot indices of every replica of this packet.
    pub replicas: Vec<u16>,
    pub payload: Vec<u8>,
}

impl SalohaPacketData {
    /// The slot of the first replica, used for deterministic delivery order.
    pub fn first_replica(&self) -> u16 {
        self.replicas.first().copied().unwrap_or(u16::MAX)
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u16(self.tal_id);
        buf.put_u8(self.qos);
        buf.put_u16(self.pdu_seq);
        buf.put_u16(self.pdu_count);
        buf.put_u8(self.replicas.len() as u8);
        for replica in &self.replicas {
            buf.put_u16(*replica);
        }
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SalohaPacketData> {
        let (input, tal_id) = be_u16(input)?;
        let (input, qos) = be_u8(input)?;
        let (input, pdu_seq) = be_u16(input)?;
        let (input, pdu_count) = be_u16(input)?;
        let (input, nb_replicas) = be_u8(input)?;
        let (input, replicas) = count(be_u16, nb_replicas as usize)(input)?;
        let (input, payload_len) = be_u16(input)?;
        let (input, payload) = take(payload_len as usize)(input)?;
        Ok((
            input,
            SalohaPacketData {
                tal_id,
                qos,
                pdu_seq,
                pdu_count,
                replicas,
                payload: payload.to_vec(),
            },
        ))
    }
}

/// A Slotted-Aloha data frame: the packets a terminal emits over one
/// Slotted-Aloha frame period.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SalohaFrame {
    pub packets: Vec<SalohaPacketData>,
}

impl SalohaFrame {
    pub fn new() -> Self {
        SalohaFrame::default()
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SALOHA_DATA);
        buf.put_u16(self.packets.len() as u16);
        for packet in &self.packets {
            packet.pack(buf);
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SalohaFrame> {
        let (input, nb_packets) = be_u16(input)?;
        let (input, packets) = count(SalohaPacketData::parse, nb_packets as usize)(input)?;
        Ok((input, SalohaFrame { packets }))
    }
}

/// One acknowledged PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalohaAck {
    pub tal_id: TalId,
    pub pdu_seq: u16,
}

/// A Slotted-Aloha control frame: the list of PDUs the gateway decoded
/// over the last Slotted-Aloha frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SalohaCtrl {
    pub acks: Vec<SalohaAck>,
}

impl SalohaCtrl {
    pub fn new() -> Self {
        SalohaCtrl::default()
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SALOHA_CTRL);
        buf.put_u16(self.acks.len() as u16);
        for ack in &self.acks {
            buf.put_u16(ack.tal_id);
            buf.put_u16(ack.pdu_seq);
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SalohaCtrl> {
        let (input, nb_acks) = be_u16(input)?;
        let (input, acks) = count(
            |input| {
                let (input, tal_id) = be_u16(input)?;
                let (input, pdu_seq) = be_u16(input)?;
                Ok((input, SalohaAck { tal_id, pdu_seq }))
            },
            nb_acks as usize,
        )(input)?;
        Ok((input, SalohaCtrl { acks }))
    }
}
