//! Data-plane frames: DVB-RCS2 return bursts and DVB-S2 base-band frames.

use crate::constants::{MSG_TYPE_BBFRAME, MSG_TYPE_DVB_BURST};
use crate::types::FmtId;
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// A DVB-RCS2 return-link burst carrying encapsulated packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DvbBurst {
    pub modcod: FmtId,
    pub nb_packets: u16,
    pub payload: Vec<u8>,
}

impl DvbBurst {
    pub fn new(modcod: FmtId) -> Self {
        DvbBurst {
            modcod,
            nb_packets: 0,
            payload: Vec::new(),
        }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_DVB_BURST);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u8(self.modcod);
        buf.put_u16(self.nb_packets);
        buf.put_slice(&self.payload);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], DvbBurst> {
        let (input, length) = be_u16(input)?;
        let (input, modcod) = be_u8(input)?;
        let (input, nb_packets) = be_u16(input)?;
        let (input, payload) = take(length as usize)(input)?;
        Ok((
            input,
            DvbBurst {
                modcod,
                nb_packets,
                payload: payload.to_vec(),
            },
        ))
    }
}

/// A DVB-S2 base-band frame. `real_modcod` keeps the MODCOD the scheduler
/// wanted when the emitted one had to be more robust (ACM transients).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BbFrame {
    pub modcod: FmtId,
    pub real_modcod: FmtId,
    pub payload: Vec<u8>,
}

impl BbFrame {
    pub fn new(modcod: FmtId) -> Self {
        BbFrame {
            modcod,
            real_modcod: modcod,
            payload: Vec::new(),
        }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_BBFRAME);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u8(self.modcod);
        buf.put_u8(self.real_modcod);
        buf.put_slice(&self.payload);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], BbFrame> {
        let (input, length) = be_u16(input)?;
        let (input, modcod) = be_u8(input)?;
        let (input, real_modcod) = be_u8(input)?;
        let (input, payload) = take(length as usize)(input)?;
        Ok((
            input,
            BbFrame {
                modcod,
                real_modcod,
                payload: payload.to_vec(),
            },
        ))
    }
}
