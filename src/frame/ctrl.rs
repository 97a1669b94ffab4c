//! Control-plane frames of the return link: SOF, Sync, logon exchange,
//! SAC capacity requests and the TTP assignment broadcast.

use crate::constants::{
    MSG_TYPE_SAC, MSG_TYPE_SESSION_LOGON_REQ, MSG_TYPE_SESSION_LOGON_RESP, MSG_TYPE_SOF,
    MSG_TYPE_SYNC, MSG_TYPE_TTP,
};
use crate::frame::{hcnton, ncntoh};
use crate::types::{AccessType, GroupId, RateKbps, TalId, TimeSf, VolKb};
use bitflags::bitflags;
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::multi::count;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

/// Start-of-frame message: the superframe heartbeat of the NCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sof {
    pub sfn: TimeSf,
}

impl Sof {
    pub fn new(sfn: TimeSf) -> Self {
        Sof { sfn }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SOF);
        buf.put_u8(0);
        buf.put_u16(self.sfn);
        buf.put_slice(&[0u8; 4]);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Sof> {
        let (input, _) = be_u8(input)?;
        let (input, sfn) = be_u16(input)?;
        let (input, _) = take(4usize)(input)?;
        Ok((input, Sof { sfn }))
    }
}

/// Timing synchronisation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sync {
    pub sfn: TimeSf,
}

impl Sync {
    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SYNC);
        buf.put_u8(0);
        buf.put_u16(self.sfn);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Sync> {
        let (input, _) = be_u8(input)?;
        let (input, sfn) = be_u16(input)?;
        Ok((input, Sync { sfn }))
    }
}

bitflags! {
    /// Option flags of a logon request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogonFlags: u8 {
        /// The terminal requests a constant-rate SCPC return channel.
        const IS_SCPC = 0b0000_0001;
    }
}

/// Logon request sent by a terminal to the NCC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonRequest {
    pub mac: TalId,
    pub rt_bandwidth_kbps: u16,
    pub max_rbdc_kbps: u16,
    pub max_vbdc_kb: u16,
    pub flags: LogonFlags,
}

impl LogonRequest {
    pub fn new(
        mac: TalId,
        rt_bandwidth_kbps: u16,
        max_rbdc_kbps: u16,
        max_vbdc_kb: u16,
        is_scpc: bool,
    ) -> Self {
        let flags = if is_scpc {
            LogonFlags::IS_SCPC
        } else {
            LogonFlags::empty()
        };
        LogonRequest {
            mac,
            rt_bandwidth_kbps,
            max_rbdc_kbps,
            max_vbdc_kb,
            flags,
        }
    }

    pub fn is_scpc(&self) -> bool {
        self.flags.contains(LogonFlags::IS_SCPC)
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SESSION_LOGON_REQ);
        buf.put_u16(self.mac);
        buf.put_u16(self.rt_bandwidth_kbps);
        buf.put_u16(self.max_rbdc_kbps);
        buf.put_u16(self.max_vbdc_kb);
        buf.put_u8(self.flags.bits());
        buf.put_u16(0);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], LogonRequest> {
        let (input, mac) = be_u16(input)?;
        let (input, rt_bandwidth_kbps) = be_u16(input)?;
        let (input, max_rbdc_kbps) = be_u16(input)?;
        let (input, max_vbdc_kb) = be_u16(input)?;
        let (input, flags) = be_u8(input)?;
        let (input, _padding) = be_u16(input)?;
        Ok((
            input,
            LogonRequest {
                mac,
                rt_bandwidth_kbps,
                max_rbdc_kbps,
                max_vbdc_kb,
                flags: LogonFlags::from_bits_truncate(flags),
            },
        ))
    }
}

/// Logon response from the NCC, carrying the assigned ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogonResponse {
    pub logon_id: TalId,
    pub group_id: GroupId,
}

impl LogonResponse {
    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SESSION_LOGON_RESP);
        buf.put_u16(self.logon_id);
        buf.put_u16(self.group_id);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], LogonResponse> {
        let (input, logon_id) = be_u16(input)?;
        let (input, group_id) = be_u16(input)?;
        Ok((
            input,
            LogonResponse { logon_id, group_id },
        ))
    }
}

/// Satellite Access Control message: the aggregated capacity request of a
/// terminal, with the ACM report piggy-backed.
#[derive(Debug, Clone, PartialEq)]
pub struct Sac {
    pub tal_id: TalId,
    pub group_id: GroupId,
    pub rbdc_kbps: u16,
    pub vbdc_kb: u16,
    /// Measured forward C/N in dB, fixed-point encoded on the wire.
    pub cn_db: f64,
}

impl Sac {
    pub fn new(tal_id: TalId, group_id: GroupId) -> Self {
        Sac {
            tal_id,
            group_id,
            rbdc_kbps: 0,
            vbdc_kb: 0,
            cn_db: 0.0,
        }
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_SAC);
        buf.put_u16(self.tal_id);
        buf.put_u16(self.group_id);
        buf.put_u16(self.rbdc_kbps);
        buf.put_u16(self.vbdc_kb);
        buf.put_u32(hcnton(self.cn_db));
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Sac> {
        let (input, tal_id) = be_u16(input)?;
        let (input, group_id) = be_u16(input)?;
        let (input, rbdc_kbps) = be_u16(input)?;
        let (input, vbdc_kb) = be_u16(input)?;
        let (input, cn_raw) = be_u32(input)?;
        Ok((
            input,
            Sac {
                tal_id,
                group_id,
                rbdc_kbps,
                vbdc_kb,
                cn_db: ncntoh(cn_raw),
            },
        ))
    }
}

/// One per-terminal record of a TTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtpAssignment {
    pub tal_id: TalId,
    pub access_type: AccessType,
    pub rate_kbps: u16,
    pub volume_kb: u16,
    pub start_slot: u16,
    pub slot_count: u16,
}

impl TtpAssignment {
    pub fn total_rate(&self) -> RateKbps {
        RateKbps::from(self.rate_kbps)
    }

    pub fn total_volume(&self) -> VolKb {
        VolKb::from(self.volume_kb)
    }

    fn pack(&self, buf: &mut BytesMut) {
        buf.put_u16(self.tal_id);
        buf.put_u8(self.access_type.to_wire());
        buf.put_u16(self.rate_kbps);
        buf.put_u16(self.volume_kb);
        buf.put_u16(self.start_slot);
        buf.put_u16(self.slot_count);
    }

    fn parse(input: &[u8]) -> IResult<&[u8], TtpAssignment> {
        let (input, tal_id) = be_u16(input)?;
        let (input, access) = be_u8(input)?;
        let (input, rate_kbps) = be_u16(input)?;
        let (input, volume_kb) = be_u16(input)?;
        let (input, start_slot) = be_u16(input)?;
        let (input, slot_count) = be_u16(input)?;
        let access_type = AccessType::from_wire(access).ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
        })?;
        Ok((
            input,
            TtpAssignment {
                tal_id,
                access_type,
                rate_kbps,
                volume_kb,
                start_slot,
                slot_count,
            },
        ))
    }
}

/// Terminal Burst Time Plan: the per-terminal assignment list broadcast by
/// the NCC for one superframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ttp {
    pub sfn: TimeSf,
    pub assignments: Vec<TtpAssignment>,
}

impl Ttp {
    pub fn new(sfn: TimeSf) -> Self {
        Ttp {
            sfn,
            assignments: Vec::new(),
        }
    }

    /// The assignment addressed to a terminal, if any.
    pub fn assignment_for(&self, tal_id: TalId) -> Option<&TtpAssignment> {
        self.assignments.iter().find(|a| a.tal_id == tal_id)
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_TYPE_TTP);
        buf.put_u16(self.sfn);
        buf.put_u16(self.assignments.len() as u16);
        for assignment in &self.assignments {
            assignment.pack(buf);
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Ttp> {
        let (input, sfn) = be_u16(input)?;
        let (input, nb_assignments) = be_u16(input)?;
        let (input, assignments) =
            count(TtpAssignment::parse, nb_assignments as usize)(input)?;
        Ok((input, Ttp { sfn, assignments }))
    }
}
