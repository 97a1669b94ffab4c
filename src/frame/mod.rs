//! # DVB Frame Codecs
//!
//! This module provides the wire codecs of the emulated DVB control and
//! data planes. Frames are parsed with `nom` and packed into `BytesMut`;
//! every multi-byte integer is network byte order. The message type is the
//! first byte of every frame.

pub mod ctrl;
pub mod data;
pub mod saloha;

pub use ctrl::{LogonFlags, LogonRequest, LogonResponse, Sac, Sof, Sync, Ttp, TtpAssignment};
pub use data::{BbFrame, DvbBurst};
pub use saloha::{SalohaAck, SalohaCtrl, SalohaFrame, SalohaPacketData};

use crate::constants::{
    MSG_TYPE_BBFRAME, MSG_TYPE_DVB_BURST, MSG_TYPE_SAC, MSG_TYPE_SALOHA_CTRL,
    MSG_TYPE_SALOHA_DATA, MSG_TYPE_SESSION_LOGON_REQ, MSG_TYPE_SESSION_LOGON_RESP,
    MSG_TYPE_SOF, MSG_TYPE_SYNC, MSG_TYPE_TTP,
};
use crate::error::DvbError;
use crate::types::FmtId;
use bytes::BytesMut;
use nom::number::complete::be_u8;

/// Encode a C/N value in dB to its network representation: a big-endian
/// 32-bit word holding the sign-extended fixed-point value `round(cn * 100)`.
pub fn hcnton(cn_db: f64) -> u32 {
    ((cn_db * 100.0).round() as i16) as i32 as u32
}

/// Decode a network-encoded C/N value back to dB.
pub fn ncntoh(raw: u32) -> f64 {
    f64::from(raw as i32) / 100.0
}

/// A frame of the emulated DVB network.
#[derive(Debug, Clone, PartialEq)]
pub enum DvbFrame {
    Sof(Sof),
    Sync(Sync),
    LogonRequest(LogonRequest),
    LogonResponse(LogonResponse),
    Sac(Sac),
    Ttp(Ttp),
    DvbBurst(DvbBurst),
    BbFrame(BbFrame),
    SalohaData(SalohaFrame),
    SalohaCtrl(SalohaCtrl),
}

impl DvbFrame {
    /// The message type byte of the frame.
    pub fn msg_type(&self) -> u8 {
        match self {
            DvbFrame::Sof(_) => MSG_TYPE_SOF,
            DvbFrame::Sync(_) => MSG_TYPE_SYNC,
            DvbFrame::LogonRequest(_) => MSG_TYPE_SESSION_LOGON_REQ,
            DvbFrame::LogonResponse(_) => MSG_TYPE_SESSION_LOGON_RESP,
            DvbFrame::Sac(_) => MSG_TYPE_SAC,
            DvbFrame::Ttp(_) => MSG_TYPE_TTP,
            DvbFrame::DvbBurst(_) => MSG_TYPE_DVB_BURST,
            DvbFrame::BbFrame(_) => MSG_TYPE_BBFRAME,
            DvbFrame::SalohaData(_) => MSG_TYPE_SALOHA_DATA,
            DvbFrame::SalohaCtrl(_) => MSG_TYPE_SALOHA_CTRL,
        }
    }

    /// The MODCOD id of frames that carry one.
    pub fn modcod_id(&self) -> Option<FmtId> {
        match self {
            DvbFrame::DvbBurst(burst) => Some(burst.modcod),
            DvbFrame::BbFrame(bbframe) => Some(bbframe.modcod),
            _ => None,
        }
    }

    /// Mutable access to the payload of data frames, for error insertion.
    pub fn payload_mut(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            DvbFrame::DvbBurst(burst) => Some(&mut burst.payload),
            DvbFrame::BbFrame(bbframe) => Some(&mut bbframe.payload),
            _ => None,
        }
    }

    /// Pack the frame into a fresh buffer.
    pub fn pack(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            DvbFrame::Sof(sof) => sof.pack(&mut buf),
            DvbFrame::Sync(sync) => sync.pack(&mut buf),
            DvbFrame::LogonRequest(req) => req.pack(&mut buf),
            DvbFrame::LogonResponse(resp) => resp.pack(&mut buf),
            DvbFrame::Sac(sac) => sac.pack(&mut buf),
            DvbFrame::Ttp(ttp) => ttp.pack(&mut buf),
            DvbFrame::DvbBurst(burst) => burst.pack(&mut buf),
            DvbFrame::BbFrame(bbframe) => bbframe.pack(&mut buf),
            DvbFrame::SalohaData(frame) => frame.pack(&mut buf),
            DvbFrame::SalohaCtrl(ctrl) => ctrl.pack(&mut buf),
        }
        buf
    }

    /// Total length of the packed frame, in bytes.
    pub fn len_bytes(&self) -> usize {
        self.pack().len()
    }

    /// Parse a frame from its packed representation. Unknown message types
    /// and truncated frames surface as dedicated errors so callers can log
    /// and drop per the steady-state policy.
    pub fn from_bytes(input: &[u8]) -> Result<DvbFrame, DvbError> {
        let (rest, msg_type) = be_u8::<_, nom::error::Error<&[u8]>>(input)
            .map_err(|_| DvbError::FrameMalformed("empty frame".into()))?;
        let result = match msg_type {
            MSG_TYPE_SOF => Sof::parse(rest).map(|(r, f)| (r, DvbFrame::Sof(f))),
            MSG_TYPE_SYNC => Sync::parse(rest).map(|(r, f)| (r, DvbFrame::Sync(f))),
            MSG_TYPE_SESSION_LOGON_REQ => {
                LogonRequest::parse(rest).map(|(r, f)| (r, DvbFrame::LogonRequest(f)))
            }
            MSG_TYPE_SESSION_LOGON_RESP => {
                LogonResponse::parse(rest).map(|(r, f)| (r, DvbFrame::LogonResponse(f)))
            }
            MSG_TYPE_SAC => Sac::parse(rest).map(|(r, f)| (r, DvbFrame::Sac(f))),
            MSG_TYPE_TTP => Ttp::parse(rest).map(|(r, f)| (r, DvbFrame::Ttp(f))),
            MSG_TYPE_DVB_BURST => {
                DvbBurst::parse(rest).map(|(r, f)| (r, DvbFrame::DvbBurst(f)))
            }
            MSG_TYPE_BBFRAME => BbFrame::parse(rest).map(|(r, f)| (r, DvbFrame::BbFrame(f))),
            MSG_TYPE_SALOHA_DATA => {
                SalohaFrame::parse(rest).map(|(r, f)| (r, DvbFrame::SalohaData(f)))
            }
            MSG_TYPE_SALOHA_CTRL => {
                SalohaCtrl::parse(rest).map(|(r, f)| (r, DvbFrame::SalohaCtrl(f)))
            }
            other => return Err(DvbError::UnknownMsgType(other)),
        };
        match result {
            Ok((_, frame)) => Ok(frame),
            Err(err) => Err(DvbError::FrameMalformed(format!(
                "msg type 0x{msg_type:02X}: {err}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cn_encoding_is_sign_extended() {
        assert_eq!(hcnton(2.0), 200);
        assert_eq!(hcnton(-1.24), 0xFFFF_FF84);
        assert!((ncntoh(hcnton(-1.24)) + 1.24).abs() < 1e-9);
    }

    #[test]
    fn unknown_msg_type_is_reported() {
        match DvbFrame::from_bytes(&[0xEE, 0, 0]) {
            Err(DvbError::UnknownMsgType(0xEE)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn truncated_sac_is_malformed() {
        let sac = Sac {
            tal_id: 5,
            group_id: 1,
            rbdc_kbps: 100,
            vbdc_kb: 0,
            cn_db: 12.5,
        };
        let packed = DvbFrame::Sac(sac).pack();
        let truncated = &packed[..packed.len() - 2];
        assert!(matches!(
            DvbFrame::from_bytes(truncated),
            Err(DvbError::FrameMalformed(_))
        ));
    }
}
