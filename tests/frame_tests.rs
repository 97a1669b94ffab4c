//! Unit tests for the DVB frame codecs: round trips, malformed input
//! handling and the fixed-point C/N encoding.

use dvbsat_rs::error::DvbError;
use dvbsat_rs::frame::{
    hcnton, ncntoh, BbFrame, DvbBurst, DvbFrame, LogonRequest, LogonResponse, Sac, SalohaAck,
    SalohaCtrl, SalohaFrame, SalohaPacketData, Sof, Ttp, TtpAssignment,
};
use dvbsat_rs::types::AccessType;
use proptest::prelude::*;

fn round_trip(frame: DvbFrame) -> DvbFrame {
    DvbFrame::from_bytes(&frame.pack()).unwrap()
}

#[test]
fn sof_round_trip() {
    let frame = DvbFrame::Sof(Sof::new(0xBEEF));
    assert_eq!(round_trip(frame.clone()), frame);
    assert_eq!(frame.pack().len(), 8);
}

#[test]
fn logon_round_trip() {
    let request = LogonRequest::new(5, 128, 512, 0, false);
    let frame = DvbFrame::LogonRequest(request.clone());
    assert_eq!(round_trip(frame.clone()), frame);
    assert!(!request.is_scpc());

    let scpc = LogonRequest::new(9, 0, 0, 0, true);
    assert!(scpc.is_scpc());
    assert_eq!(
        round_trip(DvbFrame::LogonRequest(scpc.clone())),
        DvbFrame::LogonRequest(scpc)
    );

    let response = DvbFrame::LogonResponse(LogonResponse {
        logon_id: 5,
        group_id: 1,
    });
    assert_eq!(round_trip(response.clone()), response);
}

#[test]
fn sac_round_trip_preserves_cn_within_a_centidecibel() {
    // R1: decode(encode(sac)) with |cn_out - cn| <= 0.01 dB.
    let mut sac = Sac::new(7, 2);
    sac.rbdc_kbps = 1000;
    sac.vbdc_kb = 250;
    sac.cn_db = 12.345;
    let decoded = match round_trip(DvbFrame::Sac(sac.clone())) {
        DvbFrame::Sac(decoded) => decoded,
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(decoded.tal_id, 7);
    assert_eq!(decoded.group_id, 2);
    assert_eq!(decoded.rbdc_kbps, 1000);
    assert_eq!(decoded.vbdc_kb, 250);
    assert!((decoded.cn_db - sac.cn_db).abs() <= 0.01);
}

#[test]
fn ttp_round_trip() {
    let mut ttp = Ttp::new(42);
    ttp.assignments.push(TtpAssignment {
        tal_id: 5,
        access_type: AccessType::Dama,
        rate_kbps: 896,
        volume_kb: 10,
        start_slot: 0,
        slot_count: 0,
    });
    ttp.assignments.push(TtpAssignment {
        tal_id: 6,
        access_type: AccessType::Scpc,
        rate_kbps: 2048,
        volume_kb: 0,
        start_slot: 4,
        slot_count: 8,
    });
    let frame = DvbFrame::Ttp(ttp.clone());
    assert_eq!(round_trip(frame.clone()), frame);
    assert_eq!(ttp.assignment_for(6).unwrap().rate_kbps, 2048);
    assert!(ttp.assignment_for(9).is_none());
}

#[test]
fn data_frames_round_trip() {
    let mut burst = DvbBurst::new(4);
    burst.nb_packets = 2;
    burst.payload = vec![0xAA; 60];
    let frame = DvbFrame::DvbBurst(burst);
    assert_eq!(round_trip(frame.clone()), frame);

    let mut bbframe = BbFrame::new(11);
    bbframe.real_modcod = 13;
    bbframe.payload = vec![0x55; 188];
    let frame = DvbFrame::BbFrame(bbframe);
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn saloha_frames_round_trip() {
    let mut data = SalohaFrame::new();
    data.packets.push(SalohaPacketData {
        tal_id: 3,
        qos: 1,
        pdu_seq: 17,
        pdu_count: 1,
        replicas: vec![3, 7],
        payload: vec![1, 2, 3, 4],
    });
    let frame = DvbFrame::SalohaData(data);
    assert_eq!(round_trip(frame.clone()), frame);

    let mut ctrl = SalohaCtrl::new();
    ctrl.acks.push(SalohaAck {
        tal_id: 3,
        pdu_seq: 17,
    });
    let frame = DvbFrame::SalohaCtrl(ctrl);
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn unknown_message_type_is_rejected() {
    assert!(matches!(
        DvbFrame::from_bytes(&[0x99, 1, 2, 3]),
        Err(DvbError::UnknownMsgType(0x99))
    ));
}

#[test]
fn truncated_frames_are_malformed() {
    for frame in [
        DvbFrame::Sof(Sof::new(1)),
        DvbFrame::LogonRequest(LogonRequest::new(1, 2, 3, 4, false)),
        DvbFrame::Sac(Sac::new(1, 1)),
    ] {
        let packed = frame.pack();
        for cut in 1..packed.len() {
            assert!(
                DvbFrame::from_bytes(&packed[..cut]).is_err(),
                "truncation at {cut} must fail for type 0x{:02X}",
                frame.msg_type()
            );
        }
    }
}

proptest! {
    // R2: hcnton then ncntoh is the identity on representable values.
    #[test]
    fn cn_fixed_point_identity(raw in -32768i32..=32767i32) {
        let cn = f64::from(raw) / 100.0;
        let decoded = ncntoh(hcnton(cn));
        prop_assert!((decoded - cn).abs() < 1e-9);
    }

    #[test]
    fn sac_fields_round_trip(tal in 0u16..31, rbdc in 0u16..u16::MAX, vbdc in 0u16..u16::MAX) {
        let mut sac = Sac::new(tal, 1);
        sac.rbdc_kbps = rbdc;
        sac.vbdc_kb = vbdc;
        let frame = DvbFrame::Sac(sac);
        let packed = frame.pack();
        prop_assert_eq!(DvbFrame::from_bytes(&packed).unwrap(), frame);
    }
}
