//! Integration tests for the UDP carrier layer: real sockets on loopback.

use dvbsat_rs::carrier::{CarrierEnvelope, UdpCarrierSet};
use dvbsat_rs::error::DvbError;
use dvbsat_rs::frame::{DvbFrame, Sac, Sof};

#[tokio::test]
async fn frames_travel_between_two_carrier_sets() {
    let sender = UdpCarrierSet::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let mut receiver = UdpCarrierSet::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let mut sender = sender;
    sender.add_destination(2, receiver.local_addr().unwrap());

    let mut envelope = CarrierEnvelope::new(1, 2);
    envelope.cn_db = 6.75;
    let mut sac = Sac::new(5, 1);
    sac.rbdc_kbps = 300;
    sender
        .send_frame(&envelope, &DvbFrame::Sac(sac.clone()))
        .await
        .unwrap();

    let (received_env, received_frame) = receiver.recv_frame().await.unwrap();
    assert_eq!(received_env.spot_id, 1);
    assert_eq!(received_env.carrier_id, 2);
    assert!((received_env.cn_db - 6.75).abs() < 1e-9);
    match received_frame {
        DvbFrame::Sac(received) => assert_eq!(received.rbdc_kbps, 300),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_datagrams_are_skipped() {
    let mut receiver = UdpCarrierSet::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let target = receiver.local_addr().unwrap();

    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // garbage first, then a valid frame: recv_frame should skip the former
    raw.send_to(&[0xde, 0xad], target).await.unwrap();
    let envelope = CarrierEnvelope::new(1, 2);
    let datagram =
        dvbsat_rs::carrier::pack_carrier(&envelope, &DvbFrame::Sof(Sof::new(12)));
    raw.send_to(&datagram, target).await.unwrap();

    let (_, frame) = receiver.recv_frame().await.unwrap();
    assert_eq!(frame, DvbFrame::Sof(Sof::new(12)));
}

#[tokio::test]
async fn unknown_carrier_is_a_transient_error() {
    let sender = UdpCarrierSet::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let envelope = CarrierEnvelope::new(1, 9);
    let result = sender
        .send_frame(&envelope, &DvbFrame::Sof(Sof::new(1)))
        .await;
    assert!(matches!(result, Err(DvbError::TransientIo(_))));
}
