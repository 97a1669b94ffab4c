//! End-to-end control-plane scenarios, driven through encoded frames: every
//! message crosses the wire codec exactly as it would over a UDP carrier.

use dvbsat_rs::band::{BandConfig, BandPlan, CarrierSpec};
use dvbsat_rs::carrier::{pack_carrier, parse_carrier, CarrierEnvelope};
use dvbsat_rs::dama::{DamaAgent, DamaAgentConfig, DamaController, TalState};
use dvbsat_rs::fifo::MacFifo;
use dvbsat_rs::fmt::FmtDefinitionTable;
use dvbsat_rs::frame::DvbFrame;
use dvbsat_rs::saloha::{SalohaConfig, SlottedAlohaNcc, SlottedAlohaTal};
use dvbsat_rs::sat::{SatGwCarriers, SatelliteForwarder};
use dvbsat_rs::types::{AccessType, CrKind, QosId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Encode then decode a frame, as the carrier layer would.
fn over_the_wire(frame: DvbFrame) -> DvbFrame {
    let envelope = CarrierEnvelope::new(1, 2);
    let datagram = pack_carrier(&envelope, &frame);
    let (_, parsed) = parse_carrier(&datagram).unwrap();
    parsed
}

fn dama_controller(capacity_kbps: u32) -> DamaController {
    let table = Arc::new(FmtDefinitionTable::default_rcs2());
    let config = BandConfig {
        bandwidth_khz: capacity_kbps,
        roll_off: 0.0,
        superframe_duration: Duration::from_secs(1),
        carriers: vec![CarrierSpec {
            category: "Standard".into(),
            access_type: AccessType::Dama,
            symbol_rate_symps: capacity_kbps * 1000,
            format_ratios: vec![("4".into(), 100)],
        }],
    };
    let band = BandPlan::compute(
        &config,
        AccessType::Dama,
        &table,
        &HashMap::new(),
        Some("Standard"),
    )
    .unwrap();
    DamaController::new(1, Duration::from_secs(1), table, band, 16, false).unwrap()
}

fn dama_agent(tal_id: u16, cra: u32, max_rbdc: u32) -> DamaAgent {
    let table = Arc::new(FmtDefinitionTable::default_rcs2());
    DamaAgent::new(
        DamaAgentConfig {
            mac_id: tal_id,
            cra_kbps: cra,
            max_rbdc_kbps: max_rbdc,
            max_vbdc_kb: 0,
            sync_period_frame: 1,
            frame_duration: Duration::from_secs(1),
            is_scpc: false,
        },
        table,
    )
    .unwrap()
}

fn rbdc_fifos() -> BTreeMap<QosId, MacFifo<dvbsat_rs::encap::NetPacket>> {
    let mut fifos = BTreeMap::new();
    fifos.insert(0, MacFifo::new("be", 0, CrKind::DamaRbdc, 4096));
    fifos
}

#[test]
fn scenario_logon() {
    // Scenario 1: one GW, one ST (talId 5, CRA 128, maxRbdc 512).
    let mut gw = dama_controller(1024);
    let mut st = dama_agent(5, 128, 512);

    let logon = st.start();
    assert_eq!(st.state(), TalState::WaitLogonResp);

    let frame = over_the_wire(DvbFrame::LogonRequest(logon));
    let request = match frame {
        DvbFrame::LogonRequest(request) => request,
        other => panic!("unexpected frame: {other:?}"),
    };
    let response = gw.on_logon(&request).unwrap();

    let frame = over_the_wire(DvbFrame::LogonResponse(response));
    let response = match frame {
        DvbFrame::LogonResponse(response) => response,
        other => panic!("unexpected frame: {other:?}"),
    };
    let link_up = st.on_logon_resp(&response);

    assert_eq!(st.state(), TalState::Running);
    assert_eq!(link_up.tal_id, 5);
    assert_eq!(link_up.group_id, 1);
    // the NCC context is registered with the requested CRA
    assert_eq!(gw.context(5).unwrap().required_cra(), 128);
}

#[test]
fn scenario_rbdc_request_over_the_wire() {
    // Scenario 2 across the codec: SAC(rbdc=1000) against maxRbdc 768 in a
    // 1024 kb/s category with CRA 128 yields a 896 kb/s assignment.
    let mut gw = dama_controller(1024);
    let mut st = dama_agent(5, 128, 768);

    let logon = st.start();
    let response = gw.on_logon(&logon).unwrap();
    st.on_logon_resp(&response);
    st.here_is_sof(1);

    // enough ingress over the 1 s window for a 1000 kb/s request
    let mut fifos = rbdc_fifos();
    fifos
        .get_mut(&0)
        .unwrap()
        .push(
            dvbsat_rs::encap::NetPacket::new(vec![0u8; 125_000], 0, 5, 0),
            0,
            0,
        )
        .unwrap();
    let mut sac = st.build_sac(&fifos, 3.0).unwrap();
    sac.rbdc_kbps = 1000; // the request the scenario prescribes
    let frame = over_the_wire(DvbFrame::Sac(sac));
    let sac = match frame {
        DvbFrame::Sac(sac) => sac,
        other => panic!("unexpected frame: {other:?}"),
    };
    gw.on_sac(&sac).unwrap();

    let ttp = gw.compute_ttp(1).unwrap();
    let frame = over_the_wire(DvbFrame::Ttp(ttp));
    let ttp = match frame {
        DvbFrame::Ttp(ttp) => ttp,
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(ttp.assignment_for(5).unwrap().rate_kbps, 896);
    st.here_is_ttp(&ttp).unwrap();
}

#[test]
fn scenario_data_burst_reaches_the_gateway() {
    // A running terminal schedules a burst; the gateway unpacks the
    // payload back into the original packets.
    let mut gw = dama_controller(1024);
    let mut st = dama_agent(5, 512, 0);

    let logon = st.start();
    let response = gw.on_logon(&logon).unwrap();
    st.on_logon_resp(&response);
    st.here_is_sof(1);

    let mut fifos = rbdc_fifos();
    for index in 0..4u8 {
        fifos
            .get_mut(&0)
            .unwrap()
            .push(
                dvbsat_rs::encap::NetPacket::new(vec![index; 100], 0, 5, 0),
                0,
                0,
            )
            .unwrap();
    }
    let frames = st.return_schedule(&mut fifos).unwrap();
    assert_eq!(frames.len(), 1);

    let frame = over_the_wire(frames.into_iter().next().unwrap());
    let burst = match frame {
        DvbFrame::DvbBurst(burst) => burst,
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(burst.nb_packets, 4);
    let packets = dvbsat_rs::encap::parse_burst_payload(&burst.payload).unwrap();
    assert_eq!(packets.len(), 4);
    assert_eq!(packets[2].data, vec![2u8; 100]);
    assert_eq!(packets[2].src_tal_id, 5);
}

#[test]
fn scenario_saloha_collision_over_the_wire() {
    // Scenarios 4 and 5 with real terminal schedulers on both ends.
    let config = SalohaConfig {
        nb_replicas: 2,
        timeout_saf: 1,
        nb_max_retransmissions: 3,
        nb_max_packets: 4,
        sf_per_saframe: 1,
        slots_per_carrier: 32,
        backoff_cw_max: 4,
        backoff_multiple: 2,
    };
    let mut ncc = SlottedAlohaNcc::new(config.clone());
    ncc.add_category("RA", 1);
    ncc.add_terminal(1);
    ncc.add_terminal(2);

    let mut st1 = SlottedAlohaTal::with_seed(1, config.clone(), 32, 100);
    let mut st2 = SlottedAlohaTal::with_seed(2, config, 32, 200);

    let mut fifos1 = BTreeMap::new();
    let mut fifo = MacFifo::new("ra", 0, CrKind::Saloha, 64);
    fifo.push(dvbsat_rs::encap::NetPacket::new(vec![1; 16], 0, 1, 0), 0, 0)
        .unwrap();
    fifos1.insert(0u8, fifo);

    let mut fifos2 = BTreeMap::new();
    let mut fifo = MacFifo::new("ra", 0, CrKind::Saloha, 64);
    fifo.push(dvbsat_rs::encap::NetPacket::new(vec![2; 16], 0, 2, 0), 0, 0)
        .unwrap();
    fifos2.insert(0u8, fifo);

    for (st, fifos) in [(&mut st1, &mut fifos1), (&mut st2, &mut fifos2)] {
        for frame in st.schedule(fifos, 0).unwrap() {
            let frame = over_the_wire(frame);
            let saloha_frame = match frame {
                DvbFrame::SalohaData(frame) => frame,
                other => panic!("unexpected frame: {other:?}"),
            };
            ncc.on_rcv_frame("RA", &saloha_frame).unwrap();
        }
    }

    let (burst, acks) = ncc.schedule(0).unwrap();
    // with 32 slots and independent draws both PDUs keep a clear replica
    assert_eq!(burst.len(), 2);
    for ack_frame in acks {
        let frame = over_the_wire(ack_frame);
        let ctrl = match frame {
            DvbFrame::SalohaCtrl(ctrl) => ctrl,
            other => panic!("unexpected frame: {other:?}"),
        };
        st1.on_rcv_ack(&ctrl);
        st2.on_rcv_ack(&ctrl);
    }
    assert_eq!(st1.stats().waiting_ack + st2.stats().waiting_ack, 0);
}

#[test]
fn scenario_satellite_delays_data_but_not_sof() {
    let mut forwarder = SatelliteForwarder::new(100);
    forwarder.add_gw(
        1,
        SatGwCarriers {
            logon_out: 4,
            control_out: 5,
            data_out: 6,
        },
        64,
    );

    let envelope = CarrierEnvelope::new(1, 2);
    // SOF forwards immediately on the control carrier
    let immediate = forwarder
        .on_rcv_frame(envelope, DvbFrame::Sof(dvbsat_rs::frame::Sof::new(7)), 0)
        .unwrap();
    assert_eq!(immediate.len(), 1);
    assert_eq!(immediate[0].0, 5);

    // a data burst waits for the propagation delay
    let mut burst = dvbsat_rs::frame::DvbBurst::new(4);
    burst.payload = vec![9; 10];
    forwarder
        .on_rcv_frame(envelope, DvbFrame::DvbBurst(burst), 0)
        .unwrap();
    assert!(forwarder.on_fwd_timer(99).is_empty());
    let out = forwarder.on_fwd_timer(100);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, 6);

    // logon, control and data classes drain in that order
    let logon = DvbFrame::LogonRequest(dvbsat_rs::frame::LogonRequest::new(5, 0, 0, 0, false));
    let sync = DvbFrame::Sync(dvbsat_rs::frame::Sync { sfn: 1 });
    forwarder.on_rcv_frame(envelope, sync, 200).unwrap();
    forwarder.on_rcv_frame(envelope, logon, 200).unwrap();
    let out = forwarder.on_fwd_timer(300);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].0, 4, "logon class drains first");
    assert_eq!(out[1].0, 5);
}
