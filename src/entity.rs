//! # Emulated Entities
//!
//! One event loop per entity kind: the gateway (NCC) paces superframes
//! with SOF, runs the DAMA controller and the Slotted-Aloha gateway
//! scheduler; the terminal slaves its ticks to the received SOF and runs
//! the DAMA agent, Slotted-Aloha terminal and SCPC schedulers; the
//! satellite forwards frames through its delay FIFOs.
//!
//! Every loop is a `tokio::select!` over the carrier socket, the entity
//! timers and the inter-block channels; handlers never block.

use crate::band::BandPlan;
use crate::carrier::{CarrierEnvelope, UdpCarrierSet};
use crate::config::{EntityConfig, InfrastructureConfig, TopologyConfig};
use crate::constants::LOGON_TIMER_MS;
use crate::dama::{DamaAgent, DamaAgentConfig, DamaController, SofOutcome, TalState};
use crate::encap::{parse_burst_payload, EncapRegistry, NetBurst, NetPacket};
use crate::error::DvbError;
use crate::fifo::MacFifo;
use crate::fmt::FmtDefinitionTable;
use crate::frame::{DvbFrame, Sof};
use crate::phy::{AttenuationHandler, ErrorInsertion, MinimalCondition};
use crate::saloha::{SlottedAlohaNcc, SlottedAlohaTal};
use crate::scpc::ScpcScheduler;
use crate::types::{AccessType, CarrierId, CrKind, QosId, SpotId, TalId, TimeMs, TimeSf};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Well-known carrier ids inside a spot.
pub mod carriers {
    use crate::types::CarrierId;

    pub const LOGON_IN: CarrierId = 1;
    pub const CTRL_IN: CarrierId = 2;
    pub const DATA_IN: CarrierId = 3;
    pub const LOGON_OUT: CarrierId = 4;
    pub const CTRL_OUT: CarrierId = 5;
    pub const DATA_OUT: CarrierId = 6;
}

/// Millisecond clock anchored at entity start.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> TimeMs {
        self.origin.elapsed().as_millis() as TimeMs
    }
}

fn default_fifos() -> BTreeMap<QosId, MacFifo<NetPacket>> {
    let mut fifos = BTreeMap::new();
    fifos.insert(0, MacFifo::new("nm", 0, CrKind::DamaRbdc, 1000));
    fifos.insert(1, MacFifo::new("ef", 1, CrKind::DamaRbdc, 1000));
    fifos.insert(2, MacFifo::new("sig", 2, CrKind::DamaVbdc, 1000));
    fifos.insert(3, MacFifo::new("af", 3, CrKind::DamaVbdc, 1000));
    fifos.insert(4, MacFifo::new("be", 4, CrKind::DamaVbdc, 2000));
    fifos
}

/// The gateway (NCC) entity.
pub struct GatewayEntity {
    spot_id: SpotId,
    carrier_set: UdpCarrierSet,
    dama: DamaController,
    saloha: SlottedAlohaNcc,
    phy: AttenuationHandler,
    aloha_band: Option<BandPlan>,
    super_frame_counter: TimeSf,
    superframe_duration: std::time::Duration,
    /// Bursts delivered upward to the encapsulation block.
    upward_tx: mpsc::UnboundedSender<NetBurst>,
}

impl GatewayEntity {
    pub async fn new(
        topology: &TopologyConfig,
        entity: &EntityConfig,
        spot_id: SpotId,
        upward_tx: mpsc::UnboundedSender<NetBurst>,
    ) -> Result<Self, DvbError> {
        let spot = topology.spot(spot_id)?;
        let fmt_table = Arc::new(FmtDefinitionTable::default_rcs2());

        let affectation: HashMap<TalId, String> = spot.terminal_affectation.clone();
        let dama_band = BandPlan::compute(
            &spot.band_config(),
            AccessType::Dama,
            &fmt_table,
            &affectation,
            spot.default_category.as_deref(),
        )?;
        let dama = DamaController::new(
            spot_id,
            spot.superframe_duration(),
            fmt_table.clone(),
            dama_band,
            topology.dama.rbdc_timeout_sf,
            topology.dama.fca_enabled,
        )?;

        let mut saloha = SlottedAlohaNcc::new(topology.saloha.clone());
        let aloha_band = match BandPlan::compute(
            &spot.band_config(),
            AccessType::Aloha,
            &fmt_table,
            &affectation,
            spot.default_category.as_deref(),
        ) {
            Ok(band) => {
                for (label, category) in band.categories() {
                    saloha.add_category(label, category.carriers_number());
                }
                Some(band)
            }
            Err(_) => None,
        };

        let phy = AttenuationHandler::new(
            MinimalCondition::Modcod,
            ErrorInsertion::Gate,
            fmt_table.clone(),
        );

        let mut carrier_set = UdpCarrierSet::bind(entity.bind_address).await?;
        for endpoint in &entity.carriers {
            carrier_set.add_destination(endpoint.carrier_id, endpoint.address);
        }

        Ok(GatewayEntity {
            spot_id,
            carrier_set,
            dama,
            saloha,
            phy,
            aloha_band,
            super_frame_counter: 0,
            superframe_duration: spot.superframe_duration(),
            upward_tx,
        })
    }

    pub fn dama(&self) -> &DamaController {
        &self.dama
    }

    /// Run the NCC event loop until the socket fails permanently. Per-frame
    /// protocol errors are logged and the loop keeps going.
    pub async fn run(&mut self) -> Result<(), DvbError> {
        let mut sof_timer = interval(self.superframe_duration);
        info!("gateway for spot {} entering its event loop", self.spot_id);
        loop {
            tokio::select! {
                _ = sof_timer.tick() => {
                    if let Err(err) = self.on_superframe_tick().await {
                        warn!("superframe tick failed: {err}");
                    }
                }
                received = self.carrier_set.recv_frame() => {
                    let (envelope, frame) = received?;
                    if let Err(err) = self.on_frame(envelope, frame).await {
                        warn!("frame dropped: {err}");
                    }
                }
            }
        }
    }

    /// One superframe: emit the SOF, advance the DAMA timers, compute and
    /// broadcast the TTP, then close the Slotted-Aloha frame.
    pub async fn on_superframe_tick(&mut self) -> Result<(), DvbError> {
        self.super_frame_counter = self.super_frame_counter.wrapping_add(1);
        let sfn = self.super_frame_counter;

        let envelope = CarrierEnvelope::new(self.spot_id, carriers::CTRL_OUT);
        self.carrier_set
            .send_frame(&envelope, &DvbFrame::Sof(Sof::new(sfn)))
            .await?;

        self.dama.on_frame_tick();
        let ttp = self.dama.compute_ttp(sfn)?;
        if !ttp.assignments.is_empty() {
            self.carrier_set
                .send_frame(&envelope, &DvbFrame::Ttp(ttp))
                .await?;
        }

        let (burst, acks) = self.saloha.schedule(sfn)?;
        if !burst.is_empty() {
            let _ = self.upward_tx.send(burst);
        }
        for ack in acks {
            self.carrier_set.send_frame(&envelope, &ack).await?;
        }
        Ok(())
    }

    /// Dispatch one received frame through the physical-layer check and
    /// the control plane. Protocol violations are logged and dropped.
    pub async fn on_frame(
        &mut self,
        mut envelope: CarrierEnvelope,
        mut frame: DvbFrame,
    ) -> Result<(), DvbError> {
        let corrupted = self.phy.process(&mut envelope, &mut frame)? || envelope.corrupted;
        match frame {
            DvbFrame::LogonRequest(request) => {
                match self.dama.on_logon(&request) {
                    Ok(response) => {
                        self.saloha.add_terminal(request.mac);
                        let envelope = CarrierEnvelope::new(self.spot_id, carriers::LOGON_OUT);
                        self.carrier_set
                            .send_frame(&envelope, &DvbFrame::LogonResponse(response))
                            .await?;
                    }
                    Err(err) => warn!("logon rejected: {err}"),
                }
            }
            DvbFrame::Sac(sac) => {
                if let Err(err) = self.dama.on_sac(&sac) {
                    warn!("SAC discarded: {err}");
                }
            }
            DvbFrame::DvbBurst(burst) => {
                if corrupted {
                    debug!("corrupted DVB burst dropped before deencapsulation");
                    return Ok(());
                }
                let packets = parse_burst_payload(&burst.payload)?;
                if !packets.is_empty() {
                    let _ = self.upward_tx.send(packets);
                }
            }
            DvbFrame::SalohaData(saloha_frame) => {
                let label = self.saloha_category_for(&saloha_frame);
                match label {
                    Some(label) => {
                        if let Err(err) = self.saloha.on_rcv_frame(&label, &saloha_frame) {
                            warn!("Slotted Aloha frame dropped: {err}");
                        }
                    }
                    None => warn!("Slotted Aloha frame without a category, dropped"),
                }
            }
            other => {
                debug!(
                    "gateway ignoring frame type 0x{:02X} on carrier {}",
                    other.msg_type(),
                    envelope.carrier_id
                );
            }
        }
        Ok(())
    }

    fn saloha_category_for(&self, frame: &crate::frame::SalohaFrame) -> Option<String> {
        let band = self.aloha_band.as_ref()?;
        let tal_id = frame.packets.first().map(|p| p.tal_id)?;
        match band.category_for(tal_id) {
            Some(label) => Some(label.to_string()),
            None => band.categories().keys().next().cloned(),
        }
    }
}

/// The terminal (ST) entity.
pub struct TerminalEntity {
    spot_id: SpotId,
    carrier_set: UdpCarrierSet,
    agent: DamaAgent,
    saloha: Option<SlottedAlohaTal>,
    scpc: Option<ScpcScheduler>,
    fifos: BTreeMap<QosId, MacFifo<NetPacket>>,
    phy: AttenuationHandler,
    encap: EncapRegistry,
    clock: Clock,
    /// Measured forward C/N fed to the SAC ACM field.
    forward_cn_db: f64,
    /// Packets delivered upward after deencapsulation.
    upward_tx: mpsc::UnboundedSender<NetBurst>,
    /// Traffic injected by the LAN side.
    downward_rx: mpsc::UnboundedReceiver<NetPacket>,
}

impl TerminalEntity {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        topology: &TopologyConfig,
        entity: &EntityConfig,
        spot_id: SpotId,
        tal_id: TalId,
        upward_tx: mpsc::UnboundedSender<NetBurst>,
        downward_rx: mpsc::UnboundedReceiver<NetPacket>,
    ) -> Result<Self, DvbError> {
        let spot = topology.spot(spot_id)?;
        let fmt_table = Arc::new(FmtDefinitionTable::default_rcs2());
        let terminal = topology.terminal(tal_id);

        let agent_config = DamaAgentConfig {
            mac_id: tal_id,
            cra_kbps: terminal.map(|t| t.cra_kbps).unwrap_or(0),
            max_rbdc_kbps: terminal.map(|t| t.max_rbdc_kbps).unwrap_or(0),
            max_vbdc_kb: terminal.map(|t| t.max_vbdc_kb).unwrap_or(0),
            sync_period_frame: topology.dama.sync_period_frame,
            frame_duration: spot.frame_duration(),
            is_scpc: terminal.map(|t| t.is_scpc).unwrap_or(false),
        };
        let is_scpc = agent_config.is_scpc;
        let agent = DamaAgent::new(agent_config, fmt_table.clone())?;

        // Slotted-Aloha slot space follows the Aloha band of the spot
        let affectation: HashMap<TalId, String> = spot.terminal_affectation.clone();
        let saloha = BandPlan::compute(
            &spot.band_config(),
            AccessType::Aloha,
            &fmt_table,
            &affectation,
            spot.default_category.as_deref(),
        )
        .ok()
        .and_then(|band| {
            let label = band.category_for(tal_id)?.to_string();
            let category = band.category(&label)?;
            let nb_slots = u32::from(topology.saloha.slots_per_carrier)
                * category.carriers_number();
            Some(SlottedAlohaTal::new(
                tal_id,
                topology.saloha.clone(),
                nb_slots.min(u32::from(u16::MAX)) as u16,
            ))
        });

        let scpc = if is_scpc {
            let symbol_rate = spot
                .carriers
                .iter()
                .find(|c| c.access_type == AccessType::Scpc)
                .map(|c| c.symbol_rate_symps)
                .ok_or_else(|| {
                    DvbError::ConfigInvalid(format!(
                        "ST{tal_id} is SCPC but spot {spot_id} has no SCPC carrier"
                    ))
                })?;
            let s2_table = Arc::new(FmtDefinitionTable::default_s2());
            let modcod = s2_table.min_id()?;
            Some(ScpcScheduler::new(
                carriers::DATA_IN,
                symbol_rate,
                spot.frame_duration(),
                s2_table,
                modcod,
            )?)
        } else {
            None
        };

        let phy = AttenuationHandler::new(
            MinimalCondition::Modcod,
            ErrorInsertion::Gate,
            Arc::new(FmtDefinitionTable::default_s2()),
        );

        let mut encap = EncapRegistry::with_builtin();
        encap.get_mut("basic")?.set_filter_tal_id(tal_id);

        let mut fifos = default_fifos();
        if saloha.is_some() {
            fifos.insert(5, MacFifo::new("ra", 5, CrKind::Saloha, 1000));
        }
        if is_scpc {
            fifos.insert(6, MacFifo::new("scpc", 6, CrKind::Scpc, 2000));
        }

        let mut carrier_set = UdpCarrierSet::bind(entity.bind_address).await?;
        for endpoint in &entity.carriers {
            carrier_set.add_destination(endpoint.carrier_id, endpoint.address);
        }

        Ok(TerminalEntity {
            spot_id,
            carrier_set,
            agent,
            saloha,
            scpc,
            fifos,
            phy,
            encap,
            clock: Clock::start(),
            forward_cn_db: 0.0,
            upward_tx,
            downward_rx,
        })
    }

    pub fn agent(&self) -> &DamaAgent {
        &self.agent
    }

    /// Run the terminal event loop. Per-frame protocol errors are logged
    /// and the loop keeps going.
    pub async fn run(&mut self) -> Result<(), DvbError> {
        let mut logon_timer = interval(std::time::Duration::from_millis(LOGON_TIMER_MS));
        // consume the immediate first tick, the logon below is the start
        logon_timer.tick().await;
        info!(
            "terminal {} on spot {} entering its event loop",
            self.agent.tal_id(),
            self.spot_id
        );
        let request = self.agent.start();
        self.send(carriers::LOGON_IN, DvbFrame::LogonRequest(request))
            .await?;

        loop {
            tokio::select! {
                _ = logon_timer.tick() => {
                    if let Some(request) = self.agent.on_logon_timer() {
                        self.send(carriers::LOGON_IN, DvbFrame::LogonRequest(request)).await?;
                    }
                }
                Some(packet) = self.downward_rx.recv() => {
                    self.enqueue(packet);
                }
                received = self.carrier_set.recv_frame() => {
                    let (envelope, frame) = received?;
                    if let Err(err) = self.on_frame(envelope, frame).await {
                        warn!("frame dropped: {err}");
                    }
                }
            }
        }
    }

    /// Queue one packet from the LAN side into its MAC FIFO. Drops are
    /// counted by the FIFO itself.
    pub fn enqueue(&mut self, packet: NetPacket) {
        let now = self.clock.now_ms();
        let qos = packet.qos.min(7);
        let fifo = match self.fifo_for(qos) {
            Some(fifo) => fifo,
            None => {
                warn!("no MAC FIFO for QoS {qos}, packet dropped");
                return;
            }
        };
        if fifo.push(packet, now, now).is_err() {
            debug!("MAC FIFO full for QoS {qos}");
        }
    }

    fn fifo_for(&mut self, qos: QosId) -> Option<&mut MacFifo<NetPacket>> {
        if self.fifos.contains_key(&qos) {
            return self.fifos.get_mut(&qos);
        }
        // fall back to the lowest-priority FIFO
        self.fifos.values_mut().last()
    }

    async fn send(&self, carrier_id: CarrierId, frame: DvbFrame) -> Result<(), DvbError> {
        let mut envelope = CarrierEnvelope::new(self.spot_id, carrier_id);
        envelope.cn_db = self.forward_cn_db;
        self.carrier_set.send_frame(&envelope, &frame).await
    }

    /// Dispatch one received frame.
    pub async fn on_frame(
        &mut self,
        mut envelope: CarrierEnvelope,
        mut frame: DvbFrame,
    ) -> Result<(), DvbError> {
        let corrupted = self.phy.process(&mut envelope, &mut frame)? || envelope.corrupted;
        self.forward_cn_db = envelope.cn_db;
        match frame {
            DvbFrame::LogonResponse(response) => {
                let link_up = self.agent.on_logon_resp(&response);
                info!(
                    "LINK_UP group {} terminal {}",
                    link_up.group_id, link_up.tal_id
                );
            }
            DvbFrame::Sof(sof) => {
                self.on_sof(sof.sfn).await?;
            }
            DvbFrame::Ttp(ttp) => {
                if let Err(err) = self.agent.here_is_ttp(&ttp) {
                    warn!("TTP dropped: {err}");
                }
            }
            DvbFrame::SalohaCtrl(ctrl) => {
                if let Some(saloha) = &mut self.saloha {
                    saloha.on_rcv_ack(&ctrl);
                }
            }
            DvbFrame::BbFrame(bbframe) => {
                if corrupted {
                    debug!("corrupted BBFrame dropped before deencapsulation");
                    return Ok(());
                }
                let packets = parse_burst_payload(&bbframe.payload)?;
                let packets = self.encap.get_mut("basic")?.deencapsulate(packets)?;
                if !packets.is_empty() {
                    let _ = self.upward_tx.send(packets);
                }
            }
            other => {
                debug!(
                    "terminal ignoring frame type 0x{:02X} on carrier {}",
                    other.msg_type(),
                    envelope.carrier_id
                );
            }
        }
        Ok(())
    }

    /// The per-frame tick of the terminal, slaved to the received SOF.
    async fn on_sof(&mut self, sfn: TimeSf) -> Result<(), DvbError> {
        match self.agent.here_is_sof(sfn) {
            SofOutcome::NccReboot => {
                self.agent.delete_packets(&mut self.fifos);
                let request = self.agent.start();
                self.send(carriers::LOGON_IN, DvbFrame::LogonRequest(request))
                    .await?;
                return Ok(());
            }
            SofOutcome::Normal => {}
        }
        if self.agent.state() != TalState::Running {
            return Ok(());
        }

        let mut outgoing: Vec<(CarrierId, DvbFrame)> = Vec::new();
        for frame in self.agent.return_schedule(&mut self.fifos)? {
            outgoing.push((carriers::DATA_IN, frame));
        }
        if let Some(saloha) = &mut self.saloha {
            for frame in saloha.schedule(&mut self.fifos, sfn)? {
                outgoing.push((carriers::DATA_IN, frame));
            }
        }
        if let Some(scpc) = &mut self.scpc {
            for frame in scpc.schedule(&mut self.fifos)? {
                outgoing.push((carriers::DATA_IN, frame));
            }
        }
        if self.agent.is_sac_slot() {
            if let Some(sac) = self.agent.build_sac(&self.fifos, self.forward_cn_db) {
                outgoing.push((carriers::CTRL_IN, DvbFrame::Sac(sac)));
            }
        }
        for (carrier_id, frame) in outgoing {
            self.send(carrier_id, frame).await?;
        }
        Ok(())
    }
}

/// The transparent satellite entity.
pub struct SatelliteEntity {
    carrier_set: UdpCarrierSet,
    forwarder: crate::sat::SatelliteForwarder,
    clock: Clock,
    fwd_period: std::time::Duration,
}

impl SatelliteEntity {
    pub async fn new(
        topology: &TopologyConfig,
        infrastructure: &InfrastructureConfig,
        entity: &EntityConfig,
    ) -> Result<Self, DvbError> {
        let mut forwarder =
            crate::sat::SatelliteForwarder::new(infrastructure.one_way_delay_ms);
        for spot in &topology.spots {
            forwarder.add_gw(
                spot.id,
                crate::sat::SatGwCarriers {
                    logon_out: carriers::LOGON_OUT,
                    control_out: carriers::CTRL_OUT,
                    data_out: carriers::DATA_OUT,
                },
                4000,
            );
        }

        let mut carrier_set = UdpCarrierSet::bind(entity.bind_address).await?;
        for endpoint in &entity.carriers {
            carrier_set.add_destination(endpoint.carrier_id, endpoint.address);
        }
        let fwd_period = topology
            .spots
            .first()
            .map(|s| s.frame_duration() / 4)
            .unwrap_or(std::time::Duration::from_millis(10));

        Ok(SatelliteEntity {
            carrier_set,
            forwarder,
            clock: Clock::start(),
            fwd_period,
        })
    }

    /// Run the satellite event loop.
    pub async fn run(&mut self) -> Result<(), DvbError> {
        let mut fwd_timer = interval(self.fwd_period);
        info!("satellite entering its event loop");
        loop {
            tokio::select! {
                _ = fwd_timer.tick() => {
                    let ready = self.forwarder.on_fwd_timer(self.clock.now_ms());
                    for (carrier_id, mut envelope, frame) in ready {
                        envelope.carrier_id = carrier_id;
                        if let Err(err) = self.carrier_set.send_frame(&envelope, &frame).await {
                            warn!("satellite forward failed: {err}");
                        }
                    }
                }
                received = self.carrier_set.recv_frame() => {
                    let (envelope, frame) = received?;
                    let now = self.clock.now_ms();
                    match self.forwarder.on_rcv_frame(envelope, frame, now) {
                        Ok(immediate) => {
                            for (carrier_id, mut envelope, frame) in immediate {
                                envelope.carrier_id = carrier_id;
                                if let Err(err) =
                                    self.carrier_set.send_frame(&envelope, &frame).await
                                {
                                    warn!("satellite SOF forward failed: {err}");
                                }
                            }
                        }
                        Err(err) => warn!("satellite dropped a frame: {err}"),
                    }
                }
            }
        }
    }
}
