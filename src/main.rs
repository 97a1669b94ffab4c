use anyhow::Context;
use clap::Parser;
use dvbsat_rs::config::{EntityKind, InfrastructureConfig, TopologyConfig};
use dvbsat_rs::entity::{GatewayEntity, SatelliteEntity, TerminalEntity};
use dvbsat_rs::{init_logger, log_info};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "dvbsat")]
#[command(about = "DVB-S2/RCS2 satellite access network emulator")]
struct Cli {
    /// Topology configuration file
    #[arg(long = "conf")]
    conf: PathBuf,

    /// Infrastructure configuration file
    #[arg(long = "infrastructure")]
    infrastructure: PathBuf,

    /// Entity to run, as <gw|st|sat>:<id>
    #[arg(long = "entity")]
    entity: String,

    /// Spot the entity belongs to (defaults to the first declared spot)
    #[arg(long = "spot")]
    spot: Option<u8>,
}

fn parse_entity(spec: &str) -> anyhow::Result<(EntityKind, u16)> {
    let (kind, id) = spec
        .split_once(':')
        .with_context(|| format!("invalid --entity {spec}, expected <gw|st|sat>:<id>"))?;
    let kind: EntityKind = kind.parse()?;
    let id: u16 = id
        .parse()
        .with_context(|| format!("invalid entity id in {spec}"))?;
    Ok((kind, id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let (kind, id) = parse_entity(&cli.entity)?;

    let topology =
        TopologyConfig::load(&cli.conf).context("topology configuration is invalid")?;
    let infrastructure = InfrastructureConfig::load(&cli.infrastructure)
        .context("infrastructure configuration is invalid")?;
    let spot_id = cli
        .spot
        .or_else(|| topology.spots.first().map(|s| s.id))
        .context("no spot available")?;

    let entity_config = infrastructure.entity(kind, id)?.clone();

    match kind {
        EntityKind::Gw => {
            let (upward_tx, mut upward_rx) = mpsc::unbounded_channel();
            let mut gateway =
                GatewayEntity::new(&topology, &entity_config, spot_id, upward_tx).await?;
            log_info(&format!("gateway {id} started on spot {spot_id}"));
            tokio::spawn(async move {
                while let Some(burst) = upward_rx.recv().await {
                    log_info(&format!("gateway delivered {} packets upward", burst.len()));
                }
            });
            gateway.run().await?;
        }
        EntityKind::St => {
            let (upward_tx, mut upward_rx) = mpsc::unbounded_channel();
            let (_downward_tx, downward_rx) = mpsc::unbounded_channel();
            let mut terminal =
                TerminalEntity::new(&topology, &entity_config, spot_id, id, upward_tx, downward_rx)
                    .await?;
            log_info(&format!("terminal {id} started on spot {spot_id}"));
            tokio::spawn(async move {
                while let Some(burst) = upward_rx.recv().await {
                    log_info(&format!(
                        "terminal delivered {} packets upward",
                        burst.len()
                    ));
                }
            });
            terminal.run().await?;
        }
        EntityKind::Sat => {
            let mut satellite =
                SatelliteEntity::new(&topology, &infrastructure, &entity_config).await?;
            log_info("satellite started");
            satellite.run().await?;
        }
    }

    Ok(())
}
