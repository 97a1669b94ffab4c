//! Tests for the configuration loaders: files on disk, semantic validation
//! and entity lookup.

use dvbsat_rs::config::{EntityKind, InfrastructureConfig, TopologyConfig};
use dvbsat_rs::error::DvbError;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const TOPOLOGY: &str = r#"{
    "spots": [{
        "id": 1,
        "bandwidth_khz": 1024,
        "roll_off": 0.0,
        "superframe_duration_ms": 1000,
        "carriers": [{
            "category": "Standard",
            "access_type": "DAMA",
            "symbol_rate_symps": 1024000,
            "format_ratios": [["4", 100]]
        }],
        "default_category": "Standard"
    }],
    "dama": { "algorithm": "Legacy", "rbdc_timeout_sf": 8 },
    "terminals": [
        { "tal_id": 5, "cra_kbps": 128, "max_rbdc_kbps": 512 }
    ]
}"#;

const INFRASTRUCTURE: &str = r#"{
    "one_way_delay_ms": 250,
    "entities": [
        { "kind": "gw", "id": 0, "bind_address": "127.0.0.1:5000",
          "carriers": [{ "carrier_id": 5, "address": "127.0.0.1:5001" }] },
        { "kind": "st", "id": 5, "bind_address": "127.0.0.1:5002" },
        { "kind": "sat", "id": 0, "bind_address": "127.0.0.1:5003" }
    ]
}"#;

#[test]
fn topology_loads_from_disk() {
    let file = write_file(TOPOLOGY);
    let topology = TopologyConfig::load(file.path()).unwrap();
    assert_eq!(topology.spots.len(), 1);
    assert_eq!(topology.dama.rbdc_timeout_sf, 8);
    // defaults fill the unspecified sections
    assert_eq!(topology.dama.sync_period_frame, 10);
    assert_eq!(topology.saloha.nb_replicas, 2);
    let terminal = topology.terminal(5).unwrap();
    assert_eq!(terminal.cra_kbps, 128);
    assert!(!terminal.is_scpc);
}

#[test]
fn non_legacy_algorithm_is_fatal() {
    let file = write_file(&TOPOLOGY.replace("Legacy", "RrmQos"));
    assert!(matches!(
        TopologyConfig::load(file.path()),
        Err(DvbError::ConfigInvalid(_))
    ));
}

#[test]
fn missing_file_is_a_config_error() {
    let result = TopologyConfig::load(std::path::Path::new("/nonexistent/topo.json"));
    assert!(matches!(result, Err(DvbError::ConfigInvalid(_))));
}

#[test]
fn garbage_content_is_a_config_error() {
    let file = write_file("{ not json");
    assert!(matches!(
        TopologyConfig::load(file.path()),
        Err(DvbError::ConfigInvalid(_))
    ));
}

#[test]
fn infrastructure_resolves_entities() {
    let file = write_file(INFRASTRUCTURE);
    let infrastructure = InfrastructureConfig::load(file.path()).unwrap();
    assert_eq!(infrastructure.one_way_delay_ms, 250);

    let gw = infrastructure.entity(EntityKind::Gw, 0).unwrap();
    assert_eq!(gw.carriers.len(), 1);
    assert_eq!(gw.carriers[0].carrier_id, 5);

    assert!(infrastructure.entity(EntityKind::St, 5).is_ok());
    assert!(matches!(
        infrastructure.entity(EntityKind::St, 9),
        Err(DvbError::ConfigInvalid(_))
    ));
}

#[test]
fn spot_band_config_mirrors_the_declaration() {
    let file = write_file(TOPOLOGY);
    let topology = TopologyConfig::load(file.path()).unwrap();
    let spot = topology.spot(1).unwrap();
    let band = spot.band_config();
    assert_eq!(band.bandwidth_khz, 1024);
    assert_eq!(band.carriers.len(), 1);
    assert_eq!(band.carriers[0].symbol_rate_symps, 1_024_000);
    assert_eq!(band.superframe_duration.as_millis(), 1000);
}
