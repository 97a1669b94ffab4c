//! Unit tests for the FMT layer: MODCOD definitions, ACM selection and the
//! FMT group grammar.

use dvbsat_rs::fmt::{FmtDefinition, FmtDefinitionTable, FmtGroup, Modulation};
use std::sync::Arc;

fn custom_table() -> Arc<FmtDefinitionTable> {
    let mut table = FmtDefinitionTable::new();
    for (id, modulation, rate, eff, esn0) in [
        (1u8, Modulation::Qpsk, "1/4", 0.49, -2.35),
        (5, Modulation::Qpsk, "3/5", 1.188, 2.23),
        (9, Modulation::Qpsk, "5/6", 1.654, 5.18),
        (12, Modulation::Psk8, "3/4", 2.228, 7.91),
    ] {
        table
            .add(FmtDefinition::new(id, modulation, rate, eff, esn0, None).unwrap())
            .unwrap();
    }
    Arc::new(table)
}

#[test]
fn table_is_ordered_by_robustness() {
    let table = custom_table();
    assert_eq!(table.ids_by_robustness(), vec![1, 5, 9, 12]);
    assert_eq!(table.max_id().unwrap(), 12);
    assert_eq!(table.min_id().unwrap(), 1);
}

#[test]
fn duplicate_id_is_a_config_error() {
    let mut table = FmtDefinitionTable::new();
    table
        .add(FmtDefinition::new(4, Modulation::Qpsk, "1/2", 1.0, 2.34, None).unwrap())
        .unwrap();
    assert!(table
        .add(FmtDefinition::new(4, Modulation::Qpsk, "2/3", 1.333, 4.29, None).unwrap())
        .is_err());
}

#[test]
fn unknown_modcod_is_an_error() {
    let table = custom_table();
    assert!(table.get(42).is_err());
    assert!(table.required_es_n0(42).is_err());
}

#[test]
fn acm_selection_against_thresholds() {
    let table = custom_table();
    assert_eq!(table.best_id_for_cn(6.0).unwrap(), 9);
    assert_eq!(table.best_id_for_cn(2.23).unwrap(), 5);
    assert_eq!(table.best_id_for_cn(-5.0).unwrap(), 1);
    assert_eq!(table.best_id_for_cn(50.0).unwrap(), 12);
}

#[test]
fn group_rejects_ids_missing_from_the_table() {
    let table = custom_table();
    assert!(FmtGroup::new(1, "1;2", table).is_err());
}

#[test]
fn group_nearest_never_exceeds_the_requirement() {
    // I4: getNearest(x) returns y with requiredEsN0(y) <= requiredEsN0(x),
    // or the most robust member when none qualifies.
    let table = custom_table();
    let group = FmtGroup::new(1, "5;12", table.clone()).unwrap();
    assert_eq!(group.get_nearest(9).unwrap(), 5);
    assert_eq!(group.get_nearest(12).unwrap(), 12);
    // id 1 requires less than every member: fall back to the most robust
    assert_eq!(group.get_nearest(1).unwrap(), 5);
}

#[test]
fn group_spec_round_trip_preserves_the_id_set() {
    // R3: parse then format yields the same ordered id set.
    let table = Arc::new(FmtDefinitionTable::default_s2());
    for spec in ["1-5", "7", "1-3;9;12-14", "2;4;6"] {
        let group = FmtGroup::new(1, spec, table.clone()).unwrap();
        let formatted = group.to_string();
        let reparsed = FmtGroup::new(2, &formatted, table.clone()).unwrap();
        assert_eq!(group.fmt_ids(), reparsed.fmt_ids(), "spec {spec}");
    }
}

#[test]
fn reversed_range_is_normalised() {
    let table = Arc::new(FmtDefinitionTable::default_s2());
    let group = FmtGroup::new(1, "5-3", table).unwrap();
    assert_eq!(group.fmt_ids(), vec![3, 4, 5]);
}

#[test]
fn conversions_scale_with_coding_rate() {
    let def = FmtDefinition::new(6, Modulation::Qpsk, "3/4", 1.5, 5.36, Some(536)).unwrap();
    // 2 bits/symbol * 3/4 = 1.5 useful bits per symbol
    assert_eq!(def.kbits_to_sym(3), 2000);
    assert_eq!(def.sym_to_kbits(2000), 3);
    assert_eq!(def.burst_length_sym(), Some(536));
}

#[test]
fn default_tables_are_consistent() {
    let s2 = FmtDefinitionTable::default_s2();
    let rcs2 = FmtDefinitionTable::default_rcs2();
    assert!(!s2.is_empty());
    assert!(!rcs2.is_empty());
    // robustness ordering holds across each table
    for table in [&s2, &rcs2] {
        let ids = table.ids_by_robustness();
        for pair in ids.windows(2) {
            assert!(
                table.required_es_n0(pair[0]).unwrap()
                    <= table.required_es_n0(pair[1]).unwrap()
            );
        }
    }
    // every RCS2 waveform carries its burst length
    for id in rcs2.ids_by_robustness() {
        assert!(rcs2.get(id).unwrap().burst_length_sym().is_some());
    }
}
