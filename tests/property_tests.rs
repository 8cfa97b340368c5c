//! Property tests for the cycle core: metadata coverage, delivery order
//! and the epoch sequence.
//!
//! Runs on host (x86_64) only; proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use proptest::prelude::*;

use solarnode::app::ports::{BusPort, PublishPort, QoS, StoragePort};
use solarnode::catalog::{Catalog, NodeDescriptor, RegisterDescriptor, RegisterWidth, ValueFormat};
use solarnode::cycle::epoch::{EpochGate, is_full_cycle};
use solarnode::cycle::handoff::Handoff;
use solarnode::cycle::phase::PhaseSignals;
use solarnode::cycle::poller::Poller;
use solarnode::cycle::publisher::{PublishStats, Publisher};
use solarnode::error::{BusError, PublishError, StorageError};

// ── Helpers ───────────────────────────────────────────────────

#[derive(Default)]
struct Recorder(Vec<String>);

impl PublishPort for Recorder {
    fn connect(&mut self) -> Result<(), PublishError> {
        Ok(())
    }

    fn publish(&mut self, topic: &str, _: QoS, _: bool, _: &str) -> Result<(), PublishError> {
        self.0.push(topic.to_owned());
        Ok(())
    }

    fn disconnect(&mut self) {}
}

/// Fails reads at the listed addresses.
struct FlakyBus(BTreeSet<u16>);

impl BusPort for FlakyBus {
    fn read(&mut self, _: u8, address: u16, out: &mut [u16]) -> Result<usize, BusError> {
        if self.0.contains(&address) {
            return Err(BusError::Crc);
        }
        out.fill(1);
        Ok(out.len())
    }
}

#[derive(Default)]
struct MemStorage(HashMap<String, i32>);

impl StoragePort for MemStorage {
    fn get_i32(&self, key: &str) -> Result<i32, StorageError> {
        self.0.get(key).copied().ok_or(StorageError::NotFound)
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), StorageError> {
        self.0.insert(key.to_owned(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Ids for a catalog shaped `shape[i]` properties in node `i`.
fn ids(shape: &[usize]) -> (Vec<String>, Vec<Vec<String>>) {
    let nodes = (0..shape.len()).map(|n| format!("node{n}")).collect();
    let props = shape
        .iter()
        .map(|&count| (0..count).map(|p| format!("prop{p}")).collect())
        .collect();
    (nodes, props)
}

fn registers(ids: &[String], base: u16) -> Vec<RegisterDescriptor<'_>> {
    ids.iter()
        .zip(base..)
        .map(|(id, address)| RegisterDescriptor {
            id: id.as_str(),
            name: id.as_str(),
            unit: "",
            address,
            width: RegisterWidth::Uint16,
            format: ValueFormat::Decimal,
        })
        .collect()
}

// ── Properties ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A full cycle advertises exactly `3 + 3p` attributes per node.
    #[test]
    fn metadata_count_matches_catalog_shape(shape in prop::collection::vec(1usize..6, 1..5)) {
        let (node_ids, prop_ids) = ids(&shape);
        let props: Vec<_> = prop_ids
            .iter()
            .enumerate()
            .map(|(n, ids)| registers(ids, (n as u16) * 0x100))
            .collect();
        let nodes: Vec<_> = node_ids
            .iter()
            .zip(&props)
            .map(|(id, props)| NodeDescriptor { id: id.as_str(), name: id.as_str(), properties: props.as_slice() })
            .collect();
        let catalog = Catalog::new(&nodes).unwrap();

        let mut tx = Recorder::default();
        let mut stats = PublishStats::default();
        Publisher::new(catalog, Duration::from_millis(5), Duration::from_secs(1))
            .publish_attributes(&mut tx, &mut stats);

        let expected: usize = shape.iter().map(|p| 3 + 3 * p).sum();
        prop_assert_eq!(stats.attributes as usize, expected);
        prop_assert_eq!(tx.0.len(), expected);
    }

    /// Delivered values are the successfully read registers, in catalog
    /// order, cut off at the handoff depth.
    #[test]
    fn delivered_values_keep_catalog_order(
        count in 1usize..13,
        failing in prop::collection::btree_set(0u16..13, 0..5),
    ) {
        let (node_ids, prop_ids) = ids(&[count]);
        let props = registers(&prop_ids[0], 0);
        let nodes = [NodeDescriptor { id: node_ids[0].as_str(), name: "n", properties: props.as_slice() }];
        let catalog = Catalog::new(&nodes).unwrap();

        let (signals, w) = PhaseSignals::new();
        let handoff: Handoff<'_, 8> = Handoff::new();
        let poll = Poller::new(catalog, 1).run(&mut FlakyBus(failing.clone()), &handoff, &w.poll_complete);

        let mut tx = Recorder::default();
        let published = Publisher::new(catalog, Duration::from_millis(5), Duration::from_secs(1))
            .run(&mut tx, &handoff, &signals, &w.publish_complete, false);

        let expected: Vec<String> = props
            .iter()
            .filter(|p| !failing.contains(&p.address))
            .take(8)
            .map(|p| format!("node0/{}", p.id))
            .collect();
        let delivered: Vec<String> = tx.0.iter().filter(|t| !t.starts_with('$')).cloned().collect();
        prop_assert_eq!(&delivered, &expected);
        prop_assert_eq!(poll.read as usize, poll.dropped as usize + delivered.len());
        prop_assert_eq!(published.values as usize, delivered.len());
    }

    /// Every advance adds exactly one and full cycles fall on `c mod N == 1`.
    #[test]
    fn epoch_sequence_is_monotonic(start in 0u32..100_000, period in 2u32..100, steps in 1usize..80) {
        let mut storage = MemStorage::default();
        storage.set_i32("restart_counter", start as i32).unwrap();
        let mut gate = EpochGate::new(storage, period, true);

        for k in 1..=steps as u32 {
            let epoch = gate.advance().unwrap();
            prop_assert_eq!(epoch.counter, start + k);
            prop_assert_eq!(epoch.full_cycle, (start + k) % period == 1);
            prop_assert_eq!(epoch.update_due, epoch.full_cycle);
            prop_assert_eq!(is_full_cycle(epoch.counter, period), epoch.full_cycle);
        }
    }
}
