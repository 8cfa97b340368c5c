//! Epoch gate against the simulated NVS backend: persistence across
//! "reboots", power loss and storage failure.

use solarnode::adapters::nvs::NvsAdapter;
use solarnode::app::ports::StoragePort;
use solarnode::cycle::epoch::{COUNTER_KEY, EpochGate};
use solarnode::error::{Error, StorageError};

const PERIOD: u32 = 30;

#[test]
fn full_cycles_land_on_one_mod_period() {
    let mut gate = EpochGate::new(NvsAdapter::new().unwrap(), PERIOD, true);
    let full: Vec<u32> = (0..61)
        .map(|_| gate.advance().unwrap())
        .filter(|e| e.full_cycle)
        .map(|e| e.counter)
        .collect();
    assert_eq!(full, [1, 31, 61]);
}

#[test]
fn counter_survives_reboot() {
    let mut gate = EpochGate::new(NvsAdapter::new().unwrap(), PERIOD, true);
    gate.advance().unwrap();
    gate.advance().unwrap();

    // A reboot keeps the flash and builds a fresh gate on top of it.
    let mut nvs = gate.into_storage();
    nvs.simulate_power_loss();
    let mut gate = EpochGate::new(nvs, PERIOD, true);
    assert_eq!(gate.advance().unwrap().counter, 3);
}

#[test]
fn power_loss_before_commit_loses_only_the_staged_write() {
    let mut nvs = NvsAdapter::new().unwrap();
    nvs.set_i32(COUNTER_KEY, 5).unwrap();
    nvs.commit().unwrap();

    // Stage an increment by hand, then lose power before committing.
    nvs.set_i32(COUNTER_KEY, 6).unwrap();
    nvs.simulate_power_loss();

    let mut gate = EpochGate::new(nvs, PERIOD, true);
    assert_eq!(gate.advance().unwrap().counter, 6);
}

#[test]
fn commit_failure_is_fatal_and_not_counted() {
    let mut nvs = NvsAdapter::new().unwrap();
    nvs.set_commit_failure(true);
    let mut gate = EpochGate::new(nvs, PERIOD, true);

    assert_eq!(gate.advance(), Err(Error::Storage(StorageError::IoError)));

    let mut nvs = gate.into_storage();
    nvs.simulate_power_loss();
    assert_eq!(nvs.get_i32(COUNTER_KEY), Err(StorageError::NotFound));
}

#[test]
fn reset_restarts_the_epoch() {
    let mut gate = EpochGate::new(NvsAdapter::new().unwrap(), PERIOD, true);
    for _ in 0..10 {
        gate.advance().unwrap();
    }
    gate.reset().unwrap();
    let next = gate.advance().unwrap();
    assert_eq!(next.counter, 1);
    assert!(next.full_cycle);
    assert!(next.update_due);
}

#[test]
fn updates_disabled_never_due() {
    let mut gate = EpochGate::new(NvsAdapter::new().unwrap(), PERIOD, false);
    let epoch = gate.advance().unwrap();
    assert!(epoch.full_cycle);
    assert!(!epoch.update_due);
}
