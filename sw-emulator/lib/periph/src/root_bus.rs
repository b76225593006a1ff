/*++

Licensed under the Apache-2.0 license.

File Name:

    root_bus.rs

Abstract:

    File contains the root Bus implementation for the DVSoC emulator.

--*/

use crate::policy::{resolve, PolicyError, ResolvedPolicy};
use crate::security_config::SecurityConfig;
use crate::{Counter, JtagLock, Keypad, LockHandler};
use dvsoc_emu_bus::{Bus, BusError, Clock, DynamicBus, MapError};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use std::ops::RangeInclusive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// DVSoC Root Bus
///
/// Peripherals are reachable over the bus through their CSR window and
/// directly through the cloned handles kept here.
pub struct DvSocRootBus {
    pub jtag_lock: JtagLock,

    pub counter: Counter,

    /// Present when the configuration names a dashboard key.
    pub keypad: Option<Keypad>,

    /// Present when `loop_back_signal` is enabled.
    pub lock_handler: Option<LockHandler>,

    resolved: ResolvedPolicy,

    bus: DynamicBus,
}

impl DvSocRootBus {
    pub const CSR_BASE: RvAddr = 0xf000_0000;
    pub const CSR_REGION_SIZE: RvAddr = 0x800;
    pub const JTAG_LOCK_OFFSET: RvAddr = Self::CSR_BASE;
    pub const COUNTER_OFFSET: RvAddr = Self::CSR_BASE + Self::CSR_REGION_SIZE;
    pub const KEYPAD_OFFSET: RvAddr = Self::CSR_BASE + 2 * Self::CSR_REGION_SIZE;
    pub const LOCK_HANDLER_OFFSET: RvAddr = Self::CSR_BASE + 3 * Self::CSR_REGION_SIZE;

    /// Resolves `config` and builds the SoC around the resulting policy.
    pub fn from_config(clock: &Clock, config: &SecurityConfig) -> Result<Self, SocError> {
        let resolved = resolve(config)?;
        Ok(Self::new(clock, resolved)?)
    }

    pub fn new(clock: &Clock, resolved: ResolvedPolicy) -> Result<Self, MapError> {
        let jtag_lock = JtagLock::new(clock, &resolved);
        let counter = Counter::new(clock);
        let keypad = resolved.dashboard_key.map(|key| Keypad::new(clock, key));
        let lock_handler = resolved
            .loop_back_signal
            .then(|| LockHandler::new(clock));

        let mut bus = DynamicBus::new();
        bus.attach_dev(
            "jtag_lock",
            region(Self::JTAG_LOCK_OFFSET),
            Box::new(jtag_lock.clone()),
        )?;
        bus.attach_dev(
            "counter",
            region(Self::COUNTER_OFFSET),
            Box::new(counter.clone()),
        )?;
        if let Some(keypad) = keypad.as_ref() {
            bus.attach_dev(
                "keypad",
                region(Self::KEYPAD_OFFSET),
                Box::new(keypad.clone()),
            )?;
        }
        if let Some(lock_handler) = lock_handler.as_ref() {
            bus.attach_dev(
                "lock_handler",
                region(Self::LOCK_HANDLER_OFFSET),
                Box::new(lock_handler.clone()),
            )?;
        }

        Ok(Self {
            jtag_lock,
            counter,
            keypad,
            lock_handler,
            resolved,
            bus,
        })
    }

    pub fn resolved(&self) -> &ResolvedPolicy {
        &self.resolved
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.bus.device_names()
    }
}

fn region(base: RvAddr) -> RangeInclusive<RvAddr> {
    base..=base + (DvSocRootBus::CSR_REGION_SIZE - 1)
}

impl Bus for DvSocRootBus {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.bus.read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.bus.write(size, addr, val)
    }

    fn poll(&mut self) {
        self.bus.poll();
    }

    fn warm_reset(&mut self) {
        tracing::info!("system reset");
        self.bus.warm_reset();
    }
}
