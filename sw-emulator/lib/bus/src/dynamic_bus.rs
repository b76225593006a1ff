/*++

Licensed under the Apache-2.0 license.

File Name:

    dynamic_bus.rs

Abstract:

    File contains DynamicBus type.

--*/

use std::ops::RangeInclusive;

use crate::{Bus, BusError};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum MapError {
    #[error(
        "address space for device {name} ({start:#010x}-{end:#010x}) collides with device {other}"
    )]
    Overlap {
        name: String,
        start: RvAddr,
        end: RvAddr,
        other: String,
    },
}

struct MappedDevice {
    name: String,
    mmap_range: RangeInclusive<RvAddr>,
    bus: Box<dyn Bus>,
}

/// A bus that delegates, through dynamic dispatch, to a list of devices
/// sorted by base address. Addresses handed to a device are relative to its
/// base.
#[derive(Default)]
pub struct DynamicBus {
    devs: Vec<MappedDevice>,
}

impl DynamicBus {
    pub fn new() -> DynamicBus {
        Self { devs: Vec::new() }
    }

    /// Attach the specified device at `mmap_range`
    ///
    /// # Error
    ///
    /// * `MapError::Overlap` - the range intersects an attached device
    pub fn attach_dev(
        &mut self,
        name: &str,
        mmap_range: RangeInclusive<RvAddr>,
        bus: Box<dyn Bus>,
    ) -> Result<(), MapError> {
        let overlaps = |d: &&MappedDevice| {
            mmap_range.end() >= d.mmap_range.start() && mmap_range.start() <= d.mmap_range.end()
        };
        if let Some(other) = self.devs.iter().find(overlaps) {
            return Err(MapError::Overlap {
                name: name.into(),
                start: *mmap_range.start(),
                end: *mmap_range.end(),
                other: other.name.clone(),
            });
        }
        let index = self
            .devs
            .partition_point(|d| d.mmap_range.start() < mmap_range.start());
        tracing::debug!(
            device = name,
            start = format_args!("{:#010x}", mmap_range.start()),
            end = format_args!("{:#010x}", mmap_range.end()),
            "attached device"
        );
        self.devs.insert(
            index,
            MappedDevice {
                name: name.into(),
                mmap_range,
                bus,
            },
        );
        Ok(())
    }

    /// Names of attached devices in address order.
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devs.iter().map(|d| d.name.as_str())
    }
}

impl Bus for DynamicBus {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        match self.devs.iter_mut().find(|d| d.mmap_range.contains(&addr)) {
            Some(dev) => dev.bus.read(size, addr - dev.mmap_range.start()),
            None => Err(BusError::LoadAccessFault),
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        match self.devs.iter_mut().find(|d| d.mmap_range.contains(&addr)) {
            Some(dev) => dev.bus.write(size, addr - dev.mmap_range.start(), val),
            None => Err(BusError::StoreAccessFault),
        }
    }

    fn poll(&mut self) {
        for dev in self.devs.iter_mut() {
            dev.bus.poll();
        }
    }

    fn warm_reset(&mut self) {
        for dev in self.devs.iter_mut() {
            dev.bus.warm_reset();
        }
    }
}
