/*++

Licensed under the Apache-2.0 license.

File Name:

    counter.rs

Abstract:

    File contains the free-running counter firmware draws its JTAG reference
    password from.

--*/

use dvsoc_emu_bus::{
    ActionHandle, Bus, BusError, Clock, ReadOnlyRegister, ReadWriteRegister, Register, Timer,
};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use std::{cell::RefCell, rc::Rc};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;

pub const OFFSET_CONTROL: RvAddr = 0x00;
pub const OFFSET_VALUE: RvAddr = 0x04;

register_bitfields! [
    u32,

    /// Control Register Fields
    Control [
        START OFFSET(0) NUMBITS(1) [],
    ],
];

/// Cycle counter.
///
/// `control` is committed on the edge after the write and the counter
/// follows it one edge later; from then on `value` grows by one per edge.
/// Stopping freezes the count without clearing it.
#[derive(Clone)]
pub struct Counter {
    regs: Rc<RefCell<CounterRegs>>,
}

impl Counter {
    pub fn new(clock: &Clock) -> Self {
        Self {
            regs: Rc::new(RefCell::new(CounterRegs::new(clock))),
        }
    }

    pub fn value(&self) -> u32 {
        self.regs.borrow().value()
    }

    pub fn running(&self) -> bool {
        self.regs.borrow().running_since.is_some()
    }
}

impl Bus for Counter {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let regs = self.regs.borrow();
        match addr {
            OFFSET_CONTROL => regs.control.read(size),
            OFFSET_VALUE => {
                let value = regs.value();
                regs.value.reg.set(value);
                regs.value.read(size)
            }
            _ => Err(BusError::LoadAccessFault),
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        match addr {
            OFFSET_CONTROL => self.regs.borrow_mut().stage_control(size, val),
            _ => Err(BusError::StoreAccessFault),
        }
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll();
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().warm_reset();
    }
}

struct CounterRegs {
    control: ReadWriteRegister<u32, Control::Register>,

    value: ReadOnlyRegister<u32>,

    staged_control: Option<RvData>,

    /// Count accumulated before the current run.
    base: u32,

    /// Edge on which the counter started running.
    running_since: Option<u64>,

    commit_action: Option<ActionHandle>,

    follow_action: Option<ActionHandle>,

    timer: Timer,
}

impl CounterRegs {
    fn new(clock: &Clock) -> Self {
        Self {
            control: ReadWriteRegister::new(0),
            value: ReadOnlyRegister::new(0),
            staged_control: None,
            base: 0,
            running_since: None,
            commit_action: None,
            follow_action: None,
            timer: clock.timer(),
        }
    }

    fn value(&self) -> u32 {
        match self.running_since {
            Some(since) => self
                .base
                .wrapping_add(self.timer.now().wrapping_sub(since) as u32),
            None => self.base,
        }
    }

    fn stage_control(&mut self, size: RvSize, val: RvData) -> Result<(), BusError> {
        if size != RvSize::Word {
            return Err(BusError::StoreAccessFault);
        }
        self.staged_control = Some(val & Control::START.mask);
        if self.commit_action.is_none() {
            self.commit_action = Some(self.timer.schedule_poll_in(1));
        }
        Ok(())
    }

    fn poll(&mut self) {
        if self.timer.fired(&mut self.commit_action) {
            if let Some(val) = self.staged_control.take() {
                self.control.reg.set(val);
                if self.follow_action.is_none() {
                    self.follow_action = Some(self.timer.schedule_poll_in(1));
                }
            }
        }
        if self.timer.fired(&mut self.follow_action) {
            let start = self.control.reg.is_set(Control::START);
            match (start, self.running_since) {
                (true, None) => self.running_since = Some(self.timer.now()),
                (false, Some(_)) => {
                    self.base = self.value();
                    self.running_since = None;
                }
                _ => {}
            }
            tracing::debug!(running = start, value = self.value(), "counter control applied");
        }
    }

    fn warm_reset(&mut self) {
        for action in [self.commit_action.take(), self.follow_action.take()]
            .into_iter()
            .flatten()
        {
            self.timer.cancel(action);
        }
        self.staged_control = None;
        self.control.warm_reset();
        self.value.reg.set(0);
        self.base = 0;
        self.running_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_latency() {
        let clock = Clock::new();
        let mut counter = Counter::new(&clock);
        counter.write(RvSize::Word, OFFSET_CONTROL, 1).unwrap();

        clock.tick(&mut counter);
        assert_eq!(counter.read(RvSize::Word, OFFSET_CONTROL), Ok(1));
        assert!(!counter.running());

        clock.tick(&mut counter);
        assert!(counter.running());
        assert_eq!(counter.read(RvSize::Word, OFFSET_VALUE), Ok(0));

        clock.run(10, &mut counter);
        assert_eq!(counter.read(RvSize::Word, OFFSET_VALUE), Ok(10));
    }

    #[test]
    fn test_stop_keeps_count() {
        let clock = Clock::new();
        let mut counter = Counter::new(&clock);
        counter.write(RvSize::Word, OFFSET_CONTROL, 1).unwrap();
        clock.run(7, &mut counter);
        assert_eq!(counter.value(), 5);

        counter.write(RvSize::Word, OFFSET_CONTROL, 0).unwrap();
        clock.run(2, &mut counter);
        // Still counting on the edge that stops it.
        assert_eq!(counter.value(), 7);
        assert!(!counter.running());
        clock.run(100, &mut counter);
        assert_eq!(counter.value(), 7);

        counter.write(RvSize::Word, OFFSET_CONTROL, 1).unwrap();
        clock.run(5, &mut counter);
        assert_eq!(counter.value(), 10);
    }

    #[test]
    fn test_register_access() {
        let clock = Clock::new();
        let mut counter = Counter::new(&clock);
        assert_eq!(
            counter.write(RvSize::Word, OFFSET_VALUE, 1),
            Err(BusError::StoreAccessFault)
        );
        assert_eq!(
            counter.write(RvSize::Byte, OFFSET_CONTROL, 1),
            Err(BusError::StoreAccessFault)
        );
        assert_eq!(
            counter.read(RvSize::Word, 0x8),
            Err(BusError::LoadAccessFault)
        );
        counter.write(RvSize::Word, OFFSET_CONTROL, 0xfe).unwrap();
        clock.run(3, &mut counter);
        assert_eq!(counter.read(RvSize::Word, OFFSET_CONTROL), Ok(0));
        assert!(!counter.running());
    }

    #[test]
    fn test_warm_reset() {
        let clock = Clock::new();
        let mut counter = Counter::new(&clock);
        counter.write(RvSize::Word, OFFSET_CONTROL, 1).unwrap();
        clock.run(20, &mut counter);
        assert!(counter.value() > 0);

        counter.warm_reset();
        assert_eq!(counter.value(), 0);
        assert_eq!(counter.read(RvSize::Word, OFFSET_CONTROL), Ok(0));
        clock.run(20, &mut counter);
        assert_eq!(counter.value(), 0);
    }
}
