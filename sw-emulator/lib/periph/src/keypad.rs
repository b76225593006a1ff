/*++

Licensed under the Apache-2.0 license.

File Name:

    keypad.rs

Abstract:

    File contains the keypad unlock panel of the admin dashboard.

--*/

use bitfield::bitfield;
use dvsoc_emu_bus::{ActionHandle, Bus, BusError, Clock, ReadOnlyRegister, Register, Timer};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use smlang::statemachine;
use std::str::FromStr;
use std::{cell::RefCell, rc::Rc};
use thiserror::Error;
use tock_registers::interfaces::{Readable, Writeable};

pub const OFFSET_STATUS: RvAddr = 0x00;
pub const OFFSET_VALUE: RvAddr = 0x04;

/// Number of digits in a dashboard key.
pub const KEY_DIGITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dashboard key {key:?} is not 4 hexadecimal digits")]
pub struct DashboardKeyError {
    pub key: String,
}

/// The 4 hexadecimal digits that unlock the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardKey(u16);

impl DashboardKey {
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Digit `position`, 0 being the first one entered.
    pub fn digit(&self, position: usize) -> u8 {
        KeypadEntry(self.0).digit(KEY_DIGITS - 1 - position)
    }
}

impl FromStr for DashboardKey {
    type Err = DashboardKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DashboardKeyError { key: s.to_owned() };
        if s.len() != KEY_DIGITS || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        u16::from_str_radix(s, 16).map(Self).map_err(|_| invalid())
    }
}

bitfield! {
    /// Keypad entry as shown on the seven-segment display. The first digit
    /// entered occupies the top nibble.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct KeypadEntry(u16);
    impl Debug;

    /// Nibble `index`, 0 being the least significant
    pub u8, digit, set_digit: 3, 0, 4;
}

/// Key code reported by the keypad scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nibble(pub u8);

statemachine! {
    transitions: {
        // CurrentState Event / action = NextState

        // first key of an entry clears the display
        *AwaitDigit0 + Key(Nibble) / start_entry = AwaitDigit1,
        AwaitDigit1 + Key(Nibble) / enter_digit = AwaitDigit2,
        AwaitDigit2 + Key(Nibble) / enter_digit = AwaitDigit3,
        AwaitDigit3 + Key(Nibble) / enter_digit = Verify,

        // compare the complete entry on the following clock edge
        Verify + Edge / verify = AwaitDigit0
    }
}

/// State machine extended variables.
pub struct Context {
    key: DashboardKey,

    /// Digits entered so far.
    count: usize,

    entry: KeypadEntry,

    /// Result of the last completed entry.
    unlocked: bool,
}

impl Context {
    fn new(key: DashboardKey) -> Self {
        Self {
            key,
            count: 0,
            entry: KeypadEntry::default(),
            unlocked: false,
        }
    }
}

impl StateMachineContext for Context {
    fn start_entry(&mut self, key: &Nibble) {
        self.entry = KeypadEntry::default();
        self.count = 0;
        self.enter_digit(key);
    }

    fn enter_digit(&mut self, key: &Nibble) {
        self.entry.set_digit(KEY_DIGITS - 1 - self.count, key.0 & 0xf);
        self.count += 1;
    }

    fn verify(&mut self) {
        self.unlocked = (0..KEY_DIGITS)
            .all(|position| self.entry.digit(KEY_DIGITS - 1 - position) == self.key.digit(position));
        if !self.unlocked {
            self.entry = KeypadEntry::default();
        }
        self.count = 0;
    }
}

/// Keypad unlock panel.
#[derive(Clone)]
pub struct Keypad {
    regs: Rc<RefCell<KeypadRegs>>,
}

impl Keypad {
    pub fn new(clock: &Clock, key: DashboardKey) -> Self {
        Self {
            regs: Rc::new(RefCell::new(KeypadRegs::new(clock, key))),
        }
    }

    /// Drives the scanner output. The keypad samples it on the next clock edge
    /// and enters a digit if it differs from the previous sample.
    pub fn set_scan(&mut self, key: u8) {
        self.regs.borrow_mut().set_scan(key);
    }

    pub fn unlocked(&self) -> bool {
        self.regs.borrow().status.reg.get() != 0
    }

    /// Current entry shown on the display.
    pub fn entry(&self) -> KeypadEntry {
        KeypadEntry(self.regs.borrow().value.reg.get())
    }
}

impl Bus for Keypad {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let regs = self.regs.borrow();
        match (addr, size) {
            (OFFSET_STATUS, _) => regs.status.read(size),
            // The 16-bit value sits in a word-sized CSR.
            (OFFSET_VALUE, RvSize::Word) => Ok(regs.value.reg.get() as RvData),
            _ => Err(BusError::LoadAccessFault),
        }
    }

    fn write(&mut self, _size: RvSize, _addr: RvAddr, _val: RvData) -> Result<(), BusError> {
        Err(BusError::StoreAccessFault)
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll();
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().warm_reset();
    }
}

struct KeypadRegs {
    status: ReadOnlyRegister<u32>,

    value: ReadOnlyRegister<u16>,

    /// Scanner output.
    scan: u8,

    /// Scanner output sampled on the previous edge.
    sampled: u8,

    state_machine: StateMachine<Context>,

    key: DashboardKey,

    edge_action: Option<ActionHandle>,

    timer: Timer,
}

impl KeypadRegs {
    fn new(clock: &Clock, key: DashboardKey) -> Self {
        Self {
            status: ReadOnlyRegister::new(0),
            value: ReadOnlyRegister::new(0),
            scan: 0,
            sampled: 0,
            state_machine: StateMachine::new(Context::new(key)),
            key,
            edge_action: None,
            timer: clock.timer(),
        }
    }

    fn set_scan(&mut self, key: u8) {
        self.scan = key & 0xf;
        self.schedule_edge();
    }

    fn schedule_edge(&mut self) {
        if self.edge_action.is_none() {
            self.edge_action = Some(self.timer.schedule_poll_in(1));
        }
    }

    fn poll(&mut self) {
        if !self.timer.fired(&mut self.edge_action) {
            return;
        }

        let changed = self.scan != self.sampled;
        self.sampled = self.scan;
        if matches!(self.state_machine.state(), States::Verify) {
            // A key change on the verify edge is lost.
            let _ = self.state_machine.process_event(Events::Edge);
            let context = self.state_machine.context();
            self.status.reg.set(context.unlocked as u32);
            tracing::debug!(unlocked = context.unlocked, "keypad entry verified");
        } else if changed {
            let _ = self
                .state_machine
                .process_event(Events::Key(Nibble(self.scan)));
        }

        self.value.reg.set(self.state_machine.context().entry.0);
        if matches!(self.state_machine.state(), States::Verify) {
            self.schedule_edge();
        }
    }

    fn warm_reset(&mut self) {
        if let Some(action) = self.edge_action.take() {
            self.timer.cancel(action);
        }
        self.status.reg.set(0);
        self.value.reg.set(0);
        self.sampled = 0;
        self.state_machine = StateMachine::new(Context::new(self.key));
        if self.scan != self.sampled {
            self.schedule_edge();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_keypad(key: &str) -> (Clock, Keypad) {
        let clock = Clock::new();
        let keypad = Keypad::new(&clock, key.parse().unwrap());
        (clock, keypad)
    }

    fn press(clock: &Clock, keypad: &mut Keypad, keys: &[u8]) {
        for &key in keys {
            keypad.set_scan(key);
            clock.tick(keypad);
        }
    }

    #[test]
    fn test_dashboard_key() {
        let key: DashboardKey = "c0dE".parse().unwrap();
        assert_eq!(key.value(), 0xc0de);
        assert_eq!(
            (0..4).map(|p| key.digit(p)).collect::<Vec<_>>(),
            [0xc, 0x0, 0xd, 0xe]
        );
        for bad in ["", "c0d", "c0de1", "g000", "+fff"] {
            assert_eq!(
                bad.parse::<DashboardKey>(),
                Err(DashboardKeyError { key: bad.into() })
            );
        }
    }

    #[test]
    fn test_entry_digits() {
        let mut entry = KeypadEntry::default();
        entry.set_digit(3, 0xa);
        entry.set_digit(0, 0x5);
        assert_eq!(entry.0, 0xa005);
        assert_eq!(entry.digit(3), 0xa);
    }

    #[test]
    fn test_correct_key_unlocks() {
        let (clock, mut keypad) = new_keypad("1a2b");
        press(&clock, &mut keypad, &[0x1, 0xa, 0x2, 0xb]);
        assert_eq!(keypad.entry().0, 0x1a2b);
        assert!(!keypad.unlocked());

        clock.tick(&mut keypad);
        assert!(keypad.unlocked());
        assert_eq!(keypad.read(RvSize::Word, OFFSET_STATUS), Ok(1));
        assert_eq!(keypad.read(RvSize::Word, OFFSET_VALUE), Ok(0x1a2b));
    }

    #[test]
    fn test_wrong_key_clears_entry() {
        let (clock, mut keypad) = new_keypad("1a2b");
        press(&clock, &mut keypad, &[0x1, 0xa, 0x2, 0xc]);
        clock.tick(&mut keypad);
        assert!(!keypad.unlocked());
        assert_eq!(keypad.entry().0, 0);
    }

    #[test]
    fn test_status_holds_until_next_entry() {
        let (clock, mut keypad) = new_keypad("1234");
        press(&clock, &mut keypad, &[0x1, 0x2, 0x3, 0x4]);
        clock.run(5, &mut keypad);
        assert!(keypad.unlocked());

        // A partial entry leaves the status alone; it starts from a clear display.
        press(&clock, &mut keypad, &[0x9]);
        assert!(keypad.unlocked());
        assert_eq!(keypad.entry().0, 0x9000);

        press(&clock, &mut keypad, &[0x8, 0x7, 0x6]);
        clock.tick(&mut keypad);
        assert!(!keypad.unlocked());
    }

    #[test]
    fn test_repeated_key_needs_release() {
        let (clock, mut keypad) = new_keypad("1120");
        // Without a change on the scan line the second 1 is never seen.
        press(&clock, &mut keypad, &[0x1, 0x1, 0x2, 0x0]);
        assert_eq!(keypad.entry().0, 0x1200);

        // An initial 0 is indistinguishable from the idle scan value.
        let (clock, mut keypad) = new_keypad("0123");
        press(&clock, &mut keypad, &[0x0, 0x1, 0x2, 0x3]);
        assert_eq!(keypad.entry().0, 0x1230);
    }

    #[test]
    fn test_key_change_during_verify_is_lost() {
        let (clock, mut keypad) = new_keypad("4321");
        press(&clock, &mut keypad, &[0x4, 0x3, 0x2, 0x1]);
        press(&clock, &mut keypad, &[0x5]);
        assert!(keypad.unlocked());
        assert_eq!(keypad.entry().0, 0x4321);
        // The scan line is still 5, so nothing new is entered.
        clock.run(3, &mut keypad);
        assert_eq!(keypad.entry().0, 0x4321);
    }

    #[test]
    fn test_registers_are_read_only() {
        let (_clock, mut keypad) = new_keypad("ffff");
        assert_eq!(
            keypad.write(RvSize::Word, OFFSET_STATUS, 1),
            Err(BusError::StoreAccessFault)
        );
        assert_eq!(
            keypad.read(RvSize::Word, 0x8),
            Err(BusError::LoadAccessFault)
        );
        assert_eq!(
            keypad.read(RvSize::Byte, OFFSET_STATUS),
            Err(BusError::LoadAccessFault)
        );
    }

    #[test]
    fn test_warm_reset() {
        let (clock, mut keypad) = new_keypad("1234");
        press(&clock, &mut keypad, &[0x1, 0x2, 0x3, 0x4]);
        clock.tick(&mut keypad);
        assert!(keypad.unlocked());

        keypad.warm_reset();
        assert!(!keypad.unlocked());
        assert_eq!(keypad.entry().0, 0);

        // The held key is seen again once the sample register is cleared.
        clock.tick(&mut keypad);
        assert_eq!(keypad.entry().0, 0x4000);
    }
}
