/*++

Licensed under the Apache-2.0 license.

File Name:

    lock_handler.rs

Abstract:

    File contains the loop-back lock handler and the secret word tables
    mapped next to it.

--*/

use dvsoc_emu_bus::{
    ActionHandle, Bus, BusError, Clock, ReadOnlyRegister, ReadWriteRegister, Register, Timer,
};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use std::collections::BTreeMap;
use std::{cell::RefCell, rc::Rc};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;

pub const OFFSET_LOOP_BACK_IN: RvAddr = 0x00;
pub const OFFSET_OUTPUT_OUT: RvAddr = 0x04;
pub const OFFSET_LOCK_ERROR: RvAddr = 0x08;
pub const OFFSET_CONTENTS: RvAddr = 0x100;

register_bitfields! [
    u32,

    /// Single pin GPIO Fields
    Gpio [
        LEVEL OFFSET(0) NUMBITS(1) [],
    ],

    /// Lock Error Register Fields
    LockError [
        ERROR OFFSET(0) NUMBITS(16) [],
    ],
];

/// Secret text stored as little-endian words, NUL padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretTable {
    pub name: &'static str,

    /// Offset from the lock handler base.
    pub offset: RvAddr,

    pub words: &'static [u32],
}

impl SecretTable {
    /// Decodes the table up to its first NUL byte.
    pub fn text(&self) -> String {
        let bytes: Vec<u8> = self
            .words
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .take_while(|&b| b != 0)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn end(&self) -> RvAddr {
        self.offset + (self.words.len() * 4) as RvAddr
    }
}

/// Word tables laid out back to back from [`OFFSET_CONTENTS`].
pub const CONTENTS: [SecretTable; 5] = [
    SecretTable {
        name: "flag",
        offset: 0x100,
        words: &[
            0x47414c46, 0x44203a20, 0x6d7b5356, 0x526f6d45, 0x61566f59, 0x50614c72, 0x0000007d,
        ],
    },
    SecretTable {
        name: "padding",
        offset: 0x11c,
        words: &[0x00000000],
    },
    SecretTable {
        name: "username",
        offset: 0x120,
        words: &[
            0x494d4441, 0x5355204e, 0x414e5245, 0x3a20454d, 0x6d646120, 0x00006e69,
        ],
    },
    SecretTable {
        name: "password",
        offset: 0x138,
        words: &[
            0x494d4441, 0x4150204e, 0x4f575353, 0x3a204452, 0x73617020, 0x726f7773, 0x00000064,
        ],
    },
    SecretTable {
        name: "top_secret_password_access",
        offset: 0x154,
        words: &[
            0x20504f54, 0x20434553, 0x53534150, 0x44524f57, 0x30203a20, 0x61656478, 0x65656264,
            0x00000066,
        ],
    },
];

/// What drives the `loop_back_signal` pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopBackWire {
    /// The board wire from `output_signal` is in place.
    #[default]
    Intact,

    /// The wire is cut or tapped and the pin sits at a fixed level.
    Held(bool),
}

/// Loop-back lock handler.
///
/// Firmware drives `output_signal` through `output_out`; the board routes it
/// back into `loop_back_signal`, which reaches `loop_back_in` through a two
/// flop synchronizer. On every edge `lock_error` is loaded with
/// `loop_back_in != output_out`, so a tampered wire shows up as a sticky 1
/// while a toggled output shows a short 1 until the input catches up.
#[derive(Clone)]
pub struct LockHandler {
    regs: Rc<RefCell<LockHandlerRegs>>,
}

impl LockHandler {
    pub fn new(clock: &Clock) -> Self {
        Self {
            regs: Rc::new(RefCell::new(LockHandlerRegs::new(clock))),
        }
    }

    pub fn set_wire(&mut self, wire: LoopBackWire) {
        let mut regs = self.regs.borrow_mut();
        regs.wire = wire;
        regs.schedule_edge();
    }

    pub fn wire(&self) -> LoopBackWire {
        self.regs.borrow().wire
    }

    /// Level driven on the `output_signal` pin.
    pub fn output_signal(&self) -> bool {
        self.regs.borrow().output()
    }

    pub fn lock_error(&self) -> bool {
        self.regs.borrow().lock_error.reg.get() != 0
    }
}

impl Bus for LockHandler {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        let regs = self.regs.borrow();
        match addr {
            OFFSET_LOOP_BACK_IN => regs.loop_back_in.read(size),
            OFFSET_OUTPUT_OUT => regs.output_out.read(size),
            OFFSET_LOCK_ERROR => regs.lock_error.read(size),
            _ => read_contents(size, addr),
        }
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let mask = match addr {
            OFFSET_OUTPUT_OUT => Gpio::LEVEL.mask,
            OFFSET_LOCK_ERROR => LockError::ERROR.mask,
            _ => return Err(BusError::StoreAccessFault),
        };
        if size != RvSize::Word {
            return Err(BusError::StoreAccessFault);
        }
        let mut regs = self.regs.borrow_mut();
        regs.staged.insert(addr, val & mask);
        regs.schedule_edge();
        Ok(())
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll();
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().warm_reset();
    }
}

fn read_contents(size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
    if size != RvSize::Word || addr % 4 != 0 {
        return Err(BusError::LoadAccessFault);
    }
    CONTENTS
        .iter()
        .find(|table| (table.offset..table.end()).contains(&addr))
        .map(|table| table.words[((addr - table.offset) / 4) as usize])
        .ok_or(BusError::LoadAccessFault)
}

struct LockHandlerRegs {
    loop_back_in: ReadOnlyRegister<u32, Gpio::Register>,

    output_out: ReadWriteRegister<u32, Gpio::Register>,

    lock_error: ReadWriteRegister<u32, LockError::Register>,

    wire: LoopBackWire,

    /// First synchronizer flop of the loop-back input.
    sync_stage: bool,

    staged: BTreeMap<RvAddr, RvData>,

    edge_action: Option<ActionHandle>,

    timer: Timer,
}

impl LockHandlerRegs {
    fn new(clock: &Clock) -> Self {
        Self {
            loop_back_in: ReadOnlyRegister::new(0),
            output_out: ReadWriteRegister::new(0),
            lock_error: ReadWriteRegister::new(0),
            wire: LoopBackWire::Intact,
            sync_stage: false,
            staged: BTreeMap::new(),
            edge_action: None,
            timer: clock.timer(),
        }
    }

    fn input(&self) -> bool {
        self.loop_back_in.reg.is_set(Gpio::LEVEL)
    }

    fn output(&self) -> bool {
        self.output_out.reg.is_set(Gpio::LEVEL)
    }

    fn pin(&self) -> bool {
        match self.wire {
            LoopBackWire::Intact => self.output(),
            LoopBackWire::Held(level) => level,
        }
    }

    /// Nothing changes on further edges.
    fn settled(&self) -> bool {
        let mismatch = self.input() != self.output();
        self.staged.is_empty()
            && self.pin() == self.sync_stage
            && self.sync_stage == self.input()
            && self.lock_error.reg.get() == mismatch as u32
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

        // Every flop loads from the values before the edge.
        let mismatch = self.input() != self.output();
        let pin = self.pin();
        for (addr, val) in std::mem::take(&mut self.staged) {
            match addr {
                OFFSET_OUTPUT_OUT => self.output_out.reg.set(val),
                // The hardware update of lock_error wins over the firmware write.
                _ => tracing::debug!(addr, val, "lock handler write overridden"),
            }
        }
        let error = mismatch as u32;
        if self.lock_error.reg.get() != error {
            tracing::debug!(lock_error = error, now = self.timer.now(), "lock error changed");
        }
        self.lock_error.reg.set(error);
        self.loop_back_in
            .reg
            .write(Gpio::LEVEL.val(self.sync_stage as u32));
        self.sync_stage = pin;

        if !self.settled() {
            self.schedule_edge();
        }
    }

    fn warm_reset(&mut self) {
        if let Some(action) = self.edge_action.take() {
            self.timer.cancel(action);
        }
        self.staged.clear();
        self.output_out.warm_reset();
        self.lock_error.warm_reset();
        self.loop_back_in.reg.set(0);
        self.sync_stage = false;
        if !self.settled() {
            self.schedule_edge();
        }
    }
}
