/*++

Licensed under the Apache-2.0 license.

File Name:

    jtag_lock.rs

Abstract:

    File contains the JTAG access-control gate: the policy-dependent
    decision logic, the pin routing and the firmware control registers.

--*/

use crate::comparator::BitSerialComparator;
use crate::policy::{LockRetention, ResolvedPolicy, SecurityPolicy};
use dvsoc_emu_bus::{
    ActionHandle, Bus, BusError, Clock, ReadOnlyRegister, ReadWriteRegister, Register, Timer,
};
use dvsoc_emu_types::{RvAddr, RvData, RvSize};
use std::collections::BTreeMap;
use std::{cell::RefCell, rc::Rc};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::{register_bitfields, RegisterLongName};

pub const OFFSET_LOCK_ENABLE: RvAddr = 0x00;
pub const OFFSET_PASSWORD_PRESENTED: RvAddr = 0x04;
pub const OFFSET_PASSWORD_REFERENCE_SOFT: RvAddr = 0x08;
pub const OFFSET_JTAG_STATUS: RvAddr = 0x0c;
pub const OFFSET_PASSWORD_STATUS: RvAddr = 0x10;

register_bitfields! [
    u32,

    /// Lock Enable Register Fields
    LockEnable [
        LOCK OFFSET(0) NUMBITS(1) [],
    ],

    /// Status Register Fields
    Status [
        STATUS OFFSET(0) NUMBITS(1) [],
    ],
];

/// Register contents the gate decision is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlRegisters {
    pub lock_enable: bool,
    pub password_presented: u32,
    pub password_reference_soft: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateDecision {
    /// Debug lines connected to the CPU.
    pub pass_through: bool,
    pub jtag_status: bool,
    pub password_status: bool,
}

/// Gate decision for `policy` given the current register contents.
///
/// There is no failing input: every register value maps to a decision.
pub fn evaluate(policy: &SecurityPolicy, regs: &ControlRegisters) -> GateDecision {
    let lock = !policy.uses_lock_bit() || regs.lock_enable;
    let password_match = policy.bit_order().map(|order| {
        let reference = policy
            .static_key()
            .map_or(regs.password_reference_soft, |key| key.value());
        BitSerialComparator::new(order)
            .compare(regs.password_presented, reference)
            .is_match()
    });
    GateDecision {
        pass_through: lock && password_match.unwrap_or(true),
        jtag_status: policy.uses_lock_bit() && regs.lock_enable,
        password_status: lock && password_match.unwrap_or(false),
    }
}

/// The three JTAG lines driven by the external debugger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JtagPins {
    pub tdi: bool,
    pub tms: bool,
    pub tck: bool,
}

/// Where the JTAG lines go for one gate decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JtagRoute {
    /// Lines seen by the CPU debug port.
    pub cpu: JtagPins,
    /// TDO driven back to the debugger.
    pub tdo: bool,
    /// Unobserved sink the debugger lines are terminated into while blocked.
    pub sink: JtagPins,
}

/// Routes the debugger lines. A blocked gate holds the CPU inputs and TDO low.
pub fn route(pass_through: bool, pins: JtagPins, cpu_tdo: bool) -> JtagRoute {
    if pass_through {
        JtagRoute {
            cpu: pins,
            tdo: cpu_tdo,
            sink: JtagPins::default(),
        }
    } else {
        JtagRoute {
            cpu: JtagPins::default(),
            tdo: false,
            sink: pins,
        }
    }
}

/// Firmware-visible register of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: &'static str,
    pub offset: RvAddr,
    pub width: u32,
    pub writable: bool,
}

/// JTAG lock peripheral.
#[derive(Clone)]
pub struct JtagLock {
    regs: Rc<RefCell<JtagLockRegs>>,
}

impl JtagLock {
    pub fn new(clock: &Clock, resolved: &ResolvedPolicy) -> Self {
        Self {
            regs: Rc::new(RefCell::new(JtagLockRegs::new(clock, resolved))),
        }
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.regs.borrow().policy
    }

    /// Decision for the committed register contents.
    pub fn decision(&self) -> GateDecision {
        self.regs.borrow().decision
    }

    pub fn pass_through(&self) -> bool {
        self.decision().pass_through
    }

    /// Committed register contents. Absent registers read as zero.
    pub fn registers(&self) -> ControlRegisters {
        self.regs.borrow().control()
    }

    /// Registers instantiated for the policy.
    pub fn register_map(&self) -> Vec<RegisterInfo> {
        self.regs.borrow().register_map()
    }

    /// Routes the physical lines through the gate.
    pub fn route(&self, pins: JtagPins, cpu_tdo: bool) -> JtagRoute {
        route(self.pass_through(), pins, cpu_tdo)
    }
}

impl Bus for JtagLock {
    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        self.regs.borrow_mut().read(size, addr)
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        self.regs.borrow_mut().write(size, addr, val)
    }

    fn poll(&mut self) {
        self.regs.borrow_mut().poll();
    }

    fn warm_reset(&mut self) {
        self.regs.borrow_mut().warm_reset();
    }
}

struct JtagLockRegs {
    policy: SecurityPolicy,

    lock_enable: Option<ReadWriteRegister<u32, LockEnable::Register>>,

    password_presented: Option<ReadWriteRegister<u32>>,

    password_reference_soft: Option<ReadWriteRegister<u32>>,

    jtag_status: Option<ReadOnlyRegister<u32, Status::Register>>,

    password_status: Option<ReadOnlyRegister<u32, Status::Register>>,

    /// Writes waiting for the next clock edge, keyed by offset.
    staged: BTreeMap<RvAddr, RvData>,

    commit_action: Option<ActionHandle>,

    decision: GateDecision,

    timer: Timer,
}

impl JtagLockRegs {
    fn new(clock: &Clock, resolved: &ResolvedPolicy) -> Self {
        let policy = resolved.policy;
        let lock_enable = policy
            .uses_lock_bit()
            .then(|| match resolved.lock_retention {
                Some(LockRetention::SurvivesReset) => ReadWriteRegister::reset_less(0),
                _ => ReadWriteRegister::new(0),
            });
        let password_presented = policy.uses_password().then(|| {
            if policy.static_key().is_some() {
                ReadWriteRegister::reset_less(0)
            } else {
                ReadWriteRegister::new(0)
            }
        });
        let mut regs = Self {
            policy,
            lock_enable,
            password_presented,
            password_reference_soft: policy
                .uses_soft_reference()
                .then(|| ReadWriteRegister::new(0)),
            jtag_status: policy.uses_lock_bit().then(|| ReadOnlyRegister::new(0)),
            password_status: policy.uses_password().then(|| ReadOnlyRegister::new(0)),
            staged: BTreeMap::new(),
            commit_action: None,
            decision: GateDecision::default(),
            timer: clock.timer(),
        };
        regs.refresh();
        regs
    }

    fn control(&self) -> ControlRegisters {
        ControlRegisters {
            lock_enable: self
                .lock_enable
                .as_ref()
                .is_some_and(|r| r.reg.is_set(LockEnable::LOCK)),
            password_presented: self.password_presented.as_ref().map_or(0, |r| r.reg.get()),
            password_reference_soft: self
                .password_reference_soft
                .as_ref()
                .map_or(0, |r| r.reg.get()),
        }
    }

    fn register_map(&self) -> Vec<RegisterInfo> {
        let mut map = Vec::new();
        if self.lock_enable.is_some() {
            map.push(RegisterInfo {
                name: "lock_enable",
                offset: OFFSET_LOCK_ENABLE,
                width: 1,
                writable: true,
            });
        }
        if self.password_presented.is_some() {
            map.push(RegisterInfo {
                name: "password_presented",
                offset: OFFSET_PASSWORD_PRESENTED,
                width: 32,
                writable: true,
            });
        }
        if self.password_reference_soft.is_some() {
            map.push(RegisterInfo {
                name: "password_reference_soft",
                offset: OFFSET_PASSWORD_REFERENCE_SOFT,
                width: self.policy.soft_reference_mask().count_ones(),
                writable: true,
            });
        }
        if self.jtag_status.is_some() {
            map.push(RegisterInfo {
                name: "jtag_status",
                offset: OFFSET_JTAG_STATUS,
                width: 1,
                writable: false,
            });
        }
        if self.password_status.is_some() {
            map.push(RegisterInfo {
                name: "password_status",
                offset: OFFSET_PASSWORD_STATUS,
                width: 1,
                writable: false,
            });
        }
        map
    }

    fn read(&mut self, size: RvSize, addr: RvAddr) -> Result<RvData, BusError> {
        match addr {
            OFFSET_LOCK_ENABLE => self.lock_enable.as_ref().map(|r| r.read(size)),
            OFFSET_PASSWORD_PRESENTED => self.password_presented.as_ref().map(|r| r.read(size)),
            OFFSET_PASSWORD_REFERENCE_SOFT => {
                self.password_reference_soft.as_ref().map(|r| r.read(size))
            }
            OFFSET_JTAG_STATUS => self.jtag_status.as_ref().map(|r| r.read(size)),
            OFFSET_PASSWORD_STATUS => self.password_status.as_ref().map(|r| r.read(size)),
            _ => None,
        }
        .unwrap_or(Err(BusError::LoadAccessFault))
    }

    fn write(&mut self, size: RvSize, addr: RvAddr, val: RvData) -> Result<(), BusError> {
        let mask = match addr {
            OFFSET_LOCK_ENABLE if self.lock_enable.is_some() => LockEnable::LOCK.mask,
            OFFSET_PASSWORD_PRESENTED if self.password_presented.is_some() => u32::MAX,
            OFFSET_PASSWORD_REFERENCE_SOFT if self.password_reference_soft.is_some() => {
                self.policy.soft_reference_mask()
            }
            _ => return Err(BusError::StoreAccessFault),
        };
        if size != RvSize::Word {
            return Err(BusError::StoreAccessFault);
        }

        self.staged.insert(addr, val & mask);
        if self.commit_action.is_none() {
            self.commit_action = Some(self.timer.schedule_poll_in(1));
        }
        Ok(())
    }

    fn poll(&mut self) {
        if !self.timer.fired(&mut self.commit_action) {
            return;
        }
        for (addr, val) in std::mem::take(&mut self.staged) {
            let committed = match addr {
                OFFSET_LOCK_ENABLE => commit(&self.lock_enable, val),
                OFFSET_PASSWORD_PRESENTED => commit(&self.password_presented, val),
                OFFSET_PASSWORD_REFERENCE_SOFT => commit(&self.password_reference_soft, val),
                _ => false,
            };
            if committed {
                tracing::debug!(addr, val, now = self.timer.now(), "jtag lock register committed");
            }
        }
        self.refresh();
    }

    fn warm_reset(&mut self) {
        if let Some(action) = self.commit_action.take() {
            self.timer.cancel(action);
        }
        self.staged.clear();
        if let Some(reg) = self.lock_enable.as_mut() {
            reg.warm_reset();
        }
        if let Some(reg) = self.password_presented.as_mut() {
            reg.warm_reset();
        }
        if let Some(reg) = self.password_reference_soft.as_mut() {
            reg.warm_reset();
        }
        self.refresh();
    }

    /// Recomputes the decision and the status registers from committed storage.
    fn refresh(&mut self) {
        let decision = evaluate(&self.policy, &self.control());
        if decision != self.decision {
            tracing::trace!(
                policy = self.policy.name(),
                pass_through = decision.pass_through,
                jtag_status = decision.jtag_status,
                password_status = decision.password_status,
                "jtag gate decision changed"
            );
        }
        self.decision = decision;
        if let Some(status) = self.jtag_status.as_mut() {
            status.reg.write(Status::STATUS.val(decision.jtag_status as u32));
        }
        if let Some(status) = self.password_status.as_mut() {
            status
                .reg
                .write(Status::STATUS.val(decision.password_status as u32));
        }
    }
}

/// Latches `val` into `reg` if the register exists in this policy.
fn commit<R: RegisterLongName>(reg: &Option<ReadWriteRegister<u32, R>>, val: RvData) -> bool {
    match reg {
        Some(reg) => {
            reg.reg.set(val);
            true
        }
        None => false,
    }
}
