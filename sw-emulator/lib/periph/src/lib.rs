/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the DVSoC Emulator Peripheral library.

--*/

pub mod comparator;
pub mod counter;
pub mod jtag_lock;
pub mod keypad;
pub mod lock_handler;
pub mod password;
pub mod policy;
mod root_bus;
pub mod security_config;

pub use comparator::{BitOrder, BitSerialComparator, Comparison, COMPARATOR_COUNT};
pub use counter::Counter;
pub use jtag_lock::{evaluate, ControlRegisters, GateDecision, JtagLock, JtagPins, JtagRoute};
pub use keypad::{DashboardKey, DashboardKeyError, Keypad};
pub use lock_handler::{LockHandler, LoopBackWire};
pub use password::{PasswordError, PasswordKey};
pub use policy::{
    resolve, LockRetention, PolicyError, ResolvedPolicy, SecurityFlag, SecurityFlags,
    SecurityPolicy,
};
pub use root_bus::{DvSocRootBus, SocError};
pub use security_config::{ConfigError, SecurityConfig};
