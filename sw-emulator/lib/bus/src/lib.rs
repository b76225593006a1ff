/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the DVSoC Emulator Bus library.

--*/
mod bus;
mod clock;
mod dynamic_bus;
mod register;
pub mod testing;

pub use crate::bus::{Bus, BusError};
pub use crate::clock::{ActionHandle, Clock, Timer, TimerAction};
pub use crate::dynamic_bus::{DynamicBus, MapError};
pub use crate::register::{ReadOnlyRegister, ReadWriteRegister, Register};
