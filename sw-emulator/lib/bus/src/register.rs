/*++

Licensed under the Apache-2.0 license.

File Name:

    register.rs

Abstract:

    File contains the CSR cell types used by peripherals.

--*/

use crate::BusError;
use dvsoc_emu_types::{RvData, RvSize};
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::InMemoryRegister;
use tock_registers::{RegisterLongName, UIntLike};

pub trait Register {
    /// Size of the register in bytes.
    const SIZE: usize;

    /// Read data of specified size
    ///
    /// # Error
    ///
    /// * `BusError` - Exception with cause `BusError::LoadAccessFault`
    fn read(&self, size: RvSize) -> Result<RvData, BusError>;

    /// Write data of specified size
    ///
    /// # Error
    ///
    /// * `BusError` - Exception with cause `BusError::StoreAccessFault`
    fn write(&mut self, size: RvSize, val: RvData) -> Result<(), BusError>;
}

/// Conversion between bus data and the register's storage type.
pub trait RvDataConverter: UIntLike {
    fn from_data(val: RvData) -> Self;
    fn to_data(self) -> RvData;
}

impl RvDataConverter for u8 {
    fn from_data(val: RvData) -> u8 {
        (val & u8::MAX as RvData) as u8
    }

    fn to_data(self) -> RvData {
        self as RvData
    }
}

impl RvDataConverter for u16 {
    fn from_data(val: RvData) -> u16 {
        (val & u16::MAX as RvData) as u16
    }

    fn to_data(self) -> RvData {
        self as RvData
    }
}

impl RvDataConverter for u32 {
    fn from_data(val: RvData) -> u32 {
        val
    }

    fn to_data(self) -> RvData {
        self
    }
}

fn check_size<T>(size: RvSize, fault: BusError) -> Result<(), BusError> {
    if size == RvSize::Invalid || usize::from(size) != std::mem::size_of::<T>() {
        return Err(fault);
    }
    Ok(())
}

/// Firmware-writable storage register.
///
/// A reset-less register keeps its contents across [`ReadWriteRegister::warm_reset`];
/// any other register returns to the value it was created with.
pub struct ReadWriteRegister<T: UIntLike, R: RegisterLongName = ()> {
    /// Register
    pub reg: InMemoryRegister<T, R>,

    reset_val: T,

    reset_less: bool,
}

impl<T: UIntLike, R: RegisterLongName> ReadWriteRegister<T, R> {
    /// Create a register that is cleared to `val` on system reset
    pub fn new(val: T) -> Self {
        Self {
            reg: InMemoryRegister::new(val),
            reset_val: val,
            reset_less: false,
        }
    }

    /// Create a register that holds its contents through system reset
    pub fn reset_less(val: T) -> Self {
        Self {
            reset_less: true,
            ..Self::new(val)
        }
    }

    pub fn is_reset_less(&self) -> bool {
        self.reset_less
    }

    pub fn warm_reset(&mut self) {
        if !self.reset_less {
            self.reg.set(self.reset_val);
        }
    }
}

impl<T: RvDataConverter, R: RegisterLongName> Register for ReadWriteRegister<T, R> {
    const SIZE: usize = std::mem::size_of::<T>();

    fn read(&self, size: RvSize) -> Result<RvData, BusError> {
        check_size::<T>(size, BusError::LoadAccessFault)?;
        Ok(self.reg.get().to_data())
    }

    fn write(&mut self, size: RvSize, val: RvData) -> Result<(), BusError> {
        check_size::<T>(size, BusError::StoreAccessFault)?;
        self.reg.set(T::from_data(val));
        Ok(())
    }
}

/// Status register driven by hardware. Firmware writes fault.
pub struct ReadOnlyRegister<T: UIntLike, R: RegisterLongName = ()> {
    /// Register
    pub reg: InMemoryRegister<T, R>,
}

impl<T: UIntLike, R: RegisterLongName> ReadOnlyRegister<T, R> {
    /// Create an instance of Read Only Register
    pub fn new(val: T) -> Self {
        Self {
            reg: InMemoryRegister::new(val),
        }
    }
}

impl<T: RvDataConverter, R: RegisterLongName> Register for ReadOnlyRegister<T, R> {
    const SIZE: usize = std::mem::size_of::<T>();

    fn read(&self, size: RvSize) -> Result<RvData, BusError> {
        check_size::<T>(size, BusError::LoadAccessFault)?;
        Ok(self.reg.get().to_data())
    }

    fn write(&mut self, _size: RvSize, _val: RvData) -> Result<(), BusError> {
        Err(BusError::StoreAccessFault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::interfaces::ReadWriteable;
    use tock_registers::register_bitfields;

    register_bitfields! [
        u32,
        Ctrl [
            ENABLE OFFSET(0) NUMBITS(1) [],
        ],
    ];

    #[test]
    fn test_rw_register() {
        let mut reg = ReadWriteRegister::<u32>::new(0);
        assert_eq!(reg.write(RvSize::Word, 0xcafe_f00d), Ok(()));
        assert_eq!(reg.read(RvSize::Word), Ok(0xcafe_f00d));
        assert_eq!(
            reg.write(RvSize::Byte, 0x1),
            Err(BusError::StoreAccessFault)
        );
        assert_eq!(reg.read(RvSize::HalfWord), Err(BusError::LoadAccessFault));
    }

    #[test]
    fn test_rw_register_warm_reset() {
        let mut cleared = ReadWriteRegister::<u32>::new(0x5);
        let mut kept = ReadWriteRegister::<u32>::reset_less(0x5);
        cleared.write(RvSize::Word, 0xff).unwrap();
        kept.write(RvSize::Word, 0xff).unwrap();

        cleared.warm_reset();
        kept.warm_reset();

        assert!(!cleared.is_reset_less());
        assert!(kept.is_reset_less());
        assert_eq!(cleared.read(RvSize::Word), Ok(0x5));
        assert_eq!(kept.read(RvSize::Word), Ok(0xff));
    }

    #[test]
    fn test_ro_register() {
        let mut reg = ReadOnlyRegister::<u32, Ctrl::Register>::new(0);
        reg.reg.modify(Ctrl::ENABLE::SET);
        assert_eq!(reg.read(RvSize::Word), Ok(1));
        assert_eq!(reg.write(RvSize::Word, 0), Err(BusError::StoreAccessFault));
        assert!(reg.reg.is_set(Ctrl::ENABLE));
    }

    #[test]
    fn test_narrow_register() {
        let mut reg = ReadWriteRegister::<u16>::new(0);
        assert_eq!(reg.write(RvSize::HalfWord, 0x1_2345), Ok(()));
        assert_eq!(reg.read(RvSize::HalfWord), Ok(0x2345));
        assert_eq!(reg.read(RvSize::Word), Err(BusError::LoadAccessFault));
    }
}
