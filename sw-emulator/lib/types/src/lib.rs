/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the DVSoC Emulator Types library.

--*/

mod macros;

/// CSR bus data width
pub type RvData = u32;

/// CSR bus address width
pub type RvAddr = u32;

emu_enum!(
    /// CSR bus IO operation size
    #[derive(Debug, Eq, PartialEq, Copy, Clone)]
    pub RvSize;
    usize;
    {
        Byte = 1,
        HalfWord = 2,
        Word = 4,
    };
    Invalid
);
