//! Architecture-specific code for x86_64

pub mod context;
pub mod interrupts;

/// Kernel code segment selector (GDT entry 1).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Kernel data/stack segment selector (GDT entry 2).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
