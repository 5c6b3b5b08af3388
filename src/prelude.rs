//! Convenient re-exports of the types most consumers touch.

pub use crate::address::{FileAddr, FileOffset, VirtAddr};
pub use crate::breakpoint::{BreakpointSite, BP_INSN};
pub use crate::disasm::{Disassembler, Instruction};
pub use crate::elf::{Elf, ElfSymbol};
pub use crate::error::{LdbgError, LdbgResult};
pub use crate::event::{
    ProcessState, StopReason, StoppointHit, SyscallCatchPolicy, SyscallData, SyscallInfo,
    TrapType,
};
pub use crate::pipe::Pipe;
pub use crate::process::Process;
pub use crate::register::{
    register_info_by_dwarf, register_info_by_id, register_info_by_name, RegValue, RegisterFile,
    RegisterId, RegisterInfo,
};
pub use crate::stoppoint::{StopPoint, StoppointCollection, StoppointMode};
pub use crate::syscalls::{syscall_id_to_name, syscall_name_to_id};
pub use crate::watchpoint::Watchpoint;
