//! Native debugger core for Linux on x86-64.
//!
//! ldbg takes control of an inferior process via `ptrace`, inspects and
//! mutates its execution state, installs software and hardware stop-points,
//! and classifies every stop into a structured [`event::StopReason`]. The
//! crate is a library only; a command-line front-end is expected to sit on
//! top of [`process::Process`] and render the events it returns.
//!
//! The main entry points are [`Process::launch`](process::Process::launch)
//! and [`Process::attach`](process::Process::attach). Two read-only
//! collaborators round out the core: [`elf::Elf`] translates between file
//! and virtual addresses and resolves symbols, and [`disasm::Disassembler`]
//! renders inferior memory as AT&T-syntax instructions.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

#[macro_use]
extern crate log;

pub mod address;
pub mod breakpoint;
pub mod disasm;
pub mod elf;
pub mod error;
pub mod event;
pub mod memory;
pub mod parse;
pub mod pipe;
pub mod prelude;
pub mod process;
pub mod ptrace;
pub mod register;
pub mod stoppoint;
pub mod syscalls;
pub mod watchpoint;
