//! The disassembler collaborator: renders inferior memory as AT&T-syntax
//! x86-64 long-mode instructions.

use crate::address::VirtAddr;
use crate::error::LdbgResult;
use crate::process::Process;
use capstone::arch::x86::{ArchMode, ArchSyntax};
use capstone::arch::BuildsCapstone;
use capstone::arch::BuildsCapstoneSyntax;
use capstone::Capstone;
use once_cell::sync::Lazy;

/// The largest encodable x86 instruction.
pub const MAX_INSN_LEN: usize = 15;

struct CachedCapstone(Capstone);

// one engine for the whole process; the core is single-threaded per
// inferior, so handing out &Capstone is sound
unsafe impl Send for CachedCapstone {}
unsafe impl Sync for CachedCapstone {}

static CS: Lazy<CachedCapstone> = Lazy::new(|| {
    let mut cs = Capstone::new()
        .x86()
        .mode(ArchMode::Mode64)
        .syntax(ArchSyntax::Att)
        .detail(false)
        .build()
        .expect("Failed to create Capstone object");
    let _ = cs.set_skipdata(true);
    CachedCapstone(cs)
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: VirtAddr,
    pub text: String,
}

pub struct Disassembler<'a> {
    process: &'a Process,
}

impl<'a> Disassembler<'a> {
    pub fn new(process: &'a Process) -> Self {
        Disassembler { process }
    }

    /// Disassemble up to `n_instructions` starting at `address` (default:
    /// the current program counter). Reads through the trap-hiding overlay
    /// so enabled breakpoints never show up as int3.
    pub fn disassemble(
        &self,
        n_instructions: usize,
        address: Option<VirtAddr>,
    ) -> LdbgResult<Vec<Instruction>> {
        let address = address.unwrap_or_else(|| self.process.pc());
        let code = self
            .process
            .read_memory_without_traps(address, n_instructions * MAX_INSN_LEN)?;

        let instructions = CS
            .0
            .disasm_count(&code, address.addr(), n_instructions)
            .map_err(|e| anyhow::anyhow!("disassembly failed: {e}"))?;

        Ok(instructions
            .iter()
            .map(|insn| {
                let mnemonic = insn.mnemonic().unwrap_or("");
                let text = match insn.op_str() {
                    Some(operands) if !operands.is_empty() => {
                        format!("{mnemonic} {operands}")
                    }
                    _ => mnemonic.to_string(),
                };
                Instruction {
                    address: VirtAddr::new(insn.address()),
                    text,
                }
            })
            .collect())
    }
}
