//! Inferior memory access: vectored page-split reads, trap hiding, and
//! word-granular writes.

use crate::address::VirtAddr;
use crate::error::{LdbgError, LdbgResult};
use crate::process::Process;
use crate::ptrace;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;
use std::io::IoSliceMut;

const PAGE_SIZE: u64 = 0x1000;

/// Split `[addr, addr + amount)` on 4 KiB page boundaries.
///
/// `process_vm_readv` fails a whole iovec that touches an unmapped page,
/// so no span may cross one.
fn page_spans(addr: u64, mut amount: usize) -> Vec<(u64, usize)> {
    let mut spans = Vec::new();
    let mut addr = addr;
    while amount > 0 {
        let up_to_next_page = (PAGE_SIZE - (addr & (PAGE_SIZE - 1))) as usize;
        let chunk = amount.min(up_to_next_page);
        spans.push((addr, chunk));
        amount -= chunk;
        addr += chunk as u64;
    }
    spans
}

/// Bulk read through one vectored kernel call. Fails as a whole: a short
/// read is reported as an error, never as partial data.
pub(crate) fn read_process_memory(
    pid: Pid,
    address: VirtAddr,
    amount: usize,
) -> LdbgResult<Vec<u8>> {
    let mut buf = vec![0u8; amount];
    if amount == 0 {
        return Ok(buf);
    }

    let remote: Vec<RemoteIoVec> = page_spans(address.addr(), amount)
        .into_iter()
        .map(|(base, len)| RemoteIoVec {
            base: base as usize,
            len,
        })
        .collect();
    let mut local = [IoSliceMut::new(&mut buf)];

    let read = process_vm_readv(pid, &mut local, &remote)
        .map_err(|e| LdbgError::errno("Could not read process memory", e))?;
    if read != amount {
        return Err(LdbgError::Kernel(format!(
            "Could not read process memory: short read of {read}/{amount} bytes"
        )));
    }
    Ok(buf)
}

/// Write through aligned word pokes. A tail shorter than a word merges the
/// new bytes over the current contents.
pub(crate) fn write_process_memory(pid: Pid, address: VirtAddr, data: &[u8]) -> LdbgResult<()> {
    let mut written = 0;
    while written < data.len() {
        let remaining = data.len() - written;
        let word = if remaining >= 8 {
            u64::from_le_bytes(data[written..written + 8].try_into().unwrap())
        } else {
            let current = read_process_memory(pid, address + written as u64, 8)?;
            let mut bytes = [0u8; 8];
            bytes[..remaining].copy_from_slice(&data[written..]);
            bytes[remaining..].copy_from_slice(&current[remaining..]);
            u64::from_le_bytes(bytes)
        };
        ptrace::pokedata(pid, address.addr() + written as u64, word)
            .map_err(|e| LdbgError::errno("Failed to write memory", e))?;
        written += 8;
    }
    Ok(())
}

impl Process {
    /// Read `amount` bytes of inferior memory as they are, breakpoint
    /// bytes included.
    pub fn read_memory(&self, address: VirtAddr, amount: usize) -> LdbgResult<Vec<u8>> {
        read_process_memory(self.pid_raw(), address, amount)
    }

    /// Read `amount` bytes with every enabled software breakpoint byte in
    /// the range replaced by the byte it hides. Hardware sites patch
    /// nothing, so they are skipped.
    pub fn read_memory_without_traps(
        &self,
        address: VirtAddr,
        amount: usize,
    ) -> LdbgResult<Vec<u8>> {
        let mut memory = self.read_memory(address, amount)?;
        for site in self
            .breakpoint_sites()
            .get_in_range(address, address + amount as u64)
        {
            if !site.is_enabled() || site.is_hardware() {
                continue;
            }
            let offset = (site.address().addr() - address.addr()) as usize;
            memory[offset] = site.saved_byte();
        }
        Ok(memory)
    }

    pub fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> LdbgResult<()> {
        write_process_memory(self.pid_raw(), address, data)
    }
}
