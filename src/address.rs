//! Address value types: virtual addresses in the inferior, and addresses
//! and offsets relative to a particular ELF object.

use crate::elf::Elf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::ptr;

/// A linear address in the inferior's virtual address space.
///
/// Zero doubles as the null sentinel: failed file/virtual translations
/// return `VirtAddr::default()`.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtAddr(u64);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: u64) -> Self {
        VirtAddr(addr)
    }

    #[inline]
    pub const fn addr(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Translate into `elf`'s file-address space. Returns the null file
    /// address when this address lies outside every allocated section of
    /// `elf`.
    pub fn to_file_addr(self, elf: &Elf) -> FileAddr<'_> {
        if elf.section_containing_virt_addr(self).is_none() {
            return FileAddr::null();
        }
        FileAddr::new(elf, self.0 - elf.load_bias().addr())
    }
}

impl Add<u64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, offset: u64) -> VirtAddr {
        VirtAddr(self.0 + offset)
    }
}

impl Sub<u64> for VirtAddr {
    type Output = VirtAddr;
    fn sub(self, offset: u64) -> VirtAddr {
        VirtAddr(self.0 - offset)
    }
}

impl AddAssign<u64> for VirtAddr {
    fn add_assign(&mut self, offset: u64) {
        self.0 += offset;
    }
}

impl SubAssign<u64> for VirtAddr {
    fn sub_assign(&mut self, offset: u64) {
        self.0 -= offset;
    }
}

impl From<u64> for VirtAddr {
    fn from(addr: u64) -> Self {
        VirtAddr(addr)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

fn same_object(a: Option<&Elf>, b: Option<&Elf>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => ptr::eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// An address relative to the preferred base of one ELF object.
///
/// Carries a non-owning reference to its object; the null file address
/// carries none. Ordering is only defined between addresses of the same
/// object.
#[derive(Copy, Clone, Default)]
pub struct FileAddr<'elf> {
    elf: Option<&'elf Elf>,
    addr: u64,
}

impl<'elf> FileAddr<'elf> {
    #[inline]
    pub fn new(elf: &'elf Elf, addr: u64) -> Self {
        FileAddr {
            elf: Some(elf),
            addr,
        }
    }

    #[inline]
    pub const fn null() -> Self {
        FileAddr { elf: None, addr: 0 }
    }

    #[inline]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    pub fn elf(&self) -> Option<&'elf Elf> {
        self.elf
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.elf.is_none()
    }

    /// Translate into the inferior's virtual address space. Returns the
    /// null virtual address when this is the null file address or lies
    /// outside every allocated section of the owning object.
    pub fn to_virt_addr(&self) -> VirtAddr {
        let Some(elf) = self.elf else {
            return VirtAddr::default();
        };
        if elf.section_containing_file_addr(*self).is_none() {
            return VirtAddr::default();
        }
        VirtAddr::new(self.addr + elf.load_bias().addr())
    }
}

impl Add<u64> for FileAddr<'_> {
    type Output = Self;
    fn add(self, offset: u64) -> Self {
        FileAddr {
            elf: self.elf,
            addr: self.addr + offset,
        }
    }
}

impl Sub<u64> for FileAddr<'_> {
    type Output = Self;
    fn sub(self, offset: u64) -> Self {
        FileAddr {
            elf: self.elf,
            addr: self.addr - offset,
        }
    }
}

impl PartialEq for FileAddr<'_> {
    fn eq(&self, other: &Self) -> bool {
        same_object(self.elf, other.elf) && self.addr == other.addr
    }
}

impl Eq for FileAddr<'_> {}

impl PartialOrd for FileAddr<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        debug_assert!(
            same_object(self.elf, other.elf),
            "comparing file addresses from different ELF objects"
        );
        self.addr.partial_cmp(&other.addr)
    }
}

impl fmt::Debug for FileAddr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAddr({:#x})", self.addr)
    }
}

/// A byte offset into an ELF file on disk.
#[derive(Copy, Clone, Default)]
pub struct FileOffset<'elf> {
    elf: Option<&'elf Elf>,
    off: u64,
}

impl<'elf> FileOffset<'elf> {
    #[inline]
    pub fn new(elf: &'elf Elf, off: u64) -> Self {
        FileOffset {
            elf: Some(elf),
            off,
        }
    }

    #[inline]
    pub const fn off(&self) -> u64 {
        self.off
    }

    #[inline]
    pub fn elf(&self) -> Option<&'elf Elf> {
        self.elf
    }
}

impl PartialEq for FileOffset<'_> {
    fn eq(&self, other: &Self) -> bool {
        same_object(self.elf, other.elf) && self.off == other.off
    }
}

impl Eq for FileOffset<'_> {}

impl fmt::Debug for FileOffset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileOffset({:#x})", self.off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virt_addr_arithmetic() {
        let mut a = VirtAddr::new(0x1000);
        assert_eq!((a + 0x10).addr(), 0x1010);
        assert_eq!((a - 1).addr(), 0xfff);
        a += 0x1000;
        assert_eq!(a, VirtAddr::new(0x2000));
        a -= 0x800;
        assert_eq!(a.addr(), 0x1800);
    }

    #[test]
    fn virt_addr_ordering() {
        assert!(VirtAddr::new(1) < VirtAddr::new(2));
        assert!(VirtAddr::new(2) >= VirtAddr::new(2));
        assert!(VirtAddr::default().is_null());
    }

    #[test]
    fn virt_addr_renders_as_hex() {
        assert_eq!(VirtAddr::new(0xcafe).to_string(), "0xcafe");
    }

    #[test]
    fn null_file_addr_translates_to_null() {
        assert_eq!(FileAddr::null().to_virt_addr(), VirtAddr::default());
        assert!(FileAddr::null().is_null());
    }
}
