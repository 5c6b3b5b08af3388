//! The ELF loader collaborator: section and symbol lookup plus the load
//! bias the core needs to translate between file and virtual addresses.

use crate::address::{FileAddr, FileOffset, VirtAddr};
use crate::error::{LdbgError, LdbgResult};
use goblin::elf::header::Header;
use goblin::elf::section_header::{SectionHeader, SHF_ALLOC};
use goblin::elf::sym::Sym;
use memmap2::Mmap;
use std::cell::Cell;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// A symbol table entry paired with its resolved name.
pub struct ElfSymbol {
    pub sym: Sym,
    pub name: String,
}

impl Deref for ElfSymbol {
    type Target = Sym;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.sym
    }
}

/// One parsed ELF object, read-only for its whole life.
///
/// Results of every lookup are stable; the only mutable state is the load
/// bias, which the owner sets once the object's runtime location is known
/// (for the main executable: AT_ENTRY from the inferior's auxv minus the
/// header's e_entry).
pub struct Elf {
    path: PathBuf,
    data: Mmap,
    header: Header,
    sections: Vec<SectionHeader>,
    section_names: Vec<String>,
    symbols: Vec<ElfSymbol>,
    load_bias: Cell<VirtAddr>,
}

impl Elf {
    pub fn open(path: impl AsRef<Path>) -> LdbgResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let data = unsafe { Mmap::map(&file) }?;

        let object = goblin::elf::Elf::parse(&data)
            .map_err(|e| LdbgError::Elf(format!("could not parse {}: {e}", path.display())))?;

        let sections: Vec<SectionHeader> = object.section_headers.to_vec();
        let section_names = sections
            .iter()
            .map(|section| {
                object
                    .shdr_strtab
                    .get_at(section.sh_name)
                    .unwrap_or("")
                    .to_string()
            })
            .collect();
        let symbols = object
            .syms
            .iter()
            .map(|sym| ElfSymbol {
                sym,
                name: object.strtab.get_at(sym.st_name).unwrap_or("").to_string(),
            })
            .collect();
        let header = object.header;

        Ok(Elf {
            path: path.to_path_buf(),
            data,
            header,
            sections,
            section_names,
            symbols,
            load_bias: Cell::new(VirtAddr::default()),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn load_bias(&self) -> VirtAddr {
        self.load_bias.get()
    }

    /// Record where the object actually landed in the inferior.
    pub fn notify_loaded(&self, address: VirtAddr) {
        self.load_bias.set(address);
    }

    pub fn section_name(&self, index: usize) -> Option<&str> {
        self.section_names.get(index).map(String::as_str)
    }

    pub fn get_section(&self, name: &str) -> Option<&SectionHeader> {
        self.section_names
            .iter()
            .position(|section| section == name)
            .map(|index| &self.sections[index])
    }

    /// The raw bytes of a section, empty for sections with no file image.
    pub fn get_section_contents(&self, name: &str) -> &[u8] {
        use goblin::elf::section_header::SHT_NOBITS;
        match self.get_section(name) {
            Some(section) if section.sh_type != SHT_NOBITS => {
                let start = section.sh_offset as usize;
                let end = start + section.sh_size as usize;
                self.data.get(start..end).unwrap_or(&[])
            }
            _ => &[],
        }
    }

    pub fn get_section_start_address(&self, name: &str) -> Option<FileAddr<'_>> {
        self.get_section(name)
            .map(|section| FileAddr::new(self, section.sh_addr))
    }

    pub fn get_section_start_offset(&self, name: &str) -> Option<FileOffset<'_>> {
        self.get_section(name)
            .map(|section| FileOffset::new(self, section.sh_offset))
    }

    fn allocated_sections(&self) -> impl Iterator<Item = &SectionHeader> {
        self.sections
            .iter()
            .filter(|section| section.sh_flags & u64::from(SHF_ALLOC) != 0)
    }

    pub fn section_containing_file_addr(&self, address: FileAddr<'_>) -> Option<&SectionHeader> {
        if !address
            .elf()
            .map_or(false, |elf| std::ptr::eq(elf, self))
        {
            return None;
        }
        let addr = address.addr();
        self.allocated_sections()
            .find(|section| section.sh_addr <= addr && addr < section.sh_addr + section.sh_size)
    }

    pub fn section_containing_virt_addr(&self, address: VirtAddr) -> Option<&SectionHeader> {
        let bias = self.load_bias.get().addr();
        let addr = address.addr();
        self.allocated_sections().find(|section| {
            bias + section.sh_addr <= addr && addr < bias + section.sh_addr + section.sh_size
        })
    }

    /// Every symbol with the given name, in symbol-table order.
    pub fn get_symbols_by_name(&self, name: &str) -> Vec<&ElfSymbol> {
        self.symbols
            .iter()
            .filter(|symbol| symbol.name == name)
            .collect()
    }

    /// The named symbol whose value is exactly `address`.
    pub fn get_symbol_at_file_addr(&self, address: FileAddr<'_>) -> Option<&ElfSymbol> {
        let addr = address.addr();
        self.symbols
            .iter()
            .find(|symbol| !symbol.name.is_empty() && symbol.sym.st_value == addr)
    }

    pub fn get_symbol_at_virt_addr(&self, address: VirtAddr) -> Option<&ElfSymbol> {
        let file_addr = address.to_file_addr(self);
        if file_addr.is_null() {
            return None;
        }
        self.get_symbol_at_file_addr(file_addr)
    }

    /// The named, sized symbol whose `[st_value, st_value + st_size)`
    /// range contains `address`.
    pub fn get_symbol_containing_file_addr(&self, address: FileAddr<'_>) -> Option<&ElfSymbol> {
        let addr = address.addr();
        self.symbols.iter().find(|symbol| {
            !symbol.name.is_empty()
                && symbol.sym.st_size > 0
                && symbol.sym.st_value <= addr
                && addr < symbol.sym.st_value + symbol.sym.st_size
        })
    }

    pub fn get_symbol_containing_virt_addr(&self, address: VirtAddr) -> Option<&ElfSymbol> {
        let file_addr = address.to_file_addr(self);
        if file_addr.is_null() {
            return None;
        }
        self.get_symbol_containing_file_addr(file_addr)
    }
}
