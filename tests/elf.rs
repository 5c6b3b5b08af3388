//! ELF loader tests against the test binary itself.

use anyhow::Result;
use ldbg::prelude::*;
use std::fs;

fn own_auxv_entry() -> u64 {
    let data = fs::read("/proc/self/auxv").expect("read auxv");
    for pair in data.chunks_exact(16) {
        let tag = u64::from_ne_bytes(pair[..8].try_into().unwrap());
        let value = u64::from_ne_bytes(pair[8..].try_into().unwrap());
        if tag == libc::AT_ENTRY {
            return value;
        }
    }
    panic!("AT_ENTRY missing from auxv");
}

fn own_elf() -> Elf {
    let path = fs::read_link("/proc/self/exe").expect("read exe link");
    Elf::open(path).expect("parse own executable")
}

#[test]
fn sections_and_contents() {
    let elf = own_elf();
    let text = elf.get_section(".text").expect(".text section");
    assert!(text.sh_size > 0);
    assert!(!elf.get_section_contents(".text").is_empty());
    assert!(elf.get_section(".no_such_section").is_none());

    let start = elf.get_section_start_address(".text").expect("start");
    assert_eq!(start.addr(), text.sh_addr);
}

#[test]
fn entry_point_translates_both_ways() {
    let elf = own_elf();
    let runtime_entry = VirtAddr::new(own_auxv_entry());
    elf.notify_loaded(VirtAddr::new(
        runtime_entry.addr() - elf.header().e_entry,
    ));

    let entry_file = FileAddr::new(&elf, elf.header().e_entry);
    assert!(elf.section_containing_file_addr(entry_file).is_some());
    assert_eq!(entry_file.to_virt_addr(), runtime_entry);

    // and back again
    assert_eq!(runtime_entry.to_file_addr(&elf), entry_file);
    assert!(elf.section_containing_virt_addr(runtime_entry).is_some());
}

#[test]
fn out_of_range_addresses_translate_to_null() {
    let elf = own_elf();
    elf.notify_loaded(VirtAddr::new(0x5555_5555_4000));

    // virtual address far below every section
    assert!(VirtAddr::new(1).to_file_addr(&elf).is_null());
    // file address past the image
    assert_eq!(
        FileAddr::new(&elf, u64::MAX / 2).to_virt_addr(),
        VirtAddr::default()
    );
}

#[test]
fn symbol_lookup() {
    let elf = own_elf();

    // every Rust test binary links a C `main`
    let mains = elf.get_symbols_by_name("main");
    assert!(!mains.is_empty());
    let main = mains[0];
    assert!(main.st_size > 0);

    // aliases may share the address, but the value must match exactly
    let at = elf
        .get_symbol_at_file_addr(FileAddr::new(&elf, main.st_value))
        .expect("symbol at main");
    assert_eq!(at.st_value, main.st_value);

    let containing = elf
        .get_symbol_containing_file_addr(FileAddr::new(&elf, main.st_value + 1))
        .expect("symbol containing main+1");
    assert_eq!(containing.st_value, main.st_value);

    assert!(elf.get_symbols_by_name("definitely_not_a_symbol").is_empty());
}
