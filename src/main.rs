use std::path::Path;

use dwarfforge::dwarf::{at, lang, tag};
use dwarfforge::{arch, elf, encode, AttrValue, DieTree};

fn main() {
    let path = {
        let mut args: Vec<String> = std::env::args().collect();
        if args.len() != 2 {
            usage(args);
            std::process::exit(1);
        }
        args.swap_remove(1)
    };

    tracing_subscriber::fmt::init();

    // A small compile unit with one function, enough to be inspected with
    // readelf --debug-dump or llvm-dwarfdump.
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    unit.set(root, at::DW_AT_name, AttrValue::Str("demo.c".into()));
    unit.set(root, at::DW_AT_comp_dir, AttrValue::Str("/tmp".into()));
    unit.set(
        root,
        at::DW_AT_producer,
        AttrValue::Str("dwarfforge demo".into()),
    );
    unit.set(root, at::DW_AT_language, AttrValue::Int(lang::DW_LANG_C as i64));
    unit.set(root, at::DW_AT_low_pc, AttrValue::Address(0x1000));
    unit.set(root, at::DW_AT_high_pc, AttrValue::Int(0x20));

    let function = unit.add_child(root, tag::DW_TAG_subprogram);
    unit.set(function, at::DW_AT_name, AttrValue::Str("main".into()));
    unit.set(function, at::DW_AT_low_pc, AttrValue::Address(0x1000));
    unit.set(function, at::DW_AT_high_pc, AttrValue::Int(0x20));
    unit.set(function, at::DW_AT_external, AttrValue::Present);

    let sections = match encode(&[unit], arch::X86_64) {
        Ok(sections) => sections,
        Err(err) => {
            eprintln!("encoding failed: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = elf::write_elf(&sections, &arch::X86_64, Path::new(&path)) {
        eprintln!("packaging failed: {err}");
        std::process::exit(1);
    }
    println!("wrote {path}");
}

fn usage(args: Vec<String>) {
    println!("usage: {} OUTFILE", args[0]);
}
