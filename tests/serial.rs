// End-to-end checks on the emitted sections. The assertions read the bytes
// back with a small DWARF v4 reader built on the crate's LEB decoders, so
// offsets, abbreviation codes, and back-patched references are verified
// against what a consumer would actually decode.

use dwarfforge::dwarf::{at, lang, tag};
use dwarfforge::expr::op;
use dwarfforge::{
    arch, encode, leb, AttrValue, DieTree, Error, LineState, LocationEntry, Op, RangeEntry,
};

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

struct Abbrev {
    code: u64,
    tag: u64,
    has_children: bool,
    attrs: Vec<(u64, u64)>,
}

// Parses one unit's abbreviation declarations starting at `pos`; returns
// them together with the position just past the table's null terminator.
fn parse_abbrev_table(bytes: &[u8], mut pos: usize) -> (Vec<Abbrev>, usize) {
    let mut decls = vec![];
    loop {
        let (code, n) = leb::uleb128_decode(&bytes[pos..]).unwrap();
        pos += n;
        if code == 0 {
            break;
        }
        let (tag, n) = leb::uleb128_decode(&bytes[pos..]).unwrap();
        pos += n;
        let has_children = bytes[pos] != 0;
        pos += 1;
        let mut attrs = vec![];
        loop {
            let (attr, n) = leb::uleb128_decode(&bytes[pos..]).unwrap();
            pos += n;
            let (form, n) = leb::uleb128_decode(&bytes[pos..]).unwrap();
            pos += n;
            if attr == 0 && form == 0 {
                break;
            }
            attrs.push((attr, form));
        }
        decls.push(Abbrev {
            code,
            tag,
            has_children,
            attrs,
        });
    }
    (decls, pos)
}

#[derive(Debug, Clone, PartialEq)]
enum Val {
    U(u64),
    I(i64),
    Bytes(Vec<u8>),
}

struct ParsedDie {
    // Offset of the DIE relative to the start of its unit.
    offset: u32,
    tag: u64,
    attrs: Vec<(u64, u64, Val)>,
    children: Vec<ParsedDie>,
}

impl ParsedDie {
    fn attr(&self, code: u64) -> Option<&(u64, u64, Val)> {
        self.attrs.iter().find(|entry| entry.0 == code)
    }
}

// Little-endian only; that is all these tests emit.
fn parse_value(bytes: &[u8], pos: &mut usize, form: u64, word: usize) -> Val {
    match form {
        0x01 => {
            // addr
            let mut value = 0u64;
            for (i, byte) in bytes[*pos..*pos + word].iter().enumerate() {
                value |= (*byte as u64) << (8 * i);
            }
            *pos += word;
            Val::U(value)
        }
        0x0b => {
            let value = bytes[*pos] as i8 as i64;
            *pos += 1;
            Val::I(value)
        }
        0x05 => {
            let value = read_u16(bytes, *pos) as i16 as i64;
            *pos += 2;
            Val::I(value)
        }
        0x06 => {
            let value = read_u32(bytes, *pos) as i32 as i64;
            *pos += 4;
            Val::I(value)
        }
        0x0d => {
            let (value, n) = leb::sleb128_decode(&bytes[*pos..]).unwrap();
            *pos += n;
            Val::I(value)
        }
        0x0c => {
            let value = bytes[*pos] as u64;
            *pos += 1;
            Val::U(value)
        }
        0x0e | 0x13 | 0x17 => {
            // strp, ref4, sec_offset
            let value = read_u32(bytes, *pos) as u64;
            *pos += 4;
            Val::U(value)
        }
        0x18 => {
            let (len, n) = leb::uleb128_decode(&bytes[*pos..]).unwrap();
            *pos += n;
            let value = bytes[*pos..*pos + len as usize].to_vec();
            *pos += len as usize;
            Val::Bytes(value)
        }
        0x19 => Val::U(1),
        _ => panic!("unexpected form {form:#x}"),
    }
}

fn parse_die(
    info: &[u8],
    pos: &mut usize,
    unit_start: usize,
    decls: &[Abbrev],
    word: usize,
) -> Option<ParsedDie> {
    let offset = (*pos - unit_start) as u32;
    let (code, n) = leb::uleb128_decode(&info[*pos..]).unwrap();
    *pos += n;
    if code == 0 {
        return None;
    }
    let decl = decls
        .iter()
        .find(|decl| decl.code == code)
        .expect("DIE uses an undeclared abbreviation code");
    let mut attrs = vec![];
    for &(attr, form) in &decl.attrs {
        let value = parse_value(info, pos, form, word);
        attrs.push((attr, form, value));
    }
    let mut children = vec![];
    if decl.has_children {
        while let Some(child) = parse_die(info, pos, unit_start, decls, word) {
            children.push(child);
        }
    }
    Some(ParsedDie {
        offset,
        tag: decl.tag,
        attrs,
        children,
    })
}

// Parses the unit at `unit_start`, checking the header invariants on the
// way; returns the root DIE and the position just past the unit.
fn parse_unit(info: &[u8], abbrev: &[u8], unit_start: usize) -> (ParsedDie, usize) {
    let unit_length = read_u32(info, unit_start) as usize;
    assert_eq!(read_u16(info, unit_start + 4), 4, "version");
    let abbrev_offset = read_u32(info, unit_start + 6) as usize;
    let word = info[unit_start + 10] as usize;
    let (decls, _) = parse_abbrev_table(abbrev, abbrev_offset);
    let mut pos = unit_start + 11;
    let root = parse_die(info, &mut pos, unit_start, &decls, word).expect("root DIE");
    assert_eq!(pos - unit_start - 4, unit_length, "unit_length");
    (root, pos)
}

#[test]
fn basic_unit() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    unit.set(root, at::DW_AT_producer, AttrValue::Str("angr :)".into()));
    unit.set(root, at::DW_AT_name, AttrValue::Str("test.c".into()));
    unit.set(
        root,
        at::DW_AT_language,
        AttrValue::Int(lang::DW_LANG_C as i64),
    );
    for name in ["main", "foo"] {
        let func = unit.add_child(root, tag::DW_TAG_subprogram);
        unit.set(func, at::DW_AT_name, AttrValue::Str(name.into()));
    }

    let sections = encode(&[unit], arch::I386).unwrap();
    assert!(!sections.contains_key(".debug_loc"));
    assert!(!sections.contains_key(".debug_line"));
    assert!(!sections.contains_key(".debug_ranges"));

    let info = &sections[".debug_info"];
    let abbrev = &sections[".debug_abbrev"];
    assert!(!info.is_empty());
    assert_eq!(info[10], 4, "address_size");

    // One declaration for the unit, one shared by both subprograms.
    let (decls, end) = parse_abbrev_table(abbrev, 0);
    assert_eq!(decls.len(), 2);
    assert_eq!(end, abbrev.len());

    let strs = &sections[".debug_str"];
    assert_eq!(strs[0], 0);
    for name in ["test.c", "angr :)", "main", "foo"] {
        let needle: Vec<u8> = name.bytes().chain([0]).collect();
        let hits = strs
            .windows(needle.len())
            .filter(|window| *window == &needle[..])
            .count();
        assert_eq!(hits, 1, "{name}");
    }

    let (root, end) = parse_unit(info, abbrev, 0);
    assert_eq!(end, info.len());
    assert_eq!(root.tag, tag::DW_TAG_compile_unit);
    assert_eq!(root.children.len(), 2);
    assert_eq!(root.children[0].tag, tag::DW_TAG_subprogram);
    assert_eq!(
        root.attr(at::DW_AT_language),
        Some(&(at::DW_AT_language, 0x0b, Val::I(2)))
    );
}

#[test]
fn sibling_attributes_are_synthesised_and_patched() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    for name in ["a", "b"] {
        let func = unit.add_child(root, tag::DW_TAG_subprogram);
        unit.set(func, at::DW_AT_name, AttrValue::Str(name.into()));
        for block in ["x", "y"] {
            let scope = unit.add_child(func, tag::DW_TAG_lexical_block);
            unit.set(scope, at::DW_AT_name, AttrValue::Str(block.into()));
            unit.add_child(scope, tag::DW_TAG_variable);
        }
    }

    let sections = encode(&[unit], arch::X86_64).unwrap();
    let (root, _) = parse_unit(&sections[".debug_info"], &sections[".debug_abbrev"], 0);

    // The root is last by definition and must not carry a sibling.
    assert!(root.attr(at::DW_AT_sibling).is_none());

    let first = &root.children[0];
    let second = &root.children[1];
    let (_, form, value) = first.attr(at::DW_AT_sibling).expect("sibling attribute");
    assert_eq!(*form, 0x13, "DW_FORM_ref4");
    assert_eq!(*value, Val::U(second.offset as u64));
    assert!(second.attr(at::DW_AT_sibling).is_none());

    // Same again one level down.
    let (_, _, value) = first.children[0]
        .attr(at::DW_AT_sibling)
        .expect("nested sibling attribute");
    assert_eq!(*value, Val::U(first.children[1].offset as u64));
    assert!(first.children[1].attr(at::DW_AT_sibling).is_none());

    // Leaves have no children and therefore no sibling attribute.
    assert!(first.children[0].children[0]
        .attr(at::DW_AT_sibling)
        .is_none());
}

#[test]
fn forward_type_references_are_patched() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    let func = unit.add_child(root, tag::DW_TAG_subprogram);
    unit.set(func, at::DW_AT_name, AttrValue::Str("f".into()));

    // The type DIE is created up front but attached after the function, so
    // the reference is forward in emission order.
    let int_type = unit.add(tag::DW_TAG_base_type);
    unit.set(int_type, at::DW_AT_name, AttrValue::Str("int".into()));
    unit.set(int_type, at::DW_AT_byte_size, AttrValue::Int(4));
    unit.set(func, at::DW_AT_type, AttrValue::Ref(int_type));
    unit.attach(root, int_type);

    let sections = encode(&[unit], arch::X86_64).unwrap();
    let (root, _) = parse_unit(&sections[".debug_info"], &sections[".debug_abbrev"], 0);

    let func = &root.children[0];
    let type_die = &root.children[1];
    assert!(type_die.offset > func.offset);
    let (_, form, value) = func.attr(at::DW_AT_type).expect("type reference");
    assert_eq!(*form, 0x13);
    assert_eq!(*value, Val::U(type_die.offset as u64));
}

#[test]
fn backward_references_use_the_cache() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    let int_type = unit.add_child(root, tag::DW_TAG_base_type);
    unit.set(int_type, at::DW_AT_name, AttrValue::Str("int".into()));
    let var = unit.add_child(root, tag::DW_TAG_variable);
    unit.set(var, at::DW_AT_type, AttrValue::Ref(int_type));

    let sections = encode(&[unit], arch::X86_64).unwrap();
    let (root, _) = parse_unit(&sections[".debug_info"], &sections[".debug_abbrev"], 0);
    let type_offset = root.children[0].offset;
    let (_, _, value) = root.children[1].attr(at::DW_AT_type).unwrap();
    assert_eq!(*value, Val::U(type_offset as u64));
}

#[test]
fn dangling_references_fail() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    let func = unit.add_child(root, tag::DW_TAG_subprogram);
    let ghost = unit.add(tag::DW_TAG_base_type);
    unit.set(func, at::DW_AT_type, AttrValue::Ref(ghost));

    match encode(&[unit], arch::X86_64) {
        Err(Error::DanglingReference(ids)) => assert_eq!(ids, vec![ghost]),
        other => panic!("expected DanglingReference, got {other:?}"),
    }
}

#[test]
fn location_lists_are_rebased_on_low_pc() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    unit.set(root, at::DW_AT_low_pc, AttrValue::Address(0x40_0000));
    let var = unit.add_child(root, tag::DW_TAG_variable);
    unit.set(
        var,
        at::DW_AT_location,
        AttrValue::LocList(vec![LocationEntry {
            begin: 0x40_0100,
            end: 0x40_0110,
            expr: vec![Op::noargs(op::DW_OP_reg0 + 5)],
        }]),
    );

    let sections = encode(&[unit], arch::X86_64).unwrap();

    let mut expect = vec![];
    expect.extend_from_slice(&0x100u64.to_le_bytes());
    expect.extend_from_slice(&0x110u64.to_le_bytes());
    expect.extend_from_slice(&1u16.to_le_bytes());
    expect.push(0x55); // DW_OP_reg5
    expect.extend_from_slice(&[0; 16]); // terminator
    assert_eq!(sections[".debug_loc"], expect);

    let (root, _) = parse_unit(&sections[".debug_info"], &sections[".debug_abbrev"], 0);
    let (_, form, value) = root.children[0].attr(at::DW_AT_location).unwrap();
    assert_eq!(*form, 0x17, "DW_FORM_sec_offset");
    assert_eq!(*value, Val::U(0));
}

#[test]
fn location_entries_below_low_pc_wrap_to_the_word_width() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    unit.set(root, at::DW_AT_low_pc, AttrValue::Address(0x40_0000));
    let var = unit.add_child(root, tag::DW_TAG_variable);
    unit.set(
        var,
        at::DW_AT_location,
        AttrValue::LocList(vec![LocationEntry {
            begin: 0x3f_ff00,
            end: 0x40_0010,
            expr: vec![Op::noargs(op::DW_OP_reg0 + 5)],
        }]),
    );

    let sections = encode(&[unit], arch::I386).unwrap();

    let mut expect = vec![];
    expect.extend_from_slice(&0xffff_ff00u32.to_le_bytes());
    expect.extend_from_slice(&0x10u32.to_le_bytes());
    expect.extend_from_slice(&1u16.to_le_bytes());
    expect.push(0x55); // DW_OP_reg5
    expect.extend_from_slice(&[0; 8]); // terminator
    assert_eq!(sections[".debug_loc"], expect);
}

#[test]
fn range_lists_support_base_address_entries() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    unit.set(
        root,
        at::DW_AT_ranges,
        AttrValue::RangeList(vec![
            RangeEntry::BaseAddress(0x40_0000),
            RangeEntry::Range {
                begin: 0x10,
                end: 0x20,
            },
        ]),
    );

    let sections = encode(&[unit], arch::X86_64).unwrap();

    let mut expect = vec![];
    expect.extend_from_slice(&u64::MAX.to_le_bytes()); // base-address marker
    expect.extend_from_slice(&0x40_0000u64.to_le_bytes());
    expect.extend_from_slice(&0x10u64.to_le_bytes());
    expect.extend_from_slice(&0x20u64.to_le_bytes());
    expect.extend_from_slice(&[0; 16]); // terminator
    assert_eq!(sections[".debug_ranges"], expect);
}

#[test]
fn line_programs_land_in_debug_line() {
    let mut units = vec![];
    for file in ["a.c", "b.c"] {
        let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
        let root = unit.root();
        unit.set(root, at::DW_AT_name, AttrValue::Str(file.into()));
        let mut row = LineState::new(file);
        row.address = 0x1000;
        row.line = 3;
        let mut end = LineState::new(file);
        end.address = 0x1010;
        end.end_sequence = true;
        unit.set(root, at::DW_AT_stmt_list, AttrValue::LineProgram(vec![row, end]));
        units.push(unit);
    }

    let sections = encode(&units, arch::X86_64).unwrap();
    let line = &sections[".debug_line"];

    let first_len = read_u32(line, 0) as usize + 4;

    let info = &sections[".debug_info"];
    let abbrev = &sections[".debug_abbrev"];
    let (first, end) = parse_unit(info, abbrev, 0);
    let (second, _) = parse_unit(info, abbrev, end);
    assert_eq!(
        first.attr(at::DW_AT_stmt_list).unwrap().2,
        Val::U(0),
        "first program starts the section"
    );
    assert_eq!(
        second.attr(at::DW_AT_stmt_list).unwrap().2,
        Val::U(first_len as u64),
        "second program follows the first"
    );
    assert_eq!(read_u32(line, first_len) as usize + 4, line.len() - first_len);
}

#[test]
fn units_get_fresh_abbrev_tables_and_share_strings() {
    let mut units = vec![];
    for _ in 0..2 {
        let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
        let root = unit.root();
        unit.set(root, at::DW_AT_name, AttrValue::Str("same.c".into()));
        let func = unit.add_child(root, tag::DW_TAG_subprogram);
        unit.set(func, at::DW_AT_name, AttrValue::Str("same.c".into()));
        units.push(unit);
    }

    let sections = encode(&units, arch::X86_64).unwrap();
    let info = &sections[".debug_info"];
    let abbrev = &sections[".debug_abbrev"];

    let (_, first_table_end) = parse_abbrev_table(abbrev, 0);
    let (_, second_table_end) = parse_abbrev_table(abbrev, first_table_end);
    assert_eq!(second_table_end, abbrev.len());

    let (_, first_unit_end) = parse_unit(info, abbrev, 0);
    assert_eq!(
        read_u32(info, first_unit_end + 6) as usize,
        first_table_end,
        "second unit's abbreviations start after the first table"
    );
    let (_, second_unit_end) = parse_unit(info, abbrev, first_unit_end);
    assert_eq!(second_unit_end, info.len());

    // The string pool is shared across units.
    let strs = &sections[".debug_str"];
    let needle = b"same.c\0";
    let hits = strs
        .windows(needle.len())
        .filter(|window| *window == &needle[..])
        .count();
    assert_eq!(hits, 1);
}

#[test]
fn expressions_are_emitted_as_exprloc() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    let var = unit.add_child(root, tag::DW_TAG_variable);
    unit.set(
        var,
        at::DW_AT_location,
        AttrValue::Expr(vec![Op::new(
            op::DW_OP_fbreg,
            vec![dwarfforge::OpArg::Num(-16)],
        )]),
    );

    let sections = encode(&[unit], arch::X86_64).unwrap();
    let (root, _) = parse_unit(&sections[".debug_info"], &sections[".debug_abbrev"], 0);
    let (_, form, value) = root.children[0].attr(at::DW_AT_location).unwrap();
    assert_eq!(*form, 0x18, "DW_FORM_exprloc");
    assert_eq!(*value, Val::Bytes(vec![0x91, 0x70]));
}

#[test]
fn unsupported_expression_opcodes_abort_the_encode() {
    let mut unit = DieTree::new(tag::DW_TAG_compile_unit);
    let root = unit.root();
    let var = unit.add_child(root, tag::DW_TAG_variable);
    unit.set(
        var,
        at::DW_AT_location,
        AttrValue::Expr(vec![Op::noargs(op::DW_OP_GNU_const_type)]),
    );

    let err = encode(&[unit], arch::X86_64).unwrap_err();
    assert!(matches!(err, Error::Unsupported(name) if name == "DW_OP_GNU_const_type"));
}
