// Line-number program encoder (DWARF v4 section 6.2).
//
// The input is the list of rows the table should contain, one LineState per
// row. The output is a complete line-number program for one compile unit:
// header, include-directory and file tables, then a minimal sequence of
// standard and extended opcodes that drives the consumer's state machine
// through exactly the input rows.
//
// With line_base = 0 and line_range = 1 the special opcodes collapse to
// "advance address by 0, line by 0", so only standard and extended opcodes
// are emitted.

use crate::arch::Arch;
use crate::leb;
use crate::{Error, Result};

const SECTION_VERSION: u16 = 4;

const MINIMUM_INSTRUCTION_LENGTH: u8 = 1;
const MAXIMUM_OPERATIONS_PER_INSTRUCTION: u8 = 1;
const DEFAULT_IS_STMT: bool = true;
const LINE_BASE: i8 = 0;
const LINE_RANGE: u8 = 1;
const OPCODE_BASE: u8 = 13;

// The number of LEB128 operands for each of the standard opcodes 1..=12.
const STANDARD_OPCODE_LENGTHS: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

#[allow(non_upper_case_globals)]
mod opcodes {
    pub const DW_LNS_copy: u8 = 0x01;
    pub const DW_LNS_advance_pc: u8 = 0x02;
    pub const DW_LNS_advance_line: u8 = 0x03;
    pub const DW_LNS_set_file: u8 = 0x04;
    pub const DW_LNS_set_column: u8 = 0x05;
    pub const DW_LNS_negate_stmt: u8 = 0x06;
    pub const DW_LNS_set_basic_block: u8 = 0x07;
    pub const DW_LNS_set_prologue_end: u8 = 0x0a;
    pub const DW_LNS_set_epilogue_begin: u8 = 0x0b;
    pub const DW_LNS_set_isa: u8 = 0x0c;

    pub const DW_LNE_end_sequence: u8 = 0x01;
    pub const DW_LNE_set_address: u8 = 0x02;
    pub const DW_LNE_set_discriminator: u8 = 0x04;
}

use opcodes::*;

// One row of the line-number table. `file` is the source path; the encoder
// assigns file numbers and builds the header tables from the set of paths
// it sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineState {
    pub address: u64,
    pub file: String,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub isa: u64,
    pub discriminator: u64,
}

impl LineState {
    // A row with the registers' documented initial values.
    pub fn new(file: impl Into<String>) -> LineState {
        LineState {
            address: 0,
            file: file.into(),
            line: 1,
            column: 0,
            is_stmt: DEFAULT_IS_STMT,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

// Consumer-side registers we track while choosing opcodes. `file` is None
// until the program has selected a file, which forces DW_LNS_set_file on
// the first row of every sequence.
struct Registers<'a> {
    address: u64,
    file: Option<&'a str>,
    line: u64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    isa: u64,
    discriminator: u64,
}

impl Registers<'_> {
    fn initial() -> Self {
        Registers {
            address: 0,
            file: None,
            line: 1,
            column: 0,
            is_stmt: DEFAULT_IS_STMT,
            basic_block: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }
}

fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, base)| base)
}

// Encodes a complete line-number program for one unit.
pub fn encode_program(arch: &Arch, states: &[LineState]) -> Result<Vec<u8>> {
    // File and directory tables, in order of first appearance. Directory
    // index 0 is reserved for the compilation directory and is not listed.
    let mut files: Vec<&str> = vec![];
    for state in states {
        if state.file.is_empty() {
            return Err(Error::InvalidLineProgram("empty file name".into()));
        }
        if state.file.as_bytes().contains(&0) {
            return Err(Error::InvalidLineProgram(
                "file name contains a NUL byte".into(),
            ));
        }
        if !files.contains(&state.file.as_str()) {
            files.push(&state.file);
        }
    }
    let mut dirs: Vec<&str> = vec![];
    for file in &files {
        let dir = dirname(file);
        if !dir.is_empty() && !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    let dir_index = |file: &str| -> u64 {
        let dir = dirname(file);
        if dir.is_empty() {
            0
        } else {
            dirs.iter().position(|d| *d == dir).unwrap() as u64 + 1
        }
    };
    let file_index = |file: &str| -> u64 {
        files.iter().position(|f| *f == file).unwrap() as u64 + 1
    };

    let mut data = Vec::new();

    // Header. unit_length and header_length are placeholders until their
    // extents are known.
    data.extend_from_slice(&[0; 4]);
    arch.pack_int(&mut data, 2, false, SECTION_VERSION as i128);
    data.extend_from_slice(&[0; 4]);
    data.push(MINIMUM_INSTRUCTION_LENGTH);
    data.push(MAXIMUM_OPERATIONS_PER_INSTRUCTION);
    data.push(DEFAULT_IS_STMT as u8);
    data.push(LINE_BASE as u8);
    data.push(LINE_RANGE);
    data.push(OPCODE_BASE);
    data.extend_from_slice(&STANDARD_OPCODE_LENGTHS);
    for dir in &dirs {
        data.extend_from_slice(dir.as_bytes());
        data.push(0);
    }
    data.push(0);
    for file in &files {
        data.extend_from_slice(basename(file).as_bytes());
        data.push(0);
        leb::uleb128(&mut data, dir_index(file));
        leb::uleb128(&mut data, 0); // mtime
        leb::uleb128(&mut data, 0); // length
    }
    data.push(0);
    // header_length counts from just after its own field.
    let header_length = (data.len() - 10) as u32;
    arch.patch_u32(&mut data, 6, header_length);

    let mut prev = Registers::initial();
    for target in states {
        // Reconcile the registers field by field, then emit the row.
        if prev.address != target.address {
            if target.address < prev.address {
                let mut operand = Vec::new();
                arch.pack_word(&mut operand, target.address);
                extended(&mut data, DW_LNE_set_address, &operand);
            } else {
                data.push(DW_LNS_advance_pc);
                leb::uleb128(&mut data, target.address - prev.address);
            }
            prev.address = target.address;
        }
        if prev.file != Some(target.file.as_str()) {
            data.push(DW_LNS_set_file);
            leb::uleb128(&mut data, file_index(&target.file));
            prev.file = Some(&target.file);
        }
        if prev.line != target.line {
            data.push(DW_LNS_advance_line);
            leb::sleb128(&mut data, target.line as i64 - prev.line as i64);
            prev.line = target.line;
        }
        if prev.column != target.column {
            data.push(DW_LNS_set_column);
            leb::uleb128(&mut data, target.column);
            prev.column = target.column;
        }
        if prev.is_stmt != target.is_stmt {
            data.push(DW_LNS_negate_stmt);
            prev.is_stmt = !prev.is_stmt;
        }
        if prev.basic_block != target.basic_block {
            data.push(DW_LNS_set_basic_block);
            prev.basic_block = true;
        }
        if prev.prologue_end != target.prologue_end {
            data.push(DW_LNS_set_prologue_end);
            prev.prologue_end = true;
        }
        if prev.epilogue_begin != target.epilogue_begin {
            data.push(DW_LNS_set_epilogue_begin);
            prev.epilogue_begin = true;
        }
        if prev.isa != target.isa {
            data.push(DW_LNS_set_isa);
            leb::uleb128(&mut data, target.isa);
            prev.isa = target.isa;
        }
        if prev.discriminator != target.discriminator {
            let mut operand = Vec::new();
            leb::uleb128(&mut operand, target.discriminator);
            extended(&mut data, DW_LNE_set_discriminator, &operand);
            prev.discriminator = target.discriminator;
        }

        if target.end_sequence {
            extended(&mut data, DW_LNE_end_sequence, &[]);
            prev = Registers::initial();
        } else {
            data.push(DW_LNS_copy);
            // DW_LNS_copy clears the per-row registers.
            prev.discriminator = 0;
            prev.basic_block = false;
            prev.prologue_end = false;
            prev.epilogue_begin = false;
        }
    }

    let total = data.len();
    arch.patch_u32(&mut data, 0, (total - 4) as u32);
    Ok(data)
}

// Extended opcodes: 0x00, ULEB length of what follows, opcode, operands.
fn extended(data: &mut Vec<u8>, opcode: u8, operand: &[u8]) {
    data.push(0);
    leb::uleb128(data, 1 + operand.len() as u64);
    data.push(opcode);
    data.extend_from_slice(operand);
}
