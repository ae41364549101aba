// Serializes DIE trees into the DWARF v4 section buffers.
//
// Each compile unit is written depth first. The abbreviation for a DIE is
// interned on first sight and reused for every later DIE with the same
// shape; strings are interned into .debug_str across all units; references
// between DIEs of a unit are resolved through an offset cache, with forward
// references recorded as 4-byte holes and patched once the target DIE is
// reached. Section buffers are append-only apart from those patches and the
// unit/line headers.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use crate::arch::Arch;
use crate::dwarf::{at, AttrValue, DieId, DieTree, Form, RangeEntry};
use crate::expr::ExprEncoder;
use crate::leb;
use crate::line;
use crate::{Error, Result};

const DWARF_VERSION: u16 = 4;

// unit_length (4) + version (2) + debug_abbrev_offset (4) + address_size (1).
const UNIT_HEADER_SIZE: usize = 11;

// Section name -> contents. Sections that end up empty are dropped.
pub type Sections = BTreeMap<&'static str, Vec<u8>>;

// Encodes every unit and returns the finished section map.
pub fn encode(units: &[DieTree], arch: Arch) -> Result<Sections> {
    let mut encoder = Encoder::new(arch);
    for unit in units {
        encoder.write_unit(unit)?;
    }
    Ok(encoder.finish())
}

// Abbreviations are shared by every DIE with the same tag, children flag,
// synthesised-sibling flag, and (attribute, form) list.
type AbbrevKey = (u64, bool, bool, Vec<(u64, Form)>);

pub struct Encoder {
    arch: Arch,
    exprs: ExprEncoder,

    info: Vec<u8>,
    abbrev: Vec<u8>,
    strs: Vec<u8>,
    loc: Vec<u8>,
    line: Vec<u8>,
    ranges: Vec<u8>,

    // Lives across units: .debug_str is shared by all of them.
    string_cache: HashMap<String, u32>,

    // Per-unit state, reset by write_unit. Abbreviation codes are 1-based
    // within a unit; offsets in reference_cache and in the patch values are
    // relative to the unit start, while the pending hole positions are
    // absolute positions in .debug_info.
    abbrev_cache: HashMap<AbbrevKey, u64>,
    abbrev_counter: u64,
    reference_cache: HashMap<DieId, u32>,
    pending_references: HashMap<DieId, Vec<usize>>,
    info_offset: usize,
    unit_low_pc: u64,
}

impl Encoder {
    pub fn new(arch: Arch) -> Encoder {
        Encoder {
            arch,
            exprs: ExprEncoder::new(arch),
            info: vec![],
            abbrev: vec![],
            // Offset 0 always holds the empty string.
            strs: vec![0],
            loc: vec![],
            line: vec![],
            ranges: vec![],
            string_cache: HashMap::new(),
            abbrev_cache: HashMap::new(),
            abbrev_counter: 1,
            reference_cache: HashMap::new(),
            pending_references: HashMap::new(),
            info_offset: 0,
            unit_low_pc: 0,
        }
    }

    pub fn write_unit(&mut self, unit: &DieTree) -> Result<()> {
        self.info_offset = self.info.len();
        let abbrev_offset = self.abbrev.len() as u32;

        // Reserve the unit header; its fields are known only at the end.
        self.info.extend_from_slice(&[0; UNIT_HEADER_SIZE]);

        self.abbrev_cache.clear();
        self.abbrev_counter = 1;
        self.reference_cache.clear();
        self.pending_references.clear();
        self.unit_low_pc = match unit.die(unit.root()).attrs.get(&at::DW_AT_low_pc) {
            Some(AttrValue::Address(address)) => *address,
            _ => 0,
        };

        self.write_die(unit, unit.root(), true)?;

        // End of this unit's abbreviation declarations.
        self.abbrev.push(0);

        if !self.pending_references.is_empty() {
            let mut ids: Vec<DieId> = self.pending_references.keys().copied().collect();
            ids.sort();
            return Err(Error::DanglingReference(ids));
        }

        let unit_length = (self.info.len() - self.info_offset - 4) as u32;
        self.arch
            .patch_u32(&mut self.info, self.info_offset, unit_length);
        self.arch
            .patch_u16(&mut self.info, self.info_offset + 4, DWARF_VERSION);
        self.arch
            .patch_u32(&mut self.info, self.info_offset + 6, abbrev_offset);
        self.info[self.info_offset + 10] = self.arch.bytes() as u8;

        debug!(unit_length, abbrev_offset, "wrote compile unit");
        Ok(())
    }

    pub fn finish(self) -> Sections {
        let mut out = Sections::new();
        for (name, data) in [
            (".debug_info", self.info),
            (".debug_abbrev", self.abbrev),
            (".debug_str", self.strs),
            (".debug_loc", self.loc),
            (".debug_line", self.line),
            (".debug_ranges", self.ranges),
        ] {
            if !data.is_empty() {
                out.insert(name, data);
            }
        }
        out
    }

    // Offset of the next byte, relative to the current unit's start.
    fn current_offset(&self) -> u32 {
        (self.info.len() - self.info_offset) as u32
    }

    fn write_die(&mut self, tree: &DieTree, id: DieId, is_last_sibling: bool) -> Result<()> {
        let die = tree.die(id);
        let offset = self.current_offset();

        self.reference_cache.insert(id, offset);
        if let Some(holes) = self.pending_references.remove(&id) {
            for position in holes {
                self.arch.patch_u32(&mut self.info, position, offset);
            }
        }

        let has_children = !die.children.is_empty();
        let needs_sibling = has_children && !is_last_sibling;

        // Attributes in ascending code order, with the form each one will
        // be written in. None values suppress the attribute.
        let mut attrs: Vec<(u64, &AttrValue, Form)> = Vec::new();
        for (&code, value) in &die.attrs {
            if matches!(value, AttrValue::None) {
                continue;
            }
            attrs.push((code, value, form_for(code, value)?));
        }

        let key: AbbrevKey = (
            die.tag,
            has_children,
            needs_sibling,
            attrs.iter().map(|&(code, _, form)| (code, form)).collect(),
        );
        let (code, new_abbrev) = self.lookup_abbrev(key);
        trace!(tag = die.tag, code, new_abbrev, offset, "writing DIE");

        leb::uleb128(&mut self.info, code);

        if new_abbrev {
            leb::uleb128(&mut self.abbrev, code);
            leb::uleb128(&mut self.abbrev, die.tag);
            self.abbrev.push(has_children as u8);
        }

        for &(code, value, form) in &attrs {
            self.write_attribute(code, value, form, new_abbrev)?;
        }

        // DW_AT_sibling is synthesised, never taken from the input: a hole
        // now, the offset of the DIE after our children once known.
        let sibling_position = self.info.len();
        if needs_sibling {
            if new_abbrev {
                leb::uleb128(&mut self.abbrev, at::DW_AT_sibling);
                leb::uleb128(&mut self.abbrev, Form::Ref4.value());
            }
            self.info.extend_from_slice(&[0; 4]);
        }

        if new_abbrev {
            // Null attribute, null form.
            self.abbrev.extend_from_slice(&[0, 0]);
        }

        let count = die.children.len();
        for (index, &child) in die.children.iter().enumerate() {
            self.write_die(tree, child, index == count - 1)?;
        }
        if has_children {
            // Null DIE terminates the children.
            self.info.push(0);
        }

        if needs_sibling {
            let next = self.current_offset();
            self.arch.patch_u32(&mut self.info, sibling_position, next);
        }
        Ok(())
    }

    fn lookup_abbrev(&mut self, key: AbbrevKey) -> (u64, bool) {
        if let Some(&code) = self.abbrev_cache.get(&key) {
            return (code, false);
        }
        let code = self.abbrev_counter;
        self.abbrev_counter += 1;
        self.abbrev_cache.insert(key, code);
        (code, true)
    }

    fn lookup_string(&mut self, string: &str) -> Result<u32> {
        if string.as_bytes().contains(&0) {
            return Err(Error::InvalidString);
        }
        if let Some(&offset) = self.string_cache.get(string) {
            return Ok(offset);
        }
        let offset = self.strs.len() as u32;
        self.string_cache.insert(string.to_owned(), offset);
        self.strs.extend_from_slice(string.as_bytes());
        self.strs.push(0);
        Ok(offset)
    }

    fn write_attribute(
        &mut self,
        code: u64,
        value: &AttrValue,
        form: Form,
        new_abbrev: bool,
    ) -> Result<()> {
        if new_abbrev {
            leb::uleb128(&mut self.abbrev, code);
            leb::uleb128(&mut self.abbrev, form.value());
        }

        let word = self.arch.bytes();
        match value {
            AttrValue::Address(address) => {
                self.arch.pack_word(&mut self.info, *address);
            }
            AttrValue::Int(v) => match form {
                Form::Data1 => self.arch.pack_int(&mut self.info, 1, true, *v as i128),
                Form::Data2 => self.arch.pack_int(&mut self.info, 2, true, *v as i128),
                Form::Data4 => self.arch.pack_int(&mut self.info, 4, true, *v as i128),
                _ => leb::sleb128(&mut self.info, *v),
            },
            AttrValue::Flag(flag) => self.info.push(*flag as u8),
            AttrValue::Present => {}
            AttrValue::Str(string) => {
                let offset = self.lookup_string(string)?;
                self.arch.pack_int(&mut self.info, 4, false, offset as i128);
            }
            AttrValue::Ref(target) => {
                if let Some(&offset) = self.reference_cache.get(target) {
                    self.arch.pack_int(&mut self.info, 4, false, offset as i128);
                } else {
                    // Not seen yet: leave a hole and remember where it is.
                    self.pending_references
                        .entry(*target)
                        .or_default()
                        .push(self.info.len());
                    self.info.extend_from_slice(&[0; 4]);
                }
            }
            AttrValue::Expr(ops) => {
                let bytes = self.exprs.encode(ops)?;
                leb::uleb128(&mut self.info, bytes.len() as u64);
                self.info.extend_from_slice(&bytes);
            }
            AttrValue::LocList(entries) => {
                let offset = self.loc.len() as u32;
                self.arch.pack_int(&mut self.info, 4, false, offset as i128);
                // Entries are relative to the unit's DW_AT_low_pc.
                for entry in entries {
                    let begin = entry.begin.wrapping_sub(self.unit_low_pc);
                    let end = entry.end.wrapping_sub(self.unit_low_pc);
                    self.arch.pack_word(&mut self.loc, begin);
                    self.arch.pack_word(&mut self.loc, end);
                    let bytes = self.exprs.encode(&entry.expr)?;
                    self.arch.pack_int(&mut self.loc, 2, false, bytes.len() as i128);
                    self.loc.extend_from_slice(&bytes);
                }
                self.arch.pack_word(&mut self.loc, 0);
                self.arch.pack_word(&mut self.loc, 0);
            }
            AttrValue::LineProgram(states) => {
                let offset = self.line.len() as u32;
                self.arch.pack_int(&mut self.info, 4, false, offset as i128);
                let program = line::encode_program(&self.arch, states)?;
                self.line.extend_from_slice(&program);
            }
            AttrValue::RangeList(entries) => {
                let offset = self.ranges.len() as u32;
                self.arch.pack_int(&mut self.info, 4, false, offset as i128);
                for entry in entries {
                    match entry {
                        RangeEntry::Range { begin, end } => {
                            self.arch.pack_word(&mut self.ranges, *begin);
                            self.arch.pack_word(&mut self.ranges, *end);
                        }
                        RangeEntry::BaseAddress(base) => {
                            // Base-address selection: all ones, then the base.
                            self.arch.pack_int(&mut self.ranges, word, true, -1);
                            self.arch.pack_word(&mut self.ranges, *base);
                        }
                    }
                }
                self.arch.pack_word(&mut self.ranges, 0);
                self.arch.pack_word(&mut self.ranges, 0);
            }
            AttrValue::None => {}
        }
        Ok(())
    }
}

// Picks the form from the value variant alone; integers are narrowed by
// magnitude. An empty expression or list cannot be classified.
fn form_for(code: u64, value: &AttrValue) -> Result<Form> {
    Ok(match value {
        AttrValue::Address(_) => Form::Addr,
        AttrValue::Int(v) => match *v {
            -0x80..=0x7f => Form::Data1,
            -0x8000..=0x7fff => Form::Data2,
            -0x8000_0000..=0x7fff_ffff => Form::Data4,
            _ => Form::Sdata,
        },
        AttrValue::Flag(_) => Form::Flag,
        AttrValue::Present => Form::FlagPresent,
        AttrValue::Str(_) => Form::StrP,
        AttrValue::Ref(_) => Form::Ref4,
        AttrValue::Expr(ops) if !ops.is_empty() => Form::ExprLoc,
        AttrValue::LocList(entries) if !entries.is_empty() => Form::SecOffset,
        AttrValue::LineProgram(states) if !states.is_empty() => Form::SecOffset,
        AttrValue::RangeList(entries) if !entries.is_empty() => Form::SecOffset,
        other => {
            return Err(Error::UnclassifiableValue {
                attr: code,
                kind: other.kind(),
            })
        }
    })
}
