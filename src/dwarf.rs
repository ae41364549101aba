// The structured input model: a tree of DIEs (debugging information
// entries) per compile unit, plus the DWARF constants needed to build and
// serialize one.
//
// A DIE is a tag, a map from attribute code to value, and an ordered list
// of children. Attributes are kept in a sorted map because the abbreviation
// for a DIE is derived from its attribute codes in ascending order.

use std::collections::BTreeMap;

use crate::expr::Op;
use crate::line::LineState;

// DW_TAG_* values (DWARF v4 section 7.5.1, figure 18).
#[allow(non_upper_case_globals)]
pub mod tag {
    pub const DW_TAG_array_type: u64 = 0x01;
    pub const DW_TAG_class_type: u64 = 0x02;
    pub const DW_TAG_entry_point: u64 = 0x03;
    pub const DW_TAG_enumeration_type: u64 = 0x04;
    pub const DW_TAG_formal_parameter: u64 = 0x05;
    pub const DW_TAG_imported_declaration: u64 = 0x08;
    pub const DW_TAG_label: u64 = 0x0a;
    pub const DW_TAG_lexical_block: u64 = 0x0b;
    pub const DW_TAG_member: u64 = 0x0d;
    pub const DW_TAG_pointer_type: u64 = 0x0f;
    pub const DW_TAG_reference_type: u64 = 0x10;
    pub const DW_TAG_compile_unit: u64 = 0x11;
    pub const DW_TAG_string_type: u64 = 0x12;
    pub const DW_TAG_structure_type: u64 = 0x13;
    pub const DW_TAG_subroutine_type: u64 = 0x15;
    pub const DW_TAG_typedef: u64 = 0x16;
    pub const DW_TAG_union_type: u64 = 0x17;
    pub const DW_TAG_unspecified_parameters: u64 = 0x18;
    pub const DW_TAG_variant: u64 = 0x19;
    pub const DW_TAG_common_block: u64 = 0x1a;
    pub const DW_TAG_common_inclusion: u64 = 0x1b;
    pub const DW_TAG_inheritance: u64 = 0x1c;
    pub const DW_TAG_inlined_subroutine: u64 = 0x1d;
    pub const DW_TAG_module: u64 = 0x1e;
    pub const DW_TAG_ptr_to_member_type: u64 = 0x1f;
    pub const DW_TAG_set_type: u64 = 0x20;
    pub const DW_TAG_subrange_type: u64 = 0x21;
    pub const DW_TAG_with_stmt: u64 = 0x22;
    pub const DW_TAG_access_declaration: u64 = 0x23;
    pub const DW_TAG_base_type: u64 = 0x24;
    pub const DW_TAG_catch_block: u64 = 0x25;
    pub const DW_TAG_const_type: u64 = 0x26;
    pub const DW_TAG_constant: u64 = 0x27;
    pub const DW_TAG_enumerator: u64 = 0x28;
    pub const DW_TAG_file_type: u64 = 0x29;
    pub const DW_TAG_friend: u64 = 0x2a;
    pub const DW_TAG_namelist: u64 = 0x2b;
    pub const DW_TAG_namelist_item: u64 = 0x2c;
    pub const DW_TAG_packed_type: u64 = 0x2d;
    pub const DW_TAG_subprogram: u64 = 0x2e;
    pub const DW_TAG_template_type_parameter: u64 = 0x2f;
    pub const DW_TAG_template_value_parameter: u64 = 0x30;
    pub const DW_TAG_thrown_type: u64 = 0x31;
    pub const DW_TAG_try_block: u64 = 0x32;
    pub const DW_TAG_variant_part: u64 = 0x33;
    pub const DW_TAG_variable: u64 = 0x34;
    pub const DW_TAG_volatile_type: u64 = 0x35;
    pub const DW_TAG_dwarf_procedure: u64 = 0x36;
    pub const DW_TAG_restrict_type: u64 = 0x37;
    pub const DW_TAG_interface_type: u64 = 0x38;
    pub const DW_TAG_namespace: u64 = 0x39;
    pub const DW_TAG_imported_module: u64 = 0x3a;
    pub const DW_TAG_unspecified_type: u64 = 0x3b;
    pub const DW_TAG_partial_unit: u64 = 0x3c;
    pub const DW_TAG_imported_unit: u64 = 0x3d;
    pub const DW_TAG_condition: u64 = 0x3f;
    pub const DW_TAG_shared_type: u64 = 0x40;
    pub const DW_TAG_type_unit: u64 = 0x41;
    pub const DW_TAG_rvalue_reference_type: u64 = 0x42;
    pub const DW_TAG_template_alias: u64 = 0x43;
    pub const DW_TAG_lo_user: u64 = 0x4080;
    pub const DW_TAG_hi_user: u64 = 0xffff;
}

// DW_AT_* values (DWARF v4 section 7.5.4, figure 20).
#[allow(non_upper_case_globals)]
pub mod at {
    pub const DW_AT_sibling: u64 = 0x01;
    pub const DW_AT_location: u64 = 0x02;
    pub const DW_AT_name: u64 = 0x03;
    pub const DW_AT_ordering: u64 = 0x09;
    pub const DW_AT_byte_size: u64 = 0x0b;
    pub const DW_AT_bit_offset: u64 = 0x0c;
    pub const DW_AT_bit_size: u64 = 0x0d;
    pub const DW_AT_stmt_list: u64 = 0x10;
    pub const DW_AT_low_pc: u64 = 0x11;
    pub const DW_AT_high_pc: u64 = 0x12;
    pub const DW_AT_language: u64 = 0x13;
    pub const DW_AT_discr: u64 = 0x15;
    pub const DW_AT_discr_value: u64 = 0x16;
    pub const DW_AT_visibility: u64 = 0x17;
    pub const DW_AT_import: u64 = 0x18;
    pub const DW_AT_string_length: u64 = 0x19;
    pub const DW_AT_common_reference: u64 = 0x1a;
    pub const DW_AT_comp_dir: u64 = 0x1b;
    pub const DW_AT_const_value: u64 = 0x1c;
    pub const DW_AT_containing_type: u64 = 0x1d;
    pub const DW_AT_default_value: u64 = 0x1e;
    pub const DW_AT_inline: u64 = 0x20;
    pub const DW_AT_is_optional: u64 = 0x21;
    pub const DW_AT_lower_bound: u64 = 0x22;
    pub const DW_AT_producer: u64 = 0x25;
    pub const DW_AT_prototyped: u64 = 0x27;
    pub const DW_AT_return_addr: u64 = 0x2a;
    pub const DW_AT_start_scope: u64 = 0x2c;
    pub const DW_AT_bit_stride: u64 = 0x2e;
    pub const DW_AT_upper_bound: u64 = 0x2f;
    pub const DW_AT_abstract_origin: u64 = 0x31;
    pub const DW_AT_accessibility: u64 = 0x32;
    pub const DW_AT_address_class: u64 = 0x33;
    pub const DW_AT_artificial: u64 = 0x34;
    pub const DW_AT_base_types: u64 = 0x35;
    pub const DW_AT_calling_convention: u64 = 0x36;
    pub const DW_AT_count: u64 = 0x37;
    pub const DW_AT_data_member_location: u64 = 0x38;
    pub const DW_AT_decl_column: u64 = 0x39;
    pub const DW_AT_decl_file: u64 = 0x3a;
    pub const DW_AT_decl_line: u64 = 0x3b;
    pub const DW_AT_declaration: u64 = 0x3c;
    pub const DW_AT_discr_list: u64 = 0x3d;
    pub const DW_AT_encoding: u64 = 0x3e;
    pub const DW_AT_external: u64 = 0x3f;
    pub const DW_AT_frame_base: u64 = 0x40;
    pub const DW_AT_friend: u64 = 0x41;
    pub const DW_AT_identifier_case: u64 = 0x42;
    pub const DW_AT_macro_info: u64 = 0x43;
    pub const DW_AT_namelist_item: u64 = 0x44;
    pub const DW_AT_priority: u64 = 0x45;
    pub const DW_AT_segment: u64 = 0x46;
    pub const DW_AT_specification: u64 = 0x47;
    pub const DW_AT_static_link: u64 = 0x48;
    pub const DW_AT_type: u64 = 0x49;
    pub const DW_AT_use_location: u64 = 0x4a;
    pub const DW_AT_variable_parameter: u64 = 0x4b;
    pub const DW_AT_virtuality: u64 = 0x4c;
    pub const DW_AT_vtable_elem_location: u64 = 0x4d;
    pub const DW_AT_allocated: u64 = 0x4e;
    pub const DW_AT_associated: u64 = 0x4f;
    pub const DW_AT_data_location: u64 = 0x50;
    pub const DW_AT_byte_stride: u64 = 0x51;
    pub const DW_AT_entry_pc: u64 = 0x52;
    pub const DW_AT_use_UTF8: u64 = 0x53;
    pub const DW_AT_extension: u64 = 0x54;
    pub const DW_AT_ranges: u64 = 0x55;
    pub const DW_AT_trampoline: u64 = 0x56;
    pub const DW_AT_call_column: u64 = 0x57;
    pub const DW_AT_call_file: u64 = 0x58;
    pub const DW_AT_call_line: u64 = 0x59;
    pub const DW_AT_description: u64 = 0x5a;
    pub const DW_AT_binary_scale: u64 = 0x5b;
    pub const DW_AT_decimal_scale: u64 = 0x5c;
    pub const DW_AT_small: u64 = 0x5d;
    pub const DW_AT_decimal_sign: u64 = 0x5e;
    pub const DW_AT_digit_count: u64 = 0x5f;
    pub const DW_AT_picture_string: u64 = 0x60;
    pub const DW_AT_mutable: u64 = 0x61;
    pub const DW_AT_threads_scaled: u64 = 0x62;
    pub const DW_AT_explicit: u64 = 0x63;
    pub const DW_AT_object_pointer: u64 = 0x64;
    pub const DW_AT_endianity: u64 = 0x65;
    pub const DW_AT_elemental: u64 = 0x66;
    pub const DW_AT_pure: u64 = 0x67;
    pub const DW_AT_recursive: u64 = 0x68;
    pub const DW_AT_signature: u64 = 0x69;
    pub const DW_AT_main_subprogram: u64 = 0x6a;
    pub const DW_AT_data_bit_offset: u64 = 0x6b;
    pub const DW_AT_const_expr: u64 = 0x6c;
    pub const DW_AT_enum_class: u64 = 0x6d;
    pub const DW_AT_linkage_name: u64 = 0x6e;
    pub const DW_AT_lo_user: u64 = 0x2000;
    pub const DW_AT_hi_user: u64 = 0x3fff;
}

// DW_LANG_* values (DWARF v4 section 7.12, figure 31).
#[allow(non_upper_case_globals)]
pub mod lang {
    pub const DW_LANG_C89: u64 = 0x0001;
    pub const DW_LANG_C: u64 = 0x0002;
    pub const DW_LANG_Ada83: u64 = 0x0003;
    pub const DW_LANG_C_plus_plus: u64 = 0x0004;
    pub const DW_LANG_Cobol74: u64 = 0x0005;
    pub const DW_LANG_Cobol85: u64 = 0x0006;
    pub const DW_LANG_Fortran77: u64 = 0x0007;
    pub const DW_LANG_Fortran90: u64 = 0x0008;
    pub const DW_LANG_Pascal83: u64 = 0x0009;
    pub const DW_LANG_Modula2: u64 = 0x000a;
    pub const DW_LANG_Java: u64 = 0x000b;
    pub const DW_LANG_C99: u64 = 0x000c;
    pub const DW_LANG_Ada95: u64 = 0x000d;
    pub const DW_LANG_Fortran95: u64 = 0x000e;
    pub const DW_LANG_PLI: u64 = 0x000f;
    pub const DW_LANG_ObjC: u64 = 0x0010;
    pub const DW_LANG_ObjC_plus_plus: u64 = 0x0011;
    pub const DW_LANG_UPC: u64 = 0x0012;
    pub const DW_LANG_D: u64 = 0x0013;
    pub const DW_LANG_Python: u64 = 0x0014;
}

// The forms the writer emits. A form is never supplied by the caller; it is
// chosen from the value variant alone (and, for integers, the magnitude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    Addr,
    Data2,
    Data4,
    Data1,
    Flag,
    Sdata,
    StrP,
    Ref4,
    SecOffset,
    ExprLoc,
    FlagPresent,
}

impl Form {
    pub fn value(self) -> u64 {
        match self {
            Form::Addr => 0x01,
            Form::Data2 => 0x05,
            Form::Data4 => 0x06,
            Form::Data1 => 0x0b,
            Form::Flag => 0x0c,
            Form::Sdata => 0x0d,
            Form::StrP => 0x0e,
            Form::Ref4 => 0x13,
            Form::SecOffset => 0x17,
            Form::ExprLoc => 0x18,
            Form::FlagPresent => 0x19,
        }
    }
}

// Handle to a DIE inside one DieTree. Handles are how attributes reference
// other DIEs of the same unit; they stay valid for the life of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Die {
    pub tag: u64,
    pub attrs: BTreeMap<u64, AttrValue>,
    pub children: Vec<DieId>,
}

// One entry of a location list. Addresses are absolute in the input; the
// encoder rebases them against the unit's DW_AT_low_pc on emission.
#[derive(Debug, Clone)]
pub struct LocationEntry {
    pub begin: u64,
    pub end: u64,
    pub expr: Vec<Op>,
}

#[derive(Debug, Clone)]
pub enum RangeEntry {
    Range { begin: u64, end: u64 },
    BaseAddress(u64),
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    // One target word, emitted as DW_FORM_addr.
    Address(u64),
    // Narrowed to data1/data2/data4 by magnitude, else sdata.
    Int(i64),
    Flag(bool),
    // Attribute present but valueless (DW_FORM_flag_present).
    Present,
    // Interned into .debug_str; must not contain NUL.
    Str(String),
    // Reference to another DIE of the same unit; forward references are
    // fine, the encoder back-patches them.
    Ref(DieId),
    Expr(Vec<Op>),
    LocList(Vec<LocationEntry>),
    LineProgram(Vec<LineState>),
    RangeList(Vec<RangeEntry>),
    // Suppresses the attribute entirely.
    None,
}

impl AttrValue {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            AttrValue::Address(_) => "address",
            AttrValue::Int(_) => "integer",
            AttrValue::Flag(_) => "flag",
            AttrValue::Present => "presence",
            AttrValue::Str(_) => "string",
            AttrValue::Ref(_) => "reference",
            AttrValue::Expr(_) => "expression",
            AttrValue::LocList(_) => "location list",
            AttrValue::LineProgram(_) => "line program",
            AttrValue::RangeList(_) => "range list",
            AttrValue::None => "none",
        }
    }
}

// Arena of DIEs for one compile unit. Node 0 is the unit root. `add`
// allocates a detached node so cross-references can be created before the
// node is placed; a node that is referenced but never attached under the
// root is reported as dangling when the unit is encoded.
#[derive(Debug, Clone)]
pub struct DieTree {
    nodes: Vec<Die>,
}

impl DieTree {
    pub fn new(root_tag: u64) -> DieTree {
        DieTree {
            nodes: vec![Die {
                tag: root_tag,
                attrs: BTreeMap::new(),
                children: vec![],
            }],
        }
    }

    pub fn root(&self) -> DieId {
        DieId(0)
    }

    // Allocates a detached DIE.
    pub fn add(&mut self, tag: u64) -> DieId {
        self.nodes.push(Die {
            tag,
            attrs: BTreeMap::new(),
            children: vec![],
        });
        DieId(self.nodes.len() - 1)
    }

    pub fn add_child(&mut self, parent: DieId, tag: u64) -> DieId {
        let id = self.add(tag);
        self.attach(parent, id);
        id
    }

    pub fn attach(&mut self, parent: DieId, child: DieId) {
        self.nodes[parent.0].children.push(child);
    }

    pub fn set(&mut self, id: DieId, attr: u64, value: AttrValue) {
        self.nodes[id.0].attrs.insert(attr, value);
    }

    pub fn die(&self, id: DieId) -> &Die {
        &self.nodes[id.0]
    }
}
