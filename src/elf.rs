// Packages the encoded section buffers into an ELF object.
//
// Two modes: synthesize a minimal relocatable object whose .text holds a
// single zero byte, with each debug section added verbatim; or take an
// existing ELF and refresh its debug sections, which is delegated to
// objcopy with the blobs staged in a temporary directory. Section contents
// are never rewritten here.

use std::path::Path;
use std::process::Command;

use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use tracing::debug;

use crate::arch::{Arch, Endian};
use crate::encode::Sections;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("no ELF backend for architecture {0}")]
    UnsupportedArch(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cannot emit object: {0}")]
    Emit(#[from] object::write::Error),
    #[error("cannot read input ELF: {0}")]
    Read(#[from] object::read::Error),
    #[error("objcopy exited with {0}")]
    Objcopy(std::process::ExitStatus),
}

fn object_arch(arch: &Arch) -> Result<Architecture, PackError> {
    match (arch.name, arch.bits) {
        ("x86-64", 64) => Ok(Architecture::X86_64),
        ("i386", 32) => Ok(Architecture::I386),
        ("arm", 32) => Ok(Architecture::Arm),
        ("aarch64", 64) => Ok(Architecture::Aarch64),
        _ => Err(PackError::UnsupportedArch(arch.name)),
    }
}

fn object_endian(arch: &Arch) -> Endianness {
    match arch.endian {
        Endian::Little => Endianness::Little,
        Endian::Big => Endianness::Big,
    }
}

// Writes a fresh ELF containing the debug sections and a one-byte .text.
pub fn write_elf(sections: &Sections, arch: &Arch, out: &Path) -> Result<(), PackError> {
    let mut object = Object::new(BinaryFormat::Elf, object_arch(arch)?, object_endian(arch));
    let text = object.add_section(vec![], b".text".to_vec(), SectionKind::Text);
    object.append_section_data(text, &[0], 1);
    for (name, data) in sections {
        let section = object.add_section(vec![], name.as_bytes().to_vec(), SectionKind::Debug);
        object.set_section_data(section, data.clone(), 1);
    }
    std::fs::write(out, object.write()?)?;
    debug!(path = %out.display(), "wrote ELF");
    Ok(())
}

// Copies `input` to `out` with the debug sections replaced, or added where
// the input does not have them yet. objcopy does the surgery.
pub fn update_elf(
    sections: &Sections,
    arch: &Arch,
    input: &Path,
    out: &Path,
) -> Result<(), PackError> {
    use object::Object as _;

    let input_bytes = std::fs::read(input)?;
    let existing = object::File::parse(&*input_bytes)?;

    let staging = tempfile::tempdir()?;
    let mut command = Command::new("objcopy");
    command.arg(format!("--output-target={}", arch.bfd_name()));
    for (name, data) in sections {
        let blob = staging.path().join(name.trim_start_matches('.'));
        std::fs::write(&blob, data)?;
        let flag = if existing.section_by_name(name).is_some() {
            "--update-section"
        } else {
            "--add-section"
        };
        command.arg(flag).arg(format!("{}={}", name, blob.display()));
    }
    command.arg(input).arg(out);
    debug!(?command, "running objcopy");
    let status = command.status()?;
    if !status.success() {
        return Err(PackError::Objcopy(status));
    }
    Ok(())
}
