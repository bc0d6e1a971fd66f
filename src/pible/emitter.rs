//! Object emission: instruction vectors to target byte layouts.
//!
//! The emitter never touches opcodes or operands; it only arranges
//! bytes. All three targets share the same container header; the
//! Solana flavor appends a symbol table naming the exported entry
//! points. The reader is the exact inverse and is what lets the VM
//! execute objects back off disk.

use thiserror::Error;

use crate::pible::bpf::{BpfInstruction, BpfProgram, EntryPoint};

/// File magic, bytes 0..8 of every object.
pub const MAGIC: [u8; 8] = *b"PIBLE\0\0\0";
/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;
/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Target tag recorded in the object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TargetTag {
    /// Linux kernel BPF.
    Linux = 1,
    /// Solana BPF with a trailing symbol table.
    Solana = 2,
    /// The in-process virtual machine.
    Vm = 3,
}

impl TargetTag {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(TargetTag::Linux),
            2 => Some(TargetTag::Solana),
            3 => Some(TargetTag::Vm),
            _ => None,
        }
    }
}

/// Malformed object data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The first eight bytes are not the PIBLE magic.
    #[error("not a PIBLE object: bad magic")]
    InvalidMagic,
    /// Format version this build does not understand.
    #[error("unsupported object format version {0}")]
    UnsupportedVersion(u16),
    /// Header field names an unknown target.
    #[error("unknown target tag {0}")]
    UnknownTarget(u16),
    /// The byte buffer ends before its declared contents.
    #[error("object truncated at byte {0}")]
    Truncated(usize),
}

/// A decoded object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    /// Target recorded in the header.
    pub target: TargetTag,
    /// Decoded instruction vector.
    pub instructions: Vec<BpfInstruction>,
    /// Symbol table entries (Solana objects only, empty otherwise).
    pub symbols: Vec<EntryPoint>,
}

/// Serializes a program for the given target.
///
/// Header layout: magic, u16 version, u16 target tag, 4 reserved zero
/// bytes, u64 instruction count, then the 8-byte instruction records,
/// all little-endian. Solana objects append
/// `{u32 count; {u32 name_len; name; u32 entry_pc}*}` naming the
/// exported functions in source order.
pub fn emit_object(program: &BpfProgram, target: TargetTag) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + program.instructions.len() * 8);

    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(target as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(program.instructions.len() as u64).to_le_bytes());
    out.extend_from_slice(&program.instruction_bytes());

    if target == TargetTag::Solana {
        let exported: Vec<&EntryPoint> =
            program.entry_points.iter().filter(|e| e.exported).collect();
        out.extend_from_slice(&(exported.len() as u32).to_le_bytes());
        for entry in exported {
            out.extend_from_slice(&(entry.name.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&(entry.pc as u32).to_le_bytes());
        }
    }

    out
}

/// Parses an object file back into instructions and symbols.
pub fn read_object(bytes: &[u8]) -> Result<ParsedObject, ObjectError> {
    if bytes.len() < HEADER_LEN {
        return Err(ObjectError::Truncated(bytes.len()));
    }
    if bytes[0..8] != MAGIC {
        return Err(ObjectError::InvalidMagic);
    }

    let version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if version != FORMAT_VERSION {
        return Err(ObjectError::UnsupportedVersion(version));
    }
    let raw_tag = u16::from_le_bytes([bytes[10], bytes[11]]);
    let target = TargetTag::from_u16(raw_tag).ok_or(ObjectError::UnknownTarget(raw_tag))?;

    let count = u64::from_le_bytes(
        bytes[16..24]
            .try_into()
            .expect("header slice is eight bytes"),
    ) as usize;
    let body_end = HEADER_LEN + count * 8;
    if bytes.len() < body_end {
        return Err(ObjectError::Truncated(bytes.len()));
    }

    let mut instructions = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_LEN + i * 8;
        let record: [u8; 8] = bytes[start..start + 8]
            .try_into()
            .expect("record slice is eight bytes");
        instructions.push(BpfInstruction::from_bytes(&record));
    }

    let mut symbols = Vec::new();
    if target == TargetTag::Solana && bytes.len() >= body_end + 4 {
        let mut pos = body_end;
        let count = read_u32(bytes, &mut pos)? as usize;
        for _ in 0..count {
            let name_len = read_u32(bytes, &mut pos)? as usize;
            if bytes.len() < pos + name_len {
                return Err(ObjectError::Truncated(bytes.len()));
            }
            let name = String::from_utf8_lossy(&bytes[pos..pos + name_len]).into_owned();
            pos += name_len;
            let pc = read_u32(bytes, &mut pos)? as usize;
            symbols.push(EntryPoint {
                name,
                pc,
                exported: true,
            });
        }
    }

    Ok(ParsedObject {
        target,
        instructions,
        symbols,
    })
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, ObjectError> {
    if bytes.len() < *pos + 4 {
        return Err(ObjectError::Truncated(bytes.len()));
    }
    let value = u32::from_le_bytes(
        bytes[*pos..*pos + 4]
            .try_into()
            .expect("slice is four bytes"),
    );
    *pos += 4;
    Ok(value)
}
