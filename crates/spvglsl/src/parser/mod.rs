//! SPIR-V module decoder.
//!
//! Validates the fixed five-word header and slices the remaining word stream
//! into length-prefixed instructions. Instructions are views into the
//! module's word buffer: an opcode, a word count and an offset.

use crate::error::{Error, Result};
use log::trace;
use std::ops::Range;

/// Number of words in the module header.
pub const HEADER_WORDS: usize = 5;

/// Version encodings accepted in header word 1 (1.0 through 1.6).
pub const SUPPORTED_VERSIONS: &[u32] = &[
    0x0001_0000,
    0x0001_0100,
    0x0001_0200,
    0x0001_0300,
    0x0001_0400,
    0x0001_0500,
    0x0001_0600,
];

/// Largest ID bound any SPIR-V module may declare.
pub const MAX_ID_BOUND: u32 = 0x3F_FFFF;

/// Decoded module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    /// All result IDs in the module are strictly below this bound.
    pub bound: u32,
    pub schema: u32,
}

impl Header {
    /// Major and minor version numbers.
    pub fn version_numbers(&self) -> (u8, u8) {
        (((self.version >> 16) & 0xff) as u8, ((self.version >> 8) & 0xff) as u8)
    }
}

/// A single instruction, addressed by its offset into the module words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Raw opcode (low 16 bits of the first word).
    pub opcode: u16,
    /// Total number of words including the opcode word.
    pub word_count: u16,
    /// Offset of the opcode word in the module buffer.
    pub offset: usize,
}

impl Instruction {
    /// The opcode as a SPIR-V enum, if it is a known opcode.
    pub fn op(&self) -> Option<spirv::Op> {
        spirv::Op::from_u32(self.opcode as u32)
    }

    /// Range of the operand words (everything after the opcode word).
    pub fn operand_range(&self) -> Range<usize> {
        self.offset + 1..self.offset + self.word_count as usize
    }

    pub fn operand_count(&self) -> usize {
        self.word_count as usize - 1
    }
}

/// Decoded module: header plus instruction views over the word buffer.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    pub header: Header,
    pub words: Vec<u32>,
    pub instructions: Vec<Instruction>,
}

impl ParsedModule {
    /// Operand words of `inst`.
    pub fn operands(&self, inst: &Instruction) -> &[u32] {
        &self.words[inst.operand_range()]
    }
}

/// Decode a module from raw little-endian bytes.
pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedModule> {
    if bytes.len() % 4 != 0 {
        return Err(Error::malformed(format!(
            "module size {} is not a multiple of 4 bytes",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    parse_words(&words)
}

/// Decode a module from a word buffer.
///
/// A buffer whose magic only matches after byte swapping is swapped in
/// full before decoding.
pub fn parse_words(words: &[u32]) -> Result<ParsedModule> {
    if words.len() < HEADER_WORDS {
        return Err(Error::malformed(format!(
            "module has {} words, header needs {}",
            words.len(),
            HEADER_WORDS
        )));
    }

    let words: Vec<u32> = if words[0] == spirv::MAGIC_NUMBER {
        words.to_vec()
    } else if words[0].swap_bytes() == spirv::MAGIC_NUMBER {
        words.iter().map(|w| w.swap_bytes()).collect()
    } else {
        return Err(Error::malformed(format!("invalid magic number {:#010x}", words[0])).at_offset(0));
    };

    let header = Header {
        magic: words[0],
        version: words[1],
        generator: words[2],
        bound: words[3],
        schema: words[4],
    };

    if !SUPPORTED_VERSIONS.contains(&header.version) {
        return Err(
            Error::malformed(format!("unsupported version {:#010x}", header.version)).at_offset(1),
        );
    }
    if header.bound > MAX_ID_BOUND {
        return Err(Error::malformed(format!(
            "id bound {} exceeds the limit of {MAX_ID_BOUND}",
            header.bound
        ))
        .at_offset(3));
    }

    let instructions = split_instructions(&words)?;
    trace!(
        "decoded {} instructions, id bound {}",
        instructions.len(),
        header.bound
    );

    Ok(ParsedModule {
        header,
        words,
        instructions,
    })
}

fn split_instructions(words: &[u32]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = HEADER_WORDS;

    while offset < words.len() {
        let first = words[offset];
        let word_count = (first >> 16) as u16;
        let opcode = (first & 0xffff) as u16;

        if word_count == 0 {
            return Err(Error::malformed("instruction with zero word count").at_offset(offset));
        }
        let end = offset + word_count as usize;
        if end > words.len() {
            return Err(Error::malformed(format!(
                "instruction (opcode {opcode}) declares {word_count} words but only {} remain",
                words.len() - offset
            ))
            .at_offset(offset));
        }

        instructions.push(Instruction {
            opcode,
            word_count,
            offset,
        });
        offset = end;
    }

    Ok(instructions)
}

/// Decode a NUL-terminated, word-packed UTF-8 string.
///
/// Returns the string and the number of words it occupied.
pub fn extract_string(words: &[u32]) -> Result<(String, usize)> {
    let mut bytes = Vec::new();
    for (index, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let text = String::from_utf8(bytes)
                    .map_err(|_| Error::invalid("string literal is not valid UTF-8"))?;
                return Ok((text, index + 1));
            }
            bytes.push(byte);
        }
    }
    Err(Error::invalid("string literal is missing its NUL terminator"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(bound: u32) -> Vec<u32> {
        vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, bound, 0]
    }

    #[test]
    fn empty_module_after_header_is_legal() {
        let module = parse_words(&header(20)).expect("header-only module should decode");
        assert_eq!(module.header.bound, 20);
        assert!(module.instructions.is_empty());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut words = header(20);
        words[0] = 0xDEAD_BEEF;
        let err = parse_words(&words).unwrap_err();
        assert!(err.is_malformed(), "got {err}");
    }

    #[test]
    fn byte_swapped_module_is_accepted() {
        let mut words = header(4);
        words.push((1 << 16) | spirv::Op::Nop as u32);
        let swapped: Vec<u32> = words.iter().map(|w| w.swap_bytes()).collect();
        let module = parse_words(&swapped).expect("swapped module should decode");
        assert_eq!(module.instructions.len(), 1);
        assert_eq!(module.instructions[0].op(), Some(spirv::Op::Nop));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut words = header(4);
        words[1] = 0x0002_0000;
        assert!(parse_words(&words).unwrap_err().is_malformed());
    }

    #[test]
    fn oversized_bound_is_rejected() {
        let err = parse_words(&header(u32::MAX)).unwrap_err();
        assert!(err.is_malformed(), "got {err}");
        assert_eq!(err.location().offset, Some(3));
        assert!(parse_words(&header(MAX_ID_BOUND)).is_ok());
    }

    #[test]
    fn short_header_is_rejected() {
        let err = parse_words(&[spirv::MAGIC_NUMBER, 0x0001_0000, 0]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn zero_word_count_is_fatal() {
        let mut words = header(4);
        words.push(spirv::Op::Nop as u32);
        let err = parse_words(&words).unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(err.location().offset, Some(HEADER_WORDS));
    }

    #[test]
    fn overlong_instruction_is_fatal() {
        let mut words = header(4);
        words.push((3 << 16) | spirv::Op::Capability as u32);
        words.push(1);
        assert!(parse_words(&words).unwrap_err().is_malformed());
    }

    #[test]
    fn instruction_operands_are_views() {
        let mut words = header(4);
        words.push((2 << 16) | spirv::Op::Capability as u32);
        words.push(spirv::Capability::Shader as u32);
        let module = parse_words(&words).unwrap();
        let inst = module.instructions[0];
        assert_eq!(inst.offset, HEADER_WORDS);
        assert_eq!(module.operands(&inst), &[spirv::Capability::Shader as u32]);
    }

    #[test]
    fn strings_are_word_packed() {
        // "main" + NUL padding
        let words = [u32::from_le_bytes(*b"main"), 0];
        let (text, used) = extract_string(&words).unwrap();
        assert_eq!(text, "main");
        assert_eq!(used, 2);

        let words = [u32::from_le_bytes([b'u', b'v', 0, 0])];
        assert_eq!(extract_string(&words).unwrap(), ("uv".to_string(), 1));
    }

    #[test]
    fn unterminated_string_is_invalid() {
        let words = [u32::from_le_bytes(*b"abcd")];
        assert!(extract_string(&words).unwrap_err().is_invalid());
    }

    #[test]
    fn bytes_are_little_endian() {
        let words = header(1);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(parse_bytes(&bytes).unwrap().header.bound, 1);
        assert!(parse_bytes(&bytes[..7]).unwrap_err().is_malformed());
    }
}
