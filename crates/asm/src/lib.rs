//! Assembler for Rung VM textual assembly.
//!
//! Input surface (the contract with the code generator):
//! - one instruction per line, optional leading whitespace, uppercase mnemonics
//! - `name:` at column 0 defines a label
//! - `;` starts a comment; `; @source <line>` annotations carry source lines
//! - operands are decimal integers, `0x…` hex, or (for jump/call) label names
//!
//! Assembly is two passes: the first sizes every instruction and records
//! label offsets and pending `@source` annotations, the second encodes with
//! all labels resolved. The assembler also owns the relocation pass used when
//! a project concatenates multiple program buffers.

use rung_isa::{Opcode, OperandKind};

/// Error from assembling or relocating. `line` is 1-based; 0 means the error
/// is not tied to a particular line (e.g. an unresolved label reported at its
/// use site keeps that site's line instead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmError {
    pub line: usize,
    pub message: String,
}

impl AsmError {
    fn new(line: usize, message: impl Into<String>) -> AsmError {
        AsmError {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AsmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line > 0 {
            write!(f, "asm line {}: {}", self.line, self.message)
        } else {
            write!(f, "asm: {}", self.message)
        }
    }
}

impl std::error::Error for AsmError {}

/// Result of a successful assembly.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub code: Vec<u8>,
    /// `(pc, source_line)` pairs from `; @source` annotations, ascending pc.
    pub debug_map: Vec<(u32, u32)>,
}

struct Instr<'a> {
    op: Opcode,
    operand: Option<&'a str>,
    src: usize,
}

/// Assemble a textual-assembly string into bytecode.
pub fn assemble(text: &str) -> Result<Assembled, AsmError> {
    let mut items: Vec<Instr> = Vec::new();
    let mut labels: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    let mut debug_map: Vec<(u32, u32)> = Vec::new();
    let mut pending_source: Option<u32> = None;
    let mut pc: u32 = 0;

    // Pass 1: size instructions, collect label offsets and @source annotations.
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;

        if let Some(rest) = raw.trim_start().strip_prefix(';') {
            if let Some(src) = rest.trim().strip_prefix("@source") {
                let n = src.trim().parse::<u32>().map_err(|_| {
                    AsmError::new(lineno, format!("malformed @source annotation '{}'", raw.trim()))
                })?;
                pending_source = Some(n);
            }
            continue;
        }

        // Strip trailing comment.
        let line = match raw.find(';') {
            Some(i) => &raw[..i],
            None => raw,
        };
        if line.trim().is_empty() {
            continue;
        }

        // Labels are at column 0 and end with ':'.
        if !line.starts_with(char::is_whitespace) && line.trim_end().ends_with(':') {
            let name = line.trim_end().trim_end_matches(':');
            if name.is_empty() {
                return Err(AsmError::new(lineno, "empty label name"));
            }
            if labels.insert(name, pc).is_some() {
                return Err(AsmError::new(lineno, format!("duplicate label '{}'", name)));
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let mnemonic = parts.next().unwrap();
        let op = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| AsmError::new(lineno, format!("unknown mnemonic '{}'", mnemonic)))?;
        let operand = parts.next();
        if let Some(extra) = parts.next() {
            return Err(AsmError::new(
                lineno,
                format!("unexpected trailing operand '{}'", extra),
            ));
        }
        match (op.operand(), operand) {
            (OperandKind::None, Some(o)) => {
                return Err(AsmError::new(
                    lineno,
                    format!("{} takes no operand, got '{}'", mnemonic, o),
                ));
            }
            (kind, None) if kind != OperandKind::None => {
                return Err(AsmError::new(lineno, format!("{} requires an operand", mnemonic)));
            }
            _ => {}
        }

        if let Some(src) = pending_source.take() {
            debug_map.push((pc, src));
        }
        items.push(Instr {
            op,
            operand,
            src: lineno,
        });
        pc += op.encoded_size() as u32;
    }

    // Pass 2: encode with labels resolved.
    let mut code = Vec::with_capacity(pc as usize);
    for item in &items {
        let (op, operand, lineno) = (item.op, item.operand, item.src);
        code.push(op as u8);
        match op.operand() {
            OperandKind::None => {}
            OperandKind::Imm8 => {
                let v = parse_int(operand.unwrap(), lineno, -128, 255)?;
                code.push(v as u8);
            }
            OperandKind::Imm16 => {
                let v = parse_int(operand.unwrap(), lineno, i16::MIN as i128, u16::MAX as i128)?;
                code.extend_from_slice(&(v as u16).to_le_bytes());
            }
            OperandKind::Imm32 | OperandKind::Mem => {
                let v = parse_int(operand.unwrap(), lineno, i32::MIN as i128, u32::MAX as i128)?;
                code.extend_from_slice(&(v as u32).to_le_bytes());
            }
            OperandKind::Imm64 => {
                let v = parse_int(operand.unwrap(), lineno, i64::MIN as i128, u64::MAX as i128)?;
                code.extend_from_slice(&(v as u64).to_le_bytes());
            }
            OperandKind::Code => {
                let text = operand.unwrap();
                let target = if text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                    parse_int(text, lineno, 0, u32::MAX as i128)? as u32
                } else {
                    *labels.get(text).ok_or_else(|| {
                        AsmError::new(lineno, format!("unresolved label '{}'", text))
                    })?
                };
                code.extend_from_slice(&target.to_le_bytes());
            }
        }
    }

    Ok(Assembled { code, debug_map })
}

fn parse_int(text: &str, line: usize, min: i128, max: i128) -> Result<i128, AsmError> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16)
    } else {
        text.parse::<i128>()
    };
    let v = parsed.map_err(|_| AsmError::new(line, format!("malformed operand '{}'", text)))?;
    if v < min || v > max {
        return Err(AsmError::new(
            line,
            format!("operand {} out of range [{}, {}]", v, min, max),
        ));
    }
    Ok(v)
}

/// Rewrite every code-address operand in `code` by `offset`.
///
/// Used when concatenating per-program buffers into one `CODE` segment: all
/// jump/call targets inside a buffer are absolute within that buffer, so each
/// buffer after the first is shifted by its start offset.
pub fn relocate(code: &mut [u8], offset: u32) -> Result<(), AsmError> {
    let mut pos = 0;
    while pos < code.len() {
        let op = Opcode::from_byte(code[pos]).ok_or_else(|| {
            AsmError::new(0, format!("unknown opcode 0x{:02X} at offset {}", code[pos], pos))
        })?;
        if op.operand() == OperandKind::Code {
            let field = &mut code[pos + 1..pos + 5];
            let target = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
            field.copy_from_slice(&(target + offset).to_le_bytes());
        }
        pos += op.encoded_size();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_basic() {
        let asm = "\
_start:
  PUSH8 3
  STORE16 0x2000
  HALT
";
        let out = assemble(asm).unwrap();
        assert_eq!(
            out.code,
            vec![0x10, 3, 0x1D, 0x00, 0x20, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn test_labels_resolve_forward_and_back() {
        let asm = "\
  JMP _end
_loop:
  PUSH8 1
  JNZ _loop
_end:
  HALT
";
        let out = assemble(asm).unwrap();
        // JMP(5) -> _end at 5+2+5 = 12; JNZ -> _loop at 5
        assert_eq!(u32::from_le_bytes(out.code[1..5].try_into().unwrap()), 12);
        assert_eq!(u32::from_le_bytes(out.code[8..12].try_into().unwrap()), 5);
    }

    #[test]
    fn test_source_annotations_build_debug_map() {
        let asm = "\
; @source 4
  PUSH8 1
  DROP
; @source 7
  HALT
";
        let out = assemble(asm).unwrap();
        assert_eq!(out.debug_map, vec![(0, 4), (3, 7)]);
    }

    #[test]
    fn test_negative_and_hex_operands() {
        let out = assemble("  PUSH8 -5\n  PUSH32 0x40000000\n").unwrap();
        assert_eq!(out.code[1], 0xFB);
        assert_eq!(
            u32::from_le_bytes(out.code[3..7].try_into().unwrap()),
            0x4000_0000
        );
    }

    #[test]
    fn test_errors() {
        assert!(assemble("  BOGUS 1\n").unwrap_err().message.contains("unknown mnemonic"));
        assert!(assemble("  JMP nowhere\n").unwrap_err().message.contains("unresolved label"));
        assert!(assemble("  PUSH8 900\n").unwrap_err().message.contains("out of range"));
        assert!(assemble("  HALT 3\n").unwrap_err().message.contains("takes no operand"));
        let dup = assemble("a:\na:\n  HALT\n").unwrap_err();
        assert!(dup.message.contains("duplicate label"));
    }

    #[test]
    fn test_relocate_rewrites_only_code_operands() {
        let mut out = assemble("  JMP 10\n  PUSH32 10\n  JZ 0\n  HALT\n").unwrap();
        relocate(&mut out.code, 0x100).unwrap();
        assert_eq!(u32::from_le_bytes(out.code[1..5].try_into().unwrap()), 0x10A);
        // PUSH32 immediate untouched
        assert_eq!(u32::from_le_bytes(out.code[6..10].try_into().unwrap()), 10);
        assert_eq!(
            u32::from_le_bytes(out.code[11..15].try_into().unwrap()),
            0x100
        );
    }
}
