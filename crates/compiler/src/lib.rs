//! Rung Structured Text compiler library.
//!
//! Compiles IEC 61131-3 Structured Text to textual assembly and binary
//! artifacts for the Rung PLC virtual machine. The pipeline is purely
//! computational and deterministic: lexer, recursive-descent parser,
//! symbol-table/memory-layout pass, stdlib catalog, code generator, and
//! (through `rung-asm`) the second-stage assembler. No I/O happens during
//! compilation; callers supply source strings and persist the results.
//!
//! ```rust
//! use rungc::{compile_to_binary, CompilerOptions};
//!
//! let source = "PROGRAM P VAR a : INT := 3; b : INT; END_VAR b := a + 4; END_PROGRAM";
//! let program = compile_to_binary(source, &CompilerOptions::default()).unwrap();
//! assert_eq!(program.entry_point, 0);
//! assert!(program.code_size > 0);
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod project;
pub mod stdlib;
pub mod symbols;
pub mod types;

pub use config::CompilerOptions;
pub use error::{CodegenError, CompileError, LexError, ParseError, SemanticError};
pub use project::{
    compile_project, compile_project_with_options, CompiledProject, ProgramDetail, ProgramSource,
    ProjectError, ProjectManifest, TaskDecl, Trigger,
};
pub use symbols::SymbolTable;

use codegen::{collect_string_pool, CodeGen};
use rung_isa::{Artifact, TaskRecord, TaskType, DEFAULT_STACK_SIZE};

/// Result of [`compile_to_binary`] for a single program.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub assembly: String,
    pub bytecode: Vec<u8>,
    /// Serialized artifact (`CODE` + a one-task `TASK` table).
    pub artifact: Vec<u8>,
    pub entry_point: u32,
    pub code_size: u32,
    /// `(pc, source line)` pairs, when requested via the options.
    pub debug_map: Option<Vec<(u32, u32)>>,
}

/// Compile one source string to textual VM assembly.
pub fn compile_to_assembly(
    source: &str,
    options: &CompilerOptions,
) -> Result<String, CompileError> {
    let unit = parser::parse(source)?;
    let program = unit.programs.first().ok_or_else(|| {
        SemanticError::new(1, 1, "source contains no PROGRAM declaration")
    })?;
    let mut table = SymbolTable::build(&unit, options)?;
    let pool = collect_string_pool(&unit, &mut table)?;
    let generator = CodeGen::new(&table, options, &pool);
    generator.emit_unit(&unit, program)
}

/// Compile one source string all the way to bytecode and a one-task
/// artifact (the single-file convenience form of a project: one cyclic
/// task with default parameters).
pub fn compile_to_binary(
    source: &str,
    options: &CompilerOptions,
) -> Result<CompiledProgram, CompileError> {
    // The debug map is built from source annotations, so imply them.
    let mut options = options.clone();
    if options.generate_debug_map {
        options.emit_source_annotations = true;
    }

    let assembly = compile_to_assembly(source, &options)?;
    let assembled = rung_asm::assemble(&assembly)?;
    let code_size = assembled.code.len() as u32;

    let task = TaskRecord {
        id: 0,
        task_type: TaskType::Cyclic,
        priority: 0,
        interval_us: project::DEFAULT_CYCLE_INTERVAL_MS * 1000,
        entry_point: 0,
        stack_size: DEFAULT_STACK_SIZE,
    };
    let artifact = Artifact::new(assembled.code.clone(), std::slice::from_ref(&task)).to_bytes();

    Ok(CompiledProgram {
        assembly,
        bytecode: assembled.code,
        artifact,
        entry_point: 0,
        code_size,
        debug_map: options.generate_debug_map.then_some(assembled.debug_map),
    })
}

/// `Ok` exactly when [`compile_to_binary`] succeeds on the same source.
pub fn validate(source: &str) -> Result<(), String> {
    compile_to_binary(source, &CompilerOptions::default())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_minimal_program() {
        let source = "PROGRAM P VAR a : INT := 3; b : INT; END_VAR b := a + 4; END_PROGRAM";
        let program = compile_to_binary(source, &CompilerOptions::default()).unwrap();
        assert_eq!(program.entry_point, 0);
        assert!(program.code_size > 0);
        assert!(program.assembly.contains("_start"));
        assert!(program.assembly.trim_end().ends_with("HALT"));
    }

    #[test]
    fn test_validate_matches_compile() {
        let good = "PROGRAM P VAR a : INT; END_VAR a := 1; END_PROGRAM";
        let bad = "PROGRAM P VAR a : INT; END_VAR a := nope; END_PROGRAM";
        assert!(validate(good).is_ok());
        assert_eq!(
            validate(good).is_ok(),
            compile_to_binary(good, &CompilerOptions::default()).is_ok()
        );
        assert_eq!(
            validate(bad).is_ok(),
            compile_to_binary(bad, &CompilerOptions::default()).is_ok()
        );
        assert!(validate(bad).unwrap_err().contains("unknown identifier"));
    }

    #[test]
    fn test_no_program_is_rejected() {
        let err = compile_to_assembly(
            "FUNCTION F : INT F := 1; END_FUNCTION",
            &CompilerOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no PROGRAM"));
    }

    #[test]
    fn test_debug_map_is_optional() {
        let source = "PROGRAM P VAR a : INT; END_VAR a := 1; END_PROGRAM";
        let plain = compile_to_binary(source, &CompilerOptions::default()).unwrap();
        assert!(plain.debug_map.is_none());
        let mapped =
            compile_to_binary(source, &CompilerOptions::default().with_debug_map()).unwrap();
        let map = mapped.debug_map.unwrap();
        assert!(!map.is_empty());
    }
}
