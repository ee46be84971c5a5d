//! Compiler options.
//!
//! Options cover the knobs a project build needs to vary per program:
//! where work memory starts, where the one-time init guard lives, and
//! whether source annotations / debug maps are produced.

use rung_isa::{WORK_BASE, WORK_REGION_SIZE};

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Base address of the work-memory region (program variables, FB
    /// instances, string pool).
    pub work_memory_base: u32,
    /// Address of the one-byte init guard; defaults to the last byte of
    /// the work region.
    pub init_flag_address: Option<u32>,
    /// Emit `; @source <line>` annotations ahead of statements.
    pub emit_source_annotations: bool,
    /// Have the assembler build a PC-to-line debug map (implies source
    /// annotations).
    pub generate_debug_map: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            work_memory_base: WORK_BASE,
            init_flag_address: None,
            emit_source_annotations: false,
            generate_debug_map: false,
        }
    }
}

impl CompilerOptions {
    pub fn with_work_base(mut self, base: u32) -> Self {
        self.work_memory_base = base;
        self
    }

    pub fn with_source_annotations(mut self) -> Self {
        self.emit_source_annotations = true;
        self
    }

    pub fn with_debug_map(mut self) -> Self {
        self.generate_debug_map = true;
        self.emit_source_annotations = true;
        self
    }

    /// Resolved init-guard address.
    pub fn init_flag(&self) -> u32 {
        self.init_flag_address
            .unwrap_or(self.work_memory_base + WORK_REGION_SIZE - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_init_flag_is_work_top() {
        let options = CompilerOptions::default();
        assert_eq!(options.init_flag(), 0x3FFF);
        let options = CompilerOptions::default().with_work_base(0x4000);
        assert_eq!(options.init_flag(), 0x5FFF);
    }
}
