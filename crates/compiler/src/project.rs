//! Multi-program project assembly.
//!
//! A project declares tasks (cyclic / event / freewheeling) and the
//! programs they run. Only task-referenced programs are compiled; each one
//! gets a distinct work-memory base so instance memory never aliases, the
//! per-program bytecode buffers are concatenated with a relocation pass,
//! and the final artifact carries `CODE` plus the `TASK` table.

use crate::config::CompilerOptions;
use crate::error::CompileError;
use crate::{compile_to_binary, CompiledProgram};
use rung_isa::{Artifact, TaskRecord, TaskType, DEFAULT_STACK_SIZE, WORK_REGION_SIZE};
use serde::Deserialize;

/// Cycle interval used when a cyclic task does not name one.
pub const DEFAULT_CYCLE_INTERVAL_MS: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub tasks: Vec<TaskDecl>,
    /// Optional program-name-to-file mapping used by the CLI; the library
    /// API takes sources directly.
    #[serde(default)]
    pub programs: Vec<ProgramRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDecl {
    pub name: String,
    pub trigger: Trigger,
    pub interval_ms: Option<u32>,
    pub priority: Option<u8>,
    pub programs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Cyclic,
    Event,
    Freewheeling,
}

impl Trigger {
    fn task_type(self) -> TaskType {
        match self {
            Trigger::Cyclic => TaskType::Cyclic,
            Trigger::Event => TaskType::Event,
            Trigger::Freewheeling => TaskType::Freewheeling,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramRef {
    pub name: String,
    pub file: String,
}

/// One program's source text.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub name: String,
    pub source: String,
}

/// Project-level failure: either the manifest itself is unusable, or one
/// program failed to compile (tagged with its name).
#[derive(Debug)]
pub enum ProjectError {
    Manifest(String),
    Program { name: String, error: CompileError },
}

impl std::fmt::Display for ProjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectError::Manifest(message) => write!(f, "project: {}", message),
            ProjectError::Program { name, error } => {
                write!(f, "program '{}': {}", name, error)
            }
        }
    }
}

impl std::error::Error for ProjectError {}

#[derive(Debug, Clone)]
pub struct ProgramDetail {
    pub name: String,
    pub work_base: u32,
    pub code_offset: u32,
    pub code_size: u32,
    /// Relocated entry point within the concatenated `CODE` segment.
    pub entry_point: u32,
}

#[derive(Debug)]
pub struct CompiledProject {
    pub artifact: Vec<u8>,
    pub bytecode: Vec<u8>,
    pub tasks: Vec<TaskRecord>,
    pub code_size: u32,
    pub programs: Vec<ProgramDetail>,
}

/// Compile a project with default base options.
pub fn compile_project(
    manifest: &ProjectManifest,
    sources: &[ProgramSource],
) -> Result<CompiledProject, ProjectError> {
    compile_project_with_options(manifest, sources, &CompilerOptions::default())
}

pub fn compile_project_with_options(
    manifest: &ProjectManifest,
    sources: &[ProgramSource],
    base_options: &CompilerOptions,
) -> Result<CompiledProject, ProjectError> {
    if manifest.tasks.is_empty() {
        return Err(ProjectError::Manifest(format!(
            "project '{}' declares no tasks",
            manifest.name
        )));
    }

    // Programs referenced by any task, in first-reference order.
    // Unreferenced programs are not compiled.
    let mut referenced: Vec<&str> = Vec::new();
    for task in &manifest.tasks {
        if task.programs.is_empty() {
            return Err(ProjectError::Manifest(format!(
                "task '{}' binds no program",
                task.name
            )));
        }
        for name in &task.programs {
            if !referenced.contains(&name.as_str()) {
                referenced.push(name);
            }
        }
    }

    // Compile each referenced program against its own work-memory slice.
    let mut details: Vec<ProgramDetail> = Vec::new();
    let mut compiled: Vec<CompiledProgram> = Vec::new();
    for (index, name) in referenced.iter().enumerate() {
        let source = sources
            .iter()
            .find(|s| s.name == *name)
            .ok_or_else(|| ProjectError::Manifest(format!("no source for program '{}'", name)))?;
        let work_base = base_options.work_memory_base + index as u32 * WORK_REGION_SIZE;
        let mut options = base_options.clone();
        options.work_memory_base = work_base;
        options.init_flag_address = None;
        let program = compile_to_binary(&source.source, &options).map_err(|error| {
            ProjectError::Program {
                name: (*name).to_string(),
                error,
            }
        })?;
        details.push(ProgramDetail {
            name: (*name).to_string(),
            work_base,
            code_offset: 0, // patched during concatenation
            code_size: program.code_size,
            entry_point: 0,
        });
        compiled.push(program);
    }

    // Concatenate, relocating every buffer after the first by its offset.
    let mut code: Vec<u8> = Vec::new();
    for (detail, program) in details.iter_mut().zip(&compiled) {
        let offset = code.len() as u32;
        let mut buffer = program.bytecode.clone();
        if offset > 0 {
            rung_asm::relocate(&mut buffer, offset).map_err(|error| ProjectError::Program {
                name: detail.name.clone(),
                error: CompileError::Asm(error),
            })?;
        }
        detail.code_offset = offset;
        detail.entry_point = offset + program.entry_point;
        code.extend_from_slice(&buffer);
    }
    let code_size = code.len() as u32;

    // Task table: each task's entry is its first program's relocated entry.
    let mut tasks = Vec::new();
    for (id, task) in manifest.tasks.iter().enumerate() {
        let entry_name = &task.programs[0];
        let entry_point = details
            .iter()
            .find(|d| &d.name == entry_name)
            .map(|d| d.entry_point)
            .unwrap_or(0);
        let interval_us = match task.trigger {
            Trigger::Cyclic => {
                task.interval_ms.unwrap_or(DEFAULT_CYCLE_INTERVAL_MS) * 1000
            }
            _ => 0,
        };
        tasks.push(TaskRecord {
            id: id as u16,
            task_type: task.trigger.task_type(),
            priority: task.priority.unwrap_or(0),
            interval_us,
            entry_point,
            stack_size: DEFAULT_STACK_SIZE,
        });
    }

    let artifact = Artifact::new(code.clone(), &tasks).to_bytes();
    Ok(CompiledProject {
        artifact,
        bytecode: code,
        tasks,
        code_size,
        programs: details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(tasks: Vec<TaskDecl>) -> ProjectManifest {
        ProjectManifest {
            name: "plant".to_string(),
            version: "1.0".to_string(),
            tasks,
            programs: Vec::new(),
        }
    }

    fn cyclic(name: &str, interval_ms: u32, program: &str) -> TaskDecl {
        TaskDecl {
            name: name.to_string(),
            trigger: Trigger::Cyclic,
            interval_ms: Some(interval_ms),
            priority: Some(1),
            programs: vec![program.to_string()],
        }
    }

    fn sources() -> Vec<ProgramSource> {
        vec![
            ProgramSource {
                name: "P1".to_string(),
                source: "PROGRAM P1 VAR a : INT; END_VAR a := a + 1; END_PROGRAM".to_string(),
            },
            ProgramSource {
                name: "P2".to_string(),
                source: "PROGRAM P2 VAR b : DINT; END_VAR b := b * 2; END_PROGRAM".to_string(),
            },
        ]
    }

    #[test]
    fn test_two_program_project() {
        let manifest = manifest(vec![cyclic("T1", 10, "P1"), cyclic("T2", 100, "P2")]);
        let project = compile_project(&manifest, &sources()).unwrap();

        assert_eq!(project.tasks.len(), 2);
        assert_eq!(project.tasks[0].interval_us, 10_000);
        assert_eq!(project.tasks[1].interval_us, 100_000);

        // first task's program is the start of CODE
        assert_eq!(project.tasks[0].entry_point, 0);
        assert_eq!(
            project.tasks[1].entry_point,
            project.programs[0].code_size
        );
        for task in &project.tasks {
            assert!(task.entry_point < project.code_size);
        }

        // disjoint work regions
        assert_eq!(project.programs[0].work_base, 0x2000);
        assert_eq!(project.programs[1].work_base, 0x2000 + WORK_REGION_SIZE);

        // artifact parses back into CODE + TASK
        let artifact = Artifact::from_bytes(&project.artifact).unwrap();
        assert_eq!(
            artifact.segment(b"CODE").unwrap().payload.len() as u32,
            project.code_size
        );
        assert_eq!(artifact.tasks().unwrap().len(), 2);
    }

    #[test]
    fn test_unreferenced_program_is_not_compiled() {
        let manifest = manifest(vec![cyclic("T1", 10, "P1")]);
        let project = compile_project(&manifest, &sources()).unwrap();
        assert_eq!(project.programs.len(), 1);
        assert_eq!(project.programs[0].name, "P1");
    }

    #[test]
    fn test_program_error_is_tagged() {
        let manifest = manifest(vec![cyclic("T1", 10, "P1")]);
        let bad = vec![ProgramSource {
            name: "P1".to_string(),
            source: "PROGRAM P1 VAR a : INT; END_VAR a := nope; END_PROGRAM".to_string(),
        }];
        let err = compile_project(&manifest, &bad).unwrap_err();
        assert!(matches!(err, ProjectError::Program { ref name, .. } if name == "P1"));
        assert!(err.to_string().contains("P1"));
    }

    #[test]
    fn test_missing_source() {
        let manifest = manifest(vec![cyclic("T1", 10, "P9")]);
        let err = compile_project(&manifest, &sources()).unwrap_err();
        assert!(err.to_string().contains("no source for program 'P9'"));
    }
}
