//! Rung compiler CLI.
//!
//! Command-line interface for compiling Structured Text sources and
//! project manifests to Rung VM artifacts.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use rungc::{
    compile_project_with_options, compile_to_binary, validate, CompilerOptions, ProgramSource,
    ProjectManifest,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info};

#[derive(ClapParser)]
#[command(name = "rungc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Structured Text compiler for the Rung PLC VM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .st source file to a binary artifact
    Build {
        /// Input Structured Text source file
        input: PathBuf,

        /// Output artifact path (defaults to the input with a .bin extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the intermediate textual assembly (.asm)
        #[arg(long)]
        asm: bool,

        /// Emit `; @source` annotations into the assembly
        #[arg(long)]
        annotate: bool,

        /// Print a JSON build summary (code size, debug map)
        #[arg(long)]
        json: bool,

        /// Work-memory base address (hex accepted, e.g. 0x2000)
        #[arg(long, value_parser = parse_address)]
        work_base: Option<u32>,
    },

    /// Parse and type-check a source file without writing anything
    Check {
        /// Input Structured Text source files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Compile a multi-program project from a TOML manifest
    Project {
        /// Project manifest (TOML)
        manifest: PathBuf,

        /// Output artifact path (defaults to <project name>.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a JSON summary of tasks and per-program layout
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Serialize)]
struct BuildSummary<'a> {
    input: &'a str,
    output: &'a str,
    code_size: u32,
    entry_point: u32,
    debug_map: Option<&'a [(u32, u32)]>,
}

#[derive(Serialize)]
struct ProjectSummary<'a> {
    name: &'a str,
    code_size: u32,
    programs: Vec<ProgramSummary<'a>>,
}

#[derive(Serialize)]
struct ProgramSummary<'a> {
    name: &'a str,
    work_base: u32,
    code_offset: u32,
    code_size: u32,
    entry_point: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            output,
            asm,
            annotate,
            json,
            work_base,
        } => run_build(&input, output, asm, annotate, json, work_base),
        Commands::Check { inputs } => run_check(&inputs),
        Commands::Project {
            manifest,
            output,
            json,
        } => run_project(&manifest, output, json),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rungc", &mut io::stdout());
        }
    }
}

fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format!("'{}' is not a valid address", text))
}

fn run_build(
    input: &Path,
    output: Option<PathBuf>,
    asm: bool,
    annotate: bool,
    json: bool,
    work_base: Option<u32>,
) {
    let source = read_source(input);
    let mut options = CompilerOptions::default();
    if let Some(base) = work_base {
        options.work_memory_base = base;
    }
    options.emit_source_annotations = annotate;
    options.generate_debug_map = json;

    info!(input = %input.display(), "compiling");
    let program = match compile_to_binary(&source, &options) {
        Ok(program) => program,
        Err(error) => {
            eprintln!("{}: {}", input.display(), error);
            process::exit(1);
        }
    };
    debug!(code_size = program.code_size, "compiled");

    let output = output.unwrap_or_else(|| input.with_extension("bin"));
    write_file(&output, &program.artifact);
    if asm {
        write_file(&input.with_extension("asm"), program.assembly.as_bytes());
    }

    if json {
        let input_name = input.display().to_string();
        let output_name = output.display().to_string();
        let summary = BuildSummary {
            input: &input_name,
            output: &output_name,
            code_size: program.code_size,
            entry_point: program.entry_point,
            debug_map: program.debug_map.as_deref(),
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(error) => eprintln!("failed to serialize summary: {}", error),
        }
    } else {
        println!(
            "{} -> {} ({} bytes of code)",
            input.display(),
            output.display(),
            program.code_size
        );
    }
}

fn run_check(inputs: &[PathBuf]) {
    let mut failed = false;
    for input in inputs {
        let source = read_source(input);
        match validate(&source) {
            Ok(()) => println!("{}: ok", input.display()),
            Err(message) => {
                println!("{}: {}", input.display(), message);
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}

fn run_project(manifest_path: &Path, output: Option<PathBuf>, json: bool) {
    let manifest_text = read_source(manifest_path);
    let manifest: ProjectManifest = match toml::from_str(&manifest_text) {
        Ok(manifest) => manifest,
        Err(error) => {
            eprintln!("{}: {}", manifest_path.display(), error);
            process::exit(1);
        }
    };

    // Program sources come from the manifest's file mapping, or from
    // `<name>.st` next to the manifest.
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));
    let mut sources = Vec::new();
    let mut referenced: Vec<&str> = Vec::new();
    for task in &manifest.tasks {
        for name in &task.programs {
            if !referenced.contains(&name.as_str()) {
                referenced.push(name);
            }
        }
    }
    for name in referenced {
        let file = manifest
            .programs
            .iter()
            .find(|p| p.name == name)
            .map(|p| base_dir.join(&p.file))
            .unwrap_or_else(|| base_dir.join(format!("{}.st", name)));
        let source = read_source(&file);
        sources.push(ProgramSource {
            name: name.to_string(),
            source,
        });
    }

    info!(project = %manifest.name, programs = sources.len(), "compiling project");
    let project =
        match compile_project_with_options(&manifest, &sources, &CompilerOptions::default()) {
            Ok(project) => project,
            Err(error) => {
                eprintln!("{}", error);
                process::exit(1);
            }
        };

    let output = output.unwrap_or_else(|| base_dir.join(format!("{}.bin", manifest.name)));
    write_file(&output, &project.artifact);

    if json {
        let summary = ProjectSummary {
            name: &manifest.name,
            code_size: project.code_size,
            programs: project
                .programs
                .iter()
                .map(|p| ProgramSummary {
                    name: &p.name,
                    work_base: p.work_base,
                    code_offset: p.code_offset,
                    code_size: p.code_size,
                    entry_point: p.entry_point,
                })
                .collect(),
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(error) => eprintln!("failed to serialize summary: {}", error),
        }
    } else {
        println!(
            "{} -> {} ({} tasks, {} bytes of code)",
            manifest.name,
            output.display(),
            project.tasks.len(),
            project.code_size
        );
        for program in &project.programs {
            println!(
                "  {} @ 0x{:04X} (entry 0x{:04X}, {} bytes)",
                program.name, program.work_base, program.entry_point, program.code_size
            );
        }
    }
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("failed to read {}: {}", path.display(), error);
            process::exit(1);
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Err(error) = std::fs::write(path, bytes) {
        eprintln!("failed to write {}: {}", path.display(), error);
        process::exit(1);
    }
}
