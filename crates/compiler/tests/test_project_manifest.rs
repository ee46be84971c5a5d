//! Manifest-driven project builds, the way the CLI wires them up.

use rungc::{compile_project, ProgramSource, ProjectManifest};
use std::fs;

const MANIFEST: &str = r#"
name = "plant"
version = "1.0"

[[tasks]]
name = "fast"
trigger = "cyclic"
interval_ms = 10
priority = 1
programs = ["P1"]

[[tasks]]
name = "slow"
trigger = "cyclic"
interval_ms = 100
priority = 3
programs = ["P2"]

[[programs]]
name = "P1"
file = "p1.st"

[[programs]]
name = "P2"
file = "p2.st"
"#;

const P1: &str = "PROGRAM P1 VAR counter : DINT; END_VAR counter := counter + 1; END_PROGRAM";
const P2: &str = "PROGRAM P2 VAR level : REAL; END_VAR level := level * 0.5; END_PROGRAM";

#[test]
fn test_manifest_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("plant.toml"), MANIFEST).unwrap();
    fs::write(dir.path().join("p1.st"), P1).unwrap();
    fs::write(dir.path().join("p2.st"), P2).unwrap();

    let manifest_text = fs::read_to_string(dir.path().join("plant.toml")).unwrap();
    let manifest: ProjectManifest = toml::from_str(&manifest_text).unwrap();
    assert_eq!(manifest.name, "plant");
    assert_eq!(manifest.tasks.len(), 2);
    assert_eq!(manifest.programs.len(), 2);

    let sources: Vec<ProgramSource> = manifest
        .programs
        .iter()
        .map(|p| ProgramSource {
            name: p.name.clone(),
            source: fs::read_to_string(dir.path().join(&p.file)).unwrap(),
        })
        .collect();

    let project = compile_project(&manifest, &sources).unwrap();
    assert_eq!(project.tasks[0].interval_us, 10_000);
    assert_eq!(project.tasks[1].interval_us, 100_000);
    assert_eq!(project.tasks[1].priority, 3);
    // P2 starts right after P1 in the concatenated CODE segment
    assert_eq!(
        project.programs[1].entry_point,
        project.programs[0].code_size
    );

    fs::write(dir.path().join("plant.bin"), &project.artifact).unwrap();
    let readback = fs::read(dir.path().join("plant.bin")).unwrap();
    assert_eq!(readback, project.artifact);
}
