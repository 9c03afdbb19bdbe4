//! Redaction of real configuration files shipped as fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;
use walkdir::WalkDir;

use wb_diag_collect::collectors::filters::filter_files;
use wb_diag_collect::collectors::run_log::RunLog;
use wb_diag_collect::config::DiagConfig;

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

/// Copy the fixture tree without the expected `.filtered` outputs
fn copy_fixtures(dest: &Path) -> Result<()> {
    let source = fixture_dir();
    for entry in WalkDir::new(&source) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&source)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.path().extension().map_or(true, |ext| ext != "filtered") {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn assert_matches_fixture(workspace: &Path, relative: &str) -> Result<()> {
    let filtered = fs::read_to_string(workspace.join(relative))?;
    let expected = fs::read_to_string(fixture_dir().join(format!("{}.filtered", relative)))?;
    assert_eq!(filtered, expected, "{} differs from its fixture", relative);
    Ok(())
}

#[test]
fn test_fixture_files_are_redacted() -> Result<()> {
    let workspace = TempDir::new()?;
    copy_fixtures(workspace.path())?;

    let config = DiagConfig::from_yaml_file(&fixture_dir().join("wb-diag-collect.conf"))?;
    let options = config.to_options(None)?;

    let run_log = RunLog::new();
    let rewritten = filter_files(workspace.path(), &options.filters, &run_log);

    assert_eq!(rewritten, 2);
    assert_matches_fixture(workspace.path(), "etc/mosquitto/conf.d/20bridge.conf")?;
    assert_matches_fixture(workspace.path(), "etc/wb-mqtt-serial.conf")?;
    Ok(())
}

#[test]
fn test_redacted_files_stay_unchanged_on_second_pass() -> Result<()> {
    let workspace = TempDir::new()?;
    copy_fixtures(workspace.path())?;

    let options = DiagConfig::from_yaml_file(&fixture_dir().join("wb-diag-collect.conf"))?
        .to_options(None)?;
    filter_files(workspace.path(), &options.filters, &RunLog::new());
    filter_files(workspace.path(), &options.filters, &RunLog::new());

    assert_matches_fixture(workspace.path(), "etc/mosquitto/conf.d/20bridge.conf")?;
    assert_matches_fixture(workspace.path(), "etc/wb-mqtt-serial.conf")?;
    Ok(())
}

#[test]
fn test_python_replacement_syntax_from_config() -> Result<()> {
    let workspace = TempDir::new()?;
    fs::create_dir_all(workspace.path().join("etc"))?;
    let file = workspace.path().join("etc/app.conf");
    fs::write(&file, "user=admin pass=hunter2\npassword secret\n")?;

    let config = DiagConfig::from_yaml_str(
        r#"
timeout: 5
filters:
  - glob: "etc/*.conf"
    pattern: '(pass)=\S+'
    repl: '\1=***'
  - glob: "etc/*.conf"
    pattern: "password .*"
    repl: "password $HIDDEN"
"#,
    )?;
    let options = config.to_options(None)?;
    filter_files(workspace.path(), &options.filters, &RunLog::new());

    assert_eq!(
        fs::read_to_string(&file)?,
        "user=admin pass=***\npassword $HIDDEN\n"
    );
    Ok(())
}
