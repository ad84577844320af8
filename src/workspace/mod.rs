//! Workspace preparation for benchmark runs.
//!
//! A scenario may ship a fixture repository (an existing codebase the agent
//! works inside). Before the agent stage, the fixture is copied into a
//! fresh uniquely-named temporary directory so concurrent runs never share
//! state and the pristine fixture is never mutated.
//!
//! Scenarios without a fixture (artifact-based or pure-question scenarios)
//! get no workspace at all; that is signaled with `Ok(None)`, not an error.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::WorkspaceError;
use crate::scenario::Scenario;

/// Copies the scenario's fixture into a fresh temporary directory.
///
/// Returns `Ok(None)` when the scenario has no fixture directory. The
/// returned path is NOT deleted on drop; it is kept for post-run
/// inspection and recorded in run telemetry.
pub fn prepare_workspace(
    scenario: &Scenario,
    run_id: &str,
) -> Result<Option<PathBuf>, WorkspaceError> {
    let Some(fixture) = scenario.fixture_dir() else {
        debug!(
            suite = %scenario.suite,
            scenario = %scenario.name,
            "no fixture directory; skipping workspace preparation"
        );
        return Ok(None);
    };

    let workspace = tempfile::Builder::new()
        .prefix(&format!("benchforge-{}-", run_id))
        .tempdir()
        .map_err(|e| WorkspaceError::CreateFailed(e.to_string()))?
        .keep();

    let copied = copy_fixture(&fixture, &workspace).map_err(|e| WorkspaceError::CopyFailed {
        from: fixture.display().to_string(),
        reason: e.to_string(),
    })?;

    info!(
        suite = %scenario.suite,
        scenario = %scenario.name,
        workspace = %workspace.display(),
        files = copied,
        "prepared workspace from fixture"
    );
    Ok(Some(workspace))
}

/// Recursively copies `from` into `to`, skipping `README.md` files.
/// Scenario READMEs document the fixture for benchmark authors and must
/// not leak hints into the agent's working tree.
fn copy_fixture(from: &Path, to: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if entry.file_name().to_str() == Some("README.md") {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scenario_with_fixture(root: &Path, fixture_name: &str) -> Scenario {
        let dir = root.join("suite").join("scn");
        fs::create_dir_all(dir.join(fixture_name).join("src")).unwrap();
        fs::write(dir.join(fixture_name).join("package.json"), "{}").unwrap();
        fs::write(dir.join(fixture_name).join("src/index.js"), "// entry").unwrap();
        fs::write(dir.join(fixture_name).join("README.md"), "fixture docs").unwrap();
        Scenario::load(root, "suite", "scn").unwrap()
    }

    #[test]
    fn test_prepare_copies_fixture_without_readme() {
        let root = tempdir().unwrap();
        let scenario = scenario_with_fixture(root.path(), "repo");

        let workspace = prepare_workspace(&scenario, "run-1").unwrap().unwrap();
        assert!(workspace.join("package.json").is_file());
        assert!(workspace.join("src/index.js").is_file());
        assert!(!workspace.join("README.md").exists());

        let name = workspace.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("benchforge-run-1-"));

        fs::remove_dir_all(&workspace).unwrap();
    }

    #[test]
    fn test_prepare_accepts_repo_fixture_fallback() {
        let root = tempdir().unwrap();
        let scenario = scenario_with_fixture(root.path(), "repo-fixture");

        let workspace = prepare_workspace(&scenario, "run-2").unwrap().unwrap();
        assert!(workspace.join("package.json").is_file());
        fs::remove_dir_all(&workspace).unwrap();
    }

    #[test]
    fn test_prepare_without_fixture_returns_none() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("suite/empty")).unwrap();
        let scenario = Scenario::load(root.path(), "suite", "empty").unwrap();

        assert!(prepare_workspace(&scenario, "run-3").unwrap().is_none());
    }

    #[test]
    fn test_nested_readme_also_excluded() {
        let root = tempdir().unwrap();
        let dir = root.path().join("suite/scn/repo/docs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README.md"), "nested").unwrap();
        fs::write(dir.join("guide.md"), "keep").unwrap();
        let scenario = Scenario::load(root.path(), "suite", "scn").unwrap();

        let workspace = prepare_workspace(&scenario, "run-4").unwrap().unwrap();
        assert!(workspace.join("docs/guide.md").is_file());
        assert!(!workspace.join("docs/README.md").exists());
        fs::remove_dir_all(&workspace).unwrap();
    }
}
