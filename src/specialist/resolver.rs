//! Specialist template loading.
//!
//! Loading a template does three things before handing back a usable
//! [`SpecialistTemplate`]:
//!
//! 1. **Enriched substitution**: if an `enriched/` directory sits next to
//!    the template, the highest-numbered `{stem}.enriched.{NNN}.{ext}`
//!    variant replaces the original file. Enrichment runs offline and
//!    writes numbered snapshots; the newest one wins.
//! 2. **Inheritance**: a template naming a parent via `extends` is overlaid
//!    onto that parent (recursively, with cycle detection). Parents are
//!    sibling files in the same directory.
//! 3. **Validation**: the flattened result must carry a name and prompts.
//!
//! Loading is a pure function of the filesystem: two loads of the same
//! path without intervening changes yield structurally equal templates.

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::TemplateError;
use crate::specialist::template::SpecialistTemplate;

/// Loads, flattens, and validates the template at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<SpecialistTemplate, TemplateError> {
    let mut chain: Vec<String> = Vec::new();
    let template = load_with_chain(path.as_ref(), &mut chain)?;
    template.validate()?;
    Ok(template)
}

/// Finds `<name>.yaml` (or `.yml`) under `dir`.
pub fn find_template(dir: impl AsRef<Path>, name: &str) -> Result<PathBuf, TemplateError> {
    let dir = dir.as_ref();
    for extension in ["yaml", "yml"] {
        let candidate = dir.join(format!("{}.{}", name, extension));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(TemplateError::NotFound(
        dir.join(format!("{}.yaml", name)).display().to_string(),
    ))
}

fn load_with_chain(
    path: &Path,
    chain: &mut Vec<String>,
) -> Result<SpecialistTemplate, TemplateError> {
    let resolved = resolve_enriched(path);
    if !resolved.is_file() {
        return Err(TemplateError::NotFound(resolved.display().to_string()));
    }

    let content = fs::read_to_string(&resolved)?;
    let template: SpecialistTemplate =
        serde_yaml::from_str(&content).map_err(|e| TemplateError::ParseError {
            path: resolved.display().to_string(),
            message: e.to_string(),
        })?;

    if chain.contains(&template.name) {
        return Err(TemplateError::CircularInheritance {
            template: template.name.clone(),
            chain: chain.join(" -> "),
        });
    }

    let Some(parent_name) = template.extends.clone() else {
        return Ok(template);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let parent_path = find_template(dir, &parent_name).map_err(|_| {
        TemplateError::ParentNotFound {
            child: template.name.clone(),
            parent: parent_name.clone(),
            path: dir.join(format!("{}.yaml", parent_name)).display().to_string(),
        }
    })?;

    chain.push(template.name.clone());
    let parent = load_with_chain(&parent_path, chain)?;
    chain.pop();

    Ok(template.merged_over(&parent))
}

/// Picks the highest-numbered enriched variant of `path`, if one exists
/// under a sibling `enriched/` directory. Variants are named
/// `{stem}.enriched.{3-digit-number}.{ext}`.
fn resolve_enriched(path: &Path) -> PathBuf {
    let Some(dir) = path.parent() else {
        return path.to_path_buf();
    };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return path.to_path_buf();
    };
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("yaml");

    let enriched_dir = dir.join("enriched");
    if !enriched_dir.is_dir() {
        return path.to_path_buf();
    }

    let Ok(pattern) = Regex::new(&format!(
        r"^{}\.enriched\.(\d{{3}})\.{}$",
        regex::escape(stem),
        regex::escape(extension)
    )) else {
        return path.to_path_buf();
    };

    let mut best: Option<(u32, PathBuf)> = None;
    let Ok(entries) = fs::read_dir(&enriched_dir) else {
        return path.to_path_buf();
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(captures) = pattern.captures(name) {
            let number: u32 = captures[1].parse().unwrap_or(0);
            let is_better = best.as_ref().map(|(b, _)| number > *b).unwrap_or(true);
            if is_better {
                best = Some((number, entry.path()));
            }
        }
    }

    match best {
        Some((number, enriched)) => {
            debug!(
                template = %path.display(),
                variant = number,
                "using enriched template variant"
            );
            enriched
        }
        None => {
            warn!(
                template = %path.display(),
                "enriched directory present but no variant matches; using original"
            );
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BASE_TEMPLATE: &str = r#"
name: base
version: "1.0.0"
prompts:
  general:
    default:
      spawner: Base spawner.
      task: Base task.
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_simple_template() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "base.yaml", BASE_TEMPLATE);

        let template = load(&path).unwrap();
        assert_eq!(template.name, "base");
        assert_eq!(
            template.get_prompt("general", None, "spawner").unwrap(),
            "Base spawner."
        );
    }

    #[test]
    fn test_missing_template_names_path() {
        let dir = tempdir().unwrap();
        let result = load(dir.path().join("ghost.yaml"));
        match result {
            Err(TemplateError::NotFound(path)) => assert!(path.contains("ghost.yaml")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_enriched_variant_highest_number_wins() {
        let dir = tempdir().unwrap();
        write(dir.path(), "react.yaml", BASE_TEMPLATE);
        let enriched_dir = dir.path().join("enriched");
        fs::create_dir_all(&enriched_dir).unwrap();
        write(
            &enriched_dir,
            "react.enriched.001.yaml",
            "name: react\nprompts:\n  general:\n    default:\n      task: v1\n",
        );
        write(
            &enriched_dir,
            "react.enriched.010.yaml",
            "name: react\nprompts:\n  general:\n    default:\n      task: v10\n",
        );
        // Wrong stem and wrong number format are both ignored.
        write(&enriched_dir, "vue.enriched.099.yaml", "name: vue\n");
        write(&enriched_dir, "react.enriched.abc.yaml", "name: react\n");

        let template = load(dir.path().join("react.yaml")).unwrap();
        assert_eq!(template.get_prompt("general", None, "task").unwrap(), "v10");
    }

    #[test]
    fn test_enriched_dir_without_match_falls_back() {
        let dir = tempdir().unwrap();
        write(dir.path(), "base.yaml", BASE_TEMPLATE);
        fs::create_dir_all(dir.path().join("enriched")).unwrap();

        let template = load(dir.path().join("base.yaml")).unwrap();
        assert_eq!(template.name, "base");
        assert_eq!(
            template.get_prompt("general", None, "task").unwrap(),
            "Base task."
        );
    }

    #[test]
    fn test_inheritance_overlays_parent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "base.yaml", BASE_TEMPLATE);
        write(
            dir.path(),
            "derived.yaml",
            r#"
name: derived
extends: base
prompts:
  general:
    default:
      task: Derived task.
"#,
        );

        let template = load(dir.path().join("derived.yaml")).unwrap();
        assert_eq!(template.name, "derived");
        assert_eq!(template.version.as_deref(), Some("1.0.0"));
        assert_eq!(
            template.get_prompt("general", None, "spawner").unwrap(),
            "Base spawner."
        );
        assert_eq!(
            template.get_prompt("general", None, "task").unwrap(),
            "Derived task."
        );
    }

    #[test]
    fn test_circular_inheritance_detected() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "a.yaml",
            "name: a\nextends: b\nprompts:\n  general:\n    default:\n      task: A\n",
        );
        write(
            dir.path(),
            "b.yaml",
            "name: b\nextends: a\nprompts:\n  general:\n    default:\n      task: B\n",
        );

        let result = load(dir.path().join("a.yaml"));
        match result {
            Err(TemplateError::CircularInheritance { chain, .. }) => {
                assert!(chain.contains('a'));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parent_not_found_carries_names() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "orphan.yaml",
            "name: orphan\nextends: nowhere\nprompts:\n  general:\n    default:\n      task: T\n",
        );

        let result = load(dir.path().join("orphan.yaml"));
        match result {
            Err(TemplateError::ParentNotFound { child, parent, .. }) => {
                assert_eq!(child, "orphan");
                assert_eq!(parent, "nowhere");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "base.yaml", BASE_TEMPLATE);
        write(
            dir.path(),
            "derived.yaml",
            "name: derived\nextends: base\nprompts:\n  general:\n    default:\n      task: D\n",
        );

        let path = dir.path().join("derived.yaml");
        let first = load(&path).unwrap();
        let second = load(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_template_rejected_after_flattening() {
        let dir = tempdir().unwrap();
        write(dir.path(), "empty.yaml", "name: empty\n");

        let result = load(dir.path().join("empty.yaml"));
        assert!(matches!(result, Err(TemplateError::Validation { .. })));
    }

    #[test]
    fn test_find_template_prefers_yaml() {
        let dir = tempdir().unwrap();
        write(dir.path(), "present.yml", BASE_TEMPLATE);

        let found = find_template(dir.path(), "present").unwrap();
        assert!(found.ends_with("present.yml"));

        assert!(matches!(
            find_template(dir.path(), "absent"),
            Err(TemplateError::NotFound(_))
        ));
    }
}
