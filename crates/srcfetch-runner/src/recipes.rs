//! Recipe corpus walking: version resolution per recipe and task enumeration.

use crate::error::{Result, SourceCheckError};
use crate::filter::RecipeFilter;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const VERSION_DESCRIPTOR: &str = "config.yml";
pub const BUILD_LOGIC_FILE: &str = "conanfile.py";
const RECIPES_DIR: &str = "recipes";

/// One independent unit of work: fetch the source of `recipe` at `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub recipe: String,
    pub version: String,
    pub build_logic: PathBuf,
}

impl Task {
    /// Reference string pinning this task in the lock descriptor.
    pub fn reference(&self, user: &str, channel: &str) -> String {
        format!("{}/{}@{}/{}", self.recipe, self.version, user, channel)
    }
}

/// Ordered task list plus the tallies gathered while walking the corpus.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPlan {
    pub tasks: Vec<Task>,
    pub recipes_visited: usize,
    pub configless_recipes: usize,
}

#[derive(Debug, Deserialize)]
struct VersionDescriptor {
    versions: DeclaredVersions,
}

/// Version entries exactly as declared, repeated keys included.
#[derive(Debug)]
struct DeclaredVersions(Vec<(String, VersionEntry)>);

impl<'de> Deserialize<'de> for DeclaredVersions {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = DeclaredVersions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of version to folder entry")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((version, entry)) = map.next_entry::<String, VersionEntry>()? {
                    entries.push((version, entry));
                }
                Ok(DeclaredVersions(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    folder: String,
}

/// Versions declared by one recipe directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeVersions {
    pub configless: bool,
    pub versions: Vec<(String, PathBuf)>,
}

/// Parse a version descriptor into `version -> build logic directory`.
pub fn read_version_descriptor(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let raw = fs::read_to_string(path).map_err(|e| SourceCheckError::io(path, e))?;
    let descriptor: VersionDescriptor =
        serde_yaml::from_str(&raw).map_err(|e| SourceCheckError::ConfigMalformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let base = path.parent().unwrap_or(Path::new("."));
    let mut entries = descriptor.versions.0;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(pair) = entries.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        let recipe = base
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Err(SourceCheckError::DuplicateTask {
            recipe,
            version: pair[0].0.clone(),
        });
    }
    let mut out = Vec::with_capacity(entries.len());
    for (version, entry) in entries {
        if version.trim().is_empty() || entry.folder.trim().is_empty() {
            return Err(SourceCheckError::ConfigMalformed {
                path: path.to_path_buf(),
                reason: format!("empty version or folder for entry '{}'", version),
            });
        }
        let folder = base.join(&entry.folder);
        if !folder.is_dir() {
            return Err(SourceCheckError::ConfigMalformed {
                path: path.to_path_buf(),
                reason: format!(
                    "version {} names missing folder {}",
                    version,
                    folder.display()
                ),
            });
        }
        out.push((version, folder));
    }
    Ok(out)
}

/// Resolve every version of the recipe rooted at `recipe_dir`.
///
/// Without a descriptor each immediate subdirectory is a version and must
/// carry the build logic file directly.
pub fn resolve_versions(recipe_dir: &Path) -> Result<RecipeVersions> {
    let descriptor = recipe_dir.join(VERSION_DESCRIPTOR);
    if descriptor.is_file() {
        return Ok(RecipeVersions {
            configless: false,
            versions: read_version_descriptor(&descriptor)?,
        });
    }

    let mut versions = Vec::new();
    for name in sorted_subdirs(recipe_dir)? {
        let version_dir = recipe_dir.join(&name);
        let build_logic = version_dir.join(BUILD_LOGIC_FILE);
        if !build_logic.is_file() {
            return Err(SourceCheckError::ConfiglessLayoutViolation(build_logic));
        }
        versions.push((name, version_dir));
    }
    Ok(RecipeVersions {
        configless: true,
        versions,
    })
}

/// Walk `<corpus>/recipes`, apply the filter and flatten into one task list.
pub fn enumerate_tasks(corpus: &Path, filter: &RecipeFilter) -> Result<TaskPlan> {
    let recipes_root = corpus.join(RECIPES_DIR);
    if !recipes_root.is_dir() {
        return Err(SourceCheckError::CorpusMissing(recipes_root));
    }
    let recipes_root = recipes_root
        .canonicalize()
        .map_err(|e| SourceCheckError::io(&recipes_root, e))?;
    info!(path = %recipes_root.display(), "parsing recipe corpus");

    let mut plan = TaskPlan::default();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for recipe in sorted_subdirs(&recipes_root)? {
        if !filter.includes(&recipe) {
            debug!(recipe = %recipe, "skipped by platform filter");
            continue;
        }
        plan.recipes_visited += 1;
        let resolved = resolve_versions(&recipes_root.join(&recipe))?;
        if resolved.configless {
            debug!(recipe = %recipe, "configless recipe");
            plan.configless_recipes += 1;
        }
        for (version, build_logic) in resolved.versions {
            if !seen.insert((recipe.clone(), version.clone())) {
                return Err(SourceCheckError::DuplicateTask { recipe, version });
            }
            plan.tasks.push(Task {
                recipe: recipe.clone(),
                version,
                build_logic,
            });
        }
    }
    info!(
        recipes = plan.recipes_visited,
        configless = plan.configless_recipes,
        tasks = plan.tasks.len(),
        "enumerated tasks"
    );
    Ok(plan)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SourceCheckError::io(dir, e))? {
        let entry = entry.map_err(|e| SourceCheckError::io(dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
