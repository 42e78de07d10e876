// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Walks the source tree for test and setup files and parses their
//! annotations. Only file names matching the test/setup patterns are read;
//! hidden paths are skipped and nested subprojects (a project manifest other
//! than the root's `test/Project.toml`) are not descended into.

use crate::annotations;
use crate::error::DiscoveryError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use testpool_common::model::{TestItem, TestItemId, TestSetup};
use tracing::debug;
use walkdir::WalkDir;

const PROJECT_MANIFEST: &str = "Project.toml";

const TEST_SUFFIXES: &[&str] = &["_test", "_tests", "-test", "-tests"];
const SETUP_SUFFIXES: &[&str] = &["_testsetup", "_testsetups", "-testsetup", "-testsetups"];

#[derive(Debug)]
pub struct Discovered {
    pub items: Vec<TestItem>,
    pub setups: HashMap<String, TestSetup>,
    /// Relative paths of every file that was read, in walk order.
    pub files: Vec<PathBuf>,
}

pub fn is_test_file(path: &Path, extension: &str) -> bool {
    stem_matches(path, extension, TEST_SUFFIXES)
}

pub fn is_setup_file(path: &Path, extension: &str) -> bool {
    stem_matches(path, extension, SETUP_SUFFIXES)
}

fn stem_matches(path: &Path, extension: &str, suffixes: &[&str]) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
        return false;
    }
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => suffixes.iter().any(|suffix| stem.ends_with(suffix)),
        None => false,
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

/// A directory is a subproject boundary when it carries its own project
/// manifest, unless it is the project's `test` directory (whose manifest
/// describes the test environment, not a nested project).
fn is_subproject(dir: &Path, walk_root: &Path) -> bool {
    if dir == walk_root || !dir.join(PROJECT_MANIFEST).is_file() {
        return false;
    }
    dir.file_name().and_then(|n| n.to_str()) != Some("test")
}

/// Discovers items and setups under `paths` (files or directories),
/// resolving setup references and rejecting duplicate identifiers.
pub fn discover(
    paths: &[PathBuf],
    project_root: &Path,
    extension: &str,
    strict: bool,
) -> Result<Discovered, DiscoveryError> {
    let mut discovered = Discovered {
        items: Vec::new(),
        setups: HashMap::new(),
        files: Vec::new(),
    };
    let mut item_files: HashMap<TestItemId, PathBuf> = HashMap::new();

    for path in paths {
        if !path.exists() {
            return Err(DiscoveryError::MissingPath(path.clone()));
        }
        if path.is_file() {
            if !is_test_file(path, extension) && !is_setup_file(path, extension) {
                return Err(DiscoveryError::NotATestFile(path.clone()));
            }
            read_file(path, project_root, strict, &mut discovered, &mut item_files)?;
            continue;
        }
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if is_hidden(entry.file_name()) {
                    return false;
                }
                !(entry.file_type().is_dir() && is_subproject(entry.path(), path))
            })
        {
            let entry = entry.map_err(|err| DiscoveryError::Io {
                path: path.clone(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = entry.path();
            if is_test_file(file, extension) || is_setup_file(file, extension) {
                read_file(file, project_root, strict, &mut discovered, &mut item_files)?;
            }
        }
    }

    for item in &discovered.items {
        for setup in &item.setups {
            if !discovered.setups.contains_key(setup) {
                return Err(DiscoveryError::UnknownSetup {
                    item: item.name.clone(),
                    setup: setup.clone(),
                });
            }
        }
    }

    debug!(
        items = discovered.items.len(),
        setups = discovered.setups.len(),
        files = discovered.files.len(),
        "discovery finished"
    );
    Ok(discovered)
}

fn read_file(
    file: &Path,
    project_root: &Path,
    strict: bool,
    discovered: &mut Discovered,
    item_files: &mut HashMap<TestItemId, PathBuf>,
) -> Result<(), DiscoveryError> {
    let relative = file.strip_prefix(project_root).unwrap_or(file).to_path_buf();
    let content = std::fs::read_to_string(file).map_err(|source| DiscoveryError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let parsed = annotations::parse_file(&relative, project_root, &content, strict)?;

    for item in parsed.items {
        if let Some(first) = item_files.get(&item.id) {
            return Err(DiscoveryError::DuplicateId {
                id: item.id.clone(),
                first: first.clone(),
                second: relative.clone(),
            });
        }
        item_files.insert(item.id.clone(), relative.clone());
        discovered.items.push(item);
    }
    for setup in parsed.setups {
        if let Some(existing) = discovered.setups.get(&setup.name) {
            return Err(DiscoveryError::DuplicateSetup {
                name: setup.name,
                first: existing.file.clone(),
                second: relative.clone(),
            });
        }
        discovered.setups.insert(setup.name.clone(), setup);
    }
    discovered.files.push(relative);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const ITEM: &str = "@testitem \"one\"\npass\n@end\n";

    #[test]
    fn only_matching_files_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "alpha_test.script", ITEM);
        write(root, "beta-tests.script", "@testitem \"two\"\npass\n@end\n");
        write(root, "helpers.script", "@frobnicate\n");
        write(root, "gamma_test.txt", "@frobnicate\n");

        let discovered =
            discover(&[root.to_path_buf()], root, "script", true).expect("discovery failed");
        assert_eq!(discovered.items.len(), 2);
        assert_eq!(discovered.files.len(), 2);
    }

    #[test]
    fn hidden_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "kept_test.script", ITEM);
        write(root, ".hidden/secret_test.script", "@testitem \"hidden\"\npass\n@end\n");
        write(root, ".stray_test.script", "@testitem \"stray\"\npass\n@end\n");

        let discovered =
            discover(&[root.to_path_buf()], root, "script", true).expect("discovery failed");
        assert_eq!(discovered.items.len(), 1);
        assert_eq!(discovered.items[0].name, "one");
    }

    #[test]
    fn subprojects_are_not_descended_but_test_project_is() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "kept_test.script", ITEM);
        write(root, "sub/Project.toml", "name = \"sub\"\n");
        write(root, "sub/sub_test.script", "@testitem \"sub\"\npass\n@end\n");
        write(root, "test/Project.toml", "name = \"test-env\"\n");
        write(root, "test/env_test.script", "@testitem \"env\"\npass\n@end\n");

        let discovered =
            discover(&[root.to_path_buf()], root, "script", true).expect("discovery failed");
        let names: Vec<_> = discovered.items.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"one"));
        assert!(names.contains(&"env"));
        assert!(!names.contains(&"sub"));
    }

    #[test]
    fn duplicate_ids_across_files_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a_test.script", "@testitem \"x\" id=\"shared\"\npass\n@end\n");
        write(root, "b_test.script", "@testitem \"y\" id=\"shared\"\npass\n@end\n");

        let err = discover(&[root.to_path_buf()], root, "script", true).unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateId { .. }));
    }

    #[test]
    fn unknown_setup_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "a_test.script",
            "@testitem \"x\" setups=[Missing]\npass\n@end\n",
        );

        let err = discover(&[root.to_path_buf()], root, "script", true).unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownSetup { .. }));
    }

    #[test]
    fn setups_are_discovered_from_setup_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "fixtures_testsetup.script", "@testsetup Fixtures\nlet a 1\n@end\n");
        write(
            root,
            "a_test.script",
            "@testitem \"x\" setups=[Fixtures]\nrequire Fixtures.a\n@end\n",
        );

        let discovered =
            discover(&[root.to_path_buf()], root, "script", true).expect("discovery failed");
        assert!(discovered.setups.contains_key("Fixtures"));
    }

    #[test]
    fn explicit_file_argument_must_be_a_test_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "helpers.script", "@frobnicate\n");

        let err = discover(&[root.join("helpers.script")], root, "script", true).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotATestFile(_)));
    }
}
