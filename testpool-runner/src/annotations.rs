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

//! Parsing of `@testitem` / `@testsetup` annotation blocks out of a source
//! file. The body between the annotation line and the matching `@end` is the
//! opaque code value; this parser never interprets it.
//!
//! ```text
//! @testitem "name" tags=[fast,db] setups=[Fixtures] retries=2 timeout=30 skip failfast
//!     ...body...
//! @end
//!
//! @testsetup Fixtures
//!     ...body...
//! @end
//! ```

use crate::error::DiscoveryError;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use testpool_common::model::{CodeSource, ItemFlags, TestItem, TestItemId, TestSetup};
use tracing::warn;

#[derive(Debug)]
pub struct ParsedFile {
    pub items: Vec<TestItem>,
    pub setups: Vec<TestSetup>,
}

/// Non-blank, non-comment lines outside any block must be annotations we
/// know. In strict mode an unknown one rejects the run; loose mode logs and
/// skips it.
pub fn parse_file(
    file: &Path,
    project_root: &Path,
    content: &str,
    strict: bool,
) -> Result<ParsedFile, DiscoveryError> {
    let mut parsed = ParsedFile {
        items: Vec::new(),
        setups: Vec::new(),
    };
    let mut lines = content.lines().enumerate();

    while let Some((index, raw)) = lines.next() {
        let line = (index + 1) as u32;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("@testitem") {
            let header = ItemHeader::parse(file, line, rest)?;
            let body = collect_body(file, line, &mut lines)?;
            parsed.items.push(header.into_item(file, project_root, line, body));
        } else if let Some(rest) = trimmed.strip_prefix("@testsetup") {
            let name = parse_setup_name(file, line, rest)?;
            let body = collect_body(file, line, &mut lines)?;
            parsed.setups.push(TestSetup {
                name,
                file: file.to_path_buf(),
                line,
                code: CodeSource::new(body, file, line),
            });
        } else {
            let annotation = trimmed
                .split_whitespace()
                .next()
                .unwrap_or(trimmed)
                .to_string();
            if strict {
                return Err(DiscoveryError::UnknownAnnotation {
                    file: file.to_path_buf(),
                    line,
                    annotation,
                });
            }
            warn!(file = %file.display(), line, %annotation, "skipping unknown top-level annotation");
        }
    }
    Ok(parsed)
}

fn collect_body<'a>(
    file: &Path,
    start_line: u32,
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<String, DiscoveryError> {
    let mut body = Vec::new();
    for (_, raw) in lines.by_ref() {
        if raw.trim() == "@end" {
            return Ok(body.join("\n"));
        }
        body.push(raw);
    }
    Err(DiscoveryError::Parse {
        file: file.to_path_buf(),
        line: start_line,
        message: "annotation block is missing its @end".to_string(),
    })
}

fn parse_setup_name(file: &Path, line: u32, rest: &str) -> Result<String, DiscoveryError> {
    let name = rest.trim();
    let name = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name);
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains('.') {
        return Err(DiscoveryError::Parse {
            file: file.to_path_buf(),
            line,
            message: format!("invalid setup name '{name}'"),
        });
    }
    Ok(name.to_string())
}

#[derive(Debug)]
struct ItemHeader {
    name: String,
    id: Option<String>,
    tags: BTreeSet<String>,
    setups: Vec<String>,
    retries: u32,
    timeout: Option<Duration>,
    flags: ItemFlags,
}

impl ItemHeader {
    fn parse(file: &Path, line: u32, rest: &str) -> Result<ItemHeader, DiscoveryError> {
        let parse_error = |message: String| DiscoveryError::Parse {
            file: file.to_path_buf(),
            line,
            message,
        };

        let rest = rest.trim();
        let (name, options) = match rest.strip_prefix('"') {
            Some(after_quote) => {
                let end = after_quote
                    .find('"')
                    .ok_or_else(|| parse_error("unterminated item name".to_string()))?;
                (after_quote[..end].to_string(), &after_quote[end + 1..])
            }
            None => return Err(parse_error("item name must be a quoted string".to_string())),
        };
        if name.is_empty() {
            return Err(parse_error("item name must not be empty".to_string()));
        }

        let mut header = ItemHeader {
            name,
            id: None,
            tags: BTreeSet::new(),
            setups: Vec::new(),
            retries: 0,
            timeout: None,
            flags: ItemFlags::default(),
        };
        for token in options.split_whitespace() {
            match token {
                "skip" => header.flags.skip = true,
                "failfast" => header.flags.failfast = true,
                "no_default_imports" => header.flags.default_imports = false,
                _ => {
                    let (key, value) = token
                        .split_once('=')
                        .ok_or_else(|| parse_error(format!("unknown item option '{token}'")))?;
                    match key {
                        "id" => {
                            header.id = Some(unquote(value).to_string());
                        }
                        "tags" => {
                            header.tags = parse_list(value)
                                .ok_or_else(|| {
                                    parse_error(format!("tags expects [a,b,...], got '{value}'"))
                                })?
                                .into_iter()
                                .collect();
                        }
                        "setups" => {
                            header.setups = parse_list(value).ok_or_else(|| {
                                parse_error(format!("setups expects [A,B,...], got '{value}'"))
                            })?;
                        }
                        "retries" => {
                            header.retries = value.parse().map_err(|_| {
                                parse_error(format!("retries expects an integer, got '{value}'"))
                            })?;
                        }
                        "timeout" => {
                            let secs: f64 = value.parse().map_err(|_| {
                                parse_error(format!("timeout expects seconds, got '{value}'"))
                            })?;
                            if !secs.is_finite() || secs <= 0.0 {
                                return Err(parse_error(
                                    "timeout must be a positive number of seconds".to_string(),
                                ));
                            }
                            header.timeout = Some(Duration::from_secs_f64(secs));
                        }
                        other => {
                            return Err(parse_error(format!("unknown item option '{other}'")));
                        }
                    }
                }
            }
        }
        Ok(header)
    }

    fn into_item(self, file: &Path, project_root: &Path, line: u32, body: String) -> TestItem {
        let id = self
            .id
            .map(TestItemId)
            .unwrap_or_else(|| TestItemId::derived(&file.to_string_lossy(), &self.name));
        TestItem {
            id,
            name: self.name,
            file: file.to_path_buf(),
            line,
            project_root: project_root.to_path_buf(),
            code: CodeSource::new(body, file, line),
            setups: self.setups,
            tags: self.tags,
            flags: self.flags,
            retries: self.retries,
            timeout: self.timeout,
            worker_pid: None,
            eval_number: 0,
        }
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

fn parse_list(value: &str) -> Option<Vec<String>> {
    let inner = value.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ParsedFile, DiscoveryError> {
        parse_file(Path::new("demo_test.script"), Path::new("."), content, true)
    }

    #[test]
    fn items_and_setups_parse_with_bodies_and_lines() {
        let parsed = parse(
            "# fixtures\n\
             @testsetup Fixtures\n\
             let answer 42\n\
             @end\n\
             \n\
             @testitem \"first\" tags=[fast,db] setups=[Fixtures] retries=2 timeout=30\n\
             pass\n\
             @end\n",
        )
        .expect("parse failed");

        assert_eq!(parsed.setups.len(), 1);
        assert_eq!(parsed.setups[0].name, "Fixtures");
        assert_eq!(parsed.setups[0].line, 2);
        assert_eq!(parsed.setups[0].code.text, "let answer 42");

        assert_eq!(parsed.items.len(), 1);
        let item = &parsed.items[0];
        assert_eq!(item.name, "first");
        assert_eq!(item.id.0, "demo_test.script::first");
        assert_eq!(item.line, 6);
        assert_eq!(item.retries, 2);
        assert_eq!(item.timeout, Some(Duration::from_secs(30)));
        assert_eq!(item.setups, vec!["Fixtures".to_string()]);
        assert!(item.tags.contains("fast") && item.tags.contains("db"));
        assert_eq!(item.code.text, "pass");
    }

    #[test]
    fn flags_parse_as_bare_words() {
        let parsed = parse("@testitem \"flagged\" skip failfast no_default_imports\n@end\n")
            .expect("parse failed");
        let flags = parsed.items[0].flags;
        assert!(flags.skip);
        assert!(flags.failfast);
        assert!(!flags.default_imports);
    }

    #[test]
    fn explicit_id_wins_over_the_derived_one() {
        let parsed = parse("@testitem \"named\" id=\"custom-id\"\n@end\n").expect("parse failed");
        assert_eq!(parsed.items[0].id.0, "custom-id");
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let err = parse("@testitem \"open\"\npass\n").unwrap_err();
        assert!(matches!(err, DiscoveryError::Parse { line: 1, .. }));
    }

    #[test]
    fn unknown_annotation_is_strict_by_default() {
        let err = parse("@frobnicate all\n").unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownAnnotation { .. }));
    }

    #[test]
    fn loose_mode_skips_unknown_annotations() {
        let parsed = parse_file(
            Path::new("demo_test.script"),
            Path::new("."),
            "@frobnicate all\n@testitem \"kept\"\npass\n@end\n",
            false,
        )
        .expect("parse failed");
        assert_eq!(parsed.items.len(), 1);
    }

    #[test]
    fn unquoted_item_name_is_rejected() {
        assert!(parse("@testitem bare\n@end\n").is_err());
    }
}
