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

//! A minimal line-directive host. It exists so the whole runner is executable
//! and observable end-to-end without an embedded language runtime; each
//! directive exercises one behavior the supervision layer must handle
//! (output, blocking, recorded outcomes, thrown exceptions, process death).
//!
//! Item directives: `pass`, `fail`, `error`, `throw`, `print`, `eprint`,
//! `sleep <secs>`, `flaky_until <run>`, `require <module>.<binding>`,
//! `append <path> <text>`, `abort`, `exit <code>`. Setup directives:
//! `let <name> <value>`, `print`, `eprint`, `sleep`, `append`, `throw`.
//! Expression directives (handshake, hooks, GC hints): `gc <kind>`,
//! `value <json>`, `print`, `eprint`, `sleep`.

use crate::host::{EvalContext, HostError, ModuleHandle, TestHost};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use testpool_common::model::{AssertionOutcome, CodeSource};

/// The global test-context record constructed during the worker handshake.
#[derive(Debug, Clone, Default)]
pub struct TestContext {
    pub project_name: String,
    pub total_items: usize,
}

pub struct ScriptHost {
    context: TestContext,
    /// Off after the handshake; when on, every item evaluation prints a
    /// one-line summary at the end of its body.
    print_on_finish: bool,
}

const PRELUDE_MODULE: &str = "Test";

impl ScriptHost {
    pub const FILE_EXTENSION: &'static str = "script";

    pub fn new(context: TestContext) -> Self {
        Self {
            context,
            print_on_finish: false,
        }
    }

    pub fn with_print_on_finish(mut self, on: bool) -> Self {
        self.print_on_finish = on;
        self
    }

    /// Bindings visible to items evaluated with default imports.
    fn prelude(&self) -> ModuleHandle {
        ModuleHandle {
            name: PRELUDE_MODULE.to_string(),
            bindings: HashMap::from([
                (
                    "project".to_string(),
                    serde_json::Value::String(self.context.project_name.clone()),
                ),
                (
                    "total_items".to_string(),
                    serde_json::Value::from(self.context.total_items as u64),
                ),
            ]),
        }
    }
}

fn split_directive(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// Appends one line to a file; test suites watch these files to observe how
/// often and in which order bodies ran.
fn append_line(rest: &str, line: u32) -> Result<(), HostError> {
    let (path, text) = split_directive(rest);
    if path.is_empty() {
        return Err(HostError::new(format!(
            "line {line}: append expects <path> <text>"
        )));
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| HostError::new(format!("line {line}: cannot open {path}: {err}")))?;
    writeln!(file, "{}", unquote(text))
        .map_err(|err| HostError::new(format!("line {line}: cannot write {path}: {err}")))
}

fn parse_secs(rest: &str, line: u32) -> Result<Duration, HostError> {
    let secs: f64 = rest
        .parse()
        .map_err(|_| HostError::new(format!("line {line}: sleep expects seconds, got '{rest}'")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(HostError::new(format!(
            "line {line}: sleep expects a non-negative duration"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Body lines start right below the annotation line.
fn body_line(code: &CodeSource, index: usize) -> u32 {
    code.line + 1 + index as u32
}

impl TestHost for ScriptHost {
    fn file_extension(&self) -> &'static str {
        Self::FILE_EXTENSION
    }

    fn eval_setup(&self, name: &str, code: &CodeSource) -> Result<ModuleHandle, HostError> {
        let mut module = ModuleHandle {
            name: name.to_string(),
            bindings: HashMap::new(),
        };
        for (index, raw) in code.text.lines().enumerate() {
            let line = body_line(code, index);
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (head, rest) = split_directive(trimmed);
            match head {
                "let" => {
                    let (key, value) = split_directive(rest);
                    if key.is_empty() {
                        return Err(HostError::new(format!("line {line}: let expects a name")));
                    }
                    let value = serde_json::from_str(value)
                        .unwrap_or_else(|_| serde_json::Value::String(unquote(value).to_string()));
                    module.bindings.insert(key.to_string(), value);
                }
                "print" => println!("{}", unquote(rest)),
                "eprint" => eprintln!("{}", unquote(rest)),
                "sleep" => std::thread::sleep(parse_secs(rest, line)?),
                "append" => append_line(rest, line)?,
                "throw" | "error" => {
                    return Err(HostError::new(if rest.is_empty() {
                        format!("setup {name} raised at line {line}")
                    } else {
                        unquote(rest).to_string()
                    }));
                }
                other => {
                    return Err(HostError::new(format!(
                        "line {line}: unknown setup directive '{other}'"
                    )));
                }
            }
        }
        Ok(module)
    }

    fn eval_item(
        &self,
        code: &CodeSource,
        ctx: &EvalContext<'_>,
    ) -> Result<Vec<AssertionOutcome>, HostError> {
        let prelude = ctx.default_imports.then(|| self.prelude());
        let mut outcomes = Vec::new();
        for (index, raw) in code.text.lines().enumerate() {
            let line = body_line(code, index);
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (head, rest) = split_directive(trimmed);
            match head {
                "pass" => outcomes.push(AssertionOutcome::pass().at(&code.file, line)),
                "fail" => {
                    let message = if rest.is_empty() { "assertion failed" } else { unquote(rest) };
                    outcomes.push(AssertionOutcome::fail(message).at(&code.file, line));
                }
                "error" => {
                    let message = if rest.is_empty() { "assertion errored" } else { unquote(rest) };
                    outcomes.push(AssertionOutcome::error(message).at(&code.file, line));
                }
                "throw" => {
                    return Err(HostError::new(if rest.is_empty() {
                        format!("exception at line {line}")
                    } else {
                        unquote(rest).to_string()
                    }));
                }
                "print" => println!("{}", unquote(rest)),
                "eprint" => eprintln!("{}", unquote(rest)),
                "sleep" => std::thread::sleep(parse_secs(rest, line)?),
                "append" => {
                    if let Err(err) = append_line(rest, line) {
                        outcomes.push(AssertionOutcome::error(err.message).at(&code.file, line));
                    }
                }
                "flaky_until" => {
                    let stable_run: u32 = rest.parse().map_err(|_| {
                        HostError::new(format!("line {line}: flaky_until expects a run number"))
                    })?;
                    if ctx.run_number >= stable_run {
                        outcomes.push(AssertionOutcome::pass().at(&code.file, line));
                    } else {
                        outcomes.push(
                            AssertionOutcome::fail(format!(
                                "not yet stable (run {} of {stable_run})",
                                ctx.run_number
                            ))
                            .at(&code.file, line),
                        );
                    }
                }
                "require" => {
                    let Some((module_name, binding)) = rest.split_once('.') else {
                        outcomes.push(
                            AssertionOutcome::error(format!(
                                "require expects <module>.<binding>, got '{rest}'"
                            ))
                            .at(&code.file, line),
                        );
                        continue;
                    };
                    let module = ctx
                        .setups
                        .iter()
                        .find(|m| m.name == module_name)
                        .or(prelude.as_ref().filter(|m| m.name == module_name));
                    let outcome = match module {
                        Some(module) if module.bindings.contains_key(binding) => {
                            AssertionOutcome::pass()
                        }
                        Some(module) => AssertionOutcome::error(format!(
                            "module {} has no binding '{binding}'",
                            module.name
                        )),
                        None => AssertionOutcome::error(format!(
                            "module '{module_name}' is not loaded"
                        )),
                    };
                    outcomes.push(outcome.at(&code.file, line));
                }
                "abort" => {
                    let _ = std::io::stdout().flush();
                    let _ = std::io::stderr().flush();
                    std::process::abort();
                }
                "exit" => {
                    let exit_code: i32 = rest.parse().map_err(|_| {
                        HostError::new(format!("line {line}: exit expects a status code"))
                    })?;
                    let _ = std::io::stdout().flush();
                    let _ = std::io::stderr().flush();
                    std::process::exit(exit_code);
                }
                other => outcomes.push(
                    AssertionOutcome::error(format!("unknown directive '{other}'"))
                        .at(&code.file, line),
                ),
            }
        }
        if self.print_on_finish {
            println!("finished with {} assertions", outcomes.len());
        }
        Ok(outcomes)
    }

    fn eval_code(&self, code: &CodeSource) -> Result<serde_json::Value, HostError> {
        let mut value = serde_json::Value::Null;
        for (index, raw) in code.text.lines().enumerate() {
            let line = body_line(code, index);
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (head, rest) = split_directive(trimmed);
            match head {
                // Advisory collection hints; nothing to collect here.
                "gc" => {}
                "print" => println!("{}", unquote(rest)),
                "eprint" => eprintln!("{}", unquote(rest)),
                "sleep" => std::thread::sleep(parse_secs(rest, line)?),
                "value" => {
                    value = serde_json::from_str(rest)
                        .unwrap_or_else(|_| serde_json::Value::String(unquote(rest).to_string()));
                }
                "throw" => {
                    return Err(HostError::new(unquote(rest).to_string()));
                }
                other => {
                    return Err(HostError::new(format!(
                        "line {line}: unknown expression directive '{other}'"
                    )));
                }
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testpool_common::model::{AssertionStatus, ItemStatus, TestResult};

    fn host() -> ScriptHost {
        ScriptHost::new(TestContext {
            project_name: "demo".to_string(),
            total_items: 2,
        })
    }

    fn eval(host: &ScriptHost, body: &str, run_number: u32, setups: &[ModuleHandle]) -> TestResult {
        let code = CodeSource::new(body, "demo_test.script", 1);
        let ctx = EvalContext {
            run_number,
            default_imports: true,
            setups,
        };
        TestResult {
            run_number,
            outcomes: host.eval_item(&code, &ctx).expect("eval failed"),
            stats: Default::default(),
        }
    }

    #[test]
    fn pass_fail_error_record_outcomes_with_locations() {
        let result = eval(&host(), "pass\nfail \"nope\"\nerror boom", 1, &[]);
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.outcomes[0].status, AssertionStatus::Pass);
        assert_eq!(result.outcomes[0].line, Some(2));
        assert_eq!(result.outcomes[1].message.as_deref(), Some("nope"));
        assert_eq!(result.outcomes[2].line, Some(4));
        assert_eq!(result.status(), ItemStatus::Error);
    }

    #[test]
    fn flaky_until_depends_on_the_run_number() {
        let host = host();
        assert_eq!(eval(&host, "flaky_until 2", 1, &[]).status(), ItemStatus::Fail);
        assert_eq!(eval(&host, "flaky_until 2", 2, &[]).status(), ItemStatus::Pass);
    }

    #[test]
    fn require_resolves_setup_bindings() {
        let host = host();
        let module = host
            .eval_setup("Fixtures", &CodeSource::new("let answer 42", "s.script", 1))
            .expect("setup failed");
        assert_eq!(module.bindings["answer"], serde_json::Value::from(42));

        let ok = eval(&host, "require Fixtures.answer", 1, std::slice::from_ref(&module));
        assert_eq!(ok.status(), ItemStatus::Pass);

        let missing = eval(&host, "require Fixtures.nope", 1, &[module]);
        assert_eq!(missing.status(), ItemStatus::Error);
    }

    #[test]
    fn prelude_is_gated_by_default_imports() {
        let host = host();
        let code = CodeSource::new("require Test.project", "t.script", 1);
        let with = host
            .eval_item(
                &code,
                &EvalContext {
                    run_number: 1,
                    default_imports: true,
                    setups: &[],
                },
            )
            .unwrap();
        assert_eq!(with[0].status, AssertionStatus::Pass);
        let without = host
            .eval_item(
                &code,
                &EvalContext {
                    run_number: 1,
                    default_imports: false,
                    setups: &[],
                },
            )
            .unwrap();
        assert_eq!(without[0].status, AssertionStatus::Error);
    }

    #[test]
    fn throw_escapes_instead_of_recording() {
        let host = host();
        let code = CodeSource::new("throw \"kaboom\"", "t.script", 1);
        let err = host
            .eval_item(
                &code,
                &EvalContext {
                    run_number: 1,
                    default_imports: true,
                    setups: &[],
                },
            )
            .unwrap_err();
        assert_eq!(err.message, "kaboom");
    }

    #[test]
    fn setup_error_propagates_as_host_error() {
        let err = host()
            .eval_setup("Broken", &CodeSource::new("throw \"db down\"", "s.script", 1))
            .unwrap_err();
        assert_eq!(err.message, "db down");
    }

    #[test]
    fn eval_code_returns_the_last_value() {
        let value = host()
            .eval_code(&CodeSource::anonymous("gc full\ngc sweep\nvalue 7"))
            .expect("eval_code failed");
        assert_eq!(value, serde_json::Value::from(7));
    }
}
