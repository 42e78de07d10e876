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

//! Black-box checks of the runner's universal guarantees.

use crate::common::Project;
use assert2::check;
use test_r::test;

#[test]
fn one_worker_evaluates_its_items_in_dispatch_order() {
    let project = Project::new();
    let order = project.path("order.txt");
    project.write(
        "order_test.script",
        &format!(
            "@testitem \"first\"\nappend {order} first\n@end\n\n\
             @testitem \"second\"\nappend {order} second\n@end\n\n\
             @testitem \"third\"\nappend {order} third\n@end\n",
            order = order.display()
        ),
    );

    let run = project.run(&["--nworkers", "1"]);

    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(project.appended("order.txt") == vec!["first", "second", "third"]);
}

#[test]
fn a_setup_is_evaluated_at_most_once_per_worker() {
    let project = Project::new();
    let counter = project.path("setup-evals.txt");
    project.write(
        "fixtures_testsetup.script",
        &format!(
            "@testsetup Fixtures\nappend {} setup\nlet answer 42\n@end\n",
            counter.display()
        ),
    );
    project.write(
        "shared_test.script",
        "@testitem \"uses one\" setups=[Fixtures]\nrequire Fixtures.answer\n@end\n\n\
         @testitem \"uses two\" setups=[Fixtures]\nrequire Fixtures.answer\n@end\n",
    );

    let run = project.run(&["--nworkers", "1"]);

    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(project.appended("setup-evals.txt").len() == 1);
}

#[test]
fn a_replacement_worker_reevaluates_the_setup() {
    let project = Project::new();
    let counter = project.path("setup-evals.txt");
    project.write(
        "fixtures_testsetup.script",
        &format!(
            "@testsetup Fixtures\nappend {} setup\nlet answer 42\n@end\n",
            counter.display()
        ),
    );
    project.write(
        "crashy_test.script",
        "@testitem \"boom\" setups=[Fixtures]\nabort\n@end\n\n\
         @testitem \"calm\" setups=[Fixtures]\nrequire Fixtures.answer\n@end\n",
    );

    let run = project.run(&["--nworkers", "1"]);

    check!(run.exit_code() == 1, "stderr: {}", run.stderr());
    // One evaluation on the crashed worker, one on its replacement.
    check!(project.appended("setup-evals.txt").len() == 2);
}

#[test]
fn issues_mode_shows_logs_only_for_non_passing_items() {
    let project = Project::new();
    project.write(
        "mixed_test.script",
        "@testitem \"green\"\nprint passing output\npass\n@end\n\n\
         @testitem \"red\"\nprint failing output\nfail\n@end\n",
    );

    let run = project.run(&["--nworkers", "1", "--logs", "issues"]);

    check!(run.exit_code() == 1, "stderr: {}", run.stderr());
    let stdout = run.stdout();
    check!(stdout.contains("failing output"));
    check!(!stdout.contains("passing output"));
    check!(run.capture_block_count("red") == 1);
    check!(run.capture_block_count("green") == 0);
}

#[test]
fn batched_mode_prints_one_block_per_retry() {
    let project = Project::new();
    project.write(
        "flaky_test.script",
        "@testitem \"flaky\"\nprint attempt output\nflaky_until 3\n@end\n",
    );

    let run = project.run(&["--nworkers", "1", "--retries", "3", "--logs", "batched"]);

    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(run.capture_block_count("flaky") == 3);
}

#[test]
fn duplicate_item_ids_reject_the_run_before_dispatch() {
    let project = Project::new();
    project.write(
        "first_test.script",
        "@testitem \"a\" id=\"shared\"\npass\n@end\n",
    );
    project.write(
        "second_test.script",
        "@testitem \"b\" id=\"shared\"\npass\n@end\n",
    );

    let run = project.run(&["--nworkers", "1"]);

    check!(run.exit_code() == 2);
    check!(run.stderr().contains("duplicate test item id"));
}

#[test]
fn discovery_reads_only_matching_files() {
    let project = Project::new();
    project.write("real_test.script", "@testitem \"real\"\npass\n@end\n");
    // Would fail strict parsing if discovery read them.
    project.write("helpers.script", "@frobnicate everything\n");
    project.write(".hidden/sneaky_test.script", "@broken\n");
    project.write("vendored/Project.toml", "name = \"sub\"\n");
    project.write("vendored/inner_test.script", "@broken\n");

    let run = project.run(&["--nworkers", "0"]);

    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(run.stdout().contains("1 items"));
}

#[test]
fn skipped_items_are_reported_but_never_evaluated() {
    let project = Project::new();
    let counter = project.path("evals.txt");
    project.write(
        "skip_test.script",
        &format!(
            "@testitem \"off\" skip\nappend {} ran\n@end\n\n\
             @testitem \"on\"\npass\n@end\n",
            counter.display()
        ),
    );

    let run = project.run(&["--nworkers", "1"]);

    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(run.stdout().contains("SKIPPED off"));
    check!(project.appended("evals.txt").is_empty());
}

#[test]
fn name_and_tag_filters_select_items() {
    let project = Project::new();
    let counter = project.path("evals.txt");
    project.write(
        "filter_test.script",
        &format!(
            "@testitem \"db slow\" tags=[db,slow]\nappend {c} db-slow\n@end\n\n\
             @testitem \"db fast\" tags=[db,fast]\nappend {c} db-fast\n@end\n\n\
             @testitem \"plain\"\nappend {c} plain\n@end\n",
            c = counter.display()
        ),
    );

    let run = project.run(&["--nworkers", "0", "--tags", "db,fast"]);
    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(project.appended("evals.txt") == vec!["db-fast"]);

    let project = Project::new();
    let counter = project.path("evals.txt");
    project.write(
        "filter_test.script",
        &format!(
            "@testitem \"alpha\"\nappend {c} alpha\n@end\n\n\
             @testitem \"alphabet\"\nappend {c} alphabet\n@end\n",
            c = counter.display()
        ),
    );
    let run = project.run(&["--nworkers", "0", "--name", "alpha"]);
    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
    check!(project.appended("evals.txt") == vec!["alpha"]);
}

#[test]
fn eager_logs_conflict_with_report_generation() {
    let project = Project::new();
    project.write("basic_test.script", "@testitem \"one\"\npass\n@end\n");

    let run = project.run(&["--logs", "eager", "--report"]);

    check!(run.exit_code() == 2);
    check!(run.stderr().contains("eager"));
}

#[test]
fn setup_errors_are_recorded_but_the_item_still_evaluates() {
    let project = Project::new();
    let counter = project.path("evals.txt");
    project.write(
        "broken_testsetup.script",
        "@testsetup Broken\nthrow \"db down\"\n@end\n",
    );
    project.write(
        "dependent_test.script",
        &format!(
            "@testitem \"dependent\" setups=[Broken]\nappend {} body-ran\n@end\n",
            counter.display()
        ),
    );

    let run = project.run(&["--nworkers", "1", "--logs", "issues"]);

    check!(run.exit_code() == 1, "stderr: {}", run.stderr());
    check!(project.appended("evals.txt") == vec!["body-ran"]);
}

#[test]
fn worker_init_expression_runs_during_the_handshake() {
    let project = Project::new();
    project.write("basic_test.script", "@testitem \"one\"\npass\n@end\n");

    let run = project.run(&["--nworkers", "1", "--worker-init-expr", "value \"ready\""]);
    check!(run.exit_code() == 0, "stderr: {}", run.stderr());
}

#[test]
fn failing_worker_init_is_fatal_after_start_retries() {
    let project = Project::new();
    project.write("basic_test.script", "@testitem \"one\"\npass\n@end\n");

    let run = project.run(&["--nworkers", "1", "--worker-init-expr", "throw \"bad env\""]);
    check!(run.exit_code() == 2);
    check!(run.stderr().contains("worker failed to start"));
}
