use std::collections::HashMap;
use std::time::Duration;

use common::judge_job::{
    CheckerSpec, ExecutionStrategyType, JobInput, JudgeJob, SubmissionCode, SubmissionTypeInfo,
    TestCaseData,
};
use tempfile::TempDir;
use worker::config::{CommandTemplate, ToolchainConfig};
use worker::models::executor::ProcessExecutor;
use worker::models::strategy::StrategyFactory;
use worker::models::workspace::WorkspaceManager;

pub const SHELL: &str = "shell";
pub const COPY: &str = "copy";

/// Interpreted by `/bin/sh`, with `sh -n` as the syntax check.
pub fn shell_toolchain() -> ToolchainConfig {
    ToolchainConfig {
        compile: Some(CommandTemplate::new("/bin/sh", &["-n", "{source}"])),
        run: CommandTemplate::new("/bin/sh", &["{source}"]),
        source_file_name: "main.sh".into(),
        output_file_name: "solution".into(),
        compile_time_limit_ms: 5_000,
        compile_memory_limit_bytes: 512 * 1024 * 1024,
    }
}

/// "Compiles" a script by copying it to an executable artefact.
pub fn copy_toolchain() -> ToolchainConfig {
    ToolchainConfig {
        compile: Some(CommandTemplate::new(
            "/bin/sh",
            &["-c", "cp {source} {output} && chmod +x {output}"],
        )),
        run: CommandTemplate::new("{output}", &[]),
        source_file_name: "main.sh".into(),
        output_file_name: "solution".into(),
        compile_time_limit_ms: 5_000,
        compile_memory_limit_bytes: 512 * 1024 * 1024,
    }
}

pub fn executor() -> ProcessExecutor {
    ProcessExecutor::new(Duration::from_millis(5), 1024 * 1024)
}

pub fn factory() -> StrategyFactory {
    let mut toolchains = HashMap::new();
    toolchains.insert(SHELL.to_string(), shell_toolchain());
    toolchains.insert(COPY.to_string(), copy_toolchain());
    StrategyFactory::new(&toolchains, None, &executor()).expect("shell toolchains must resolve")
}

/// A workspace manager rooted in a fresh temp directory.
pub fn workspaces() -> (WorkspaceManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let (manager, _handle) = WorkspaceManager::start(dir.path(), 3);
    (manager, dir)
}

pub fn submission_type(strategy: ExecutionStrategyType, toolchain: &str) -> SubmissionTypeInfo {
    SubmissionTypeInfo {
        id: 1,
        name: toolchain.into(),
        strategy,
        toolchain: toolchain.into(),
        allow_binary_files: false,
        allowed_file_extensions: vec![],
        base_time_used_ms: 0,
        base_memory_used_bytes: 0,
    }
}

pub fn test_case(id: i32, input: &str, expected: &str) -> TestCaseData {
    TestCaseData {
        id,
        input: input.into(),
        expected_output: expected.into(),
        is_trial: false,
        is_open: false,
        hide_input: false,
        order_by: id,
    }
}

/// The classic a+b problem.
pub fn sum_tests() -> Vec<TestCaseData> {
    vec![test_case(1, "1 2\n", "3\n"), test_case(2, "10 20\n", "30\n")]
}

pub const SUM_SCRIPT: &str = "#!/bin/sh\nread a b\necho $((a + b))\n";

pub fn job(
    strategy: ExecutionStrategyType,
    toolchain: &str,
    source: &str,
    input: JobInput,
) -> JudgeJob {
    JudgeJob::new(
        7,
        1,
        submission_type(strategy, toolchain),
        SubmissionCode::Text {
            content: source.into(),
        },
        None,
        false,
        CheckerSpec::named("TrimChecker"),
        2_000,
        256 * 1024 * 1024,
        input,
    )
}
