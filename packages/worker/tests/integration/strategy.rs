use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::ResultType;
use common::judge_job::{ExecutionStrategyType, JobInput};
use worker::models::checker::{Checker, CheckerResult, TrimChecker};
use worker::models::strategy::ExecutionContext;

use crate::support::{self, COPY, SHELL, SUM_SCRIPT};

struct CountingChecker(AtomicUsize);

impl Checker for CountingChecker {
    fn check(&self, _input: &str, _received: &str, _expected: &str, _is_trial: bool) -> CheckerResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        CheckerResult::correct()
    }
}

fn context(
    strategy: ExecutionStrategyType,
    toolchain: &str,
    source: &str,
    input: JobInput,
    checker: Arc<dyn Checker>,
) -> ExecutionContext {
    let job = support::job(strategy, toolchain, source, input);
    ExecutionContext::from_job(&job, checker).unwrap()
}

#[tokio::test]
async fn compiled_sum_passes_every_test() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::CompileExecuteAndCheck,
            COPY,
        ))
        .unwrap();

    let ctx = context(
        ExecutionStrategyType::CompileExecuteAndCheck,
        COPY,
        SUM_SCRIPT,
        JobInput::Tests {
            tests: support::sum_tests(),
        },
        Arc::new(TrimChecker),
    );
    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert!(result.is_compiled_successfully);
    let ids: Vec<_> = result.test_results.iter().map(|r| r.test_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(
        result
            .test_results
            .iter()
            .all(|r| r.result_type == ResultType::CorrectAnswer)
    );
}

#[tokio::test]
async fn interpreted_source_is_normalised_to_lf() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let crlf = SUM_SCRIPT.replace('\n', "\r\n");
    let ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        &crlf,
        JobInput::Tests {
            tests: support::sum_tests(),
        },
        Arc::new(TrimChecker),
    );
    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert!(result.is_compiled_successfully);
    assert!(
        result
            .test_results
            .iter()
            .all(|r| r.result_type == ResultType::CorrectAnswer)
    );
}

#[tokio::test]
async fn syntax_error_is_a_compile_failure_without_tests() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        "if then\n",
        JobInput::Tests {
            tests: support::sum_tests(),
        },
        Arc::new(TrimChecker),
    );
    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert!(!result.is_compiled_successfully);
    assert!(result.test_results.is_empty());
    assert!(result.compiler_comment.is_some_and(|c| !c.is_empty()));
}

#[tokio::test]
async fn time_limit_skips_the_checker() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let checker = Arc::new(CountingChecker(AtomicUsize::new(0)));
    let mut ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        "sleep 5\n",
        JobInput::Tests {
            tests: vec![support::test_case(1, "", "")],
        },
        checker.clone(),
    );
    ctx.time_limit_ms = 300;

    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert_eq!(result.test_results.len(), 1);
    assert_eq!(result.test_results[0].result_type, ResultType::TimeLimit);
    assert_eq!(checker.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn memory_limit_skips_the_checker() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let checker = Arc::new(CountingChecker(AtomicUsize::new(0)));
    let mut ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        "head -c 400000000 /dev/zero | tail -n 1\n",
        JobInput::Tests {
            tests: vec![support::test_case(1, "", "")],
        },
        checker.clone(),
    );
    ctx.memory_limit_bytes = 64 * 1024 * 1024;
    ctx.time_limit_ms = 10_000;

    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert_eq!(result.test_results.len(), 1);
    assert_eq!(result.test_results[0].result_type, ResultType::MemoryLimit);
    assert!(result.test_results[0].memory_used_bytes > 64 * 1024 * 1024);
    assert_eq!(checker.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn runtime_error_is_reported_per_test() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        "read a b\nif [ \"$a\" = 10 ]; then exit 3; fi\necho $((a + b))\n",
        JobInput::Tests {
            tests: support::sum_tests(),
        },
        Arc::new(TrimChecker),
    );
    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    let kinds: Vec<_> = result.test_results.iter().map(|r| r.result_type).collect();
    assert_eq!(kinds, vec![ResultType::CorrectAnswer, ResultType::RunTimeError]);
}

#[tokio::test]
async fn simple_input_returns_program_output() {
    let factory = support::factory();
    let (workspaces, _dir) = support::workspaces();
    let strategy = factory
        .for_submission_type(&support::submission_type(
            ExecutionStrategyType::InterpretExecuteAndCheck,
            SHELL,
        ))
        .unwrap();

    let ctx = context(
        ExecutionStrategyType::InterpretExecuteAndCheck,
        SHELL,
        SUM_SCRIPT,
        JobInput::Simple {
            input: "40 2\n".into(),
        },
        Arc::new(TrimChecker),
    );
    let result = strategy.safe_execute(&ctx, &workspaces).await.unwrap();

    assert!(result.test_results.is_empty());
    let output = result.output.expect("ad-hoc runs produce output");
    assert_eq!(output.result_type, ResultType::CorrectAnswer);
    assert_eq!(output.output.trim(), "42");
}
