use std::path::Path;

use async_trait::async_trait;

use super::program::{BuildOutcome, ProgramHooks, StepOutcome, run_build_step, template_vars};
use crate::config::ToolchainConfig;
use crate::error::JudgeError;
use crate::models::executor::ProcessExecutor;
use crate::models::workspace::Workspace;

/// Run the source through an interpreter.
///
/// The toolchain's `compile` command, when present, is a syntax check whose
/// failure is reported like a compile error.
pub struct InterpretedStrategy {
    name: String,
    toolchain: ToolchainConfig,
    executor: ProcessExecutor,
}

impl InterpretedStrategy {
    pub fn new(name: impl Into<String>, toolchain: ToolchainConfig, executor: ProcessExecutor) -> Self {
        Self {
            name: name.into(),
            toolchain,
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ProgramHooks for InterpretedStrategy {
    fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    fn preprocess(&self, code: &str) -> String {
        code.replace("\r\n", "\n")
    }

    async fn build(&self, workspace: &Workspace, source: &Path) -> Result<BuildOutcome, JudgeError> {
        let output = workspace.join(&self.toolchain.output_file_name);
        let (source, output, workdir) = (
            source.to_string_lossy(),
            output.to_string_lossy(),
            workspace.path().to_string_lossy(),
        );
        let vars = template_vars(&source, &output, &workdir);

        let mut comment = None;
        if let Some(check) = &self.toolchain.compile {
            let (program, args) = check.render(&vars);
            match run_build_step(self, workspace, &program, &args).await? {
                StepOutcome::Passed { comment: c } => comment = c,
                StepOutcome::Failed { diagnostic } => return Ok(BuildOutcome::Failed { diagnostic }),
            }
        }

        let (program, args) = self.toolchain.run.render(&vars);
        Ok(BuildOutcome::Ready {
            program,
            args,
            comment,
        })
    }
}
