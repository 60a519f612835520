use std::path::Path;

use async_trait::async_trait;

use super::program::{BuildOutcome, ProgramHooks, StepOutcome, run_build_step, template_vars};
use crate::config::{CommandTemplate, ToolchainConfig};
use crate::error::JudgeError;
use crate::models::executor::ProcessExecutor;
use crate::models::workspace::Workspace;

/// Compile with the toolchain's compiler, then run the produced artefact.
pub struct CompiledStrategy {
    name: String,
    toolchain: ToolchainConfig,
    compile: CommandTemplate,
    executor: ProcessExecutor,
}

impl CompiledStrategy {
    pub fn new(
        name: impl Into<String>,
        toolchain: ToolchainConfig,
        executor: ProcessExecutor,
    ) -> Result<Self, JudgeError> {
        let name = name.into();
        let compile = toolchain
            .compile
            .clone()
            .ok_or_else(|| JudgeError::InvalidToolchain {
                toolchain: name.clone(),
                reason: "compiled toolchains need a compile command".into(),
            })?;
        Ok(Self {
            name,
            toolchain,
            compile,
            executor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ProgramHooks for CompiledStrategy {
    fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    async fn build(&self, workspace: &Workspace, source: &Path) -> Result<BuildOutcome, JudgeError> {
        let output = workspace.join(&self.toolchain.output_file_name);
        let (source, output, workdir) = (
            source.to_string_lossy(),
            output.to_string_lossy(),
            workspace.path().to_string_lossy(),
        );
        let vars = template_vars(&source, &output, &workdir);

        let (program, args) = self.compile.render(&vars);
        let comment = match run_build_step(self, workspace, &program, &args).await? {
            StepOutcome::Passed { comment } => comment,
            StepOutcome::Failed { diagnostic } => return Ok(BuildOutcome::Failed { diagnostic }),
        };

        let (program, args) = self.toolchain.run.render(&vars);
        Ok(BuildOutcome::Ready {
            program,
            args,
            comment,
        })
    }
}
