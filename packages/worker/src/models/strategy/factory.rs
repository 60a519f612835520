use std::collections::HashMap;
use std::sync::Arc;

use common::judge_job::{ExecutionStrategyType, SubmissionTypeInfo};
use tracing::info;

use super::{CompiledStrategy, ContainerStrategy, ExecutionStrategy, InterpretedStrategy};
use crate::config::{CommandTemplate, ContainerConfig, ToolchainConfig};
use crate::error::JudgeError;
use crate::models::executor::ProcessExecutor;
use crate::models::sandbox::DockerSandbox;

/// Builds every strategy up front and hands them out per submission type.
///
/// Construction verifies that each configured tool resolves, so a missing
/// compiler stops the worker before it accepts any job.
pub struct StrategyFactory {
    compiled: HashMap<String, Arc<ExecutionStrategy>>,
    interpreted: HashMap<String, Arc<ExecutionStrategy>>,
    container: Option<Arc<ExecutionStrategy>>,
    sandbox: Option<Arc<DockerSandbox>>,
}

impl StrategyFactory {
    pub fn new(
        toolchains: &HashMap<String, ToolchainConfig>,
        container: Option<&ContainerConfig>,
        executor: &ProcessExecutor,
    ) -> Result<Self, JudgeError> {
        let mut compiled = HashMap::new();
        let mut interpreted = HashMap::new();

        for (key, toolchain) in toolchains {
            ensure_resolvable(&toolchain.run)?;
            if let Some(compile) = &toolchain.compile {
                ensure_resolvable(compile)?;
                compiled.insert(
                    key.clone(),
                    Arc::new(ExecutionStrategy::Compiled(CompiledStrategy::new(
                        key.clone(),
                        toolchain.clone(),
                        executor.clone(),
                    )?)),
                );
            }
            interpreted.insert(
                key.clone(),
                Arc::new(ExecutionStrategy::Interpreted(InterpretedStrategy::new(
                    key.clone(),
                    toolchain.clone(),
                    executor.clone(),
                ))),
            );
            info!(toolchain = %key, compiled = toolchain.compile.is_some(), "Toolchain ready");
        }

        let sandbox = match container {
            Some(config) => {
                ensure_program(&config.docker_bin)?;
                ensure_resolvable(&config.harness)?;
                info!(image = %config.image, "Container sandbox ready");
                Some(Arc::new(DockerSandbox::new(config.clone())))
            }
            None => None,
        };
        let container = sandbox.as_ref().map(|sandbox| {
            Arc::new(ExecutionStrategy::Container(ContainerStrategy::new(
                Arc::clone(sandbox),
                executor.clone(),
            )))
        });

        Ok(Self {
            compiled,
            interpreted,
            container,
            sandbox,
        })
    }

    /// The Docker sandbox, when container judging is configured.
    pub fn sandbox(&self) -> Option<Arc<DockerSandbox>> {
        self.sandbox.clone()
    }

    pub fn for_submission_type(
        &self,
        info: &SubmissionTypeInfo,
    ) -> Result<Arc<ExecutionStrategy>, JudgeError> {
        let found = match info.strategy {
            ExecutionStrategyType::CompileExecuteAndCheck => self.compiled.get(&info.toolchain),
            ExecutionStrategyType::InterpretExecuteAndCheck => {
                self.interpreted.get(&info.toolchain)
            }
            ExecutionStrategyType::ContainerE2eHarness => {
                return self.container.clone().ok_or(JudgeError::ContainerUnavailable);
            }
        };
        found
            .cloned()
            .ok_or_else(|| JudgeError::UnknownToolchain(info.toolchain.clone()))
    }
}

/// Templated programs such as `{output}` only exist after a build.
fn ensure_resolvable(template: &CommandTemplate) -> Result<(), JudgeError> {
    if template.program.contains('{') {
        return Ok(());
    }
    ensure_program(&template.program)
}

fn ensure_program(program: &str) -> Result<(), JudgeError> {
    which::which(program)
        .map(|_| ())
        .map_err(|e| JudgeError::MissingTool {
            tool: program.to_string(),
            reason: e.to_string(),
        })
}
