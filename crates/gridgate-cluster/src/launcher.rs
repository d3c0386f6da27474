use gridgate_common::{GridgateError, InstanceId, Result, Role};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Starts an instance as a new OS process.
pub trait InstanceLauncher: Send + Sync {
    fn launch(&self, role: Role, id: InstanceId) -> Result<()>;
}

impl<F> InstanceLauncher for F
where
    F: Fn(Role, InstanceId) -> Result<()> + Send + Sync,
{
    fn launch(&self, role: Role, id: InstanceId) -> Result<()> {
        self(role, id)
    }
}

/// Launches instances by re-running a gridgate binary.
///
/// The child is invoked as `<program> <base_args...> --instance-id <id>` and
/// inherits stdout/stderr. It is detached: dropping the handle neither waits
/// for nor kills it.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    base_args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Launcher that re-executes the running binary
    pub fn current_exe(base_args: Vec<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, base_args))
    }

    pub fn args_for(&self, id: InstanceId) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("--instance-id".to_string());
        args.push(id.to_string());
        args
    }
}

impl InstanceLauncher for CommandLauncher {
    fn launch(&self, role: Role, id: InstanceId) -> Result<()> {
        let child = Command::new(&self.program)
            .args(self.args_for(id))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| GridgateError::Spawn {
                id,
                reason: e.to_string(),
            })?;

        info!(
            "Spawned {} instance {} as process {}",
            role,
            id,
            child.id().unwrap_or_default()
        );
        Ok(())
    }
}
