use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info};

/// Control over the driver process a supervisor looks after.
pub trait ProcessControl: Send {
    fn is_running(&mut self) -> bool;

    /// Launch the process. Called only when [`is_running`](Self::is_running)
    /// is false.
    fn start(&mut self) -> io::Result<()>;

    /// Terminate the process if it is running.
    fn stop(&mut self) -> io::Result<()>;
}

/// Program and arguments used to launch a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// [`ProcessControl`] over a child of the current process.
#[derive(Debug)]
pub struct ChildProcess {
    launch: LaunchConfig,
    child: Option<Child>,
}

impl ChildProcess {
    pub fn new(launch: LaunchConfig) -> Self {
        Self { launch, child: None }
    }

    pub fn launch(&self) -> &LaunchConfig {
        &self.launch
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl ProcessControl for ChildProcess {
    fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(program = %self.launch.program.display(), %status, "driver process exited");
                self.child = None;
                false
            }
            Err(err) => {
                debug!(error = %err, "failed to poll driver process");
                false
            }
        }
    }

    fn start(&mut self) -> io::Result<()> {
        let child = Command::new(&self.launch.program)
            .args(&self.launch.args)
            .stdin(Stdio::null())
            .spawn()?;
        info!(program = %self.launch.program.display(), pid = child.id(), "driver process started");
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            child.kill()?;
            let status = child.wait()?;
            info!(program = %self.launch.program.display(), %status, "driver process stopped");
        }
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
