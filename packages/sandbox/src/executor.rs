// ABOUTME: Single-use executor for disposable sandboxed command runs
// ABOUTME: Builds a one-off image, runs the command, races the die event, and cleans up

use std::io::Write;
use std::time::Duration;

use bollard::Docker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::container::{ContainerManager, RunSpec};
use crate::context::{self, rand_hex};
use crate::error::{Result, SandboxError};
use crate::fileset::FileSet;
use crate::network::{NetworkMode, SeccompProfile};
use crate::output::{discard, OutputWriter, SharedWriter};

/// Exit code the engine reports for a container it had to kill at the
/// stop deadline (128 + SIGKILL).
const TIMEOUT_EXIT_CODE: i64 = 137;

/// Exit report for a run that completed on its own.
///
/// Non-zero codes are ordinary command failures, not orchestration
/// errors; callers that care should check [`ExitStatus::success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code reported by the container's die event.
    pub code: i64,
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self.code == 0
    }
}

/// A single-use sandboxed command run.
///
/// Configure one, call [`Executor::execute`], and build a fresh one for
/// the next run; `execute` consumes the executor, so reuse is a compile
/// error rather than undefined behavior. Independent executors may run
/// concurrently, with image tags and container names random per run.
pub struct Executor {
    dockerfile: String,
    files: Box<dyn FileSet + Send>,
    cmd: String,
    timeout: Option<Duration>,
    network: NetworkMode,
    seccomp: SeccompProfile,
    runtime: String,
    stdout: Option<OutputWriter>,
    stderr: Option<OutputWriter>,
}

impl Executor {
    /// Default sandbox runtime: gVisor's runsc.
    pub const DEFAULT_RUNTIME: &'static str = "runsc";

    /// A run of `cmd` (a shell command line) inside a container built
    /// from `dockerfile` and `files`. No timeout, bridge networking, the
    /// engine's default seccomp profile, output discarded.
    pub fn new(
        dockerfile: impl Into<String>,
        files: impl FileSet + Send + 'static,
        cmd: impl Into<String>,
    ) -> Self {
        Self {
            dockerfile: dockerfile.into(),
            files: Box::new(files),
            cmd: cmd.into(),
            timeout: None,
            network: NetworkMode::default(),
            seccomp: SeccompProfile::default(),
            runtime: Self::DEFAULT_RUNTIME.to_string(),
            stdout: None,
            stderr: None,
        }
    }

    /// Wall-clock deadline for the command, measured from container
    /// start. A command still running at the deadline is killed and the
    /// run reports [`SandboxError::Timeout`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn network(mut self, network: NetworkMode) -> Self {
        self.network = network;
        self
    }

    pub fn seccomp(mut self, seccomp: SeccompProfile) -> Self {
        self.seccomp = seccomp;
        self
    }

    /// Container runtime to execute under, [`Self::DEFAULT_RUNTIME`] by
    /// default.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Capture the command's standard output. Unset streams are
    /// discarded.
    pub fn stdout(mut self, writer: impl Write + Send + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Capture the command's standard error. Unset streams are
    /// discarded.
    pub fn stderr(mut self, writer: impl Write + Send + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// Send both streams to one destination. Writes are serialized and
    /// flushed chunk-by-chunk, so the two streams cannot corrupt each
    /// other's bytes.
    pub fn combined_output(mut self, writer: impl Write + Send + 'static) -> Self {
        let shared = SharedWriter::new(Box::new(writer));
        self.stdout = Some(Box::new(shared.clone()));
        self.stderr = Some(Box::new(shared));
        self
    }

    /// Run the configured command in a freshly built, disposable
    /// container.
    ///
    /// Returns the command's exit status on normal completion (non-zero
    /// codes included), [`SandboxError::Timeout`] when the engine had to
    /// kill the command at its deadline, or the underlying
    /// infrastructure error. The image built for the run is removed on
    /// every path.
    ///
    /// Output capture runs concurrently with exit classification; the
    /// configured sinks may still be draining at the moment this
    /// returns. Cancellation is structural: dropping the returned future
    /// (e.g. from `tokio::select!` or `tokio::time::timeout`) aborts
    /// whichever engine call is in flight.
    pub async fn execute(self) -> Result<ExitStatus> {
        let manager = ContainerManager::new().await?;
        self.run(&manager).await
    }

    /// As [`Executor::execute`], but over an existing engine connection.
    pub async fn execute_with_client(self, docker: Docker) -> Result<ExitStatus> {
        let manager = ContainerManager::with_client(docker);
        self.run(&manager).await
    }

    async fn run(mut self, manager: &ContainerManager) -> Result<ExitStatus> {
        let context = context::assemble(self.files.as_ref(), &self.dockerfile, &self.seccomp)?;

        let image_tag = rand_hex(16);
        let container_id = rand_hex(16);
        info!(image = %image_tag, container = %container_id, cmd = %self.cmd, "Starting sandboxed run");

        // The image must not outlive this call, whichever way it ends.
        let result = match manager.build_image(&image_tag, context.archive).await {
            Ok(()) => {
                self.run_container(manager, &image_tag, &container_id, context.profile_ref)
                    .await
            }
            Err(e) => Err(e),
        };
        manager.remove_image(&image_tag).await;
        result
    }

    async fn run_container(
        &mut self,
        manager: &ContainerManager,
        image_tag: &str,
        container_id: &str,
        profile_ref: Option<String>,
    ) -> Result<ExitStatus> {
        let spec = RunSpec {
            image_tag,
            cmd: &self.cmd,
            stop_timeout_secs: stop_timeout_secs(self.timeout),
            runtime: &self.runtime,
            network_mode: self.network.as_engine_mode(),
            security_opt: profile_ref.map(|name| format!("seccomp={name}")),
        };

        let started_at = Utc::now();
        manager.create_container(container_id, &spec).await?;

        if let Err(e) = manager.start_container(container_id).await {
            let _ = manager.stop_container(container_id).await;
            return Err(e);
        }

        let stdout = self.stdout.take().unwrap_or_else(discard);
        let stderr = self.stderr.take().unwrap_or_else(discard);
        manager.spawn_log_pump(container_id, stdout, stderr);

        // The stop request leans on the container's configured
        // stop-timeout: a fast command exits inside the grace period, a
        // slow one is killed at the deadline with exit code 137.
        manager.stop_container(container_id).await?;

        let exit_code = manager
            .wait_for_die(container_id, image_tag, started_at)
            .await?;
        debug!(container = %container_id, code = exit_code, "Container exited");
        classify_exit(exit_code, &self.cmd, container_id, image_tag)
    }
}

/// Engine stop-timeout for the configured deadline, in whole seconds;
/// -1 is the engine's "no timeout" sentinel.
fn stop_timeout_secs(timeout: Option<Duration>) -> i64 {
    match timeout {
        Some(timeout) => timeout.as_secs() as i64,
        None => -1,
    }
}

/// Map a die event's exit code to the run's result: 137 means the engine
/// killed the command at the stop deadline; everything else is a normal
/// completion, ordinary command failures included.
fn classify_exit(
    code: i64,
    command: &str,
    container_id: &str,
    image_tag: &str,
) -> Result<ExitStatus> {
    if code == TIMEOUT_EXIT_CODE {
        return Err(SandboxError::Timeout {
            command: command.to_string(),
            container_id: container_id.to_string(),
            image_tag: image_tag.to_string(),
        });
    }
    Ok(ExitStatus { code })
}
