// ABOUTME: Container lifecycle operations against the Docker engine
// ABOUTME: Image build/removal, create/start/stop, log demultiplexing, and die-event waits

use std::collections::HashMap;
use std::io::Write;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{EventMessage, HostConfig};
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::output::OutputWriter;

/// Settings for one container run, derived from the executor configuration.
pub(crate) struct RunSpec<'a> {
    pub image_tag: &'a str,
    pub cmd: &'a str,
    /// Grace period before the engine force-kills on stop; -1 is the
    /// engine's "no timeout" sentinel.
    pub stop_timeout_secs: i64,
    pub runtime: &'a str,
    pub network_mode: &'a str,
    pub security_opt: Option<String>,
}

/// Thin lifecycle layer over the Docker engine.
pub(crate) struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Connect to the engine over the platform default socket and verify
    /// it responds.
    pub async fn new() -> Result<Self> {
        #[cfg(unix)]
        let docker = Docker::connect_with_socket_defaults()?;

        #[cfg(windows)]
        let docker = Docker::connect_with_named_pipe_defaults()?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            SandboxError::Docker(e)
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Use an existing engine connection.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Build an image from a tar build context, draining the build
    /// stream to completion. In-band error records fail the build.
    pub async fn build_image(&self, tag: &str, archive: Vec<u8>) -> Result<()> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(bytes::Bytes::from(archive)));
        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(message) = info.error {
                error!(tag = %tag, "Image build failed: {}", message);
                return Err(SandboxError::BuildFailed(message));
            }
        }

        info!(tag = %tag, "Image built");
        Ok(())
    }

    /// Remove the run's image, forced. Best-effort: failures are logged
    /// and swallowed.
    pub async fn remove_image(&self, tag: &str) {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_image(tag, Some(options), None).await {
            Ok(_) => debug!(tag = %tag, "Image removed"),
            Err(e) => warn!(tag = %tag, "Failed to remove image: {}", e),
        }
    }

    /// Create the run's container: output attached, command wrapped in a
    /// shell, stop-timeout and sandbox runtime from the run spec.
    pub async fn create_container(&self, container_id: &str, spec: &RunSpec<'_>) -> Result<()> {
        let host_config = HostConfig {
            network_mode: Some(spec.network_mode.to_string()),
            runtime: Some(spec.runtime.to_string()),
            security_opt: spec.security_opt.clone().map(|opt| vec![opt]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_tag.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                spec.cmd.to_string(),
            ]),
            stop_timeout: Some(spec.stop_timeout_secs),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_id.to_string(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                error!(container = %container_id, "Failed to create container: {}", e);
                SandboxError::ContainerStartFailed(e.to_string())
            })?;

        debug!(container = %container_id, image = %spec.image_tag, "Container created");
        Ok(())
    }

    pub async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                error!(container = %container_id, "Failed to start container: {}", e);
                SandboxError::ContainerStartFailed(e.to_string())
            })?;

        info!(container = %container_id, "Container started");
        Ok(())
    }

    /// Ask the engine to stop the container, honoring the stop-timeout it
    /// was created with. "Already stopped" and "no such container" are
    /// not failures of the run.
    pub async fn stop_container(&self, container_id: &str) -> Result<()> {
        match self.docker.stop_container(container_id, None).await {
            Ok(()) => {
                debug!(container = %container_id, "Stop requested");
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container = %container_id, "Container already stopped");
                Ok(())
            }
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %container_id, "Container already gone");
                Ok(())
            }
            Err(e) => {
                error!(container = %container_id, "Failed to stop container: {}", e);
                Err(SandboxError::Docker(e))
            }
        }
    }

    /// Open a following, demultiplexed log stream and pump it into the
    /// two sinks on a background task. The task is not awaited; it drains
    /// until the engine closes the stream when the container exits.
    pub fn spawn_log_pump(
        &self,
        container_id: &str,
        mut stdout: OutputWriter,
        mut stderr: OutputWriter,
    ) -> tokio::task::JoinHandle<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let logs = self.docker.logs(container_id, Some(options));
        let container = container_id.to_string();

        tokio::spawn(async move {
            let mut stream = Box::pin(logs);
            while let Some(chunk) = stream.next().await {
                let written = match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        stdout.write_all(&message).and_then(|()| stdout.flush())
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.write_all(&message).and_then(|()| stderr.flush())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!(container = %container, "Error reading container logs: {}", e);
                        break;
                    }
                };
                if let Err(e) = written {
                    warn!(container = %container, "Error writing captured output: {}", e);
                    break;
                }
            }
        })
    }

    /// Block until the container's die event (or an event-channel error)
    /// arrives, and return the reported exit code.
    ///
    /// The subscription is filtered to this run's container and image and
    /// scoped to events at or after `since`; dropping the stream cancels
    /// the engine-side watch the moment either outcome is observed.
    pub async fn wait_for_die(
        &self,
        container_id: &str,
        image_tag: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let mut filters = HashMap::new();
        filters.insert("container".to_string(), vec![container_id.to_string()]);
        filters.insert("image".to_string(), vec![image_tag.to_string()]);
        filters.insert("event".to_string(), vec!["die".to_string()]);

        let options = EventsOptions {
            since: Some(since),
            until: None,
            filters,
        };

        let mut events = self.docker.events(Some(options));
        match events.next().await {
            Some(Ok(event)) => exit_code_from_event(&event),
            Some(Err(e)) => Err(SandboxError::Docker(e)),
            None => Err(SandboxError::EventStreamClosed {
                container_id: container_id.to_string(),
            }),
        }
    }
}

/// Pull the process exit code out of a die event's actor attributes.
pub(crate) fn exit_code_from_event(event: &EventMessage) -> Result<i64> {
    let code = event
        .actor
        .as_ref()
        .and_then(|actor| actor.attributes.as_ref())
        .and_then(|attributes| attributes.get("exitCode"))
        .ok_or_else(|| {
            SandboxError::MalformedEvent("die event carried no exitCode attribute".to_string())
        })?;

    code.parse::<i64>()
        .map_err(|_| SandboxError::MalformedEvent(format!("unparseable exitCode {code:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::EventActor;

    fn die_event(attributes: Option<HashMap<String, String>>) -> EventMessage {
        EventMessage {
            actor: Some(EventActor {
                id: Some("c".to_string()),
                attributes,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn exit_code_is_read_from_actor_attributes() {
        let mut attributes = HashMap::new();
        attributes.insert("exitCode".to_string(), "137".to_string());
        let code = exit_code_from_event(&die_event(Some(attributes))).unwrap();
        assert_eq!(code, 137);
    }

    #[test]
    fn missing_exit_code_is_a_malformed_event() {
        let err = exit_code_from_event(&die_event(Some(HashMap::new()))).unwrap_err();
        assert!(matches!(err, SandboxError::MalformedEvent(_)));

        let err = exit_code_from_event(&EventMessage::default()).unwrap_err();
        assert!(matches!(err, SandboxError::MalformedEvent(_)));
    }

    #[test]
    fn unparseable_exit_code_is_a_malformed_event() {
        let mut attributes = HashMap::new();
        attributes.insert("exitCode".to_string(), "not-a-number".to_string());
        let err = exit_code_from_event(&die_event(Some(attributes))).unwrap_err();
        assert!(matches!(err, SandboxError::MalformedEvent(_)));
    }

    #[tokio::test]
    #[ignore] // Requires Docker daemon
    async fn connect_reaches_the_daemon() {
        let manager = ContainerManager::new().await;
        assert!(manager.is_ok(), "Failed to connect to Docker: {:?}", manager.err());
    }
}
