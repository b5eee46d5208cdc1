//! Process supervisor: owns the instance state machine and mediates every
//! transition through the session backend and the registry.

use std::{path::PathBuf, time::Instant};

use regex::Regex;
use tokio::{fs, time::sleep};
use tracing::{info, warn};

use crate::{
    config::{FujiConfig, PaperSpec},
    error::{Error, RegistryError, SessionError},
    instance::{InstanceState, ServerInstance, validate_name},
    properties,
    registry::Registry,
    session::SessionBackend,
};

/// The in-game console command that shuts a PaperMC server down cleanly.
const STOP_COMMAND: &str = "stop";

pub struct Supervisor<B: SessionBackend> {
    config: FujiConfig,
    registry: Registry,
    sessions: B,
}

impl<B: SessionBackend> Supervisor<B> {
    pub fn new(config: FujiConfig, registry: Registry, sessions: B) -> Self {
        Self {
            config,
            registry,
            sessions,
        }
    }

    /// Provision a new instance: directory, record, EULA file when the
    /// user consented, and a seed `server.properties`.
    pub async fn create(
        &self,
        name: &str,
        accept_eula: bool,
        paper: PaperSpec,
    ) -> Result<ServerInstance, Error> {
        let name = validate_name(name)?;
        let directory = self.registry.instance_dir(&name);
        let instance = ServerInstance::new(name.clone(), directory, paper, accept_eula);

        self.registry.insert(&instance).await?;

        if accept_eula {
            let path = instance.eula_path();
            fs::write(&path, "#Generated by fuji\neula=true\n")
                .await
                .map_err(|e| Error::io(format!("writing {}", path.display()), e))?;
        }

        let path = instance.properties_path();
        let body = format!("#Minecraft server properties\n{}", properties::defaults(&name));
        fs::write(&path, body)
            .await
            .map_err(|e| Error::io(format!("writing {}", path.display()), e))?;

        info!(
            "Created server '{name}' at {}",
            instance.directory.display()
        );
        Ok(instance)
    }

    pub async fn start(
        &self,
        name: &str,
        auto_reconnect: bool,
    ) -> Result<ServerInstance, Error> {
        let name = validate_name(name)?;
        let mut instance = self.registry.get(&name).await?;

        if !instance.eula_accepted {
            return Err(Error::Precondition(format!(
                "Server '{name}' has not accepted the Minecraft EULA"
            )));
        }
        if !instance.jar_path().is_file() {
            return Err(Error::Precondition(format!(
                "Server '{name}' has no server.jar at {}",
                instance.jar_path().display()
            )));
        }

        // Claim the Starting transition. First writer wins; the loser sees
        // Conflict, either from the lock file or from the settled state.
        {
            let _lock = self.registry.lock(&name).await?;
            instance = self.registry.get(&name).await?;
            if !instance.state.is_down() {
                return Err(RegistryError::Conflict(name.clone()).into());
            }
            instance.transition(InstanceState::Starting)?;
            self.registry.update(&instance).await?;
        }

        let session = instance.session_name();
        let command = self.launch_command();
        info!("Starting server '{name}' in session '{session}'");

        match self.launch(&instance, &session, &command).await {
            Ok(()) => {
                instance.transition(InstanceState::Running)?;
                self.registry.update(&instance).await?;
                info!("Server '{name}' is running");
            }
            Err(err) => {
                // Settle out of Starting before surfacing the failure.
                // Nothing spawned means back to Stopped; anything else
                // left a wreck behind.
                let settled = match &err {
                    Error::Session(
                        SessionError::CreateFailed { .. } | SessionError::BinaryMissing,
                    ) => InstanceState::Stopped,
                    _ => InstanceState::Crashed,
                };
                instance.transition(settled)?;
                self.registry.update(&instance).await?;
                return Err(err);
            }
        }

        if auto_reconnect {
            // detaching later leaves the instance Running
            self.sessions.attach(&session).await?;
        }

        Ok(instance)
    }

    async fn launch(
        &self,
        instance: &ServerInstance,
        session: &str,
        command: &str,
    ) -> Result<(), Error> {
        if let Err(err) = self
            .sessions
            .create(session, &instance.directory, command)
            .await
        {
            let stale = matches!(err, SessionError::CreateFailed { .. })
                && self.sessions.exists(session).await?;
            if !stale {
                return Err(err.into());
            }

            // name collision with a leftover session from an earlier
            // run: kill it and retry once
            warn!("Session '{session}' is stale; killing and retrying");
            self.sessions.kill(session).await?;
            self.sessions
                .create(session, &instance.directory, command)
                .await?;
        }

        self.await_ready(instance, session).await
    }

    /// Poll the session's output buffer until the readiness marker shows
    /// up. Deadlines use a monotonic clock.
    async fn await_ready(
        &self,
        instance: &ServerInstance,
        session: &str,
    ) -> Result<(), Error> {
        let marker = Regex::new(&self.config.ready_marker)
            .map_err(|err| Error::Config(format!("bad ready_marker regex: {err}")))?;
        let deadline = Instant::now() + self.config.ready_timeout();

        loop {
            if !self.sessions.exists(session).await? {
                return Err(Error::ExitedEarly {
                    name: instance.name.clone(),
                });
            }

            let output = self.sessions.capture(session).await?;
            if marker.is_match(&output) {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    name: instance.name.clone(),
                    what: "become ready",
                    seconds: self.config.ready_timeout_secs,
                });
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    pub async fn stop(&self, name: &str) -> Result<ServerInstance, Error> {
        let name = validate_name(name)?;
        let mut instance = self.registry.get(&name).await?;
        let session = instance.session_name();

        {
            let _lock = self.registry.lock(&name).await?;
            instance = self.registry.get(&name).await?;
            if instance.state != InstanceState::Running {
                return Err(Error::Precondition(format!(
                    "Cannot stop '{name}': server is {} (expected running)",
                    instance.state
                )));
            }
            instance.transition(InstanceState::Stopping)?;
            self.registry.update(&instance).await?;
        }

        info!("Sent graceful stop to '{name}'");
        if let Err(err) = self.sessions.send_keys(&session, STOP_COMMAND).await {
            // console unreachable; settle before surfacing
            instance.transition(InstanceState::Crashed)?;
            self.registry.update(&instance).await?;
            return Err(err.into());
        }

        let deadline = Instant::now() + self.config.stop_grace();
        loop {
            if !self.sessions.exists(&session).await? {
                instance.transition(InstanceState::Stopped)?;
                self.registry.update(&instance).await?;
                info!("Server '{name}' stopped gracefully");
                return Ok(instance);
            }

            if Instant::now() >= deadline {
                warn!(
                    "Server '{name}' ignored the stop command; killing session '{session}'"
                );
                self.sessions.kill(&session).await?;
                instance.transition(InstanceState::Crashed)?;
                self.registry.update(&instance).await?;
                return Err(Error::Timeout {
                    name: name.clone(),
                    what: "stop gracefully",
                    seconds: self.config.stop_grace_secs,
                });
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    /// Acknowledge a crash: clean up any leftover session and settle the
    /// record back to Stopped.
    pub async fn reset(&self, name: &str) -> Result<ServerInstance, Error> {
        let name = validate_name(name)?;
        let _lock = self.registry.lock(&name).await?;
        let mut instance = self.registry.get(&name).await?;

        if instance.state != InstanceState::Crashed {
            return Err(Error::Precondition(format!(
                "Cannot reset '{name}': server is {} (only crashed servers reset)",
                instance.state
            )));
        }

        let session = instance.session_name();
        if self.sessions.exists(&session).await? {
            self.sessions.kill(&session).await?;
        }

        instance.transition(InstanceState::Stopped)?;
        self.registry.update(&instance).await?;
        info!("Server '{name}' reset to stopped");
        Ok(instance)
    }

    /// Hand the terminal to the instance's console. Blocks until detach.
    pub async fn attach(&self, name: &str) -> Result<(), Error> {
        let name = validate_name(name)?;
        let instance = self.registry.get(&name).await?;
        let session = instance.session_name();

        if !self.sessions.exists(&session).await? {
            return Err(Error::Precondition(format!(
                "Server '{name}' has no live console session"
            )));
        }

        self.sessions.attach(&session).await?;
        Ok(())
    }

    pub async fn status(&self, name: &str) -> Result<ServerInstance, Error> {
        let name = validate_name(name)?;
        let instance = self.registry.get(&name).await?;
        self.reconcile(instance).await
    }

    pub async fn list(&self) -> Result<Vec<ServerInstance>, Error> {
        let all = self.registry.load_all().await?;
        let mut out = Vec::with_capacity(all.len());
        for (_, instance) in all {
            out.push(self.reconcile(instance).await?);
        }
        Ok(out)
    }

    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        let name = validate_name(name)?;
        let lock = self.registry.lock(&name).await?;
        let instance = self.registry.get(&name).await?;

        if instance.state != InstanceState::Stopped {
            return Err(Error::Precondition(format!(
                "Cannot delete '{name}': server is {} (stop it first)",
                instance.state
            )));
        }

        self.registry.remove(&name).await?;
        // the lock file lives inside the directory about to go away
        drop(lock);
        fs::remove_dir_all(&instance.directory)
            .await
            .map_err(|e| Error::io(format!("removing {}", instance.directory.display()), e))?;
        info!("Deleted server '{name}'");
        Ok(())
    }

    /// Resolve the path `edit` should open. Configuration edits require a
    /// stopped server.
    pub async fn edit_target(&self, name: &str) -> Result<PathBuf, Error> {
        let name = validate_name(name)?;
        let instance = self.registry.get(&name).await?;

        if instance.state != InstanceState::Stopped {
            return Err(Error::Precondition(format!(
                "Cannot edit '{name}': server is {} (stop it first)",
                instance.state
            )));
        }

        Ok(instance.properties_path())
    }

    /// Reconcile recorded state against session liveness: a session that
    /// vanished mid-flight is a crash, one that vanished while Stopping
    /// finished its graceful exit.
    async fn reconcile(&self, mut instance: ServerInstance) -> Result<ServerInstance, Error> {
        if instance.state.is_down() {
            return Ok(instance);
        }

        let live = self.sessions.exists(&instance.session_name()).await?;
        let settled = match instance.state {
            InstanceState::Running | InstanceState::Starting if !live => {
                warn!(
                    "Session for '{}' is gone without a stop; marking crashed",
                    instance.name
                );
                Some(InstanceState::Crashed)
            }
            InstanceState::Stopping if !live => Some(InstanceState::Stopped),
            _ => None,
        };

        if let Some(to) = settled {
            instance.transition(to)?;
            self.registry.update(&instance).await?;
        }
        Ok(instance)
    }

    fn launch_command(&self) -> String {
        let mut parts = Vec::with_capacity(self.config.java_flags.len() + 4);
        parts.push("java".to_string());
        parts.extend(self.config.java_flags.iter().cloned());
        parts.push("-jar".to_string());
        parts.push("server.jar".to_string());
        parts.push("--nogui".to_string());
        parts.join(" ")
    }
}
