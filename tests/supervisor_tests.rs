//! Supervisor state-machine tests against an in-memory session backend.

use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tempfile::TempDir;

use fuji::config::{FujiConfig, PaperSpec};
use fuji::error::{Error, RegistryError, SessionError};
use fuji::instance::{InstanceState, ServerInstance};
use fuji::registry::Registry;
use fuji::session::SessionBackend;
use fuji::supervisor::Supervisor;

#[derive(Default)]
struct FakeState {
    live: HashSet<String>,
    // captures remaining before the ready marker appears in output
    ready_after: u32,
    // exists() polls after a stop command before the session exits;
    // None means the server ignores the stop command
    exit_after_stop: Option<u32>,
    stop_seen: bool,
    calls: Vec<String>,
}

#[derive(Clone, Default)]
struct FakeSessions {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSessions {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn is_live(&self, name: &str) -> bool {
        self.state.lock().unwrap().live.contains(name)
    }

    fn set_ready_after(&self, captures: u32) {
        self.state.lock().unwrap().ready_after = captures;
    }

    fn set_exit_after_stop(&self, polls: u32) {
        self.state.lock().unwrap().exit_after_stop = Some(polls);
    }

    /// Simulate the server dying out from under the supervisor.
    fn drop_session(&self, name: &str) {
        self.state.lock().unwrap().live.remove(name);
    }
}

#[async_trait]
impl SessionBackend for FakeSessions {
    async fn exists(&self, name: &str) -> Result<bool, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("exists:{name}"));
        if state.stop_seen {
            match state.exit_after_stop {
                Some(0) => {
                    state.live.remove(name);
                }
                Some(polls) => state.exit_after_stop = Some(polls - 1),
                None => {}
            }
        }
        Ok(state.live.contains(name))
    }

    async fn create(
        &self,
        name: &str,
        _dir: &Path,
        _command: &str,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create:{name}"));
        if state.live.contains(name) {
            return Err(SessionError::CreateFailed {
                name: name.to_string(),
                reason: "session already exists".to_string(),
            });
        }
        state.live.insert(name.to_string());
        Ok(())
    }

    async fn send_keys(&self, name: &str, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("send:{name}:{text}"));
        if text == "stop" {
            state.stop_seen = true;
        }
        Ok(())
    }

    async fn capture(&self, name: &str) -> Result<String, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("capture:{name}"));
        if state.ready_after == 0 {
            Ok("[12:34:56 INFO]: Done (3.147s)! For help, type \"help\"\n".to_string())
        } else {
            state.ready_after -= 1;
            Ok("[12:34:55 INFO]: Preparing spawn area: 92%\n".to_string())
        }
    }

    async fn kill(&self, name: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("kill:{name}"));
        state.live.remove(name);
        Ok(())
    }

    async fn attach(&self, name: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("attach:{name}"));
        Ok(())
    }
}

struct Harness {
    _tmp: TempDir,
    supervisor: Supervisor<FakeSessions>,
    sessions: FakeSessions,
    registry: Registry,
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with(adjust: impl FnOnce(&mut FujiConfig)) -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut config = FujiConfig {
        root: tmp.path().to_path_buf(),
        ready_timeout_secs: 5,
        stop_grace_secs: 5,
        poll_interval_ms: 10,
        ..FujiConfig::default()
    };
    adjust(&mut config);

    let sessions = FakeSessions::default();
    let supervisor = Supervisor::new(
        config.clone(),
        Registry::open(&config),
        sessions.clone(),
    );
    let registry = Registry::open(&config);

    Harness {
        _tmp: tmp,
        supervisor,
        sessions,
        registry,
    }
}

async fn create_with_jar(h: &Harness, name: &str, eula: bool) -> ServerInstance {
    let instance = h
        .supervisor
        .create(name, eula, PaperSpec::default())
        .await
        .unwrap();
    tokio::fs::write(instance.jar_path(), b"jar").await.unwrap();
    instance
}

#[tokio::test]
async fn create_then_get_is_stopped_with_faithful_eula_flag() {
    let h = harness();

    let created = h
        .supervisor
        .create("survival", true, PaperSpec::default())
        .await
        .unwrap();
    assert_eq!(created.state, InstanceState::Stopped);
    assert!(created.eula_accepted);
    assert_eq!(h.registry.get("survival").await.unwrap(), created);
    assert!(created.eula_path().exists());
    assert!(created.properties_path().exists());

    let declined = h
        .supervisor
        .create("creative", false, PaperSpec::default())
        .await
        .unwrap();
    assert!(!declined.eula_accepted);
    assert!(!declined.eula_path().exists());
}

#[tokio::test]
async fn create_duplicate_name_fails() {
    let h = harness();
    h.supervisor
        .create("survival", true, PaperSpec::default())
        .await
        .unwrap();

    let err = h
        .supervisor
        .create("survival", true, PaperSpec::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Registry(RegistryError::DuplicateName(_))
    ));
}

#[tokio::test]
async fn start_without_eula_never_touches_sessions() {
    let h = harness();
    create_with_jar(&h, "survival", false).await;

    let err = h.supervisor.start("survival", false).await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
    assert!(h.sessions.calls().is_empty());
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Stopped
    );
}

#[tokio::test]
async fn start_unknown_name_has_no_side_effects() {
    let h = harness();

    let err = h.supervisor.start("ghost", false).await.unwrap_err();
    assert!(matches!(err, Error::Registry(RegistryError::NotFound(_))));
    assert!(h.sessions.calls().is_empty());
    assert!(h.registry.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn start_reaches_running_when_ready_marker_appears() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;
    h.sessions.set_ready_after(2);

    let instance = h.supervisor.start("survival", false).await.unwrap();
    assert_eq!(instance.state, InstanceState::Running);
    assert!(h.sessions.is_live("fuji-survival"));
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Running
    );
}

#[tokio::test]
async fn auto_reconnect_attaches_after_running() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;

    h.supervisor.start("survival", true).await.unwrap();
    assert!(
        h.sessions
            .calls()
            .contains(&"attach:fuji-survival".to_string())
    );
    // detaching is a user action; the instance stays running
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Running
    );
}

#[tokio::test]
async fn racing_starts_exactly_one_wins() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;

    let (a, b) = tokio::join!(
        h.supervisor.start("survival", false),
        h.supervisor.start("survival", false),
    );

    let outcomes = [a, b];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one racing start may succeed");

    let conflict = outcomes
        .into_iter()
        .find_map(|r| r.err())
        .expect("the losing start must fail");
    assert!(matches!(
        conflict,
        Error::Registry(RegistryError::Conflict(_))
    ));
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Running
    );
}

#[tokio::test]
async fn ready_timeout_settles_crashed() {
    let h = harness_with(|c| c.ready_timeout_secs = 0);
    create_with_jar(&h, "survival", true).await;
    h.sessions.set_ready_after(u32::MAX);

    let err = h.supervisor.start("survival", false).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Crashed
    );
}

#[tokio::test]
async fn start_after_crash_kills_the_stale_session_and_recovers() {
    let h = harness_with(|c| c.ready_timeout_secs = 0);
    create_with_jar(&h, "survival", true).await;
    h.sessions.set_ready_after(u32::MAX);
    h.supervisor.start("survival", false).await.unwrap_err();
    assert!(h.sessions.is_live("fuji-survival"));

    // next start finds the leftover session, kills it, and retries once
    h.sessions.set_ready_after(0);
    let instance = h.supervisor.start("survival", false).await.unwrap();
    assert_eq!(instance.state, InstanceState::Running);
    assert!(
        h.sessions
            .calls()
            .contains(&"kill:fuji-survival".to_string())
    );
}

#[tokio::test]
async fn stop_gracefully_reaches_stopped() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;
    h.supervisor.start("survival", false).await.unwrap();
    h.sessions.set_exit_after_stop(0);

    let instance = h.supervisor.stop("survival").await.unwrap();
    assert_eq!(instance.state, InstanceState::Stopped);
    assert!(!h.sessions.is_live("fuji-survival"));
    assert!(
        h.sessions
            .calls()
            .contains(&"send:fuji-survival:stop".to_string())
    );
    // graceful exit: the session left on its own, no kill issued
    assert!(
        !h.sessions
            .calls()
            .contains(&"kill:fuji-survival".to_string())
    );
}

#[tokio::test]
async fn stop_overrunning_grace_is_killed_and_marked_crashed() {
    let h = harness_with(|c| c.stop_grace_secs = 0);
    create_with_jar(&h, "survival", true).await;
    h.supervisor.start("survival", false).await.unwrap();
    // exit_after_stop stays None: the server ignores the stop command

    let err = h.supervisor.stop("survival").await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(!h.sessions.is_live("fuji-survival"), "session must be gone");
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Crashed
    );
}

#[tokio::test]
async fn stop_requires_a_running_server() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;

    let err = h.supervisor.stop("survival").await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[tokio::test]
async fn vanished_session_is_detected_as_a_crash() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;
    h.supervisor.start("survival", false).await.unwrap();

    h.sessions.drop_session("fuji-survival");
    let instance = h.supervisor.status("survival").await.unwrap();
    assert_eq!(instance.state, InstanceState::Crashed);
    assert_eq!(
        h.registry.get("survival").await.unwrap().state,
        InstanceState::Crashed
    );
}

#[tokio::test]
async fn stopping_record_with_dead_session_settles_stopped() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;
    h.supervisor.start("survival", false).await.unwrap();

    // another invocation died between send_keys and the exit poll
    let mut instance = h.registry.get("survival").await.unwrap();
    instance.transition(InstanceState::Stopping).unwrap();
    h.registry.update(&instance).await.unwrap();
    h.sessions.drop_session("fuji-survival");

    let instance = h.supervisor.status("survival").await.unwrap();
    assert_eq!(instance.state, InstanceState::Stopped);
}

#[tokio::test]
async fn reset_kills_leftovers_and_settles_stopped() {
    let h = harness_with(|c| c.ready_timeout_secs = 0);
    create_with_jar(&h, "survival", true).await;
    h.sessions.set_ready_after(u32::MAX);
    h.supervisor.start("survival", false).await.unwrap_err();
    assert!(h.sessions.is_live("fuji-survival"));

    let instance = h.supervisor.reset("survival").await.unwrap();
    assert_eq!(instance.state, InstanceState::Stopped);
    assert!(!h.sessions.is_live("fuji-survival"));

    let err = h.supervisor.reset("survival").await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[tokio::test]
async fn attach_requires_a_live_session() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;

    let err = h.supervisor.attach("survival").await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));

    h.supervisor.start("survival", false).await.unwrap();
    h.supervisor.attach("survival").await.unwrap();
    assert!(
        h.sessions
            .calls()
            .contains(&"attach:fuji-survival".to_string())
    );
}

#[tokio::test]
async fn edit_requires_a_stopped_server() {
    let h = harness();
    create_with_jar(&h, "survival", true).await;

    let path = h.supervisor.edit_target("survival").await.unwrap();
    assert!(path.ends_with("server.properties"));

    h.supervisor.start("survival", false).await.unwrap();
    let err = h.supervisor.edit_target("survival").await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[tokio::test]
async fn delete_requires_stopped_and_removes_the_directory() {
    let h = harness();
    let instance = create_with_jar(&h, "survival", true).await;
    h.supervisor.start("survival", false).await.unwrap();

    let err = h.supervisor.delete("survival").await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));

    h.sessions.set_exit_after_stop(0);
    h.supervisor.stop("survival").await.unwrap();
    h.supervisor.delete("survival").await.unwrap();

    assert!(!instance.directory.exists());
    let err = h.supervisor.status("survival").await.unwrap_err();
    assert!(matches!(err, Error::Registry(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let h = harness();
    create_with_jar(&h, "test", true).await;
    h.sessions.set_ready_after(1);

    let instance = h.supervisor.start("test", false).await.unwrap();
    assert_eq!(instance.state, InstanceState::Running);

    h.sessions.set_exit_after_stop(1);
    let instance = h.supervisor.stop("test").await.unwrap();
    assert_eq!(instance.state, InstanceState::Stopped);
    assert!(!h.sessions.is_live("fuji-test"));
}
