use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use color_eyre::eyre::{Result, WrapErr};

use crate::error::SyncError;
use crate::ports::platform::{Platform, PlatformClient};

/// What a verified call is about to do to a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Modify,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "READ",
            Operation::Create => "CREATE",
            Operation::Modify => "MODIFY",
            Operation::Delete => "DELETE",
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, Operation::Read)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyLevel {
    /// Only read operations pass, ever.
    ReadOnly,
    /// Mutations pass only for test-marked playlist names.
    TestOnly,
    /// Non-test mutations need explicit confirmation.
    Interactive,
    /// Everything passes; each call logs a warning.
    Disabled,
}

impl SafetyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read_only" => Some(SafetyLevel::ReadOnly),
            "test_only" => Some(SafetyLevel::TestOnly),
            "interactive" => Some(SafetyLevel::Interactive),
            "disabled" => Some(SafetyLevel::Disabled),
            _ => None,
        }
    }
}

type ConfirmFn = dyn Fn(&str, Operation) -> bool + Send + Sync;

/// Gates every mutating platform call during automated test sessions to
/// playlists carrying an explicit test marker.
pub struct SafetyGuard {
    /// Ordered, preferred first; a name counts as a test playlist when it
    /// starts with any of these.
    markers: Vec<String>,
    level: SafetyLevel,
    dry_run: bool,
    max_test_playlists: usize,
    emergency_stop: AtomicBool,
    audit_log: Mutex<Vec<String>>,
    confirm: Option<Box<ConfirmFn>>,
}

impl SafetyGuard {
    pub fn new(markers: Vec<String>, level: SafetyLevel) -> Self {
        Self {
            markers,
            level,
            dry_run: false,
            max_test_playlists: 10,
            emergency_stop: AtomicBool::new(false),
            audit_log: Mutex::new(Vec::new()),
            confirm: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_max_test_playlists(mut self, max: usize) -> Self {
        self.max_test_playlists = max;
        self
    }

    /// Confirmation handler consulted for non-test mutations under
    /// `Interactive`. Without one, those mutations are denied.
    pub fn with_confirmation_handler(
        mut self,
        confirm: impl Fn(&str, Operation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn max_test_playlists(&self) -> usize {
        self.max_test_playlists
    }

    /// Whether the name starts with any configured marker.
    pub fn is_test(&self, name: &str) -> bool {
        self.markers.iter().any(|marker| name.starts_with(marker))
    }

    /// Prefix the name with the preferred marker. Idempotent: an already
    /// marked name comes back unchanged.
    pub fn create_test_playlist_name(&self, base: &str) -> String {
        if self.is_test(base) {
            return base.to_string();
        }
        match self.markers.first() {
            Some(marker) => format!("{marker} {base}"),
            None => base.to_string(),
        }
    }

    /// Clear an operation against a playlist name.
    ///
    /// The emergency stop short-circuits everything. Otherwise the decision
    /// follows the safety level; permitted calls are appended to the audit
    /// log.
    pub fn verify_test_playlist(&self, name: &str, operation: Operation) -> Result<(), SyncError> {
        if self.emergency_stop_active() {
            return Err(SyncError::SafetyViolation(format!(
                "emergency stop is active, refusing {} on '{name}'",
                operation.as_str()
            )));
        }

        let is_test = self.is_test(name);

        match self.level {
            SafetyLevel::ReadOnly if !operation.is_read() => {
                return Err(SyncError::SafetyViolation(format!(
                    "safety level is read-only, refusing {} on '{name}'",
                    operation.as_str()
                )));
            }
            SafetyLevel::TestOnly if !operation.is_read() && !is_test => {
                return Err(SyncError::SafetyViolation(format!(
                    "'{name}' is not a test playlist, refusing {}",
                    operation.as_str()
                )));
            }
            SafetyLevel::Interactive if !operation.is_read() && !is_test => {
                let confirmed = self
                    .confirm
                    .as_ref()
                    .map(|confirm| confirm(name, operation))
                    .unwrap_or(false);
                if !confirmed {
                    return Err(SyncError::SafetyViolation(format!(
                        "{} on '{name}' was not confirmed",
                        operation.as_str()
                    )));
                }
            }
            SafetyLevel::Disabled => {
                log::warn!(
                    "Safety checks disabled, allowing {} on '{name}'",
                    operation.as_str()
                );
            }
            _ => {}
        }

        self.audit_log
            .lock()
            .unwrap()
            .push(format!("{}: {name}", operation.as_str()));

        Ok(())
    }

    /// One-way latch; stays tripped until explicitly reset.
    pub fn trip_emergency_stop(&self) {
        log::error!("Emergency stop tripped");
        self.emergency_stop.store(true, Ordering::SeqCst);
    }

    pub fn reset_emergency_stop(&self) {
        log::warn!("Emergency stop reset");
        self.emergency_stop.store(false, Ordering::SeqCst);
    }

    pub fn emergency_stop_active(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    pub fn audit_log(&self) -> Vec<String> {
        self.audit_log.lock().unwrap().clone()
    }

    pub fn clear_audit_log(&self) {
        self.audit_log.lock().unwrap().clear();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub refused: usize,
    pub missing: usize,
    /// Deletions that errored; the entries stay tracked for a retry.
    pub failed: usize,
}

/// Tracks everything an automated test run creates and tears it down at the
/// end. Refuses to run against a production environment.
pub struct TestSession {
    guard: Arc<SafetyGuard>,
    environment: String,
    active: bool,
    created: Vec<(Platform, String, String)>,
}

impl TestSession {
    pub fn new(guard: Arc<SafetyGuard>, environment: impl Into<String>) -> Self {
        Self {
            guard,
            environment: environment.into(),
            active: false,
            created: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn guard(&self) -> &Arc<SafetyGuard> {
        &self.guard
    }

    /// Validate the environment and clear the audit log.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.environment == "production" {
            return Err(SyncError::SafetyViolation(
                "refusing to start a test session in a production environment".into(),
            ));
        }
        self.guard.clear_audit_log();
        self.active = true;
        log::info!("Test session started (environment: {})", self.environment);
        Ok(())
    }

    /// Record a playlist created during this session so it gets torn down.
    pub fn register_created(
        &mut self,
        platform: Platform,
        platform_playlist_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(), SyncError> {
        if !self.active {
            return Err(SyncError::SafetyViolation(
                "test session is not active".into(),
            ));
        }
        let name = name.into();
        if !self.guard.is_test(&name) {
            return Err(SyncError::SafetyViolation(format!(
                "refusing to track non-test playlist '{name}'"
            )));
        }
        if self.created.len() >= self.guard.max_test_playlists() {
            return Err(SyncError::SafetyViolation(format!(
                "test playlist limit of {} reached",
                self.guard.max_test_playlists()
            )));
        }
        self.created
            .push((platform, platform_playlist_id.into(), name));
        Ok(())
    }

    /// Tear down everything this session created on the client's platform.
    ///
    /// Each playlist's *current* name is re-checked against the markers
    /// before deletion; a playlist renamed out of its marker is refused and
    /// logged as an error, never silently skipped. Teardown is best-effort:
    /// a failed deletion is counted and its entry stays tracked, so a later
    /// `end` call retries it instead of forgetting it.
    pub async fn end(&mut self, client: &dyn PlatformClient) -> Result<CleanupReport> {
        let platform = client.platform();
        let mut report = CleanupReport::default();

        let current = client
            .get_all_playlists()
            .await
            .wrap_err("Failed to list playlists during test session teardown")?;

        let mut remaining = Vec::new();
        for (entry_platform, playlist_id, created_name) in std::mem::take(&mut self.created) {
            if entry_platform != platform {
                remaining.push((entry_platform, playlist_id, created_name));
                continue;
            }

            let Some(playlist) = current.iter().find(|p| p.id == playlist_id) else {
                log::warn!(
                    "Test playlist '{created_name}' ({playlist_id}) already gone, skipping"
                );
                report.missing += 1;
                continue;
            };

            if !self.guard.is_test(&playlist.name) {
                log::error!(
                    "Test playlist {playlist_id} was renamed to '{}' and lost its marker, refusing deletion",
                    playlist.name
                );
                report.refused += 1;
                continue;
            }

            if let Err(e) = self
                .guard
                .verify_test_playlist(&playlist.name, Operation::Delete)
            {
                log::error!("Refusing deletion of '{}': {e}", playlist.name);
                report.failed += 1;
                remaining.push((entry_platform, playlist_id, created_name));
                continue;
            }

            match client.delete_playlist(&playlist_id).await {
                Ok(_) => {
                    log::info!("Deleted test playlist '{}' ({playlist_id})", playlist.name);
                    report.deleted += 1;
                }
                Err(e) => {
                    log::error!(
                        "Failed to delete test playlist '{}' ({playlist_id}): {e:#}",
                        playlist.name
                    );
                    report.failed += 1;
                    remaining.push((entry_platform, playlist_id, created_name));
                }
            }
        }

        self.created = remaining;
        if self.created.is_empty() {
            self.active = false;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::platform::{MockPlatformClient, PlatformPlaylist};

    fn guard(level: SafetyLevel) -> SafetyGuard {
        SafetyGuard::new(vec!["🧪".into(), "[TEST]".into()], level)
    }

    fn remote_playlist(id: &str, name: &str) -> PlatformPlaylist {
        PlatformPlaylist {
            platform: Platform::Spotify,
            id: id.into(),
            name: name.into(),
            description: None,
            is_owner: true,
            is_public: false,
            track_count: 0,
            uri: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_is_test_matches_any_marker() {
        let guard = guard(SafetyLevel::TestOnly);
        assert!(guard.is_test("🧪 My Mix"));
        assert!(guard.is_test("[TEST] My Mix"));
        assert!(!guard.is_test("My Mix"));
    }

    #[test]
    fn test_create_test_playlist_name_idempotent() {
        let guard = guard(SafetyLevel::TestOnly);
        let name = guard.create_test_playlist_name("My Mix");
        assert_eq!(name, "🧪 My Mix");
        assert_eq!(guard.create_test_playlist_name(&name), name);
        // The secondary marker also counts as already marked
        assert_eq!(
            guard.create_test_playlist_name("[TEST] My Mix"),
            "[TEST] My Mix"
        );
    }

    #[test]
    fn test_read_only_refuses_all_mutations() {
        let guard = guard(SafetyLevel::ReadOnly);
        // Marker match does not help under read-only
        let err = guard
            .verify_test_playlist("🧪 anything", Operation::Create)
            .unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
        assert!(
            guard
                .verify_test_playlist("anything", Operation::Read)
                .is_ok()
        );
    }

    #[test]
    fn test_test_only_gates_on_marker() {
        let guard = guard(SafetyLevel::TestOnly);
        assert!(
            guard
                .verify_test_playlist("🧪 My Mix", Operation::Modify)
                .is_ok()
        );
        let err = guard
            .verify_test_playlist("My Mix", Operation::Modify)
            .unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
        // Reads always pass
        assert!(
            guard
                .verify_test_playlist("My Mix", Operation::Read)
                .is_ok()
        );
    }

    #[test]
    fn test_interactive_denies_without_handler() {
        let guard = guard(SafetyLevel::Interactive);
        let err = guard
            .verify_test_playlist("My Mix", Operation::Modify)
            .unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
    }

    #[test]
    fn test_interactive_with_confirmation() {
        let guard = guard(SafetyLevel::Interactive).with_confirmation_handler(|_, _| true);
        assert!(
            guard
                .verify_test_playlist("My Mix", Operation::Modify)
                .is_ok()
        );
    }

    #[test]
    fn test_disabled_allows_everything() {
        let guard = guard(SafetyLevel::Disabled);
        assert!(
            guard
                .verify_test_playlist("My Mix", Operation::Delete)
                .is_ok()
        );
    }

    #[test]
    fn test_emergency_stop_latches_until_reset() {
        let guard = guard(SafetyLevel::Disabled);
        guard.trip_emergency_stop();

        // Even reads on test-marked names are refused
        assert!(
            guard
                .verify_test_playlist("🧪 My Mix", Operation::Read)
                .is_err()
        );
        assert!(
            guard
                .verify_test_playlist("anything", Operation::Modify)
                .is_err()
        );

        guard.reset_emergency_stop();
        assert!(
            guard
                .verify_test_playlist("anything", Operation::Modify)
                .is_ok()
        );
    }

    #[test]
    fn test_audit_log_records_permitted_calls() {
        let guard = guard(SafetyLevel::TestOnly);
        guard
            .verify_test_playlist("🧪 My Mix", Operation::Create)
            .unwrap();
        guard
            .verify_test_playlist("🧪 My Mix", Operation::Modify)
            .unwrap();
        assert_eq!(
            guard.audit_log(),
            vec!["CREATE: 🧪 My Mix", "MODIFY: 🧪 My Mix"]
        );
    }

    #[test]
    fn test_session_refuses_production() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "production");
        let err = session.start().unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
        assert!(!session.is_active());
    }

    #[test]
    fn test_session_start_clears_audit_log() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        guard
            .verify_test_playlist("🧪 Old", Operation::Create)
            .unwrap();

        let mut session = TestSession::new(guard.clone(), "development");
        session.start().unwrap();
        assert!(guard.audit_log().is_empty());
    }

    #[test]
    fn test_session_rejects_unmarked_playlists() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();

        let err = session
            .register_created(Platform::Spotify, "pl1", "My Mix")
            .unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
    }

    #[test]
    fn test_session_enforces_playlist_limit() {
        let guard = Arc::new(
            SafetyGuard::new(vec!["🧪".into()], SafetyLevel::TestOnly).with_max_test_playlists(1),
        );
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();

        session
            .register_created(Platform::Spotify, "pl1", "🧪 A")
            .unwrap();
        let err = session
            .register_created(Platform::Spotify, "pl2", "🧪 B")
            .unwrap_err();
        assert!(matches!(err, SyncError::SafetyViolation(_)));
    }

    #[tokio::test]
    async fn test_session_end_deletes_marked_playlists() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();
        session
            .register_created(Platform::Spotify, "pl1", "🧪 A")
            .unwrap();

        let mut client = MockPlatformClient::new();
        client.expect_platform().return_const(Platform::Spotify);
        client
            .expect_get_all_playlists()
            .returning(|| Ok(vec![remote_playlist("pl1", "🧪 A")]));
        client
            .expect_delete_playlist()
            .times(1)
            .returning(|_| Ok(true));

        let report = session.end(&client).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.refused, 0);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_session_end_refuses_renamed_playlist() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();
        session
            .register_created(Platform::Spotify, "pl1", "🧪 A")
            .unwrap();

        // Renamed remotely, marker gone
        let mut client = MockPlatformClient::new();
        client.expect_platform().return_const(Platform::Spotify);
        client
            .expect_get_all_playlists()
            .returning(|| Ok(vec![remote_playlist("pl1", "Keep me")]));
        client.expect_delete_playlist().times(0);

        let report = session.end(&client).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.refused, 1);
    }

    #[tokio::test]
    async fn test_session_end_retains_entries_after_delete_failure() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();
        session
            .register_created(Platform::Spotify, "pl1", "🧪 A")
            .unwrap();
        session
            .register_created(Platform::Spotify, "pl2", "🧪 B")
            .unwrap();

        // Deleting the first playlist errors; the second must still go
        let mut client = MockPlatformClient::new();
        client.expect_platform().return_const(Platform::Spotify);
        client.expect_get_all_playlists().returning(|| {
            Ok(vec![
                remote_playlist("pl1", "🧪 A"),
                remote_playlist("pl2", "🧪 B"),
            ])
        });
        client.expect_delete_playlist().returning(|id| {
            if id == "pl1" {
                Err(crate::error::SyncError::PlatformApi("server error".into()).into())
            } else {
                Ok(true)
            }
        });

        let report = session.end(&client).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 1);
        // The failed entry stays tracked, so the session is still open
        assert!(session.is_active());

        // A retry with a healthy client cleans up the leftover
        let mut retry = MockPlatformClient::new();
        retry.expect_platform().return_const(Platform::Spotify);
        retry
            .expect_get_all_playlists()
            .returning(|| Ok(vec![remote_playlist("pl1", "🧪 A")]));
        retry
            .expect_delete_playlist()
            .times(1)
            .returning(|_| Ok(true));

        let report = session.end(&retry).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 0);
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_session_end_counts_missing_playlists() {
        let guard = Arc::new(guard(SafetyLevel::TestOnly));
        let mut session = TestSession::new(guard, "development");
        session.start().unwrap();
        session
            .register_created(Platform::Spotify, "pl1", "🧪 A")
            .unwrap();

        let mut client = MockPlatformClient::new();
        client.expect_platform().return_const(Platform::Spotify);
        client.expect_get_all_playlists().returning(|| Ok(vec![]));

        let report = session.end(&client).await.unwrap();
        assert_eq!(report.missing, 1);
    }
}
