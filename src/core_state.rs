//! Process-scoped application context.
//!
//! `AppContext` owns the record store, the connectivity monitor and the
//! sync reconciler, plus the logged-in health worker. It is created once at
//! start-up and passed explicitly to whatever presents the UI. Each
//! screening gets its own `WorkflowEngine` from `new_workflow()`.

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::auth::{AuthError, AuthProvider, UserIdentity};
use crate::config::{SyncConfig, WorkflowConfig};
use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::models::{now_utc, Locale, ScreeningStats};
use crate::screening::{Classifier, WorkflowEngine, WorkflowEvent};
use crate::store::{get_setting, keys, set_setting, RecordStore, SettingsStore, SqliteStore, StoreError};
use crate::sync::{start_sync_worker, PassReport, Reconciler, SyncEndpoint, SyncError, SyncWorkerHandle};

/// External collaborators the context wires together.
pub struct Services {
    pub auth: Arc<dyn AuthProvider>,
    pub classifier: Arc<dyn Classifier>,
    pub endpoint: Arc<dyn SyncEndpoint>,
}

/// Snapshot for a sync-status indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub pending: u32,
    pub in_flight: u32,
    pub failed: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub online: bool,
}

pub struct AppContext {
    store: Arc<SqliteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    reconciler: Arc<Reconciler>,
    auth: Arc<dyn AuthProvider>,
    classifier: Arc<dyn Classifier>,
    workflow_config: WorkflowConfig,
    user: RwLock<Option<UserIdentity>>,
}

impl AppContext {
    /// Open (or create) the database at `path` and restore the saved session.
    pub fn open(
        path: &Path,
        services: Services,
        sync_config: SyncConfig,
        workflow_config: WorkflowConfig,
    ) -> Result<Self, CoreError> {
        let store = Arc::new(SqliteStore::open(path)?);
        Self::with_store(store, services, sync_config, workflow_config)
    }

    /// In-memory context (for testing).
    pub fn in_memory(
        services: Services,
        sync_config: SyncConfig,
        workflow_config: WorkflowConfig,
    ) -> Result<Self, CoreError> {
        let store = Arc::new(SqliteStore::open_in_memory()?);
        Self::with_store(store, services, sync_config, workflow_config)
    }

    fn with_store(
        store: Arc<SqliteStore>,
        services: Services,
        sync_config: SyncConfig,
        workflow_config: WorkflowConfig,
    ) -> Result<Self, CoreError> {
        let connectivity = Arc::new(ConnectivityMonitor::load(store.clone()));
        let reconciler = Arc::new(
            Reconciler::new(store.clone(), services.endpoint, sync_config).with_settings(store.clone()),
        );

        let context = Self {
            store,
            connectivity,
            reconciler,
            auth: services.auth,
            classifier: services.classifier,
            workflow_config,
            user: RwLock::new(None),
        };
        context.restore_session()?;
        Ok(context)
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    // ── Session ─────────────────────────────────────────────

    /// Authenticate a health worker and remember them across restarts.
    pub async fn login(&self, phone: &str, password: &str) -> Result<UserIdentity, CoreError> {
        let phone = phone.trim();
        if phone.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        let user = self.auth.login(phone, password).await.map_err(|e| {
            tracing::info!(error = %e, "Login failed");
            e
        })?;

        set_setting(&*self.store, keys::USER, &user)?;
        *self.user.write().map_err(|_| CoreError::LockPoisoned)? = Some(user.clone());
        tracing::info!(user_id = %user.id, "Health worker logged in");
        Ok(user)
    }

    pub fn logout(&self) -> Result<(), CoreError> {
        SettingsStore::remove(&*self.store, keys::USER)?;
        let previous = self.user.write().map_err(|_| CoreError::LockPoisoned)?.take();
        if let Some(user) = previous {
            tracing::info!(user_id = %user.id, "Health worker logged out");
        }
        Ok(())
    }

    /// Reload the persisted identity, if any.
    pub fn restore_session(&self) -> Result<Option<UserIdentity>, CoreError> {
        let user: Option<UserIdentity> = get_setting(&*self.store, keys::USER)?;
        if let Some(user) = &user {
            tracing::debug!(user_id = %user.id, "Session restored");
        }
        *self.user.write().map_err(|_| CoreError::LockPoisoned)? = user.clone();
        Ok(user)
    }

    pub fn current_user(&self) -> Result<Option<UserIdentity>, CoreError> {
        Ok(self.user.read().map_err(|_| CoreError::LockPoisoned)?.clone())
    }

    // ── Settings ────────────────────────────────────────────

    pub fn locale(&self) -> Result<Locale, CoreError> {
        Ok(get_setting(&*self.store, keys::LANGUAGE)?.unwrap_or_default())
    }

    pub fn set_locale(&self, locale: Locale) -> Result<(), CoreError> {
        set_setting(&*self.store, keys::LANGUAGE, &locale)?;
        tracing::debug!(%locale, "Language changed");
        Ok(())
    }

    // ── Screening ───────────────────────────────────────────

    /// A fresh engine whose records are stamped with the current user.
    pub fn new_workflow(
        &self,
    ) -> Result<(WorkflowEngine, mpsc::UnboundedReceiver<WorkflowEvent>), CoreError> {
        let (mut engine, events) = WorkflowEngine::new(
            self.store.clone(),
            self.classifier.clone(),
            self.workflow_config.clone(),
        );
        engine.set_screener(self.current_user()?.map(|u| u.id));
        Ok((engine, events))
    }

    pub fn stats(&self) -> Result<ScreeningStats, CoreError> {
        Ok(self.store.stats(&now_utc())?)
    }

    // ── Sync ────────────────────────────────────────────────

    pub fn sync_summary(&self) -> Result<SyncSummary, CoreError> {
        let stats = self.stats()?;
        let last_synced_at = get_setting(&*self.store, keys::LAST_SYNC)?;
        Ok(SyncSummary {
            pending: stats.pending,
            in_flight: stats.syncing,
            failed: stats.failed,
            last_synced_at,
            online: self.connectivity.is_online(),
        })
    }

    /// Flip the connectivity signal. A running sync worker reacts to
    /// `CameOnline` with an immediate pass.
    pub fn set_online(&self, online: bool) -> Transition {
        self.connectivity.set_online(online)
    }

    /// Run one pass now, outside the worker's schedule.
    pub async fn sync_now(&self) -> Result<PassReport, CoreError> {
        if !self.connectivity.is_online() {
            return Err(CoreError::Offline);
        }
        Ok(self.reconciler.run_pass().await?)
    }

    pub fn requeue_failed(&self) -> Result<usize, CoreError> {
        Ok(self.reconciler.requeue_failed()?)
    }

    pub fn start_sync_worker(&self) -> Result<SyncWorkerHandle, CoreError> {
        start_sync_worker(self.reconciler.clone(), self.connectivity.subscribe())
            .map_err(|_| CoreError::NoRuntime)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("Device is offline")]
    Offline,
    #[error("No async runtime available")]
    NoRuntime,
    #[error("Internal lock error")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::*;
    use crate::models::{Eye, SyncStatus};
    use crate::screening::Step;
    use crate::test_support::*;

    struct FakeAuth {
        calls: AtomicUsize,
    }

    impl AuthProvider for FakeAuth {
        fn login<'a>(
            &'a self,
            phone: &'a str,
            password: &'a str,
        ) -> BoxFuture<'a, Result<UserIdentity, AuthError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if phone == "08031234567" && password == "secret" {
                    Ok(UserIdentity {
                        id: "chw-0803".into(),
                        name: "Hauwa Bello".into(),
                        phone: phone.into(),
                    })
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            })
        }
    }

    fn services(endpoint: Arc<ScriptedEndpoint>) -> (Services, Arc<FakeAuth>) {
        let auth = Arc::new(FakeAuth {
            calls: AtomicUsize::new(0),
        });
        let services = Services {
            auth: auth.clone(),
            classifier: Arc::new(StaticClassifier::ok("Normal", 93.0)),
            endpoint,
        };
        (services, auth)
    }

    fn sync_config() -> SyncConfig {
        SyncConfig {
            tick_interval: Duration::from_secs(3600),
            submit_timeout: Duration::from_secs(5),
            max_concurrent: 1,
            ..SyncConfig::default()
        }
    }

    fn context() -> (AppContext, Arc<ScriptedEndpoint>, Arc<FakeAuth>) {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let (services, auth) = services(endpoint.clone());
        let context =
            AppContext::in_memory(services, sync_config(), WorkflowConfig::default()).unwrap();
        (context, endpoint, auth)
    }

    async fn submit_screening(context: &AppContext, name: &str) -> crate::models::ScreeningRecord {
        let (mut engine, _events) = context.new_workflow().unwrap();
        engine
            .edit_patient(|p| {
                p.name = name.into();
                p.age = Some(40);
                p.gender = "M".into();
            })
            .unwrap();
        engine.advance(Step::Capture).unwrap();
        engine.capture(Eye::Right, checkerboard_png(300, 300, 4)).unwrap();
        engine.capture(Eye::Left, checkerboard_png(300, 300, 7)).unwrap();
        engine.advance(Step::Review).unwrap();
        engine.wait_for_analysis().await;
        engine.submit().unwrap()
    }

    #[tokio::test]
    async fn empty_credentials_never_reach_provider() {
        let (context, _endpoint, auth) = context();
        for (phone, password) in [("", "secret"), ("  ", "secret"), ("08031234567", "")] {
            let err = context.login(phone, password).await.unwrap_err();
            assert!(matches!(err, CoreError::Auth(AuthError::MissingCredentials)));
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_login_leaves_no_session() {
        let (context, _endpoint, _auth) = context();
        let err = context.login("08031234567", "wrong").await.unwrap_err();
        assert!(matches!(err, CoreError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(context.current_user().unwrap(), None);
    }

    #[tokio::test]
    async fn session_survives_restart_until_logout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screening.db");

        {
            let (services, _auth) = services(Arc::new(ScriptedEndpoint::new()));
            let context =
                AppContext::open(&path, services, sync_config(), WorkflowConfig::default()).unwrap();
            context.login(" 08031234567 ", "secret").await.unwrap();
        }

        let (services, _auth) = services(Arc::new(ScriptedEndpoint::new()));
        let context =
            AppContext::open(&path, services, sync_config(), WorkflowConfig::default()).unwrap();
        assert_eq!(context.current_user().unwrap().unwrap().id, "chw-0803");

        context.logout().unwrap();
        assert_eq!(context.current_user().unwrap(), None);
        assert_eq!(context.restore_session().unwrap(), None);
    }

    #[test]
    fn locale_defaults_to_english_and_persists() {
        let (context, _endpoint, _auth) = context();
        assert_eq!(context.locale().unwrap(), Locale::En);
        context.set_locale(Locale::Ha).unwrap();
        assert_eq!(context.locale().unwrap(), Locale::Ha);
    }

    #[tokio::test]
    async fn records_carry_logged_in_screener() {
        let (context, _endpoint, _auth) = context();
        context.login("08031234567", "secret").await.unwrap();

        let record = submit_screening(&context, "Aisha").await;
        assert_eq!(record.recorded_by.as_deref(), Some("chw-0803"));
        assert_eq!(record.result.as_ref().map(|r| r.label.as_str()), Some("Normal"));
    }

    #[tokio::test]
    async fn sync_now_requires_connectivity() {
        let (context, endpoint, _auth) = context();
        submit_screening(&context, "Aisha").await;
        context.set_online(false);

        assert!(matches!(context.sync_now().await, Err(CoreError::Offline)));
        assert!(endpoint.calls().is_empty());

        context.set_online(true);
        let report = context.sync_now().await.unwrap();
        assert_eq!(report.synced, 1);

        let summary = context.sync_summary().unwrap();
        assert_eq!(summary.pending, 0);
        assert!(summary.online);
        assert!(summary.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn offline_screenings_sync_when_connectivity_returns() {
        let (context, endpoint, _auth) = context();
        context.set_online(false);
        let worker = context.start_sync_worker().unwrap();

        let first = submit_screening(&context, "Aisha").await;
        let second = submit_screening(&context, "Musa").await;

        let summary = context.sync_summary().unwrap();
        assert_eq!(summary.pending, 2);
        assert!(!summary.online);
        assert_eq!(summary.last_synced_at, None);

        assert_eq!(context.set_online(true), Transition::CameOnline);
        tokio::time::timeout(Duration::from_secs(5), async {
            while context.stats().unwrap().synced < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(endpoint.calls(), vec![first.id, second.id]);
        for record in context.store().list_all().unwrap() {
            assert_eq!(record.sync_status, SyncStatus::Synced);
        }
        worker.join().await;
    }

    #[tokio::test]
    async fn failed_records_can_be_requeued() {
        let endpoint = Arc::new(ScriptedEndpoint::with_script(vec![Err(
            SyncError::from_status(400, "bad record".into()),
        )]));
        let (services, _auth) = services(endpoint.clone());
        let context = AppContext::in_memory(services, sync_config(), WorkflowConfig::default()).unwrap();

        submit_screening(&context, "Aisha").await;
        context.sync_now().await.unwrap();
        assert_eq!(context.sync_summary().unwrap().failed, 1);

        assert_eq!(context.requeue_failed().unwrap(), 1);
        context.sync_now().await.unwrap();
        assert_eq!(context.stats().unwrap().synced, 1);
    }
}
