//! Per-guild session cache
//!
//! Each guild gets one [`Session`] bundling its configuration, analysis
//! suite, last-use stamp, and busy flag. Sessions are created lazily on
//! first access, initialized exactly once even under concurrent first
//! accesses, and purged by a background sweep once idle past the TTL —
//! unless busy.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, OnceCell, RwLock};
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisSuite, SuiteFactory};
use crate::db::{ConfigStore, GuildConfig};
use crate::{Error, Result};

/// How often the purge sweep runs
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 10);

/// Idle time after which a non-busy session is evicted
pub const IDLE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 2);

/// Cache tuning knobs, mainly for tests
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub purge_interval: Duration,
    pub idle_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            purge_interval: PURGE_INTERVAL,
            idle_ttl: IDLE_TTL,
        }
    }
}

/// Initialized per-guild state
struct SessionState {
    config: RwLock<GuildConfig>,
    suite: Arc<dyn AnalysisSuite>,
}

/// One guild's cached session
///
/// `state` is set exactly once; callers only observe the session through
/// the cache, which guarantees initialization has completed first.
pub struct Session {
    guild_id: u64,
    state: OnceCell<SessionState>,
    /// Unix millis of the most recent access, only ever increasing
    last_use: AtomicI64,
    busy: AtomicBool,
    /// Signals busy -> idle transitions to `acquire` waiters
    idle: Notify,
}

impl Session {
    fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            state: OnceCell::new(),
            last_use: AtomicI64::new(Utc::now().timestamp_millis()),
            busy: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Stamp the session as just used
    fn touch(&self) {
        self.last_use
            .fetch_max(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn last_use_millis(&self) -> i64 {
        self.last_use.load(Ordering::Relaxed)
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
        if !busy {
            self.idle.notify_waiters();
        }
    }

    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Exclusive hold on a guild's long-operation slot
///
/// Dropping the guard clears the busy flag and wakes waiters, so the flag
/// is released on every exit path, including errors and panics.
pub struct BusyGuard {
    session: Arc<Session>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.session.touch();
        self.session.set_busy(false);
    }
}

/// Cache of per-guild sessions with lazy initialization and idle eviction
pub struct SessionCache {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn SuiteFactory>,
    options: CacheOptions,
    purge_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionCache {
    /// Create a cache with default purge timing
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>, factory: Arc<dyn SuiteFactory>) -> Arc<Self> {
        Self::with_options(store, factory, CacheOptions::default())
    }

    /// Create a cache with explicit purge timing
    #[must_use]
    pub fn with_options(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn SuiteFactory>,
        options: CacheOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            factory,
            options,
            purge_task: StdMutex::new(None),
        })
    }

    /// Get a guild's current configuration, creating the session on miss
    ///
    /// # Errors
    ///
    /// Returns error if the configuration store or suite initialization
    /// fails; a failed initialization is retried on the next access.
    pub async fn get_config(&self, guild_id: u64) -> Result<GuildConfig> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        let state = self.ready_state(&session).await?;
        let config = state.config.read().await.clone();
        session.touch();
        Ok(config)
    }

    /// Replace a guild's configuration in memory and write it through to
    /// the store
    ///
    /// The in-memory update lands first; a store failure is propagated
    /// after the live cache is already consistent.
    ///
    /// # Errors
    ///
    /// Returns error if session initialization or the store write fails
    pub async fn set_config(&self, guild_id: u64, config: GuildConfig) -> Result<()> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        let state = self.ready_state(&session).await?;

        *state.config.write().await = config.clone();
        session.touch();

        self.store.save(guild_id, &config)
    }

    /// Get a guild's ready analysis suite, creating the session on miss
    ///
    /// # Errors
    ///
    /// Returns error if session initialization fails
    pub async fn analysis_suite(&self, guild_id: u64) -> Result<Arc<dyn AnalysisSuite>> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        let state = self.ready_state(&session).await?;
        Ok(Arc::clone(&state.suite))
    }

    /// Set a guild's busy flag
    ///
    /// The flag is advisory: it marks a long operation in flight and
    /// shields the session from eviction, but does not block config
    /// access. Clearing it wakes [`Self::acquire`] waiters.
    ///
    /// # Errors
    ///
    /// Returns error if session initialization fails
    pub async fn set_busy(&self, guild_id: u64, busy: bool) -> Result<()> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        self.ready_state(&session).await?;
        session.set_busy(busy);
        Ok(())
    }

    /// Read a guild's busy flag
    ///
    /// # Errors
    ///
    /// Returns error if session initialization fails
    pub async fn get_busy(&self, guild_id: u64) -> Result<bool> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        self.ready_state(&session).await?;
        Ok(session.is_busy())
    }

    /// Wait until the guild is not busy, then claim the busy flag
    ///
    /// Returns a guard that releases the flag on drop. There is no
    /// timeout; callers needing bounded latency impose their own.
    ///
    /// # Errors
    ///
    /// Returns error if session initialization fails
    pub async fn acquire(&self, guild_id: u64) -> Result<BusyGuard> {
        let session = self.lookup_or_insert(guild_id).await;
        session.touch();
        self.ready_state(&session).await?;

        loop {
            let notified = session.idle.notified();
            tokio::pin!(notified);
            // Register before re-checking so a release between the check
            // and the await is not missed
            notified.as_mut().enable();

            if session.try_acquire() {
                session.touch();
                return Ok(BusyGuard {
                    session: Arc::clone(&session),
                });
            }

            notified.await;
        }
    }

    /// Whether a session currently exists for the guild
    pub async fn contains(&self, guild_id: u64) -> bool {
        self.sessions.lock().await.contains_key(&guild_id)
    }

    /// Start the background purge task
    ///
    /// Replaces any previously spawned task. The task runs until
    /// [`Self::shutdown`] aborts it.
    pub fn spawn_purge(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let interval_duration = self.options.purge_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                tracing::debug!("checking for idle sessions to purge");
                let purged = cache.sweep_at(Utc::now().timestamp_millis()).await;
                if purged > 0 {
                    tracing::info!(purged, "purged idle sessions");
                }
            }
        });

        if let Ok(mut slot) = self.purge_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the background purge task
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.purge_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Evict sessions idle past the TTL as of `now_millis`, skipping busy
    /// ones; returns the number removed
    ///
    /// Removal is silent: handles already held by callers stay valid for
    /// their current operation.
    pub async fn sweep_at(&self, now_millis: i64) -> usize {
        let ttl_millis = i64::try_from(self.options.idle_ttl.as_millis()).unwrap_or(i64::MAX);

        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();

        sessions.retain(|guild_id, session| {
            let expired = now_millis - session.last_use_millis() > ttl_millis;
            let keep = session.is_busy() || !expired;
            if !keep {
                tracing::info!(guild_id, "purging idle session");
            }
            keep
        });

        before - sessions.len()
    }

    /// Find or insert the guild's session slot
    ///
    /// The map lock is held only for the lookup; initialization happens
    /// outside it so other guilds are never blocked.
    async fn lookup_or_insert(&self, guild_id: u64) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(
            sessions
                .entry(guild_id)
                .or_insert_with(|| Arc::new(Session::new(guild_id))),
        )
    }

    /// Initialize the session if needed and return its state
    ///
    /// Exactly one caller runs the initialization; concurrent callers wait
    /// for it to finish. A failed initialization leaves the session
    /// uninitialized so the next access retries instead of reusing a
    /// broken state.
    async fn ready_state<'a>(&self, session: &'a Session) -> Result<&'a SessionState> {
        session
            .state
            .get_or_try_init(|| async {
                let config = self.store.load(session.guild_id)?;
                let suite = self.factory.build(session.guild_id, &config).await?;
                tracing::info!(guild_id = session.guild_id, "session initialized");
                Ok::<_, Error>(SessionState {
                    config: RwLock::new(config),
                    suite,
                })
            })
            .await
    }
}

impl Drop for SessionCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::analysis::IssueReport;

    struct StubSuite;

    #[async_trait]
    impl AnalysisSuite for StubSuite {
        async fn describe_images(&self, _context: &str, _urls: &[String]) -> Result<String> {
            Ok(String::new())
        }

        async fn analyze_issue(&self, _chat_log: &str, _hint: &str) -> Result<IssueReport> {
            Ok(IssueReport::default())
        }

        async fn correct_analysis(
            &self,
            report: &IssueReport,
            _comment: &str,
        ) -> Result<IssueReport> {
            Ok(report.clone())
        }

        fn render_markdown(&self, _report: &IssueReport) -> Option<(String, String)> {
            None
        }
    }

    #[derive(Default)]
    struct StubStore {
        configs: StdMutex<HashMap<u64, GuildConfig>>,
        loads: AtomicUsize,
        saves: AtomicUsize,
    }

    impl ConfigStore for StubStore {
        fn load(&self, guild_id: u64) -> Result<GuildConfig> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .configs
                .lock()
                .unwrap()
                .get(&guild_id)
                .cloned()
                .unwrap_or_default())
        }

        fn save(&self, guild_id: u64, config: &GuildConfig) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.configs.lock().unwrap().insert(guild_id, config.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubFactory {
        builds: AtomicUsize,
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl SuiteFactory for StubFactory {
        async fn build(
            &self,
            _guild_id: u64,
            _config: &GuildConfig,
        ) -> Result<Arc<dyn AnalysisSuite>> {
            // Widen the race window for concurrent first-access tests
            tokio::time::sleep(Duration::from_millis(10)).await;

            if consume_failure(self) {
                return Err(Error::Analysis("initialization failed".to_string()));
            }

            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubSuite))
        }
    }

    fn consume_failure(factory: &StubFactory) -> bool {
        factory
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn cache_with(
        store: Arc<StubStore>,
        factory: Arc<StubFactory>,
    ) -> Arc<SessionCache> {
        SessionCache::new(store, factory)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_accesses_initialize_once() {
        let store = Arc::new(StubStore::default());
        let factory = Arc::new(StubFactory::default());
        let cache = cache_with(store, Arc::clone(&factory));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.get_config(1).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(cache.contains(1).await);
    }

    #[tokio::test]
    async fn last_use_only_increases() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );

        cache.get_config(1).await.unwrap();
        let first = {
            let sessions = cache.sessions.lock().await;
            sessions.get(&1).unwrap().last_use_millis()
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get_busy(1).await.unwrap();

        let second = {
            let sessions = cache.sessions.lock().await;
            sessions.get(&1).unwrap().last_use_millis()
        };

        assert!(second >= first);
    }

    #[tokio::test]
    async fn busy_session_survives_sweeps() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );

        cache.get_config(1).await.unwrap();
        cache.set_busy(1, true).await.unwrap();

        let far_future = Utc::now().timestamp_millis() + 10 * 24 * 60 * 60 * 1000;
        for _ in 0..3 {
            cache.sweep_at(far_future).await;
        }

        assert!(cache.contains(1).await);
        assert!(cache.get_busy(1).await.unwrap());
    }

    #[tokio::test]
    async fn idle_session_is_purged_and_recreated_from_store() {
        let store = Arc::new(StubStore::default());
        let factory = Arc::new(StubFactory::default());
        let cache = cache_with(Arc::clone(&store), Arc::clone(&factory));

        let config = GuildConfig {
            github_repo: "acme/widgets".to_string(),
            ..GuildConfig::default()
        };
        cache.set_config(1, config.clone()).await.unwrap();

        let far_future = Utc::now().timestamp_millis() + 10 * 24 * 60 * 60 * 1000;
        let purged = cache.sweep_at(far_future).await;
        assert_eq!(purged, 1);
        assert!(!cache.contains(1).await);

        // Recreation loads the persisted config and rebuilds the suite
        let reloaded = cache.get_config(1).await.unwrap();
        assert_eq!(reloaded.github_repo, "acme/widgets");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fresh_session_is_not_purged() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );

        cache.get_config(1).await.unwrap();
        assert_eq!(cache.sweep_at(Utc::now().timestamp_millis()).await, 0);
        assert!(cache.contains(1).await);
    }

    #[tokio::test]
    async fn set_config_writes_through() {
        let store = Arc::new(StubStore::default());
        let cache = cache_with(Arc::clone(&store), Arc::new(StubFactory::default()));

        let config = GuildConfig {
            product_name: "Widget".to_string(),
            ..GuildConfig::default()
        };
        cache.set_config(1, config.clone()).await.unwrap();

        assert_eq!(cache.get_config(1).await.unwrap(), config);
        assert_eq!(
            store.configs.lock().unwrap().get(&1).unwrap().product_name,
            "Widget"
        );
        assert!(store.saves.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn failed_initialization_is_retried() {
        let factory = Arc::new(StubFactory {
            builds: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(1),
        });
        let cache = cache_with(Arc::new(StubStore::default()), Arc::clone(&factory));

        assert!(cache.get_config(1).await.is_err());

        // The broken attempt was not retained; the retry succeeds
        cache.get_config(1).await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn acquire_serializes_long_operations() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );
        cache.get_config(1).await.unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let running = Arc::clone(&running);
            let max_running = Arc::clone(&max_running);

            tasks.push(tokio::spawn(async move {
                let _guard = cache.acquire(1).await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_running.load(Ordering::SeqCst), 1);
        assert!(!cache.get_busy(1).await.unwrap());
    }

    #[tokio::test]
    async fn guard_drop_releases_busy_flag() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );

        {
            let _guard = cache.acquire(1).await.unwrap();
            assert!(cache.get_busy(1).await.unwrap());
        }

        assert!(!cache.get_busy(1).await.unwrap());

        // A second acquire must not hang
        let guard = tokio::time::timeout(Duration::from_secs(1), cache.acquire(1))
            .await
            .expect("acquire should not block after release")
            .unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn set_busy_false_wakes_acquire_waiters() {
        let cache = cache_with(
            Arc::new(StubStore::default()),
            Arc::new(StubFactory::default()),
        );

        cache.set_busy(1, true).await.unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let _guard = cache.acquire(1).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        cache.set_busy(1, false).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
