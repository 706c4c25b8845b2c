//! Session cache integration tests
//!
//! Runs the cache against the real SQLite-backed configuration store.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;

use bugbot_gateway::SuiteFactory;
use bugbot_gateway::db::{ConfigRepo, GuildConfig};
use bugbot_gateway::session::SessionCache;

mod common;
use common::{MockFactory, MockSuite, setup_test_db};

fn cache_over_db() -> (Arc<SessionCache>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::new(Arc::new(MockSuite::default())));
    let store = Arc::new(ConfigRepo::new(setup_test_db()));
    (
        SessionCache::new(store, Arc::clone(&factory) as Arc<dyn SuiteFactory>),
        factory,
    )
}

#[tokio::test]
async fn unseen_guild_gets_default_config() {
    let (cache, factory) = cache_over_db();

    let config = cache.get_config(1).await.unwrap();
    assert_eq!(config, GuildConfig::default());
    assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn config_survives_purge_through_the_store() {
    let (cache, factory) = cache_over_db();

    let config = GuildConfig {
        github_repo: "acme/widgets".to_string(),
        issue_categories: vec!["crash".to_string(), "ui".to_string()],
        ..GuildConfig::default()
    };
    cache.set_config(1, config.clone()).await.unwrap();

    let far_future = Utc::now().timestamp_millis() + 10 * 24 * 60 * 60 * 1000;
    assert_eq!(cache.sweep_at(far_future).await, 1);
    assert!(!cache.contains(1).await);

    // The recreated session reads the persisted config back
    assert_eq!(cache.get_config(1).await.unwrap(), config);
    assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn guilds_are_isolated() {
    let (cache, _factory) = cache_over_db();

    let first = GuildConfig {
        product_name: "Widget".to_string(),
        ..GuildConfig::default()
    };
    let second = GuildConfig {
        product_name: "Gadget".to_string(),
        ..GuildConfig::default()
    };

    cache.set_config(1, first.clone()).await.unwrap();
    cache.set_config(2, second.clone()).await.unwrap();

    assert_eq!(cache.get_config(1).await.unwrap().product_name, "Widget");
    assert_eq!(cache.get_config(2).await.unwrap().product_name, "Gadget");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_accesses_share_one_suite() {
    let (cache, factory) = cache_over_db();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            cache.analysis_suite(1).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn busy_guild_is_never_swept() {
    let (cache, _factory) = cache_over_db();

    let guard = cache.acquire(1).await.unwrap();
    let far_future = Utc::now().timestamp_millis() + 10 * 24 * 60 * 60 * 1000;
    assert_eq!(cache.sweep_at(far_future).await, 0);
    assert!(cache.contains(1).await);

    drop(guard);
    assert_eq!(cache.sweep_at(far_future).await, 1);
}
