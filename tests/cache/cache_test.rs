use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use nlq::cache::{CacheKey, CacheTier, ManualClock, TranslationCache};
use nlq::config::{CacheSettings, MappingSettings};
use nlq::entities::{MappedQueryEntities, QueryEntities, TimeRange};
use nlq::gaming;
use nlq::mapping::EntityMapper;
use nlq::translation::SqlTranslationResult;
use nlq::{TranslateError, TranslateResult};
use tokio_util::sync::CancellationToken;

const SCOPE: &str = "dictionary/schema";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn mapped(metric: &str, range: TimeRange) -> MappedQueryEntities {
    let schema = gaming::schema().unwrap();
    let dictionary = gaming::dictionary().unwrap();
    let settings = MappingSettings::default();
    let mut raw = QueryEntities::new(metric)
        .with_metric(metric, 1.0)
        .with_dimension("country", 1.0);
    raw.time_range = Some(range);
    let outcome = EntityMapper::new(&dictionary, &schema, &settings, today()).map(&raw);
    assert!(outcome.is_resolved(), "{:?}", outcome.conflicts);
    outcome.mapped
}

fn live() -> MappedQueryEntities {
    mapped("ggr", TimeRange::relative("last 30 days"))
}

fn historical() -> MappedQueryEntities {
    mapped(
        "ggr",
        TimeRange {
            relative_period: None,
            start: Some(date(2024, 1, 1)),
            end: Some(date(2024, 1, 31)),
        },
    )
}

fn cache_with(settings: CacheSettings) -> (TranslationCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_date(today()));
    (TranslationCache::new(settings, clock.clone()), clock)
}

fn translated(sql: &str) -> SqlTranslationResult {
    SqlTranslationResult {
        sql: sql.to_string(),
        ..Default::default()
    }
}

async fn counted(
    cache: &TranslationCache,
    entities: &MappedQueryEntities,
    calls: &AtomicUsize,
) -> TranslateResult<Arc<SqlTranslationResult>> {
    let cancel = CancellationToken::new();
    cache
        .get_or_compute(entities, SCOPE, &cancel, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(translated("SELECT 1"))
        })
        .await
}

#[tokio::test]
async fn test_concurrent_callers_share_one_computation() {
    let (cache, _) = cache_with(CacheSettings::default());
    let entities = live();
    let calls = AtomicUsize::new(0);

    let results = join_all((0..8).map(|_| counted(&cache, &entities, &calls))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_sequential_calls_hit() {
    let (cache, _) = cache_with(CacheSettings::default());
    let entities = live();
    let calls = AtomicUsize::new(0);

    let a = counted(&cache, &entities, &calls).await.unwrap();
    let b = counted(&cache, &entities, &calls).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // a different scope is a different entry
    let cancel = CancellationToken::new();
    let counter = &calls;
    cache
        .get_or_compute(&entities, "other/scope", &cancel, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(translated("SELECT 2"))
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().entries, 2);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_is_not_cached() {
    let (cache, _) = cache_with(CacheSettings::default());
    let entities = live();
    let calls = AtomicUsize::new(0);

    let failing = || {
        let cancel = CancellationToken::new();
        let cache = &cache;
        let entities = &entities;
        let calls = &calls;
        async move {
            cache
                .get_or_compute(entities, SCOPE, &cancel, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Err(TranslateError::NoJoinPath {
                        from: "GameActivity".into(),
                        to: "Affiliates".into(),
                    })
                })
                .await
        }
    };

    let results = join_all((0..3).map(|_| failing())).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "cache_compute_failed");
        assert_eq!(err.root_cause().kind(), "no_join_path");
    }
    assert_eq!(cache.stats().entries, 0);

    failing().await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_leader_hands_off_to_waiter() {
    let (cache, _) = cache_with(CacheSettings::default());
    let entities = live();
    let calls = AtomicUsize::new(0);
    let leader_token = CancellationToken::new();
    let waiter_token = CancellationToken::new();
    let counter = &calls;

    let leader = cache.get_or_compute(&entities, SCOPE, &leader_token, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<TranslateResult<SqlTranslationResult>>().await
    });
    let waiter = cache.get_or_compute(&entities, SCOPE, &waiter_token, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(translated("SELECT 1"))
    });
    let cancel = async {
        tokio::task::yield_now().await;
        leader_token.cancel();
    };

    let (leader, waiter, ()) = tokio::join!(leader, waiter, cancel);
    assert_eq!(leader.unwrap_err(), TranslateError::Cancelled);
    assert_eq!(waiter.unwrap().sql, "SELECT 1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().entries, 1);
}

#[tokio::test]
async fn test_live_entries_expire_before_historical_ones() {
    let (cache, clock) = cache_with(CacheSettings::default());
    let live = live();
    let historical = historical();
    assert_eq!(cache.tier_for(&live), CacheTier::Live);
    assert_eq!(cache.tier_for(&historical), CacheTier::Historical);

    let calls = AtomicUsize::new(0);
    counted(&cache, &live, &calls).await.unwrap();
    counted(&cache, &historical, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.advance(Duration::from_secs(301));

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.keys[0].tier, CacheTier::Historical);

    counted(&cache, &historical, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    counted(&cache, &live, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(86_400));
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_invalidate_and_clear() {
    let (cache, _) = cache_with(CacheSettings::default());
    let entities = live();
    let calls = AtomicUsize::new(0);
    counted(&cache, &entities, &calls).await.unwrap();

    let key = CacheKey::for_mapped(&entities, SCOPE).unwrap();
    assert_eq!(cache.stats().keys[0].key, key);
    assert!(cache.invalidate(&key));
    assert!(!cache.invalidate(&key));

    counted(&cache, &entities, &calls).await.unwrap();
    counted(&cache, &entities, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    cache.clear();
    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_disabled_cache_always_computes() {
    let (cache, _) = cache_with(CacheSettings {
        enabled: false,
        ..Default::default()
    });
    let entities = live();
    let calls = AtomicUsize::new(0);

    counted(&cache, &entities, &calls).await.unwrap();
    counted(&cache, &entities, &calls).await.unwrap();
    assert!(!cache.is_enabled());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test]
async fn test_capacity_bounds_entries() {
    let (cache, _) = cache_with(CacheSettings {
        capacity: 1,
        ..Default::default()
    });
    let calls = AtomicUsize::new(0);

    counted(&cache, &live(), &calls).await.unwrap();
    counted(&cache, &historical(), &calls).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.capacity, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.keys[0].tier, CacheTier::Historical);
}
