use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use nlq::cache::ManualClock;
use nlq::clarification::{ClarificationState, PromptKind};
use nlq::config::Settings;
use nlq::entities::{EntityKind, QueryEntities};
use nlq::extract::PatternExtractor;
use nlq::gaming::{self, DAILY_REVENUE_VIEW};
use nlq::schema::StaticSchemaProvider;
use nlq::service::SemanticLayerService;
use nlq::sql::ParamValue;
use nlq::TranslateError;
use tokio_util::sync::CancellationToken;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

async fn service_with(settings: Settings) -> (SemanticLayerService, Arc<StaticSchemaProvider>) {
    let dictionary = Arc::new(gaming::dictionary().unwrap());
    let provider = Arc::new(StaticSchemaProvider::new(gaming::schema_definition()));
    let service = SemanticLayerService::new(
        settings,
        Arc::new(PatternExtractor::new(dictionary.clone())),
        provider.clone(),
        dictionary,
        Arc::new(ManualClock::at_date(today())),
    )
    .await
    .unwrap();
    (service, provider)
}

async fn service() -> (SemanticLayerService, Arc<StaticSchemaProvider>) {
    service_with(Settings::default()).await
}

fn answer(id: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(id.to_string(), value.to_string())])
}

#[tokio::test]
async fn test_question_to_sql_uses_covering_view() {
    let (service, _) = service().await;
    let cancel = CancellationToken::new();

    let response = service
        .translate_query("revenue by country last 30 days", Some("analyst"), &cancel)
        .await
        .unwrap();

    assert_eq!(response.state, ClarificationState::Resolved);
    assert!(!response.needs_clarification);
    assert!(response.prompts.is_empty());

    let translation = response.translation.unwrap();
    assert_eq!(translation.used_view.as_deref(), Some(DAILY_REVENUE_VIEW));
    assert_eq!(translation.required_tables, vec!["GameActivity", "Player"]);

    let sql = response.sql.unwrap();
    assert!(sql.contains(r#"SUM("mv_DailyRevenueByCountry"."TotalGGR") AS "GGR""#));
    assert!(sql.ends_with("LIMIT 10000"));

    let values: Vec<&ParamValue> = response.parameters.iter().map(|p| &p.value).collect();
    assert_eq!(
        values,
        vec![
            &ParamValue::Date(NaiveDate::from_ymd_opt(2024, 4, 15).unwrap()),
            &ParamValue::Date(today()),
        ]
    );
    assert_eq!(response.entities.original_query, "revenue by country last 30 days");
}

#[tokio::test]
async fn test_repeated_question_is_served_from_cache() {
    let (service, _) = service().await;
    let cancel = CancellationToken::new();

    let first = service
        .translate_query("revenue by country last 30 days", None, &cancel)
        .await
        .unwrap();
    // different phrasing, same meaning
    let second = service
        .translate_query("gross gaming revenue per market over the last 30 days", None, &cancel)
        .await
        .unwrap();

    assert_ne!(first.request_id, second.request_id);
    assert!(Arc::ptr_eq(
        first.translation.as_ref().unwrap(),
        second.translation.as_ref().unwrap()
    ));
    let stats = service.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    service.clear_cache();
    assert_eq!(service.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_vague_metric_round_trip() {
    let (service, _) = service().await;
    let cancel = CancellationToken::new();

    let first = service
        .translate_query("show rev by country last 30 days", None, &cancel)
        .await
        .unwrap();
    assert!(first.needs_clarification);
    assert_eq!(first.state, ClarificationState::NeedsClarification);
    assert!(first.sql.is_none());
    assert_eq!(first.conflicts.len(), 1);

    let prompt = &first.prompts[0];
    assert_eq!(prompt.kind, PromptKind::Selection);
    assert_eq!(prompt.conflict_id, "ambiguous|metric|rev");
    assert_eq!(prompt.options, vec!["NetRevenue", "GGR"]);
    assert_eq!(service.cache_stats().misses, 0);

    let second = service
        .apply_clarification(&first.entities, &answer(&prompt.conflict_id, "GGR"), &cancel)
        .await
        .unwrap();
    assert_eq!(second.state, ClarificationState::Resolved);
    assert!(second.conflicts.is_empty());
    let translation = second.translation.unwrap();
    assert_eq!(translation.used_view.as_deref(), Some(DAILY_REVENUE_VIEW));
}

#[tokio::test]
async fn test_disconnected_dimension_fails_with_no_join_path() {
    let (service, _) = service().await;
    let cancel = CancellationToken::new();

    let err = service
        .translate_query("revenue by affiliate", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "no_join_path");
    assert_eq!(
        err,
        TranslateError::NoJoinPath {
            from: "GameActivity".into(),
            to: "Affiliates".into()
        }
    );

    // same failure on a second ask, not a cached wrapper
    let again = service
        .translate_query("revenue by affiliate", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(again, err);
    assert_eq!(service.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_refresh_swaps_schema_and_clears_cache() {
    let (service, provider) = service().await;
    let cancel = CancellationToken::new();
    assert_eq!(service.schema().version, 1);

    service
        .translate_query("revenue by country last 30 days", None, &cancel)
        .await
        .unwrap();
    assert_eq!(service.cache_stats().entries, 1);

    let mut without_view = gaming::schema_definition();
    without_view.views.clear();
    provider.replace(without_view);

    assert_eq!(service.refresh_schema().await.unwrap(), 2);
    assert_eq!(service.schema().version, 2);
    assert_eq!(service.cache_stats().entries, 0);

    let response = service
        .translate_query("revenue by country last 30 days", None, &cancel)
        .await
        .unwrap();
    let translation = response.translation.unwrap();
    assert!(translation.used_view.is_none());
    assert!(response.sql.unwrap().contains(r#"FROM "dbo"."GameActivity""#));
}

#[tokio::test]
async fn test_answers_against_old_schema_are_stale() {
    let (service, provider) = service().await;
    let cancel = CancellationToken::new();

    let first = service
        .translate_query("show rev by country", None, &cancel)
        .await
        .unwrap();
    assert!(first.needs_clarification);

    let mut changed = gaming::schema_definition();
    changed.tables.retain(|t| t.name != "Affiliates");
    provider.replace(changed);
    service.refresh_schema().await.unwrap();

    let err = service
        .apply_clarification(
            &first.entities,
            &answer("ambiguous|metric|rev", "GGR"),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "stale_clarification_context");
}

#[tokio::test]
async fn test_cancelled_request() {
    let (service, _) = service().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .translate_query("revenue by country", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, TranslateError::Cancelled);

    let err = service
        .translate_entities(QueryEntities::new("x").with_metric("ggr", 1.0), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}

#[tokio::test]
async fn test_blank_question_is_an_extraction_error() {
    let (service, _) = service().await;
    let err = service
        .translate_query("   ", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "extraction_failed");
}

#[tokio::test]
async fn test_pre_extracted_entities() {
    let (service, _) = service().await;
    let entities = QueryEntities::new("top games by bets")
        .with_metric("bets", 1.0)
        .with_dimension("game", 1.0)
        .with_limit(5);

    let response = service
        .translate_entities(entities, &CancellationToken::new())
        .await
        .unwrap();
    let sql = response.sql.unwrap();
    assert!(sql.contains(r#"INNER JOIN "dbo"."Game""#));
    assert!(sql.ends_with("LIMIT 5"));
}

#[tokio::test]
async fn test_suggestions() {
    let (service, _) = service().await;
    assert_eq!(
        service.suggestions(EntityKind::Metric, "rev"),
        vec!["NetRevenue", "GGR"]
    );
    // nothing matches: nearest entries instead
    assert_eq!(service.suggestions(EntityKind::Dimension, "qqq").len(), 5);
}

#[tokio::test]
async fn test_disabled_cache_still_translates() {
    let mut settings = Settings::default();
    settings.cache.enabled = false;
    let (service, _) = service_with(settings).await;
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let response = service
            .translate_query("bets by device this month", None, &cancel)
            .await
            .unwrap();
        assert!(response.sql.is_some());
    }
    assert_eq!(service.cache_stats().entries, 0);
}
