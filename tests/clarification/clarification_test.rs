use std::collections::BTreeMap;

use chrono::NaiveDate;
use nlq::clarification::{ClarificationCoordinator, ClarificationState, PromptKind, MERGE_ALL};
use nlq::config::MappingSettings;
use nlq::dictionary::EntityDictionary;
use nlq::entities::{ConflictType, FilterOperator, QueryEntities, RawFilter};
use nlq::gaming;
use nlq::schema::SchemaModel;
use nlq::sql::ParamValue;
use nlq::TranslateError;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

struct Fixture {
    dictionary: EntityDictionary,
    schema: SchemaModel,
    settings: MappingSettings,
}

impl Fixture {
    fn gaming() -> Self {
        Self {
            dictionary: gaming::dictionary().unwrap(),
            schema: gaming::schema().unwrap(),
            settings: MappingSettings::default(),
        }
    }

    fn coordinator(&self) -> ClarificationCoordinator<'_> {
        ClarificationCoordinator::new(&self.dictionary, &self.schema, &self.settings, today())
    }
}

fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn ambiguous_rev() -> QueryEntities {
    QueryEntities::new("rev by country")
        .with_metric("rev", 0.55)
        .with_dimension("country", 0.9)
}

#[test]
fn test_ambiguous_metric_round_trip() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();

    let first = coordinator.begin(ambiguous_rev());
    assert_eq!(first.state, ClarificationState::NeedsClarification);
    assert!(first.needs_clarification());
    assert_eq!(first.entities.snapshot.as_deref(), Some(coordinator.stamp().as_str()));
    assert_eq!(first.entities.conflicts.len(), 1);

    let prompt = &first.prompts[0];
    assert_eq!(prompt.kind, PromptKind::Selection);
    assert_eq!(prompt.conflict_id, "ambiguous|metric|rev");
    assert_eq!(prompt.options, vec!["NetRevenue", "GGR"]);
    assert!(prompt.question.contains("'rev'"));

    let second = coordinator
        .apply(&first.entities, &answers(&[("ambiguous|metric|rev", "GGR")]))
        .unwrap();
    assert_eq!(second.state, ClarificationState::Resolved);
    assert!(second.prompts.is_empty());
    assert!(second.warnings.is_empty());
    assert_eq!(second.entities.metrics[0].resolved.as_deref(), Some("GGR"));

    let mapped = &second.outcome.mapped;
    assert_eq!(mapped.metrics[0].name, "GGR");
    assert_eq!(mapped.metrics[0].term, "rev");
    assert!(mapped.dimension("Country").is_some());
}

#[test]
fn test_snapshot_survives_serialization() {
    let fixture = Fixture::gaming();
    let first = fixture.coordinator().begin(ambiguous_rev());

    // held by the caller between rounds; any coordinator over the same
    // dictionary and schema can continue
    let json = serde_json::to_string(&first.entities).unwrap();
    let restored: QueryEntities = serde_json::from_str(&json).unwrap();

    let other = Fixture::gaming();
    let round = other
        .coordinator()
        .apply(&restored, &answers(&[("ambiguous|metric|rev", "NetRevenue")]))
        .unwrap();
    assert_eq!(round.state, ClarificationState::Resolved);
    assert_eq!(round.outcome.mapped.metrics[0].name, "NetRevenue");
}

#[test]
fn test_partial_answers_keep_asking() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();

    let raw = QueryEntities::new("rev by type")
        .with_metric("rev", 0.55)
        .with_dimension("type", 1.0);
    let first = coordinator.begin(raw);
    let ids: Vec<&str> = first.prompts.iter().map(|p| p.conflict_id.as_str()).collect();
    assert_eq!(ids, vec!["ambiguous|metric|rev", "ambiguous|dimension|type"]);

    let second = coordinator
        .apply(&first.entities, &answers(&[("ambiguous|metric|rev", "GGR")]))
        .unwrap();
    assert_eq!(second.state, ClarificationState::NeedsClarification);
    assert_eq!(second.prompts.len(), 1);
    assert_eq!(second.prompts[0].conflict_id, "ambiguous|dimension|type");

    let third = coordinator
        .apply(
            &second.entities,
            &answers(&[("ambiguous|dimension|type", "Game Type")]),
        )
        .unwrap();
    assert_eq!(third.state, ClarificationState::Resolved);
    assert!(third.outcome.mapped.dimension("Game Type").is_some());
    assert!(third.outcome.mapped.metric("GGR").is_some());
}

#[test]
fn test_stale_snapshot_is_rejected() {
    let fixture = Fixture::gaming();
    let first = fixture.coordinator().begin(ambiguous_rev());

    let mut changed = gaming::schema_definition();
    changed.tables.retain(|t| t.name != "Affiliates");
    let newer = Fixture {
        schema: SchemaModel::new(changed).unwrap(),
        ..Fixture::gaming()
    };

    let err = newer
        .coordinator()
        .apply(&first.entities, &answers(&[("ambiguous|metric|rev", "GGR")]))
        .unwrap_err();
    match err {
        TranslateError::StaleClarificationContext { expected, actual } => {
            assert_eq!(expected, fixture.coordinator().stamp());
            assert_eq!(actual, newer.coordinator().stamp());
        }
        other => panic!("expected StaleClarificationContext, got {other:?}"),
    }
    assert_eq!(
        TranslateError::StaleClarificationContext {
            expected: String::new(),
            actual: String::new()
        }
        .kind(),
        "stale_clarification_context"
    );
}

#[test]
fn test_unusable_answer_can_be_corrected_next_round() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();

    let first = coordinator.begin(QueryEntities::new("zzqx by country").with_metric("zzqx", 0.9));
    assert_eq!(first.prompts[0].conflict_id, "unknown|metric|zzqx");

    // the answer is no better than the question
    let second = coordinator
        .apply(&first.entities, &answers(&[("unknown|metric|zzqx", "wibble")]))
        .unwrap();
    assert_eq!(second.state, ClarificationState::NeedsClarification);
    let ids: Vec<&str> = second.prompts.iter().map(|p| p.conflict_id.as_str()).collect();
    assert_eq!(ids, vec!["unknown|metric|zzqx"]);
    assert!(second.entities.conflicts[0].message.contains("'wibble'"));
    assert_eq!(
        second.warnings,
        vec!["Conflict 'unknown|metric|zzqx' is still unresolved after the response"]
    );

    let third = coordinator
        .apply(&second.entities, &answers(&[("unknown|metric|zzqx", "GGR")]))
        .unwrap();
    assert_eq!(third.state, ClarificationState::Resolved);
    assert!(!third.needs_clarification());
    assert!(third.warnings.is_empty());
    assert_eq!(third.outcome.mapped.metrics[0].name, "GGR");
    assert_eq!(third.outcome.mapped.metrics[0].term, "zzqx");
}

#[test]
fn test_unknown_conflict_id_is_ignored() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();
    let first = coordinator.begin(ambiguous_rev());

    let round = coordinator
        .apply(&first.entities, &answers(&[("ambiguous|metric|nope", "GGR")]))
        .unwrap();
    assert_eq!(round.state, ClarificationState::NeedsClarification);
    assert_eq!(
        round.warnings,
        vec!["No open conflict with id 'ambiguous|metric|nope'; response ignored"]
    );
    assert_eq!(round.prompts[0].conflict_id, "ambiguous|metric|rev");
}

#[test]
fn test_missing_metric_is_supplied() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();
    let first = coordinator.begin(QueryEntities::new("by country").with_dimension("country", 1.0));

    let conflict = &first.entities.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::MissingRequired);
    assert_eq!(first.prompts[0].question, "Which metric would you like to see?");

    let round = coordinator
        .apply(&first.entities, &answers(&[(conflict.id.as_str(), "Deposits")]))
        .unwrap();
    assert_eq!(round.state, ClarificationState::Resolved);
    assert!(round.outcome.mapped.metric("Deposits").is_some());
}

#[test]
fn test_conflicting_filters_merge_on_all() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();
    let raw = QueryEntities::new("ggr in UK and DE")
        .with_metric("ggr", 1.0)
        .with_filter(RawFilter::equals("country", "UK"))
        .with_filter(RawFilter::equals("market", "DE"));
    let first = coordinator.begin(raw);

    let prompt = &first.prompts[0];
    assert_eq!(prompt.kind, PromptKind::Confirmation);
    assert_eq!(prompt.options.last().map(String::as_str), Some(MERGE_ALL));

    let merged = coordinator
        .apply(&first.entities, &answers(&[(prompt.conflict_id.as_str(), "all")]))
        .unwrap();
    assert_eq!(merged.state, ClarificationState::Resolved);
    assert_eq!(merged.entities.filters.len(), 1);
    let filter = &merged.outcome.mapped.filters[0];
    assert_eq!(filter.operator, FilterOperator::In);
    assert_eq!(
        filter.values,
        vec![ParamValue::Text("UK".into()), ParamValue::Text("DE".into())]
    );

    let picked = coordinator
        .apply(
            &first.entities,
            &answers(&[(prompt.conflict_id.as_str(), "equals DE")]),
        )
        .unwrap();
    assert_eq!(picked.state, ClarificationState::Resolved);
    let filter = &picked.outcome.mapped.filters[0];
    assert_eq!(filter.operator, FilterOperator::Equals);
    assert_eq!(filter.values, vec![ParamValue::Text("DE".into())]);
}

#[test]
fn test_invalid_value_is_replaced() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();
    let raw = QueryEntities::new("ggr for gold vips")
        .with_metric("ggr", 1.0)
        .with_filter(RawFilter::equals("vip level", "gold"));
    let first = coordinator.begin(raw);

    let prompt = &first.prompts[0];
    assert_eq!(prompt.kind, PromptKind::FreeText);
    assert!(prompt.question.contains("'gold'"));

    let round = coordinator
        .apply(&first.entities, &answers(&[(prompt.conflict_id.as_str(), "3")]))
        .unwrap();
    assert_eq!(round.state, ClarificationState::Resolved);
    assert_eq!(round.outcome.mapped.filters[0].values, vec![ParamValue::Integer(3)]);
}

#[test]
fn test_empty_answer_is_reported() {
    let fixture = Fixture::gaming();
    let coordinator = fixture.coordinator();
    let first = coordinator.begin(ambiguous_rev());

    let round = coordinator
        .apply(&first.entities, &answers(&[("ambiguous|metric|rev", "  ")]))
        .unwrap();
    assert!(round.needs_clarification());
    assert_eq!(
        round.warnings,
        vec!["Response to 'ambiguous|metric|rev' not applied: empty response"]
    );
}
