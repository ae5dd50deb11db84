use chrono::NaiveDate;
use nlq::config::MappingSettings;
use nlq::entities::{
    Comparison, ConflictType, EntityConflict, EntityKind, FilterOperator, FilterTarget,
    FilterValue, QueryEntities, RawFilter, ResolvedTimeRange, SortDirection, SortTarget,
};
use nlq::gaming;
use nlq::mapping::{describe_filter, MappingOutcome, EntityMapper};
use nlq::schema::FieldRef;
use nlq::sql::ParamValue;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

fn map_with(raw: &QueryEntities, settings: &MappingSettings) -> MappingOutcome {
    let dictionary = gaming::dictionary().unwrap();
    let schema = gaming::schema().unwrap();
    EntityMapper::new(&dictionary, &schema, settings, today()).map(raw)
}

fn map(raw: &QueryEntities) -> MappingOutcome {
    map_with(raw, &MappingSettings::default())
}

#[test]
fn test_resolves_synonyms_to_schema_fields() {
    let outcome = map(
        &QueryEntities::new("revenue by market")
            .with_metric("revenue", 0.95)
            .with_dimension("market", 0.9),
    );
    assert!(outcome.is_resolved());

    let ggr = outcome.mapped.metric("GGR").unwrap();
    assert_eq!(ggr.term, "revenue");
    assert_eq!(ggr.field, Some(FieldRef::new("GameActivity", "GGR")));
    assert!(!ggr.is_part_of_calculation);

    let country = outcome.mapped.dimension("Country").unwrap();
    assert_eq!(country.field, FieldRef::new("Player", "Country"));

    // no explicit sort: first requested metric, descending
    let sort = outcome.mapped.sort.unwrap();
    assert_eq!(sort.target, SortTarget::Metric("GGR".into()));
    assert_eq!(sort.direction, SortDirection::Desc);
}

#[test]
fn test_low_confidence_match_is_ambiguous() {
    let outcome = map(&QueryEntities::new("rev by country").with_metric("rev", 0.55));

    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.id, "ambiguous|metric|rev");
    assert_eq!(conflict.conflict_type, ConflictType::Ambiguous);
    assert_eq!(conflict.entity_type, EntityKind::Metric);
    assert_eq!(conflict.original_term, "rev");
    assert_eq!(conflict.suggestions, vec!["NetRevenue", "GGR"]);
    assert!(outcome.mapped.metrics.is_empty());
}

#[test]
fn test_threshold_is_configurable() {
    let raw = QueryEntities::new("rev").with_metric("rev", 0.55);
    let lenient = MappingSettings {
        confidence_threshold: 0.3,
        ..Default::default()
    };
    let outcome = map_with(&raw, &lenient);
    assert!(outcome.is_resolved());
    assert!(outcome.mapped.metric("NetRevenue").is_some());
}

#[test]
fn test_equal_scores_are_ambiguous_at_full_confidence() {
    let outcome = map(
        &QueryEntities::new("ggr by type")
            .with_metric("ggr", 1.0)
            .with_dimension("type", 1.0),
    );

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.id, "ambiguous|dimension|type");
    assert_eq!(
        conflict.suggestions,
        vec!["Bonus Type", "Game Type", "Payment Method"]
    );
    assert!(conflict.message.contains("equally well"));
    // what did map is still returned
    assert!(outcome.mapped.metric("GGR").is_some());
}

#[test]
fn test_unknown_term_offers_closest_entries() {
    let outcome = map(&QueryEntities::new("weather").with_metric("weather", 1.0));

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Unknown);
    assert_eq!(conflict.id, "unknown|metric|weather");
    assert_eq!(conflict.suggestions.len(), MappingSettings::default().max_suggestions);
}

#[test]
fn test_pinned_resolution_skips_lookup() {
    let mut raw = QueryEntities::new("rev").with_metric("rev", 0.1);
    raw.metrics[0].resolved = Some("ggr".into());
    let outcome = map(&raw);
    assert!(outcome.is_resolved());
    assert_eq!(outcome.mapped.metrics[0].name, "GGR");
    assert_eq!(outcome.mapped.metrics[0].term, "rev");
}

#[test]
fn test_unusable_pin_stays_on_the_original_term() {
    let mut raw = QueryEntities::new("zzqx").with_metric("zzqx", 1.0);
    raw.metrics[0].resolved = Some("wibble".into());
    let outcome = map(&raw);

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.id, "unknown|metric|zzqx");
    assert_eq!(conflict.original_term, "zzqx");
    assert!(conflict.message.starts_with("Answer 'wibble' for 'zzqx'"));
}

#[test]
fn test_uncoercible_value_is_invalid() {
    let outcome = map(
        &QueryEntities::new("ggr for gold vips")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::equals("vip level", "gold")),
    );

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::InvalidValue);
    assert_eq!(conflict.id, "invalid_value|filter|vip level|gold");
    assert_eq!(conflict.value.as_deref(), Some("gold"));
    assert!(outcome.mapped.filters.is_empty());
}

#[test]
fn test_operator_arity_is_checked() {
    let outcome = map(
        &QueryEntities::new("ggr between")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::new(
                "bets",
                "between",
                FilterValue::One("100".into()),
            )),
    );
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::InvalidValue);
    assert!(conflict.message.contains("expects 2 value(s), got 1"));
}

#[test]
fn test_contradictory_equals_filters_conflict() {
    let outcome = map(
        &QueryEntities::new("ggr in UK and in DE")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::equals("country", "UK"))
            .with_filter(RawFilter::equals("market", "DE")),
    );

    assert_eq!(outcome.conflicts.len(), 1);
    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Conflicting);
    assert_eq!(conflict.id, "conflicting|filter|country");
    assert_eq!(conflict.suggestions, vec!["equals UK", "equals DE", "all"]);
}

#[test]
fn test_compatible_filters_do_not_conflict() {
    let mut excluded = RawFilter::equals("country", "DE");
    excluded.negated = true;
    let outcome = map(
        &QueryEntities::new("ggr in UK not DE")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::equals("country", "UK"))
            .with_filter(excluded.clone()),
    );
    assert!(outcome.is_resolved(), "{:?}", outcome.conflicts);
    assert_eq!(outcome.mapped.filters.len(), 2);
    assert_eq!(describe_filter(&excluded), "not equals DE");
}

#[test]
fn test_list_value_becomes_in() {
    let outcome = map(
        &QueryEntities::new("ggr for UK and DE")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::new(
                "country",
                "equals",
                FilterValue::Many(vec!["UK".into(), "DE".into()]),
            )),
    );
    let filter = &outcome.mapped.filters[0];
    assert_eq!(filter.operator, FilterOperator::In);
    assert_eq!(
        filter.values,
        vec![ParamValue::Text("UK".into()), ParamValue::Text("DE".into())]
    );
}

#[test]
fn test_filter_on_metric_targets_the_aggregate() {
    let outcome = map(
        &QueryEntities::new("ggr where stakes over 1000")
            .with_metric("ggr", 1.0)
            .with_filter(RawFilter::new(
                "stakes",
                "greater_than",
                FilterValue::One("1,000".into()),
            )),
    );
    assert!(outcome.is_resolved());

    let filter = &outcome.mapped.filters[0];
    assert!(matches!(&filter.target, FilterTarget::Metric(m) if m.name == "Bets"));
    assert_eq!(filter.values, vec![ParamValue::Decimal(1000.0)]);
    assert!(outcome.mapped.metric("Bets").unwrap().is_part_of_calculation);
    assert_eq!(outcome.mapped.visible_metrics().count(), 1);
}

#[test]
fn test_dimensions_without_metric_need_one() {
    let outcome = map(&QueryEntities::new("by country").with_dimension("country", 1.0));

    let conflict = &outcome.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::MissingRequired);
    assert_eq!(conflict.entity_type, EntityKind::Metric);
    assert_eq!(
        conflict.suggestions,
        vec!["GGR", "NetRevenue", "Bets", "Wins", "Hold"]
    );

    // a bare filter does not imply aggregation
    let outcome = map(&QueryEntities::new("UK").with_filter(RawFilter::equals("country", "UK")));
    assert!(outcome.is_resolved());
}

#[test]
fn test_calculated_metric_pulls_in_constituents() {
    let outcome = map(&QueryEntities::new("hold").with_metric("margin", 1.0));
    assert!(outcome.is_resolved());

    let names: Vec<(&str, bool)> = outcome
        .mapped
        .metrics
        .iter()
        .map(|m| (m.name.as_str(), m.is_part_of_calculation))
        .collect();
    assert_eq!(names, vec![("Bets", true), ("GGR", true), ("Hold", false)]);
    assert!(outcome.mapped.metric("Hold").unwrap().is_calculated());

    // asking for a constituent directly makes it visible
    let outcome = map(
        &QueryEntities::new("hold and ggr")
            .with_metric("hold", 1.0)
            .with_metric("ggr", 1.0),
    );
    assert!(!outcome.mapped.metric("GGR").unwrap().is_part_of_calculation);
    assert_eq!(outcome.mapped.visible_metrics().count(), 2);
}

#[test]
fn test_phrasing_order_is_canonical() {
    let a = map(
        &QueryEntities::new("a")
            .with_metric("ggr", 1.0)
            .with_metric("bets", 1.0)
            .with_dimension("country", 1.0)
            .with_dimension("device", 1.0)
            .with_sort("ggr", SortDirection::Desc),
    );
    let b = map(
        &QueryEntities::new("b")
            .with_dimension("device", 1.0)
            .with_metric("bets", 1.0)
            .with_dimension("country", 1.0)
            .with_metric("ggr", 1.0)
            .with_sort("ggr", SortDirection::Desc),
    );
    assert_eq!(a.mapped, b.mapped);
    let names: Vec<&str> = a.mapped.dimensions.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Country", "Device"]);
}

#[test]
fn test_comparison_without_time_range_uses_default_period() {
    let outcome = map(
        &QueryEntities::new("ggr vs last year")
            .with_metric("ggr", 1.0)
            .with_comparison(Comparison::YearOverYear)
            .with_comparison(Comparison::YearOverYear),
    );
    assert!(outcome.is_resolved());
    assert_eq!(
        outcome.warnings,
        vec!["Comparisons need a time range; using last 30 days"]
    );
    assert_eq!(
        outcome.mapped.time_range,
        Some(ResolvedTimeRange::new(
            NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
            today()
        ))
    );
    assert_eq!(outcome.mapped.comparisons, vec![Comparison::YearOverYear]);
}

#[test]
fn test_upstream_conflicts_pass_through() {
    let mut raw = QueryEntities::new("ggr for the thing").with_metric("ggr", 1.0);
    let mut upstream =
        EntityConflict::new(ConflictType::Unknown, EntityKind::Filter, "the thing", "unclear");
    upstream.id.clear();
    raw.conflicts.push(upstream);

    let outcome = map(&raw);
    assert_eq!(outcome.conflicts.len(), 1);
    assert!(outcome.conflicts[0].upstream);
    assert_eq!(outcome.conflicts[0].id, "unknown|filter|the thing");
}
