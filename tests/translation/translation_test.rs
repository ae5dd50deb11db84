use chrono::NaiveDate;
use insta::assert_snapshot;
use nlq::config::{MappingSettings, TranslationSettings};
use nlq::dictionary::EntityDictionary;
use nlq::entities::{
    Comparison, FilterValue, MappedQueryEntities, QueryEntities, RawFilter, SortDirection,
};
use nlq::gaming;
use nlq::mapping::EntityMapper;
use nlq::schema::SchemaModel;
use nlq::sql::{Dialect, ParamValue};
use nlq::translation::SqlTranslator;
use nlq::TranslateError;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
}

fn fixtures() -> (SchemaModel, EntityDictionary) {
    (gaming::schema().unwrap(), gaming::dictionary().unwrap())
}

fn map(raw: QueryEntities) -> MappedQueryEntities {
    let (schema, dictionary) = fixtures();
    let settings = MappingSettings::default();
    let outcome = EntityMapper::new(&dictionary, &schema, &settings, today()).map(&raw);
    assert!(
        outcome.is_resolved(),
        "unexpected conflicts: {:?}",
        outcome.conflicts
    );
    outcome.mapped
}

fn revenue_by_country() -> QueryEntities {
    QueryEntities::new("revenue by country last 30 days")
        .with_metric("revenue", 0.95)
        .with_dimension("country", 0.9)
        .with_time_range("last 30 days")
}

#[test]
fn test_revenue_by_country_sql() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let result = SqlTranslator::new(&schema, &settings)
        .translate(&map(revenue_by_country()))
        .unwrap();

    assert_snapshot!(result.sql, @r#"
    SELECT "Player"."Country" AS "Country", SUM("GameActivity"."GGR") AS "GGR"
    FROM "dbo"."GameActivity"
    INNER JOIN "dbo"."Player" ON "GameActivity"."PlayerID" = "Player"."PlayerID"
    WHERE "GameActivity"."ActivityDate" BETWEEN $1 AND $2
    GROUP BY "Player"."Country"
    ORDER BY SUM("GameActivity"."GGR") DESC
    LIMIT 10000
    "#);

    assert_eq!(result.parameters.len(), 2);
    assert_eq!(result.parameters[0].name, "p1");
    assert_eq!(
        result.parameters[0].value,
        ParamValue::Date(NaiveDate::from_ymd_opt(2024, 4, 15).unwrap())
    );
    assert_eq!(result.parameters[1].value, ParamValue::Date(today()));
    assert_eq!(result.required_tables, vec!["GameActivity", "Player"]);
    assert!(result.used_view.is_none());
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
}

#[test]
fn test_explanation_reads_in_plan_order() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let result = SqlTranslator::new(&schema, &settings)
        .translate(&map(revenue_by_country()))
        .unwrap();

    assert_eq!(result.explanation[0], "Read from GameActivity");
    assert_eq!(
        result.explanation[1],
        "Join Player on GameActivity.PlayerID = Player.PlayerID (N:1)"
    );
    assert_eq!(
        result.explanation[2],
        "Keep rows where GameActivity.ActivityDate is between 2024-04-15 and 2024-05-15"
    );
    assert!(result.explanation.contains(&"Group by Country".to_string()));
    assert!(result.explanation.contains(&"Compute GGR".to_string()));
    assert_eq!(
        result.explanation.last().map(String::as_str),
        Some("Return at most 10000 rows")
    );
}

#[test]
fn test_phrasing_does_not_change_sql() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let translator = SqlTranslator::new(&schema, &settings);

    let a = QueryEntities::new("ggr and bets by country and device")
        .with_metric("ggr", 1.0)
        .with_metric("bets", 1.0)
        .with_dimension("country", 1.0)
        .with_dimension("device", 1.0)
        .with_sort("ggr", SortDirection::Desc);
    let b = QueryEntities::new("stakes and gross gaming revenue by platform and market")
        .with_metric("stakes", 1.0)
        .with_metric("gross gaming revenue", 1.0)
        .with_dimension("platform", 1.0)
        .with_dimension("market", 1.0)
        .with_sort("gross gaming revenue", SortDirection::Desc);

    let first = translator.translate(&map(a.clone())).unwrap();
    let again = translator.translate(&map(a)).unwrap();
    let other = translator.translate(&map(b)).unwrap();

    assert_eq!(first.sql, again.sql);
    assert_eq!(first.sql, other.sql);
    assert_eq!(first.parameters, other.parameters);
}

#[test]
fn test_disconnected_table_has_no_join_path() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("revenue by affiliate")
            .with_metric("revenue", 1.0)
            .with_dimension("affiliate", 1.0),
    );

    let err = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap_err();
    assert_eq!(
        err,
        TranslateError::NoJoinPath {
            from: "GameActivity".into(),
            to: "Affiliates".into(),
        }
    );
    assert_eq!(err.kind(), "no_join_path");
}

#[test]
fn test_empty_projection() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let err = SqlTranslator::new(&schema, &settings)
        .translate(&MappedQueryEntities::default())
        .unwrap_err();
    assert_eq!(err, TranslateError::EmptyProjection);
}

#[test]
fn test_tsql_uses_top_and_brackets() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings {
        dialect: Dialect::TSql,
        ..Default::default()
    };
    let mapped = map(
        QueryEntities::new("top 5 games by bets this month")
            .with_metric("bets", 1.0)
            .with_dimension("game", 1.0)
            .with_limit(5)
            .with_time_range("this month"),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result.sql.starts_with("SELECT TOP 5 [Game].[GameName] AS [Game]"));
    assert!(result.sql.contains("FROM [dbo].[GameActivity]"));
    assert!(result.sql.contains("BETWEEN @p1 AND @p2"));
    assert!(!result.sql.contains("LIMIT"));
    assert_eq!(result.dialect, Dialect::TSql);
}

#[test]
fn test_date_grain_dimension() {
    let (schema, _) = fixtures();
    let mapped = map(
        QueryEntities::new("monthly ggr this year")
            .with_metric("ggr", 1.0)
            .with_dimension("month", 1.0)
            .with_time_range("this year"),
    );

    let postgres = TranslationSettings::default();
    let result = SqlTranslator::new(&schema, &postgres)
        .translate(&mapped)
        .unwrap();
    assert!(result
        .sql
        .contains(r#"GROUP BY EXTRACT(MONTH FROM "GameActivity"."ActivityDate")"#));
    assert!(result.sql.contains(r#"WHERE "GameActivity"."ActivityDate" BETWEEN $1 AND $2"#));

    let tsql = TranslationSettings {
        dialect: Dialect::TSql,
        ..Default::default()
    };
    let result = SqlTranslator::new(&schema, &tsql).translate(&mapped).unwrap();
    assert!(result
        .sql
        .contains("DATEPART(month, [GameActivity].[ActivityDate])"));
}

#[test]
fn test_metric_filter_goes_to_having() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("ggr by country where bets over 1000")
            .with_metric("ggr", 1.0)
            .with_dimension("country", 1.0)
            .with_filter(RawFilter::new(
                "bets",
                "greater_than",
                FilterValue::One("1000".into()),
            )),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result
        .sql
        .contains(r#"HAVING SUM("GameActivity"."Bets") > $1"#));
    assert!(!result.sql.contains("WHERE"));
    assert!(!result.sql.contains(r#"AS "Bets""#));
    assert_eq!(result.parameters[0].value, ParamValue::Decimal(1000.0));
    assert!(result
        .explanation
        .contains(&"Keep groups where bets greater than 1000".to_string()));
}

#[test]
fn test_contains_matches_wildcards_literally() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("bets for games containing 50%_off")
            .with_metric("bets", 1.0)
            .with_filter(RawFilter::new(
                "game",
                "contains",
                FilterValue::One("50%_off!".into()),
            )),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result.sql.contains(r#""Game"."GameName" LIKE $1 ESCAPE '!'"#));
    assert_eq!(
        result.parameters[0].value,
        ParamValue::Text("%50!%!_off!!%".into())
    );
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
}

#[test]
fn test_list_filter_binds_every_value() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("bets by game where country is UK or DE")
            .with_metric("bets", 1.0)
            .with_dimension("game", 1.0)
            .with_filter(RawFilter::new(
                "country",
                "equals",
                FilterValue::Many(vec!["UK".into(), "DE".into()]),
            )),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result.sql.contains(r#"WHERE "Player"."Country" IN ($1, $2)"#));
    let values: Vec<String> = result.parameters.iter().map(|p| p.value.to_string()).collect();
    assert_eq!(values, vec!["UK", "DE"]);
    // Game and Player are both reached from the fact table
    assert_eq!(result.required_tables, vec!["Game", "GameActivity", "Player"]);
}

#[test]
fn test_calculated_metric_expands_formula() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("hold by provider")
            .with_metric("hold", 1.0)
            .with_dimension("provider", 1.0),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result.sql.contains(
        r#"SUM("GameActivity"."GGR") / NULLIF(SUM("GameActivity"."Bets"), 0) AS "Hold""#
    ));
    assert!(!result.sql.contains(r#"AS "GGR""#));
    assert!(result.explanation.contains(&"Compute Hold".to_string()));
}

#[test]
fn test_limit_above_row_cap_is_clamped() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings {
        row_cap: 100,
        ..Default::default()
    };
    let mapped = map(
        QueryEntities::new("top 500 countries by deposits")
            .with_metric("deposits", 1.0)
            .with_dimension("country", 1.0)
            .with_limit(500),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result.sql.ends_with("LIMIT 100"));
    assert!(result.sql.contains(r#"FROM "dbo"."Transactions""#));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("exceeds the row cap")));
}

#[test]
fn test_comparison_shifts_time_range() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(revenue_by_country().with_comparison(Comparison::YearOverYear));

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert_eq!(result.comparison_queries.len(), 1);

    let yoy = &result.comparison_queries[0];
    assert_eq!(yoy.comparison, Comparison::YearOverYear);
    assert_eq!(yoy.time_range.start, NaiveDate::from_ymd_opt(2023, 4, 15).unwrap());
    assert_eq!(yoy.time_range.end, NaiveDate::from_ymd_opt(2023, 5, 15).unwrap());
    assert_eq!(yoy.sql, result.sql);
    assert_eq!(
        yoy.parameters[0].value,
        ParamValue::Date(NaiveDate::from_ymd_opt(2023, 4, 15).unwrap())
    );
}

#[test]
fn test_sort_on_dimension_ascending() {
    let (schema, _) = fixtures();
    let settings = TranslationSettings::default();
    let mapped = map(
        QueryEntities::new("deposits by payment method sorted by payment method")
            .with_metric("deposits", 1.0)
            .with_dimension("payment method", 1.0)
            .with_sort("payment method", SortDirection::Asc),
    );

    let result = SqlTranslator::new(&schema, &settings)
        .translate(&mapped)
        .unwrap();
    assert!(result
        .sql
        .contains(r#"ORDER BY "Transactions"."PaymentMethod" ASC"#));
    assert!(result
        .explanation
        .contains(&"Order by Payment Method ascending".to_string()));
}
