//! Pattern-based entity extraction.
//!
//! A deterministic [`Extractor`] for the phrasing analysts actually type:
//! "revenue by country last 30 days", "top 10 games by bets this month",
//! "deposits where country is UK vs last year". Phrases are consumed in a
//! fixed order (comparisons, time, limits, filters, sort, grouping), and
//! whatever text is left is scanned for dictionary metric terms.
//!
//! Anything it cannot place is left for the mapper to flag, so a missed
//! phrase becomes a clarification prompt rather than a wrong query.

use std::ops::Range;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::dictionary::{normalize_term, Aggregation, EntityDictionary};
use crate::entities::{
    Comparison, FilterValue, QueryEntities, RawDimension, RawFilter, RawMetric, RawSort,
    SortDirection, TimeRange,
};
use crate::service::{ExtractError, Extractor};

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:vs\.?|versus|compared\s+(?:to|with)|against)\s+(?:the\s+)?(?:same\s+period\s+)?(?:last|previous|prior)\s+(year|month|period)\b",
    )
    .unwrap()
});

static COMPARISON_SHORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(year\s+over\s+year|yoy|month\s+over\s+month|mom)\b").unwrap()
});

static PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:in|over|during|for)\s+)?(?:the\s+)?((?:last|past|previous)\s+(?:\d+\s+)?(?:day|week|month|quarter|year)s?|(?:this|current)\s+(?:week|month|quarter|year)|(?:week|month|quarter|year)\s+to\s+date|ytd|qtd|mtd|wtd|today|yesterday)\b",
    )
    .unwrap()
});

static TOP_N: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(top|bottom|limit)\s+(\d+)\b").unwrap());

/// field, symbolic operator, word operator, value list
const FILTER_BODY: &str = r#"([a-z][\w ]*?)(?:\s*(!=|<>|>=|<=|=|>|<)\s*|\s+(is\s+not|is\s+one\s+of|is\s+in|not\s+in|one\s+of|is|equals|not\s+equals|greater\s+than|less\s+than|more\s+than|above|below|at\s+least|at\s+most|contains|starts\s+with|ends\s+with)\s+)((?:'[^']*'|"[^"]*"|[\w.\-]+)(?:\s*(?:,|\bor\b)\s*(?:'[^']*'|"[^"]*"|[\w.\-]+))*)"#;

static FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:where|with|when)\s+{}", FILTER_BODY)).unwrap()
});

/// A further condition directly after a filter: "... and device is mobile".
static CHAINED_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^\s*and\s+{}", FILTER_BODY)).unwrap());

static SORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:sorted|ordered|order|sort)\s+by\s+([a-z][a-z ]*?)(?:\s+(asc|ascending|desc|descending))?\s*(?:$|[,.;?]|\b(?:and|for|where|with|top|limit)\b)",
    )
    .unwrap()
});

static GROUP_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:broken\s+down\s+by|split\s+by|grouped\s+by|for\s+each|by|per)\s+")
        .unwrap()
});

static LEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:show(?:\s+me)?|what\s+(?:is|was|are|were)|give\s+me|list|get|how\s+much|how\s+many)\s+(?:the\s+)?(?:total\s+)?([a-z][a-z ]*[a-z])",
    )
    .unwrap()
});

static AGGREGATION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(total|sum|average|avg|mean|count|number of|distinct|unique|minimum|min|maximum|max)\s+(?:of\s+)?$",
    )
    .unwrap()
});

/// Words that end a "by ..." grouping phrase.
const GROUP_STOP: &[&str] = &[
    "for", "where", "with", "in", "over", "during", "last", "past", "this", "top", "vs",
    "versus", "compared", "sorted", "ordered", "order", "limit", "from", "since", "when",
];

const FILLER: &[&str] = &["the", "of", "all", "my", "our", "total", "me"];

/// A dictionary metric phrase, matched case-insensitively with an optional plural.
#[derive(Debug)]
struct MetricPattern {
    regex: Regex,
}

/// Regex and dictionary driven extractor.
pub struct PatternExtractor {
    metric_patterns: Vec<MetricPattern>,
}

impl PatternExtractor {
    pub fn new(dictionary: Arc<EntityDictionary>) -> Self {
        let mut phrases: Vec<String> = Vec::new();
        for metric in dictionary.metrics() {
            let written = std::iter::once(metric.name.as_str())
                .chain(metric.synonyms.iter().map(String::as_str));
            for phrase in written {
                for form in [phrase.to_lowercase(), normalize_term(phrase)] {
                    if !form.is_empty() && !phrases.contains(&form) {
                        phrases.push(form);
                    }
                }
            }
        }
        // longest first, so "net gaming revenue" wins over "revenue"
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let metric_patterns = phrases
            .iter()
            .filter_map(|phrase| {
                let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
                Regex::new(&format!(r"(?i)\b{}(?:e?s)?\b", words.join(r"\s+")))
                    .ok()
                    .map(|regex| MetricPattern { regex })
            })
            .collect();

        Self { metric_patterns }
    }

    /// Synchronous extraction.
    pub fn extract(&self, text: &str) -> Result<QueryEntities, ExtractError> {
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyInput);
        }

        let mut entities = QueryEntities::new(text);
        let mut work = text.to_string();

        extract_comparisons(&mut work, &mut entities);
        extract_period(&mut work, &mut entities);
        let ranking = extract_limit(&mut work, &mut entities);
        extract_filters(&mut work, &mut entities);
        extract_sort(&mut work, &mut entities);
        extract_groupings(&mut work, &mut entities);
        self.extract_metrics(&mut work, &mut entities);

        if entities.sort_by.is_none() {
            if let (Some(direction), Some(first)) = (ranking, entities.metrics.first()) {
                entities.sort_by = Some(RawSort {
                    field: first.name.clone(),
                    direction,
                });
            }
        }

        entities.overall_confidence = entities
            .metrics
            .iter()
            .map(|m| m.confidence)
            .chain(entities.dimensions.iter().map(|d| d.confidence))
            .chain(entities.filters.iter().map(|f| f.confidence))
            .fold(1.0_f64, f64::min);

        Ok(entities)
    }

    fn extract_metrics(&self, work: &mut String, entities: &mut QueryEntities) {
        for pattern in &self.metric_patterns {
            while let Some(m) = pattern.regex.find(work) {
                let range = m.range();
                let surface = m.as_str().trim().to_string();
                let aggregation = AGGREGATION_PREFIX
                    .captures(&work[..range.start])
                    .and_then(|c| Aggregation::parse(&c[1]));
                let mut metric = RawMetric::new(&surface, 1.0);
                metric.aggregation = aggregation;
                entities.metrics.push(metric);
                blank(work, range);
            }
        }

        if !entities.metrics.is_empty() {
            return;
        }
        // nothing from the dictionary: hand the leading phrase to the mapper
        if let Some(caps) = LEAD.captures(work) {
            let phrase: Vec<&str> = caps[1]
                .split_whitespace()
                .filter(|w| !FILLER.contains(&w.to_lowercase().as_str()))
                .collect();
            if !phrase.is_empty() {
                entities.metrics.push(RawMetric::new(&phrase.join(" "), 0.5));
            }
        }
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    async fn extract_entities(&self, text: &str) -> Result<QueryEntities, ExtractError> {
        self.extract(text)
    }
}

/// Replace a consumed span with spaces so later offsets stay valid.
fn blank(work: &mut String, range: Range<usize>) {
    let spaces = " ".repeat(range.len());
    work.replace_range(range, &spaces);
}

fn extract_comparisons(work: &mut String, entities: &mut QueryEntities) {
    let mut found = Vec::new();
    for caps in COMPARISON.captures_iter(work) {
        let comparison = match caps[1].to_lowercase().as_str() {
            "year" => Comparison::YearOverYear,
            "month" => Comparison::MonthOverMonth,
            _ => Comparison::PreviousPeriod,
        };
        found.push((comparison, caps.get(0).map(|m| m.range())));
    }
    for caps in COMPARISON_SHORT.captures_iter(work) {
        let comparison = if caps[1].to_lowercase().starts_with('y') {
            Comparison::YearOverYear
        } else {
            Comparison::MonthOverMonth
        };
        found.push((comparison, caps.get(0).map(|m| m.range())));
    }
    for (comparison, range) in found {
        if !entities.comparisons.contains(&comparison) {
            entities.comparisons.push(comparison);
        }
        if let Some(range) = range {
            blank(work, range);
        }
    }
}

fn extract_period(work: &mut String, entities: &mut QueryEntities) {
    let Some(caps) = PERIOD.captures(work) else {
        return;
    };
    let period = caps[1].split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    entities.time_range = Some(TimeRange::relative(&period));
    if let Some(m) = caps.get(0) {
        let range = m.range();
        blank(work, range);
    }
}

/// Returns the ranking direction implied by "top"/"bottom".
fn extract_limit(work: &mut String, entities: &mut QueryEntities) -> Option<SortDirection> {
    let caps = TOP_N.captures(work)?;
    let limit: u32 = caps[2].parse().ok()?;
    let direction = match caps[1].to_lowercase().as_str() {
        "top" => Some(SortDirection::Desc),
        "bottom" => Some(SortDirection::Asc),
        _ => None,
    };
    entities.limit = Some(limit);
    if let Some(m) = caps.get(0) {
        let range = m.range();
        blank(work, range);
    }
    direction
}

fn extract_filters(work: &mut String, entities: &mut QueryEntities) {
    let mut spans = Vec::new();
    for caps in FILTER.captures_iter(work) {
        entities.filters.push(filter_from(&caps));
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let mut end = whole.end();
        spans.push(whole.range());
        while let Some(chained) = CHAINED_FILTER.captures(&work[end..]) {
            entities.filters.push(filter_from(&chained));
            let Some(m) = chained.get(0) else {
                break;
            };
            spans.push(end..end + m.end());
            end += m.end();
        }
    }
    for span in spans {
        blank(work, span);
    }
}

fn filter_from(caps: &Captures<'_>) -> RawFilter {
    let operator_word = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .unwrap_or_default();
    let operator = match operator_word.as_str() {
        "is" => "equals",
        "is not" => "not_equals",
        "is in" | "is one of" | "one of" => "in",
        "at least" => ">=",
        "at most" => "<=",
        other => other,
    };

    let mut values = split_values(&caps[4]);
    let value = match values.len() {
        0 => FilterValue::None,
        1 => FilterValue::One(values.remove(0)),
        _ => FilterValue::Many(values),
    };
    RawFilter::new(caps[1].trim(), operator, value)
}

fn split_values(raw: &str) -> Vec<String> {
    static SEPARATOR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|\bor\b)\s*").unwrap());
    SEPARATOR
        .split(raw)
        .map(|v| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn extract_sort(work: &mut String, entities: &mut QueryEntities) {
    let Some(caps) = SORT.captures(work) else {
        return;
    };
    let direction = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(d) if d.starts_with("asc") => SortDirection::Asc,
        _ => SortDirection::Desc,
    };
    entities.sort_by = Some(RawSort {
        field: caps[1].trim().to_string(),
        direction,
    });
    if let Some(field) = caps.get(1) {
        let start = caps.get(0).map_or(field.start(), |m| m.start());
        let end = caps.get(2).map_or(field.end(), |m| m.end());
        blank(work, start..end);
    }
}

fn extract_groupings(work: &mut String, entities: &mut QueryEntities) {
    while let Some(m) = GROUP_BY.find(work) {
        let start = m.start();
        let tail_start = m.end();
        let (names, consumed) = grouping_phrase(&work[tail_start..]);
        for name in names {
            entities.dimensions.push(RawDimension::new(&name, 0.9));
        }
        blank(work, start..tail_start + consumed);
    }
}

/// Dimension names after "by", and how many bytes of `tail` they span.
fn grouping_phrase(tail: &str) -> (Vec<String>, usize) {
    let mut names: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut consumed = 0;

    for token in tail.split_inclusive(|c: char| c.is_whitespace() || c == ',') {
        let word = token.trim_matches(|c: char| c.is_whitespace() || c == ',');
        let ends_phrase = word.ends_with(['.', '?', ';']);
        if !word.is_empty() {
            let lower = word.to_lowercase();
            if GROUP_STOP.contains(&lower.as_str()) {
                break;
            }
            if lower == "and" {
                flush(&mut current, &mut names);
            } else {
                current.push(word.trim_end_matches(['.', '?', ';']));
            }
        }
        consumed += token.len();
        if token.contains(',') {
            flush(&mut current, &mut names);
        }
        if ends_phrase {
            break;
        }
    }
    flush(&mut current, &mut names);
    (names, consumed)
}

fn flush(current: &mut Vec<&str>, names: &mut Vec<String>) {
    if !current.is_empty() {
        names.push(current.join(" "));
        current.clear();
    }
}
