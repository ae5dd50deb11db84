//! Entity dictionary - business vocabulary mapped to schema fields.
//!
//! Metrics and dimensions are looked up by `(EntityKind, normalized term)`.
//! Matching follows a fixed confidence ladder:
//!
//! | Rule                          | Score |
//! |-------------------------------|-------|
//! | term equals name              | 1.0   |
//! | term equals a synonym         | 0.9   |
//! | term contains name (word)     | 0.8   |
//! | term contains a synonym       | 0.7   |
//! | name contains term            | 0.6   |
//! | a synonym contains term       | 0.5   |
//! | fuzzy (Levenshtein) match     | similarity x 0.4 |
//!
//! The dictionary is immutable once built. Its fingerprint lets callers
//! detect that a clarification snapshot was taken against another version.

mod formula;
mod normalize;

pub use formula::{Formula, FormulaOp};
pub use normalize::{contains_word, normalize_term, singularize};

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::cache::compute_hash;
use crate::config::MappingSettings;
use crate::entities::EntityKind;
use crate::schema::{DataType, FieldRef, SchemaModel};

/// Errors raised while building a dictionary.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryError {
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("Metric '{0}' has neither a field nor a formula")]
    MissingField(String),

    #[error("Invalid formula for metric '{metric}': {reason}")]
    InvalidFormula { metric: String, reason: String },

    #[error("Formula for metric '{0}' is cyclic")]
    CyclicFormula(String),

    #[error("Failed to parse dictionary definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read dictionary definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fingerprint dictionary: {0}")]
    Fingerprint(String),
}

// ============================================================================
// Vocabulary types
// ============================================================================

/// Aggregate function applied to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
}

impl Aggregation {
    /// Parse a user or config word (`total`, `average`, `distinct count`, ...).
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "sum" | "total" => Some(Aggregation::Sum),
            "avg" | "average" | "mean" => Some(Aggregation::Avg),
            "count" | "number of" => Some(Aggregation::Count),
            "count distinct" | "distinct count" | "unique" | "distinct" => {
                Some(Aggregation::CountDistinct)
            }
            "min" | "minimum" | "lowest" => Some(Aggregation::Min),
            "max" | "maximum" | "highest" => Some(Aggregation::Max),
            _ => None,
        }
    }

    pub fn sql_function(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Count | Aggregation::CountDistinct => "COUNT",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }

    /// Whether aggregating pre-aggregated values gives the same answer.
    pub fn is_reaggregable(&self) -> bool {
        matches!(self, Aggregation::Sum | Aggregation::Min | Aggregation::Max)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        };
        f.write_str(s)
    }
}

/// Calendar grain of a date dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DateGrain {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            DateGrain::Day => "DAY",
            DateGrain::Week => "WEEK",
            DateGrain::Month => "MONTH",
            DateGrain::Quarter => "QUARTER",
            DateGrain::Year => "YEAR",
        }
    }
}

fn default_decimal() -> DataType {
    DataType::Decimal
}

/// A business metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Physical column; `None` for calculated metrics.
    #[serde(default)]
    pub field: Option<FieldRef>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(rename = "type", default = "default_decimal")]
    pub data_type: DataType,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// e.g. `"[Bets] - [Wins]"`
    #[serde(default)]
    pub formula: Option<String>,
}

impl MetricDefinition {
    pub fn new(name: &str, field: FieldRef, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            field: Some(field),
            aggregation,
            data_type: DataType::Decimal,
            category: None,
            synonyms: Vec::new(),
            formula: None,
        }
    }

    pub fn calculated(name: &str, formula: &str) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            field: None,
            aggregation: Aggregation::Sum,
            data_type: DataType::Decimal,
            category: None,
            synonyms: Vec::new(),
            formula: Some(formula.into()),
        }
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn is_calculated(&self) -> bool {
        self.formula.is_some()
    }
}

/// A business dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub field: FieldRef,
    #[serde(default)]
    pub grain: Option<DateGrain>,
    #[serde(default)]
    pub is_date: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl DimensionDefinition {
    pub fn new(name: &str, field: FieldRef) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            field,
            grain: None,
            is_date: false,
            category: None,
            synonyms: Vec::new(),
        }
    }

    /// A date dimension, optionally bucketed to a grain.
    pub fn date(name: &str, field: FieldRef, grain: Option<DateGrain>) -> Self {
        Self {
            grain,
            is_date: true,
            ..Self::new(name, field)
        }
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Serializable dictionary content, the input to [`EntityDictionary::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DictionaryDefinition {
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub dimensions: Vec<DimensionDefinition>,
}

/// A scored dictionary match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub kind: EntityKind,
    pub name: String,
    pub score: f64,
}

// ============================================================================
// Dictionary
// ============================================================================

/// Normalized vocabulary of one entry.
#[derive(Debug, Clone)]
struct Terms {
    name: String,
    synonyms: Vec<String>,
}

/// Immutable, validated vocabulary.
#[derive(Debug, Clone)]
pub struct EntityDictionary {
    definition: DictionaryDefinition,
    metric_terms: Vec<Terms>,
    dimension_terms: Vec<Terms>,
    /// (kind, normalized name or synonym) -> entry indexes
    index: HashMap<(EntityKind, String), Vec<usize>>,
    /// Parsed formulas with references rewritten to canonical names.
    formulas: HashMap<usize, Formula>,
    fingerprint: String,
}

impl EntityDictionary {
    pub fn new(definition: DictionaryDefinition) -> Result<Self, DictionaryError> {
        let terms_of = |name: &str, synonyms: &[String]| Terms {
            name: normalize_term(name),
            synonyms: synonyms.iter().map(|s| normalize_term(s)).collect(),
        };

        let metric_terms: Vec<Terms> = definition
            .metrics
            .iter()
            .map(|m| terms_of(&m.name, &m.synonyms))
            .collect();
        let dimension_terms: Vec<Terms> = definition
            .dimensions
            .iter()
            .map(|d| terms_of(&d.name, &d.synonyms))
            .collect();

        let mut index: HashMap<(EntityKind, String), Vec<usize>> = HashMap::new();
        for (kind, all_terms, names) in [
            (
                EntityKind::Metric,
                &metric_terms,
                definition.metrics.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            ),
            (
                EntityKind::Dimension,
                &dimension_terms,
                definition.dimensions.iter().map(|d| d.name.as_str()).collect(),
            ),
        ] {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            for (i, terms) in all_terms.iter().enumerate() {
                if seen.insert(terms.name.as_str(), i).is_some() {
                    return Err(DictionaryError::DuplicateName {
                        kind,
                        name: names[i].to_string(),
                    });
                }
                for key in std::iter::once(&terms.name).chain(terms.synonyms.iter()) {
                    let entry = index.entry((kind, key.clone())).or_default();
                    if !entry.contains(&i) {
                        entry.push(i);
                    }
                }
            }
        }

        let mut formulas = HashMap::new();
        for (i, metric) in definition.metrics.iter().enumerate() {
            match (&metric.formula, &metric.field) {
                (Some(src), _) => {
                    let parsed =
                        Formula::parse(src).map_err(|reason| DictionaryError::InvalidFormula {
                            metric: metric.name.clone(),
                            reason,
                        })?;
                    // references resolve by metric name; unknown ones stay as written
                    let canonical = parsed.map_refs(&|r: &str| {
                        let key = normalize_term(r);
                        metric_terms
                            .iter()
                            .position(|t| t.name == key)
                            .map(|idx| definition.metrics[idx].name.clone())
                            .unwrap_or_else(|| r.to_string())
                    });
                    formulas.insert(i, canonical);
                }
                (None, Some(_)) => {}
                (None, None) => return Err(DictionaryError::MissingField(metric.name.clone())),
            }
        }

        check_formula_cycles(&definition, &formulas)?;

        let fingerprint =
            compute_hash(&definition).map_err(|e| DictionaryError::Fingerprint(e.to_string()))?;

        Ok(Self {
            definition,
            metric_terms,
            dimension_terms,
            index,
            formulas,
            fingerprint,
        })
    }

    /// Parse and validate a TOML dictionary definition.
    pub fn from_toml_str(content: &str) -> Result<Self, DictionaryError> {
        let definition: DictionaryDefinition = toml::from_str(content)?;
        Self::new(definition)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn definition(&self) -> &DictionaryDefinition {
        &self.definition
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.definition.metrics
    }

    pub fn dimensions(&self) -> &[DimensionDefinition] {
        &self.definition.dimensions
    }

    /// Metric by name (normalized comparison).
    pub fn metric(&self, name: &str) -> Option<&MetricDefinition> {
        let key = normalize_term(name);
        self.metric_terms
            .iter()
            .position(|t| t.name == key)
            .map(|i| &self.definition.metrics[i])
    }

    /// Dimension by name (normalized comparison).
    pub fn dimension(&self, name: &str) -> Option<&DimensionDefinition> {
        let key = normalize_term(name);
        self.dimension_terms
            .iter()
            .position(|t| t.name == key)
            .map(|i| &self.definition.dimensions[i])
    }

    /// Parsed formula of a calculated metric.
    pub fn formula(&self, metric_name: &str) -> Option<&Formula> {
        let key = normalize_term(metric_name);
        let idx = self.metric_terms.iter().position(|t| t.name == key)?;
        self.formulas.get(&idx)
    }

    fn entry_name(&self, kind: EntityKind, idx: usize) -> &str {
        match kind {
            EntityKind::Metric => &self.definition.metrics[idx].name,
            _ => &self.definition.dimensions[idx].name,
        }
    }

    fn terms(&self, kind: EntityKind) -> &[Terms] {
        match kind {
            EntityKind::Metric => &self.metric_terms,
            EntityKind::Dimension => &self.dimension_terms,
            _ => &[],
        }
    }

    /// Score every entry of `kind` against `term`.
    ///
    /// Results are sorted by score (descending), then name.
    pub fn lookup(&self, kind: EntityKind, term: &str, options: &MappingSettings) -> Vec<Candidate> {
        let text = normalize_term(term);
        if text.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<Candidate> = Vec::new();

        // exact name or synonym through the index
        if let Some(hits) = self.index.get(&(kind, text.clone())) {
            for &i in hits {
                let score = if self.terms(kind)[i].name == text { 1.0 } else { 0.9 };
                candidates.push(Candidate {
                    kind,
                    name: self.entry_name(kind, i).to_string(),
                    score,
                });
            }
        }

        for (i, terms) in self.terms(kind).iter().enumerate() {
            let name = self.entry_name(kind, i);
            if candidates.iter().any(|c| c.name == name) {
                continue;
            }
            let score = ladder_score(&text, terms, options);
            if score > 0.0 {
                candidates.push(Candidate {
                    kind,
                    name: name.to_string(),
                    score,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates
    }

    /// Up to `max_suggestions` entry names matching `term`.
    pub fn suggestions(&self, kind: EntityKind, term: &str, options: &MappingSettings) -> Vec<String> {
        self.lookup(kind, term, options)
            .into_iter()
            .take(options.max_suggestions)
            .map(|c| c.name)
            .collect()
    }

    /// The `n` entry names nearest to `term` by edit distance, with no
    /// similarity floor. Used to offer alternatives for unknown terms.
    pub fn closest(&self, kind: EntityKind, term: &str, n: usize) -> Vec<String> {
        let text = normalize_term(term);
        let mut scored: Vec<(f64, &str)> = self
            .terms(kind)
            .iter()
            .enumerate()
            .map(|(i, terms)| {
                let best = std::iter::once(&terms.name)
                    .chain(terms.synonyms.iter())
                    .map(|candidate| strsim::normalized_levenshtein(&text, candidate))
                    .fold(0.0_f64, f64::max);
                (best, self.entry_name(kind, i))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        scored.into_iter().take(n).map(|(_, name)| name.to_string()).collect()
    }

    /// Entries whose fields do not exist in `schema`.
    pub fn validate_against(&self, schema: &SchemaModel) -> Vec<String> {
        let mut issues = Vec::new();
        for metric in &self.definition.metrics {
            if let Some(field) = &metric.field {
                if schema.column(field).is_none() {
                    issues.push(format!("metric '{}' references unknown field {}", metric.name, field));
                }
            }
        }
        for dim in &self.definition.dimensions {
            match schema.column(&dim.field) {
                None => issues.push(format!(
                    "dimension '{}' references unknown field {}",
                    dim.name, dim.field
                )),
                Some(col) if dim.is_date && !col.data_type.is_temporal() => issues.push(format!(
                    "date dimension '{}' references non-date field {}",
                    dim.name, dim.field
                )),
                Some(_) => {}
            }
        }
        for (i, formula) in &self.formulas {
            for reference in formula.references() {
                if self.metric(reference).is_none() {
                    issues.push(format!(
                        "metric '{}' formula references unknown metric '{}'",
                        self.definition.metrics[*i].name, reference
                    ));
                }
            }
        }
        issues.sort();
        issues
    }

    /// SHA-256 over the serialized definition.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn ladder_score(text: &str, terms: &Terms, options: &MappingSettings) -> f64 {
    if contains_word(text, &terms.name) {
        return 0.8;
    }
    if terms.synonyms.iter().any(|s| contains_word(text, s)) {
        return 0.7;
    }
    if terms.name.contains(text) {
        return 0.6;
    }
    if terms.synonyms.iter().any(|s| s.contains(text)) {
        return 0.5;
    }
    if options.fuzzy_matching {
        let best = std::iter::once(&terms.name)
            .chain(terms.synonyms.iter())
            .map(|candidate| strsim::normalized_levenshtein(text, candidate))
            .fold(0.0_f64, f64::max);
        if best >= options.fuzzy_min_similarity {
            return best * 0.4;
        }
    }
    0.0
}

/// Reject calculated metrics that (transitively) reference themselves.
fn check_formula_cycles(
    definition: &DictionaryDefinition,
    formulas: &HashMap<usize, Formula>,
) -> Result<(), DictionaryError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<_> = (0..definition.metrics.len()).map(|i| graph.add_node(i)).collect();

    for (&i, formula) in formulas {
        for reference in formula.references() {
            if let Some(j) = definition.metrics.iter().position(|m| m.name == reference) {
                graph.add_edge(nodes[i], nodes[j], ());
            }
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        let idx = graph[cycle.node_id()];
        DictionaryError::CyclicFormula(definition.metrics[idx].name.clone())
    })
}
