use std::collections::BTreeSet;

use nlq::gaming;
use nlq::schema::{
    Cardinality, Column, DataType, Relationship, SchemaDefinition, SchemaModel, Table, TableKind,
    TieBreak,
};

fn joined(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Sales reaches Region through either Store or Customer.
fn diamond() -> SchemaModel {
    let table = |name: &str, kind: TableKind, columns: &[&str]| {
        columns.iter().fold(Table::new(name, kind), |t, c| {
            t.with_column(Column::new(*c, DataType::Integer))
        })
    };
    SchemaModel::new(SchemaDefinition {
        tables: vec![
            table("Sales", TableKind::Fact, &["SaleID", "StoreID", "CustomerID", "Amount"]),
            table("Store", TableKind::Dimension, &["StoreID", "RegionID"]),
            table("Customer", TableKind::Dimension, &["CustomerID", "RegionID"]),
            table("Region", TableKind::Dimension, &["RegionID"]),
        ],
        views: vec![],
        relationships: vec![
            Relationship::new("Sales", "StoreID", "Store", "StoreID"),
            Relationship::new("Sales", "CustomerID", "Customer", "CustomerID"),
            Relationship::new("Store", "RegionID", "Region", "RegionID"),
            Relationship::new("Customer", "RegionID", "Region", "RegionID"),
        ],
    })
    .unwrap()
}

#[test]
fn test_direct_relationship() {
    let schema = gaming::schema().unwrap();
    let path = schema
        .find_join_path("GameActivity", "Player", &joined(&["GameActivity"]), TieBreak::default(), 6)
        .unwrap();

    assert_eq!(path.len(), 1);
    let step = &path.steps[0];
    assert_eq!(step.from_table, "GameActivity");
    assert_eq!(step.from_column, "PlayerID");
    assert_eq!(step.to_table, "Player");
    assert_eq!(step.cardinality, Cardinality::ManyToOne);
}

#[test]
fn test_path_is_traversable_backwards() {
    let schema = gaming::schema().unwrap();
    let path = schema
        .find_join_path("Player", "GameActivity", &joined(&[]), TieBreak::default(), 6)
        .unwrap();

    assert_eq!(path.steps[0].from_table, "Player");
    assert_eq!(path.steps[0].to_table, "GameActivity");
    assert_eq!(path.steps[0].cardinality, Cardinality::OneToMany);
}

#[test]
fn test_shortest_path_through_shared_dimension() {
    let schema = gaming::schema().unwrap();
    let path = schema
        .find_join_path("Transactions", "Game", &joined(&[]), TieBreak::default(), 6)
        .unwrap();

    let tables: Vec<&str> = path.tables().collect();
    assert_eq!(tables, vec!["Player", "GameActivity", "Game"]);
}

#[test]
fn test_table_names_are_case_insensitive() {
    let schema = gaming::schema().unwrap();
    let path = schema
        .find_join_path("gameactivity", "GAME", &joined(&[]), TieBreak::default(), 6)
        .unwrap();
    assert_eq!(path.steps[0].to_table, "Game");
}

#[test]
fn test_same_table_is_empty_path() {
    let schema = gaming::schema().unwrap();
    let path = schema
        .find_join_path("Player", "Player", &joined(&[]), TieBreak::default(), 6)
        .unwrap();
    assert!(path.is_empty());
}

#[test]
fn test_disconnected_table_has_no_path() {
    let schema = gaming::schema().unwrap();
    assert!(schema
        .find_join_path("GameActivity", "Affiliates", &joined(&[]), TieBreak::default(), 6)
        .is_none());
    assert!(schema
        .find_join_path("GameActivity", "NoSuchTable", &joined(&[]), TieBreak::default(), 6)
        .is_none());
}

#[test]
fn test_depth_limit() {
    let schema = gaming::schema().unwrap();
    assert!(schema
        .find_join_path("Transactions", "Game", &joined(&[]), TieBreak::default(), 2)
        .is_none());
    assert_eq!(
        schema
            .find_join_path("Transactions", "Game", &joined(&[]), TieBreak::default(), 3)
            .map(|p| p.len()),
        Some(3)
    );
}

#[test]
fn test_lexicographic_tie_break() {
    let schema = diamond();
    let path = schema
        .find_join_path(
            "Sales",
            "Region",
            &joined(&["Sales", "Store"]),
            TieBreak::Lexicographic,
            6,
        )
        .unwrap();
    let tables: Vec<&str> = path.tables().collect();
    assert_eq!(tables, vec!["Customer", "Region"]);
}

#[test]
fn test_prefer_joined_tie_break() {
    let schema = diamond();
    let path = schema
        .find_join_path(
            "Sales",
            "Region",
            &joined(&["Sales", "Store"]),
            TieBreak::PreferJoined,
            6,
        )
        .unwrap();
    let tables: Vec<&str> = path.tables().collect();
    assert_eq!(tables, vec!["Store", "Region"]);

    // nothing joined yet: falls back to name order
    let path = schema
        .find_join_path("Sales", "Region", &joined(&["Sales"]), TieBreak::PreferJoined, 6)
        .unwrap();
    assert_eq!(path.steps[0].to_table, "Customer");
}

#[test]
fn test_tie_break_is_stable_across_declaration_order() {
    let schema = diamond();
    let mut reversed = schema.definition().clone();
    reversed.relationships.reverse();
    reversed.tables.reverse();
    let reversed = SchemaModel::new(reversed).unwrap();

    for tie_break in [TieBreak::PreferJoined, TieBreak::Lexicographic] {
        let a = schema
            .find_join_path("Sales", "Region", &joined(&["Sales"]), tie_break, 6)
            .unwrap();
        let b = reversed
            .find_join_path("Sales", "Region", &joined(&["Sales"]), tie_break, 6)
            .unwrap();
        assert_eq!(a, b);
    }
}

#[test]
fn test_neighbors() {
    let schema = gaming::schema().unwrap();
    assert_eq!(
        schema.graph().neighbors("Player"),
        vec!["Bonuses", "GameActivity", "Transactions"]
    );
    assert_eq!(schema.graph().table_count(), 6);
    assert_eq!(schema.graph().relationship_count(), 4);
}
