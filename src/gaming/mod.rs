//! Built-in gaming analytics model.
//!
//! A small star schema around player game activity, with the business
//! vocabulary analysts use for it. The CLI falls back to it when no schema
//! or dictionary file is configured, and the tests use it as a fixture.
//!
//! ```text
//!   Transactions ─┐                 ┌─ Game
//!   Bonuses ──────┼── Player ── GameActivity
//!                 │
//!   Affiliates (no relationships)
//! ```

use crate::dictionary::{
    Aggregation, DateGrain, DictionaryDefinition, DictionaryError, DimensionDefinition,
    EntityDictionary, MetricDefinition,
};
use crate::schema::{
    Cardinality, Column, DataType, FieldRef, Relationship, SchemaDefinition, SchemaModel,
    SchemaResult, Table, TableKind, View, ViewColumn,
};

/// Daily revenue by player country, pre-aggregated.
pub const DAILY_REVENUE_VIEW: &str = "mv_DailyRevenueByCountry";

fn field(table: &str, column: &str) -> FieldRef {
    FieldRef::new(table, column)
}

pub fn schema_definition() -> SchemaDefinition {
    let game_activity = Table::new("GameActivity", TableKind::Fact)
        .with_schema("dbo")
        .with_column(Column::new("ActivityID", DataType::Integer).primary_key())
        .with_column(Column::new("PlayerID", DataType::Integer).foreign_key())
        .with_column(Column::new("GameID", DataType::Integer).foreign_key())
        .with_column(Column::new("ActivityDate", DataType::Date))
        .with_column(Column::new("Device", DataType::String))
        .with_column(Column::new("Bets", DataType::Decimal))
        .with_column(Column::new("Wins", DataType::Decimal))
        .with_column(Column::new("GGR", DataType::Decimal))
        .with_column(Column::new("NetRevenue", DataType::Decimal))
        .with_index("IX_GameActivity_ActivityDate", &["ActivityDate", "PlayerID"])
        .with_index("IX_GameActivity_Device", &["Device"]);

    let transactions = Table::new("Transactions", TableKind::Fact)
        .with_schema("dbo")
        .with_column(Column::new("TransactionID", DataType::Integer).primary_key())
        .with_column(Column::new("PlayerID", DataType::Integer).foreign_key())
        .with_column(Column::new("TransactionDate", DataType::Timestamp))
        .with_column(Column::new("PaymentMethod", DataType::String))
        .with_column(Column::new("DepositAmount", DataType::Decimal))
        .with_column(Column::new("WithdrawalAmount", DataType::Decimal))
        .with_index("IX_Transactions_TransactionDate", &["TransactionDate"]);

    let bonuses = Table::new("Bonuses", TableKind::Fact)
        .with_schema("dbo")
        .with_column(Column::new("BonusID", DataType::Integer).primary_key())
        .with_column(Column::new("PlayerID", DataType::Integer).foreign_key())
        .with_column(Column::new("AwardedDate", DataType::Date))
        .with_column(Column::new("BonusType", DataType::String))
        .with_column(Column::new("BonusAmount", DataType::Decimal));

    let player = Table::new("Player", TableKind::Dimension)
        .with_schema("dbo")
        .with_column(Column::new("PlayerID", DataType::Integer).primary_key())
        .with_column(Column::new("Country", DataType::String))
        .with_column(Column::new("VIPLevel", DataType::Integer))
        .with_column(Column::new("RegistrationDate", DataType::Date))
        .with_index("IX_Player_Country", &["Country"]);

    let game = Table::new("Game", TableKind::Dimension)
        .with_schema("dbo")
        .with_column(Column::new("GameID", DataType::Integer).primary_key())
        .with_column(Column::new("GameName", DataType::String))
        .with_column(Column::new("GameType", DataType::String))
        .with_column(Column::new("Provider", DataType::String));

    let affiliates = Table::new("Affiliates", TableKind::Regular)
        .with_schema("marketing")
        .with_column(Column::new("AffiliateID", DataType::Integer).primary_key())
        .with_column(Column::new("AffiliateName", DataType::String))
        .with_column(Column::new("Channel", DataType::String));

    let daily_revenue = View {
        name: DAILY_REVENUE_VIEW.into(),
        schema: Some("dbo".into()),
        columns: vec![
            ViewColumn {
                name: "ActivityDate".into(),
                source: Some(field("GameActivity", "ActivityDate")),
            },
            ViewColumn {
                name: "Country".into(),
                source: Some(field("Player", "Country")),
            },
            ViewColumn {
                name: "TotalGGR".into(),
                source: Some(field("GameActivity", "GGR")),
            },
            ViewColumn {
                name: "TotalNetRevenue".into(),
                source: Some(field("GameActivity", "NetRevenue")),
            },
            ViewColumn {
                name: "TotalBets".into(),
                source: Some(field("GameActivity", "Bets")),
            },
            ViewColumn {
                name: "TotalWins".into(),
                source: Some(field("GameActivity", "Wins")),
            },
        ],
        materialized: true,
        source_tables: vec!["GameActivity".into(), "Player".into()],
        group_by: vec![
            field("GameActivity", "ActivityDate"),
            field("Player", "Country"),
        ],
        refresh: Some("daily at 02:00 UTC".into()),
    };

    SchemaDefinition {
        tables: vec![game_activity, transactions, bonuses, player, game, affiliates],
        views: vec![daily_revenue],
        relationships: vec![
            Relationship::new("GameActivity", "PlayerID", "Player", "PlayerID"),
            Relationship::new("GameActivity", "GameID", "Game", "GameID"),
            Relationship::new("Transactions", "PlayerID", "Player", "PlayerID"),
            Relationship::new("Bonuses", "PlayerID", "Player", "PlayerID")
                .with_cardinality(Cardinality::ManyToOne),
        ],
    }
}

pub fn schema() -> SchemaResult<SchemaModel> {
    SchemaModel::new(schema_definition())
}

pub fn dictionary_definition() -> DictionaryDefinition {
    let metrics = vec![
        MetricDefinition::new("GGR", field("GameActivity", "GGR"), Aggregation::Sum)
            .with_description("Gross gaming revenue: bets minus wins")
            .with_category("revenue")
            .with_synonyms(&["revenue", "gross gaming revenue", "gross revenue"]),
        MetricDefinition::new(
            "NetRevenue",
            field("GameActivity", "NetRevenue"),
            Aggregation::Sum,
        )
        .with_description("GGR after bonuses and taxes")
        .with_category("revenue")
        .with_synonyms(&["ngr", "net gaming revenue"]),
        MetricDefinition::new("Bets", field("GameActivity", "Bets"), Aggregation::Sum)
            .with_category("activity")
            .with_synonyms(&["stakes", "turnover", "wagers", "handle"]),
        MetricDefinition::new("Wins", field("GameActivity", "Wins"), Aggregation::Sum)
            .with_category("activity")
            .with_synonyms(&["payouts", "winnings"]),
        MetricDefinition::calculated("Hold", "[GGR] / [Bets]")
            .with_description("Share of stakes kept by the house")
            .with_category("revenue")
            .with_synonyms(&["margin", "hold percentage"]),
        MetricDefinition::new(
            "Active Players",
            field("GameActivity", "PlayerID"),
            Aggregation::CountDistinct,
        )
        .with_type(DataType::Integer)
        .with_category("players")
        .with_synonyms(&["players", "active users", "unique players"]),
        MetricDefinition::new(
            "Deposits",
            field("Transactions", "DepositAmount"),
            Aggregation::Sum,
        )
        .with_category("payments")
        .with_synonyms(&["deposit amount", "deposit volume"]),
        MetricDefinition::new(
            "Withdrawals",
            field("Transactions", "WithdrawalAmount"),
            Aggregation::Sum,
        )
        .with_category("payments")
        .with_synonyms(&["cashouts", "withdrawal amount"]),
        MetricDefinition::new("Bonus Cost", field("Bonuses", "BonusAmount"), Aggregation::Sum)
            .with_category("marketing")
            .with_synonyms(&["bonuses", "bonus amount", "promotions"]),
    ];

    let dimensions = vec![
        DimensionDefinition::new("Country", field("Player", "Country"))
            .with_category("player")
            .with_synonyms(&["market", "nation"]),
        DimensionDefinition::new("VIP Level", field("Player", "VIPLevel"))
            .with_category("player")
            .with_synonyms(&["vip", "vip tier", "loyalty tier"]),
        DimensionDefinition::new("Game", field("Game", "GameName"))
            .with_category("game")
            .with_synonyms(&["game name", "title"]),
        DimensionDefinition::new("Game Type", field("Game", "GameType"))
            .with_category("game")
            .with_synonyms(&["game category", "vertical"]),
        DimensionDefinition::new("Provider", field("Game", "Provider"))
            .with_category("game")
            .with_synonyms(&["supplier", "studio"]),
        DimensionDefinition::new("Device", field("GameActivity", "Device"))
            .with_synonyms(&["platform"]),
        DimensionDefinition::new("Payment Method", field("Transactions", "PaymentMethod"))
            .with_category("payments")
            .with_synonyms(&["payment type"]),
        DimensionDefinition::new("Bonus Type", field("Bonuses", "BonusType"))
            .with_category("marketing"),
        DimensionDefinition::new("Affiliate", field("Affiliates", "AffiliateName"))
            .with_category("marketing")
            .with_synonyms(&["partner", "affiliate name"]),
        DimensionDefinition::date("Date", field("GameActivity", "ActivityDate"), None)
            .with_synonyms(&["day", "daily"]),
        DimensionDefinition::date(
            "Month",
            field("GameActivity", "ActivityDate"),
            Some(DateGrain::Month),
        )
        .with_synonyms(&["monthly"]),
        DimensionDefinition::date(
            "Year",
            field("GameActivity", "ActivityDate"),
            Some(DateGrain::Year),
        )
        .with_synonyms(&["yearly", "annual"]),
    ];

    DictionaryDefinition {
        metrics,
        dimensions,
    }
}

pub fn dictionary() -> Result<EntityDictionary, DictionaryError> {
    EntityDictionary::new(dictionary_definition())
}
