use nlq::gaming;
use nlq::schema::{
    DataType, FieldRef, SchemaError, SchemaHandle, SchemaModel, SchemaProvider,
    StaticSchemaProvider, TableKind, TomlSchemaProvider,
};
use nlq::TranslateError;

const SCHEMA_TOML: &str = r#"
[[tables]]
name = "Orders"
schema = "sales"
kind = "fact"
columns = [
    { name = "OrderID", type = "int", primary_key = true },
    { name = "CustomerID", type = "int", foreign_key = true },
    { name = "OrderDate", type = "datetime2" },
    { name = "Amount", type = "decimal(18,2)" },
]
indexes = [{ name = "IX_Orders_OrderDate", columns = ["OrderDate"] }]

[[tables]]
name = "Customers"
kind = "dimension"
columns = [
    { name = "CustomerID", type = "int" },
    { name = "Segment", type = "nvarchar(50)" },
]

[[views]]
name = "mv_DailyOrders"
materialized = true
source_tables = ["Orders"]
group_by = ["Orders.OrderDate"]
columns = [
    { name = "OrderDate", source = "Orders.OrderDate" },
    { name = "TotalAmount", source = "Orders.Amount" },
]

[[relationships]]
from_table = "Orders"
from_column = "CustomerID"
to_table = "Customers"
to_column = "CustomerID"
cardinality = "many_to_one"
"#;

#[test]
fn test_load_from_toml() {
    let schema = SchemaModel::from_toml_str(SCHEMA_TOML).unwrap();

    let orders = schema.table("orders").unwrap();
    assert_eq!(orders.name, "Orders");
    assert_eq!(orders.schema.as_deref(), Some("sales"));
    assert_eq!(orders.kind, TableKind::Fact);
    assert_eq!(orders.date_column(), Some("OrderDate"));
    assert_eq!(orders.indexes[0].columns, vec!["OrderDate"]);

    let amount = schema.column(&FieldRef::new("Orders", "Amount")).unwrap();
    assert_eq!(amount.data_type, DataType::Decimal);
    let segment = schema.column(&FieldRef::new("Customers", "Segment")).unwrap();
    assert_eq!(segment.data_type, DataType::String);

    let view = schema.view("MV_DAILYORDERS").unwrap();
    assert!(view.materialized);
    assert!(view.is_aggregated());
    assert_eq!(
        view.column_for(&FieldRef::new("orders", "amount")).map(|c| c.name.as_str()),
        Some("TotalAmount")
    );
    assert_eq!(schema.materialized_views().count(), 1);
    assert_eq!(schema.graph().neighbors("Customers"), vec!["Orders"]);
}

#[test]
fn test_view_over_unknown_column_is_rejected() {
    let broken = SCHEMA_TOML.replace("Orders.Amount", "Orders.Total");
    match SchemaModel::from_toml_str(&broken) {
        Err(SchemaError::UnknownViewSource { view, source_name }) => {
            assert_eq!(view, "mv_DailyOrders");
            assert_eq!(source_name, "Orders.Total");
        }
        other => panic!("expected UnknownViewSource, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let err = SchemaModel::from_toml_str("[[tables]]\nname = ").unwrap_err();
    assert!(matches!(err, SchemaError::Parse(_)));
}

#[test]
fn test_gaming_fixture() {
    let schema = gaming::schema().unwrap();
    assert_eq!(schema.tables().len(), 6);
    assert_eq!(
        schema.table("Transactions").and_then(|t| t.date_column()),
        Some("TransactionDate")
    );
    assert_eq!(
        schema.canonical_field(&FieldRef::new("player", "country")),
        Some(FieldRef::new("Player", "Country"))
    );
    assert!(schema
        .canonical_field(&FieldRef::new("Player", "Nickname"))
        .is_none());
}

#[test]
fn test_handle_swaps_whole_model() {
    let handle = SchemaHandle::new(gaming::schema().unwrap());
    let before = handle.current();
    assert_eq!(before.version, 1);

    let version = handle.replace(SchemaModel::from_toml_str(SCHEMA_TOML).unwrap());
    assert_eq!(version, 2);
    assert_eq!(handle.version(), 2);

    // readers holding the old snapshot are unaffected
    assert!(before.model.table("GameActivity").is_some());
    assert!(handle.current().model.table("GameActivity").is_none());
    assert_ne!(before.model.fingerprint(), handle.current().model.fingerprint());
}

#[tokio::test]
async fn test_static_provider_refresh_sees_replacement() {
    let provider = StaticSchemaProvider::new(gaming::schema_definition());
    let first = provider.load_schema_model().await.unwrap();
    assert!(first.table("Affiliates").is_some());

    let mut changed = gaming::schema_definition();
    changed.tables.retain(|t| t.name != "Affiliates");
    provider.replace(changed);

    let refreshed = provider.refresh_schema_model().await.unwrap();
    assert!(refreshed.table("Affiliates").is_none());
    assert_ne!(first.fingerprint(), refreshed.fingerprint());
}

#[tokio::test]
async fn test_toml_provider_reads_file() {
    let path = std::env::temp_dir().join(format!("nlq-schema-{}.toml", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, SCHEMA_TOML).await.unwrap();

    let provider = TomlSchemaProvider::new(&path);
    let model = provider.load_schema_model().await.unwrap();
    assert!(model.table("Orders").is_some());

    tokio::fs::remove_file(&path).await.unwrap();
    let err = provider.refresh_schema_model().await.unwrap_err();
    assert!(matches!(err, SchemaError::Io(_)));

    let translated: TranslateError = err.into();
    assert_eq!(translated.kind(), "schema_unavailable");
}
