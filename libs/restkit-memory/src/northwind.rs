//! Northwind sample: model, seeded store and a ready-to-build API.
//!
//! Orders are generated: 830 of them, `OrderID` 10248..=11077, one per day starting
//! 1996-07-04, assigned to customers round-robin.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde_json::{Value, json};

use restkit::model::{ApiModel, ComplexType, EntitySet, EntityType, FieldKind, PropertyDef};
use restkit::provider::ProviderError;
use restkit::record::EntityRecord;
use restkit::{ApiBuilder, ApiConfig};

use crate::InMemoryStore;

pub const ORDER_COUNT: i64 = 830;
pub const FIRST_ORDER_ID: i64 = 10248;

/// (`CustomerID`, `CompanyName`, `ContactName`, Street, City, Zip, Country)
#[rustfmt::skip]
const CUSTOMERS: &[(&str, &str, &str, &str, &str, &str, &str)] = &[
    ("ALFKI", "Alfreds Futterkiste", "Maria Anders", "Obere Str. 57", "Berlin", "12209", "Germany"),
    ("ANATR", "Ana Trujillo Emparedados y helados", "Ana Trujillo", "Avda. de la Constitucion 2222", "Mexico D.F.", "05021", "Mexico"),
    ("ANTON", "Antonio Moreno Taqueria", "Antonio Moreno", "Mataderos 2312", "Mexico D.F.", "05023", "Mexico"),
    ("AROUT", "Around the Horn", "Thomas Hardy", "120 Hanover Sq.", "London", "WA1 1DP", "UK"),
    ("BERGS", "Berglunds snabbkop", "Christina Berglund", "Berguvsvagen 8", "Lulea", "S-958 22", "Sweden"),
    ("BLAUS", "Blauer See Delikatessen", "Hanna Moos", "Forsterstr. 57", "Mannheim", "68306", "Germany"),
    ("BLONP", "Blondel pere et fils", "Frederique Citeaux", "24, place Kleber", "Strasbourg", "67000", "France"),
    ("BOLID", "Bolido Comidas preparadas", "Martin Sommer", "C/ Araquil, 67", "Madrid", "28023", "Spain"),
    ("BONAP", "Bon app'", "Laurence Lebihan", "12, rue des Bouchers", "Marseille", "13008", "France"),
    ("BOTTM", "Bottom-Dollar Markets", "Elizabeth Lincoln", "23 Tsawassen Blvd.", "Tsawassen", "T2F 8M4", "Canada"),
];

/// (`ProductID`, `ProductName`, `UnitPrice`, Discontinued)
const PRODUCTS: &[(i64, &str, f64, bool)] = &[
    (1, "Chai", 18.0, false),
    (2, "Chang", 19.0, false),
    (3, "Aniseed Syrup", 10.0, false),
    (4, "Chef Anton's Cajun Seasoning", 22.0, false),
    (5, "Chef Anton's Gumbo Mix", 21.35, true),
    (9, "Mishi Kobe Niku", 97.0, true),
    (11, "Queso Cabrales", 21.0, false),
    (17, "Alice Mutton", 39.0, true),
];

#[must_use]
pub fn model() -> ApiModel {
    let mut m = ApiModel::new("Northwind");
    m.add_complex_type(
        ComplexType::new("Address")
            .property(PropertyDef::primitive("Street", FieldKind::String).max_length(60))
            .property(PropertyDef::primitive("City", FieldKind::String).max_length(15))
            .property(PropertyDef::primitive("Zip", FieldKind::String).max_length(10)),
    )
    .add_entity_type(
        EntityType::new("Customer")
            .key(["CustomerID"])
            .property(PropertyDef::primitive("CustomerID", FieldKind::String).max_length(5))
            .property(
                PropertyDef::primitive("CompanyName", FieldKind::String)
                    .not_null()
                    .required()
                    .max_length(40),
            )
            .property(PropertyDef::primitive("ContactName", FieldKind::String).max_length(30))
            .property(PropertyDef::primitive("Country", FieldKind::String).max_length(15))
            .property(PropertyDef::complex("Addr", "Address")),
    )
    .add_entity_type(
        EntityType::new("Order")
            .key(["OrderID"])
            .property(PropertyDef::primitive("OrderID", FieldKind::I64))
            .property(PropertyDef::primitive("CustomerID", FieldKind::String).max_length(5))
            .property(PropertyDef::primitive("OrderDate", FieldKind::DateTimeUtc))
            .property(PropertyDef::primitive("Freight", FieldKind::Decimal))
            .property(PropertyDef::primitive("ShipCountry", FieldKind::String)),
    )
    .add_entity_type(
        EntityType::new("Product")
            .key(["ProductID"])
            .property(PropertyDef::primitive("ProductID", FieldKind::I64))
            .property(
                PropertyDef::primitive("ProductName", FieldKind::String)
                    .not_null()
                    .required(),
            )
            .property(PropertyDef::primitive("UnitPrice", FieldKind::Decimal))
            .property(PropertyDef::primitive("Discontinued", FieldKind::Bool).not_null()),
    )
    .add_entity_set(EntitySet::new("Customers", "Customer"))
    .add_entity_set(EntitySet::new("Orders", "Order"))
    .add_entity_set(EntitySet::new("Products", "Product"));
    m
}

fn customer_rows() -> Vec<EntityRecord> {
    CUSTOMERS
        .iter()
        .map(|(id, company, contact, street, city, zip, country)| {
            record(json!({
                "CustomerID": id,
                "CompanyName": company,
                "ContactName": contact,
                "Country": country,
                "Addr": { "Street": street, "City": city, "Zip": zip },
            }))
        })
        .collect()
}

fn order_rows() -> Vec<EntityRecord> {
    let first_day = NaiveDate::from_ymd_opt(1996, 7, 4)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
        .and_utc();
    (0..ORDER_COUNT)
        .map(|i| {
            let (customer, country) = CUSTOMERS
                .get(usize::try_from(i).unwrap_or_default() % CUSTOMERS.len())
                .map(|c| (c.0, c.6))
                .unwrap_or_default();
            // Freight cycles through 0.00..=99.99 in cent steps.
            let cents = (i * 3_779 + 1_238) % 10_000;
            let freight: Value = format!("{}.{:02}", cents / 100, cents % 100)
                .parse()
                .unwrap_or_default();
            record(json!({
                "OrderID": FIRST_ORDER_ID + i,
                "CustomerID": customer,
                "OrderDate": (first_day + Duration::days(i)).to_rfc3339(),
                "Freight": freight,
                "ShipCountry": country,
            }))
        })
        .collect()
}

fn product_rows() -> Vec<EntityRecord> {
    PRODUCTS
        .iter()
        .map(|(id, name, price, discontinued)| {
            record(json!({
                "ProductID": id,
                "ProductName": name,
                "UnitPrice": price,
                "Discontinued": discontinued,
            }))
        })
        .collect()
}

fn record(value: Value) -> EntityRecord {
    EntityRecord::from_json(value).unwrap_or_default()
}

/// Store over [`model`] holding the sample rows.
///
/// # Errors
/// Only if the sample rows conflict with the model keys.
pub fn store() -> Result<InMemoryStore, ProviderError> {
    let store = InMemoryStore::new(model());
    store.seed("Customers", customer_rows())?;
    store.seed("Orders", order_rows())?;
    store.seed("Products", product_rows())?;
    Ok(store)
}

/// Wire `store` as model, query and change-tracking provider of a new builder.
#[must_use]
pub fn install(builder: ApiBuilder, store: &InMemoryStore) -> ApiBuilder {
    let shared = Arc::new(store.clone());
    builder
        .with_model_provider(shared.clone())
        .with_query_source(shared.clone())
        .with_change_tracking(shared)
}

/// Builder for the sample API over a freshly seeded store.
///
/// # Errors
/// See [`store`].
pub fn api_builder(config: ApiConfig) -> Result<(ApiBuilder, InMemoryStore), ProviderError> {
    let store = store()?;
    let builder = install(ApiBuilder::new(config), &store);
    Ok((builder, store))
}
