//! Target `product_variants` row models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A destination row as it exists at backup time.
///
/// The evolved columns (`size_name`, `size_value`, `dimensions`,
/// `specifications`) are absent on a first run, where the backup snapshot
/// is taken before schema evolution, but hold data on re-runs. They default
/// to `None` when the SELECT does not include them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VariantRecord {
    pub id: i32,
    pub master_id: i32,
    pub sku: Option<String>,
    pub slug: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub discount_price: Option<Decimal>,
    pub stock: i32,
    pub weight: Option<Decimal>,
    pub images: Option<serde_json::Value>,
    pub attributes: Option<serde_json::Value>,
    pub is_active: bool,
    pub sort_order: i32,
    #[sqlx(default)]
    #[serde(default)]
    pub size_name: Option<String>,
    #[sqlx(default)]
    #[serde(default)]
    pub size_value: Option<String>,
    #[sqlx(default)]
    #[serde(default)]
    pub dimensions: Option<serde_json::Value>,
    #[sqlx(default)]
    #[serde(default)]
    pub specifications: Option<serde_json::Value>,
    pub warranty: Option<String>,
    pub battery_info: Option<String>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub seo_keywords: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl VariantRecord {
    /// Columns present from day one, for the backup snapshot SELECT.
    pub const COLUMNS: &'static str = "id, master_id, sku, slug, name, price, \
         discount_price, stock, weight, images, attributes, is_active, sort_order, \
         warranty, battery_info, seo_title, seo_description, seo_keywords, \
         custom_fields, created_at";

    /// Columns added by schema evolution; selected only when they exist.
    pub const EVOLVED_COLUMNS: &'static [&'static str] =
        &["size_name", "size_value", "dimensions", "specifications"];
}

/// A fully-mapped variant ready for insertion.
///
/// Produced by the engine's field-mapping step; every field is already
/// defaulted and normalized, so the insert itself is mechanical.
#[derive(Debug, Clone, Serialize)]
pub struct NewVariant {
    pub master_id: i32,
    pub sku: Option<String>,
    pub slug: String,
    pub name: String,
    pub price: Option<Decimal>,
    pub discount_price: Option<Decimal>,
    pub stock: i32,
    pub weight: Option<Decimal>,
    pub images: Option<serde_json::Value>,
    /// Merged specification + size metadata blob
    pub attributes: serde_json::Value,
    pub is_active: bool,
    pub sort_order: i32,
    pub size_name: Option<String>,
    pub size_value: Option<String>,
    pub dimensions: Option<serde_json::Value>,
    pub specifications: Option<serde_json::Value>,
    pub warranty: Option<String>,
    pub battery_info: Option<String>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub seo_keywords: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
}

/// A link from a variant to a controlled-vocabulary characteristic value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CharacteristicLink {
    pub variant_id: i32,
    pub value_id: i32,
    pub additional_value: Option<String>,
}
