//! Legacy `product_sizes` row model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One legacy size row, exactly as stored.
///
/// Source rows are read-only for the whole migration: they are snapshotted,
/// mapped and counted, never mutated. JSON blobs stay as `serde_json::Value`
/// at the row boundary and are parsed into typed structures by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SourceRecord {
    pub id: i32,
    pub product_id: i32,
    /// Business key; should be unique but was never enforced historically
    pub sku: Option<String>,
    pub name: Option<String>,
    pub size_name: Option<String>,
    pub size_value: Option<String>,
    pub price: Option<Decimal>,
    pub discount_price: Option<Decimal>,
    pub stock: Option<i32>,
    pub weight: Option<Decimal>,
    pub images: Option<serde_json::Value>,
    pub specifications: Option<serde_json::Value>,
    pub characteristics: Option<serde_json::Value>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
    pub warranty: Option<String>,
    pub battery_info: Option<String>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub seo_keywords: Option<String>,
    pub custom_fields: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl SourceRecord {
    /// Column list matching the struct, for explicit SELECTs.
    pub const COLUMNS: &'static str = "id, product_id, sku, name, size_name, size_value, \
         price, discount_price, stock, weight, images, specifications, characteristics, \
         is_active, sort_order, warranty, battery_info, seo_title, seo_description, \
         seo_keywords, custom_fields, created_at";

    /// The business key, normalized: empty strings count as absent.
    pub fn business_key(&self) -> Option<&str> {
        self.sku.as_deref().filter(|s| !s.trim().is_empty())
    }
}
