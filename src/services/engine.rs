//! The core ETL loop.
//!
//! Reads every legacy size row in deterministic `(product_id, id)` order,
//! processes fixed-size batches, and per record: checks for an existing
//! destination row (idempotent re-run semantics), maps fields, derives a
//! unique slug, inserts, and migrates characteristic links. One bad record
//! never aborts its batch: each record runs under its own savepoint and a
//! failure is rolled back, counted and logged while the loop continues.
//!
//! Each batch commits in its own transaction, so a crash mid-run leaves the
//! destination with fully-formed rows only.

use std::collections::HashSet;

use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};

use crate::attrs::{self, AttrMap, AttrValue};
use crate::error::MigrationError;
use crate::models::{CharacteristicLink, MigrationRun, NewVariant, SourceRecord};
use crate::slug;

/// Placeholder for source rows with no display name
const NAME_PLACEHOLDER: &str = "Unnamed variant";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Records per batch (and per transaction)
    pub batch_size: usize,
    /// Walk the full loop without inserting anything
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dry_run: false,
        }
    }
}

/// What happened to one source record
enum RecordOutcome {
    Migrated(i32),
    WouldMigrate,
    Skipped,
}

pub struct MigrationEngine {
    pool: PgPool,
    config: EngineConfig,
}

impl MigrationEngine {
    pub fn new(pool: PgPool, config: EngineConfig) -> Self {
        Self { pool, config }
    }

    /// Run the full migration loop, mutating the run's counters and ledger.
    ///
    /// Errors returned here are fatal (batch transaction failures,
    /// connection loss); per-record failures are contained inside.
    pub async fn migrate(&self, run: &mut MigrationRun) -> Result<(), MigrationError> {
        let sources = sqlx::query_as::<_, SourceRecord>(&format!(
            "SELECT {} FROM product_sizes ORDER BY product_id, id",
            SourceRecord::COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let total = sources.len();
        if total == 0 {
            info!("No source records to migrate");
            return Ok(());
        }

        info!(
            total = total,
            batch_size = self.config.batch_size,
            dry_run = self.config.dry_run,
            "Starting migration loop"
        );

        // Slugs and destination identities minted during this run; in dry
        // runs nothing is committed, so the destination table alone cannot
        // answer cross-batch probes.
        let mut minted_slugs: HashSet<String> = HashSet::new();
        let mut minted_keys: HashSet<(i32, String)> = HashSet::new();

        for (batch_index, batch) in sources.chunks(self.config.batch_size.max(1)).enumerate() {
            let mut tx = self.pool.begin().await?;
            let mut batch_ids: Vec<i32> = Vec::new();

            for record in batch {
                run.counters.processed += 1;

                if minted_keys.contains(&conflict_key(record)) {
                    run.counters.skipped += 1;
                    debug!(
                        source_id = record.id,
                        "Duplicate of a record handled earlier in this run, skipped"
                    );
                    continue;
                }

                match self.migrate_record(&mut tx, record, &mut minted_slugs).await {
                    Ok(RecordOutcome::Migrated(variant_id)) => {
                        run.counters.migrated += 1;
                        batch_ids.push(variant_id);
                        minted_keys.insert(conflict_key(record));
                        debug!(
                            source_id = record.id,
                            variant_id = variant_id,
                            "Record migrated"
                        );
                    }
                    Ok(RecordOutcome::WouldMigrate) => {
                        run.counters.migrated += 1;
                        minted_keys.insert(conflict_key(record));
                        debug!(source_id = record.id, "Record would migrate (dry run)");
                    }
                    Ok(RecordOutcome::Skipped) => {
                        run.counters.skipped += 1;
                        debug!(
                            source_id = record.id,
                            "Destination row already exists, skipped"
                        );
                    }
                    Err(message) => {
                        warn!(
                            source_id = record.id,
                            error = %message,
                            "Record failed, continuing with next"
                        );
                        run.record_error(record.id, message);
                    }
                }
            }

            if self.config.dry_run {
                tx.rollback().await?;
            } else {
                tx.commit().await?;
                // Only committed rows belong on the rollback ledger.
                run.ledger.inserted_variant_ids.extend(batch_ids);
            }

            let done = run.counters.processed;
            let percent = done as f64 / total as f64 * 100.0;
            info!(
                batch = batch_index + 1,
                percent = format!("{percent:.1}"),
                processed = done,
                migrated = run.counters.migrated,
                skipped = run.counters.skipped,
                errors = run.counters.errors,
                "Batch committed"
            );
        }

        Ok(())
    }

    /// Process one record under its own savepoint.
    ///
    /// Any failure (mapping, insert) rolls the savepoint back and surfaces
    /// as a contained error message; the surrounding batch transaction
    /// stays usable.
    async fn migrate_record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &SourceRecord,
        minted_slugs: &mut HashSet<String>,
    ) -> Result<RecordOutcome, String> {
        let mut sp = tx.begin().await.map_err(|e| e.to_string())?;

        if let Some(existing_id) = conflict_check(&mut sp, record)
            .await
            .map_err(|e| e.to_string())?
        {
            sp.rollback().await.map_err(|e| e.to_string())?;
            debug!(
                source_id = record.id,
                variant_id = existing_id,
                "Conflict detected"
            );
            return Ok(RecordOutcome::Skipped);
        }

        let mut variant = map_record(record).map_err(|e| e.to_string())?;
        variant.slug = unique_slug(&mut sp, &variant.slug, minted_slugs)
            .await
            .map_err(|e| e.to_string())?;
        minted_slugs.insert(variant.slug.clone());

        let variant_id = insert_variant(&mut sp, &variant)
            .await
            .map_err(|e| e.to_string())?;

        // Characteristic links ride under their own savepoints: a failing
        // link is a warning, never a failure of the parent record.
        for (value_id, additional_value) in parse_characteristics(record.characteristics.as_ref())
        {
            let link = CharacteristicLink {
                variant_id,
                value_id,
                additional_value,
            };
            let mut link_sp = sp.begin().await.map_err(|e| e.to_string())?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO variant_characteristics_simple (variant_id, value_id, additional_value)
                VALUES ($1, $2, $3)
                ON CONFLICT (variant_id, value_id) DO NOTHING
                "#,
            )
            .bind(link.variant_id)
            .bind(link.value_id)
            .bind(&link.additional_value)
            .execute(&mut *link_sp)
            .await;

            match inserted {
                Ok(_) => link_sp.commit().await.map_err(|e| e.to_string())?,
                Err(e) => {
                    warn!(
                        source_id = record.id,
                        value_id = link.value_id,
                        error = %e,
                        "Characteristic link failed, variant kept"
                    );
                    link_sp.rollback().await.map_err(|e| e.to_string())?;
                }
            }
        }

        sp.commit().await.map_err(|e| e.to_string())?;

        if self.config.dry_run {
            // The batch transaction is rolled back wholesale at batch end.
            Ok(RecordOutcome::WouldMigrate)
        } else {
            Ok(RecordOutcome::Migrated(variant_id))
        }
    }
}

/// The destination identity a record occupies: its parent plus the business
/// key when the source carries one, else the display name. Records sharing
/// an identity within one run collapse to a single destination row.
fn conflict_key(record: &SourceRecord) -> (i32, String) {
    let key = record
        .business_key()
        .unwrap_or_else(|| record.name.as_deref().unwrap_or(NAME_PLACEHOLDER));
    (record.product_id, key.to_string())
}

/// The engine's strict skip gate: same parent, and the business key when the
/// source carries one, else the display name.
async fn conflict_check(
    sp: &mut Transaction<'_, Postgres>,
    record: &SourceRecord,
) -> Result<Option<i32>, sqlx::Error> {
    let existing = match record.business_key() {
        Some(sku) => {
            sqlx::query_scalar::<_, i32>(
                "SELECT id FROM product_variants WHERE master_id = $1 AND sku = $2 LIMIT 1",
            )
            .bind(record.product_id)
            .bind(sku)
            .fetch_optional(&mut **sp)
            .await?
        }
        None => {
            let name = record.name.as_deref().unwrap_or(NAME_PLACEHOLDER);
            sqlx::query_scalar::<_, i32>(
                "SELECT id FROM product_variants WHERE master_id = $1 AND name = $2 LIMIT 1",
            )
            .bind(record.product_id)
            .bind(name)
            .fetch_optional(&mut **sp)
            .await?
        }
    };
    Ok(existing)
}

/// Map every source field onto the destination shape.
///
/// Missing display names get a fixed placeholder, missing stock becomes
/// zero, missing flags become false. The attributes blob merges the parsed
/// specification map with the size metadata; specification keys are never
/// dropped. The returned slug is the raw candidate, not yet deduplicated.
fn map_record(record: &SourceRecord) -> Result<NewVariant, attrs::AttrError> {
    let name = record
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(NAME_PLACEHOLDER)
        .to_string();

    let specification = attrs::parse_specification(record.specifications.as_ref())?;

    let mut dimensions = AttrMap::new();
    if let Some(weight) = record.weight {
        dimensions.insert("weight".to_string(), AttrValue::Str(weight.to_string()));
    }
    if let Some(size_value) = record.size_value.as_deref() {
        dimensions.insert(
            "size".to_string(),
            AttrValue::Str(size_value.to_string()),
        );
    }

    let attributes = attrs::merge_size_metadata(
        specification.clone(),
        record.size_name.as_deref(),
        record.size_value.as_deref(),
        if dimensions.is_empty() {
            None
        } else {
            Some(dimensions.clone())
        },
    );

    Ok(NewVariant {
        master_id: record.product_id,
        sku: record.business_key().map(str::to_string),
        slug: slug::slugify(&name),
        name,
        price: record.price,
        discount_price: record.discount_price,
        stock: record.stock.unwrap_or(0),
        weight: record.weight,
        images: record.images.clone(),
        attributes: serde_json::to_value(&attributes)?,
        is_active: record.is_active.unwrap_or(false),
        sort_order: record.sort_order.unwrap_or(0),
        size_name: record.size_name.clone(),
        size_value: record.size_value.clone(),
        dimensions: if dimensions.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&dimensions)?)
        },
        specifications: if specification.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&specification)?)
        },
        warranty: record.warranty.clone(),
        battery_info: record.battery_info.clone(),
        seo_title: record.seo_title.clone(),
        seo_description: record.seo_description.clone(),
        seo_keywords: record.seo_keywords.clone(),
        custom_fields: record.custom_fields.clone(),
    })
}

/// Resolve a slug candidate to one that is unique.
///
/// Probes the destination table (which, inside the transaction, also sees
/// rows inserted earlier in the batch) plus the slugs minted during this
/// run, appending `-1`, `-2`, ... until free. Terminates: the existing row
/// count bounds the number of collisions.
async fn unique_slug(
    sp: &mut Transaction<'_, Postgres>,
    candidate: &str,
    minted: &HashSet<String>,
) -> Result<String, sqlx::Error> {
    let mut slug = candidate.to_string();
    let mut n = 0u32;
    loop {
        let taken = minted.contains(&slug)
            || sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM product_variants WHERE slug = $1)",
            )
            .bind(&slug)
            .fetch_one(&mut **sp)
            .await?;

        if !taken {
            return Ok(slug);
        }
        n += 1;
        slug = slug::with_suffix(candidate, n);
    }
}

async fn insert_variant(
    sp: &mut Transaction<'_, Postgres>,
    variant: &NewVariant,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO product_variants (
            master_id, sku, slug, name, price, discount_price, stock, weight,
            images, attributes, is_active, sort_order, size_name, size_value,
            dimensions, specifications, warranty, battery_info, seo_title,
            seo_description, seo_keywords, custom_fields, created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $17, $18, $19, $20, $21, $22, NOW()
        )
        RETURNING id
        "#,
    )
    .bind(variant.master_id)
    .bind(&variant.sku)
    .bind(&variant.slug)
    .bind(&variant.name)
    .bind(variant.price)
    .bind(variant.discount_price)
    .bind(variant.stock)
    .bind(variant.weight)
    .bind(&variant.images)
    .bind(&variant.attributes)
    .bind(variant.is_active)
    .bind(variant.sort_order)
    .bind(&variant.size_name)
    .bind(&variant.size_value)
    .bind(&variant.dimensions)
    .bind(&variant.specifications)
    .bind(&variant.warranty)
    .bind(&variant.battery_info)
    .bind(&variant.seo_title)
    .bind(&variant.seo_description)
    .bind(&variant.seo_keywords)
    .bind(&variant.custom_fields)
    .fetch_one(&mut **sp)
    .await
}

/// Extract characteristic links from the legacy blob.
///
/// Two historical shapes exist: an array of `{value_id, additional_value}`
/// objects, and a map keyed by value id whose values are either the
/// additional value directly or a `{additional_value}` object. Entries that
/// fit neither shape are dropped.
fn parse_characteristics(blob: Option<&serde_json::Value>) -> Vec<(i32, Option<String>)> {
    use serde_json::Value;

    let mut links = Vec::new();
    match blob {
        None | Some(Value::Null) => {}
        Some(Value::Array(entries)) => {
            for entry in entries {
                let Some(obj) = entry.as_object() else { continue };
                let Some(value_id) = obj.get("value_id").and_then(as_i32) else {
                    continue;
                };
                let additional = obj.get("additional_value").and_then(as_text);
                links.push((value_id, additional));
            }
        }
        Some(Value::Object(map)) => {
            for (key, value) in map {
                let Ok(value_id) = key.parse::<i32>() else { continue };
                let additional = match value {
                    Value::Object(inner) => inner.get("additional_value").and_then(as_text),
                    other => as_text(other),
                };
                links.push((value_id, additional));
            }
        }
        Some(_) => {}
    }
    links
}

fn as_i32(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
