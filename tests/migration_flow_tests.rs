//! End-to-end migration pipeline tests.
//!
//! These run against a real PostgreSQL database and skip silently when
//! `DATABASE_URL` is not configured. Point it at a scratch database: the
//! suite drops and recreates the catalog tables.
//!
//! Run with: `cargo test --test migration_flow_tests`

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use variant_migrate::models::MigrationRun;
use variant_migrate::{
    BackupManager, BackupSnapshot, Config, DatabaseSettings, MigrationError, Orchestrator,
    RollbackController,
};

async fn try_create_test_pool() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => return None,
    };

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .ok()
}

fn test_config(backup_dir: &std::path::Path) -> Config {
    Config {
        database: DatabaseSettings::Url(std::env::var("DATABASE_URL").unwrap_or_default()),
        database_max_connections: 5,
        acquire_timeout_secs: 30,
        backup_dir: backup_dir.display().to_string(),
        // Small batches so the scenarios span batch boundaries
        batch_size: 2,
        require_tls: false,
    }
}

async fn drop_all(pool: &PgPool) {
    for statement in [
        "DROP TABLE IF EXISTS variant_characteristics_simple",
        "DROP TABLE IF EXISTS product_variants",
        "DROP TABLE IF EXISTS product_sizes",
        "DROP TABLE IF EXISTS products",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("drop should succeed");
    }
}

async fn create_schema(pool: &PgPool) {
    for statement in [
        "CREATE TABLE products (id SERIAL PRIMARY KEY, name TEXT NOT NULL)",
        r#"
        CREATE TABLE product_sizes (
            id SERIAL PRIMARY KEY,
            product_id INTEGER NOT NULL,
            sku VARCHAR(100),
            name VARCHAR(255),
            size_name VARCHAR(255),
            size_value VARCHAR(255),
            price NUMERIC(12,2),
            discount_price NUMERIC(12,2),
            stock INTEGER,
            weight NUMERIC(10,3),
            images JSONB,
            specifications JSONB,
            characteristics JSONB,
            is_active BOOLEAN,
            sort_order INTEGER,
            warranty VARCHAR(255),
            battery_info VARCHAR(255),
            seo_title VARCHAR(255),
            seo_description TEXT,
            seo_keywords TEXT,
            custom_fields JSONB,
            created_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE product_variants (
            id SERIAL PRIMARY KEY,
            master_id INTEGER NOT NULL,
            sku VARCHAR(100),
            slug VARCHAR(255) NOT NULL UNIQUE,
            name VARCHAR(255) NOT NULL,
            price NUMERIC(12,2),
            discount_price NUMERIC(12,2),
            stock INTEGER NOT NULL DEFAULT 0,
            weight NUMERIC(10,3),
            images JSONB,
            attributes JSONB,
            is_active BOOLEAN NOT NULL DEFAULT false,
            sort_order INTEGER NOT NULL DEFAULT 0,
            warranty VARCHAR(255),
            battery_info VARCHAR(255),
            seo_title VARCHAR(255),
            seo_description TEXT,
            seo_keywords TEXT,
            custom_fields JSONB,
            created_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
        r#"
        CREATE TABLE variant_characteristics_simple (
            variant_id INTEGER NOT NULL,
            value_id INTEGER NOT NULL,
            additional_value TEXT,
            PRIMARY KEY (variant_id, value_id)
        )
        "#,
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("create should succeed");
    }
}

async fn seed_catalog(pool: &PgPool) {
    sqlx::query("INSERT INTO products (id, name) VALUES (1, 'Shoe'), (5, 'Gadget')")
        .execute(pool)
        .await
        .expect("seed products");

    // #1: full record with spec, size metadata and characteristics
    // (one characteristic value repeated to exercise the duplicate-safe upsert)
    sqlx::query(
        r#"
        INSERT INTO product_sizes
            (product_id, sku, name, size_name, size_value, price, stock, is_active,
             specifications, characteristics)
        VALUES
            (1, 'S-1', 'Classic Runner', 'Large', '42', 129.90, 7, true,
             '{"color": "red"}'::jsonb,
             '[{"value_id": 12, "additional_value": "blue"},
               {"value_id": 12, "additional_value": "navy"}]'::jsonb)
        "#,
    )
    .execute(pool)
    .await
    .expect("seed size 1");

    // #2: distinct SKU but the same display name as #1, forcing a slug
    // collision (a name-only record would be skipped by the fallback gate)
    sqlx::query(
        "INSERT INTO product_sizes (product_id, sku, name) VALUES (1, 'S-2', 'Classic Runner')",
    )
    .execute(pool)
    .await
    .expect("seed size 2");

    // #3: malformed specification blob (string that is not JSON)
    sqlx::query(
        r#"
        INSERT INTO product_sizes (product_id, specifications)
        VALUES (5, '"{broken"'::jsonb)
        "#,
    )
    .execute(pool)
    .await
    .expect("seed size 3");

    // #4: collides with a pre-existing destination row on (master, sku)
    sqlx::query(
        "INSERT INTO product_sizes (product_id, sku, name) VALUES (5, 'ABC', 'Foo')",
    )
    .execute(pool)
    .await
    .expect("seed size 4");

    sqlx::query(
        r#"
        INSERT INTO product_variants (master_id, sku, slug, name, stock, is_active)
        VALUES (5, 'ABC', 'foo', 'Foo', 1, true)
        "#,
    )
    .execute(pool)
    .await
    .expect("seed pre-existing variant");

    // #5: duplicate of #1 on (master, sku), landing in a later batch than
    // #1 with batch_size 2, so the duplicate is only visible run-locally
    sqlx::query(
        "INSERT INTO product_sizes (product_id, sku, name) VALUES (1, 'S-1', 'Classic Runner')",
    )
    .execute(pool)
    .await
    .expect("seed size 5");
}

async fn variant_ids(pool: &PgPool) -> Vec<i32> {
    sqlx::query_scalar::<_, i32>("SELECT id FROM product_variants ORDER BY id")
        .fetch_all(pool)
        .await
        .expect("list variant ids")
}

async fn evolved_columns_present(pool: &PgPool) -> bool {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM information_schema.columns
        WHERE table_schema = 'public'
          AND table_name = 'product_variants'
          AND column_name IN ('size_name', 'size_value', 'dimensions', 'specifications')
        "#,
    )
    .fetch_one(pool)
    .await
    .expect("column count");
    count == 4
}

// All scenarios share the fixed table names, so they run in one test to
// avoid racing under the parallel test runner.
#[tokio::test]
async fn migration_pipeline_end_to_end() {
    let Some(pool) = try_create_test_pool().await else {
        eprintln!("DATABASE_URL not set; skipping migration pipeline tests");
        return;
    };
    let backup_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(backup_dir.path());

    // --- Validator blocks on a missing destination table ---------------
    drop_all(&pool).await;
    sqlx::query("CREATE TABLE products (id SERIAL PRIMARY KEY, name TEXT NOT NULL)")
        .execute(&pool)
        .await
        .expect("create products");
    sqlx::query("CREATE TABLE product_sizes (id SERIAL PRIMARY KEY, product_id INTEGER NOT NULL)")
        .execute(&pool)
        .await
        .expect("create sizes stub");

    let mut orchestrator =
        Orchestrator::with_run(pool.clone(), config.clone(), MigrationRun::begin());
    let err = orchestrator
        .validate_only(false)
        .await
        .expect_err("validation must fail without the destination table");
    assert!(
        matches!(&err, MigrationError::MissingTable(t) if t == "product_variants"),
        "unexpected error: {err}"
    );

    // --- Full pipeline ---------------------------------------------------
    drop_all(&pool).await;
    create_schema(&pool).await;
    seed_catalog(&pool).await;

    let pre_ids = variant_ids(&pool).await;
    assert_eq!(pre_ids.len(), 1);

    // Dry run first: full loop, zero inserts. Record 5 duplicates record 1
    // from an earlier (rolled back) batch, so its skip proves the dry run
    // predicts the real run's outcome.
    let mut dry = Orchestrator::with_run(pool.clone(), config.clone(), MigrationRun::begin());
    let dry_report = dry.execute(false, true).await.expect("dry run succeeds");
    assert_eq!(dry_report.run.counters.processed, 5);
    assert_eq!(dry_report.run.counters.migrated, 2);
    assert_eq!(dry_report.run.counters.skipped, 2);
    assert_eq!(dry_report.run.counters.errors, 1);
    assert!(dry_report.run.ledger.inserted_variant_ids.is_empty());
    assert_eq!(variant_ids(&pool).await, pre_ids, "dry run must not insert");

    // Real run, driven the way the `full` command does it: one pre-flight
    // validation, then the pipeline without a second validation phase
    let mut orchestrator =
        Orchestrator::with_run(pool.clone(), config.clone(), MigrationRun::begin());
    let validation = orchestrator
        .validate_only(false)
        .await
        .expect("pre-flight validation succeeds");
    assert!(!validation.warnings.is_empty());
    let report = orchestrator.execute(false, false).await.expect("run succeeds");
    let counters = report.run.counters;
    assert_eq!(counters.processed, 5);
    assert_eq!(counters.migrated, 2, "records 1 and 2 migrate");
    assert_eq!(counters.skipped, 2, "records 4 and 5 are duplicates");
    assert_eq!(counters.errors, 1, "record 3 has a malformed spec blob");
    assert_eq!(
        counters.validation_warnings,
        validation.warnings.len() as u64,
        "the pre-flight pass is the run's validation"
    );
    assert_eq!(report.run.ledger.inserted_variant_ids.len(), 2);
    assert!(report.run.ledger.backup_created);

    // The counters the dry run predicted are the counters the run produced
    assert_eq!(counters.migrated, dry_report.run.counters.migrated);
    assert_eq!(counters.skipped, dry_report.run.counters.skipped);

    let backup_file = report.run.ledger.backup_file.clone().expect("backup path");
    assert!(
        std::path::Path::new(&backup_file).exists(),
        "backup confirmed on disk"
    );
    assert!(evolved_columns_present(&pool).await);

    // Attribute merge completeness: spec keys and size metadata coexist
    let attrs = sqlx::query_scalar::<_, serde_json::Value>(
        "SELECT attributes FROM product_variants WHERE master_id = 1 AND sku = 'S-1'",
    )
    .fetch_one(&pool)
    .await
    .expect("migrated attributes");
    assert_eq!(attrs["color"], json!("red"));
    assert_eq!(attrs["size_name"], json!("Large"));
    assert_eq!(attrs["size_value"], json!("42"));

    // Slug uniqueness for identical display names
    let slugs = sqlx::query_scalar::<_, String>(
        "SELECT slug FROM product_variants WHERE name = 'Classic Runner' ORDER BY id",
    )
    .fetch_all(&pool)
    .await
    .expect("slugs");
    assert_eq!(slugs, vec!["classic-runner", "classic-runner-1"]);

    // Duplicate characteristic pair collapsed to one link
    let links = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM variant_characteristics_simple WHERE value_id = 12",
    )
    .fetch_one(&pool)
    .await
    .expect("link count");
    assert_eq!(links, 1);

    // Defaults applied to the bare record
    let (name, stock, active) = sqlx::query_as::<_, (String, i32, bool)>(
        "SELECT name, stock, is_active FROM product_variants WHERE master_id = 1 AND sku = 'S-2'",
    )
    .fetch_one(&pool)
    .await
    .expect("bare record row");
    assert_eq!(name, "Classic Runner");
    assert_eq!(stock, 0);
    assert!(!active);

    // --- Idempotence: a second run skips everything it migrated ---------
    let after_first = variant_ids(&pool).await;
    let inserted: Vec<i32> = after_first
        .iter()
        .copied()
        .filter(|id| !pre_ids.contains(id))
        .collect();
    assert_eq!(
        report.run.ledger.inserted_variant_ids, inserted,
        "the ledger lists exactly the committed inserts"
    );

    let mut second =
        Orchestrator::with_run(pool.clone(), config.clone(), MigrationRun::begin());
    let second_report = second.execute(true, false).await.expect("second run succeeds");
    assert_eq!(second_report.run.counters.migrated, 0);
    assert_eq!(second_report.run.counters.skipped, 4);
    assert_eq!(second_report.run.counters.errors, 1);
    assert_eq!(
        variant_ids(&pool).await,
        after_first,
        "second run must not create duplicates"
    );

    // The second run's backup ran against the evolved table, so the dump
    // must carry the data the first run wrote into the new columns
    let second_backup = second_report
        .run
        .ledger
        .backup_file
        .clone()
        .expect("second backup path");
    let snapshot: BackupSnapshot =
        serde_json::from_slice(&std::fs::read(&second_backup).expect("read second backup"))
            .expect("parse second backup");
    let migrated_variant = snapshot
        .product_variants
        .iter()
        .find(|v| v.sku.as_deref() == Some("S-1"))
        .expect("migrated row in backup");
    assert_eq!(migrated_variant.size_name.as_deref(), Some("Large"));
    assert_eq!(migrated_variant.size_value.as_deref(), Some("42"));
    assert_eq!(
        migrated_variant.specifications,
        Some(json!({"color": "red"}))
    );

    // --- Rollback correctness -------------------------------------------
    let deleted = RollbackController::new(pool.clone())
        .rollback(&report.run)
        .await
        .expect("rollback succeeds");
    assert_eq!(deleted, 2);
    assert_eq!(
        variant_ids(&pool).await,
        pre_ids,
        "destination restored to its pre-run rows"
    );
    assert!(
        evolved_columns_present(&pool).await,
        "schema changes are retained by design"
    );
    let links_after = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM variant_characteristics_simple",
    )
    .fetch_one(&pool)
    .await
    .expect("links after rollback");
    assert_eq!(links_after, 0);

    // --- Rollback without a backup is refused ---------------------------
    let fresh = MigrationRun::begin();
    let err = RollbackController::new(pool.clone())
        .rollback(&fresh)
        .await
        .expect_err("no backup, no rollback");
    assert!(matches!(err, MigrationError::NoBackup(_)));

    // --- An unwritable backup aborts the run with zero mutation ---------
    // A regular file where the backup directory should be makes every
    // snapshot write fail.
    let occupied = backup_dir.path().join("occupied");
    std::fs::write(&occupied, b"not a directory").expect("plant blocking file");

    let mut failed_run = MigrationRun::begin();
    let err = BackupManager::new(pool.clone(), occupied.as_path())
        .create_backup(&mut failed_run)
        .await
        .expect_err("backup into a regular file must fail");
    assert!(matches!(err, MigrationError::Io(_)), "unexpected error: {err}");
    assert!(!failed_run.ledger.backup_created);
    assert!(failed_run.ledger.backup_file.is_none());

    let ids_before = variant_ids(&pool).await;
    let mut blocked =
        Orchestrator::with_run(pool.clone(), test_config(&occupied), MigrationRun::begin());
    blocked
        .execute(true, false)
        .await
        .expect_err("run must abort when the backup cannot be written");
    assert_eq!(
        variant_ids(&pool).await,
        ids_before,
        "no mutation and nothing to roll back without a confirmed backup"
    );
}
