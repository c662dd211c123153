//! SQLite persistence of template snapshots
//!
//! The in-memory store is authoritative while the server runs. An upload
//! inserts the template row; every later mutation rewrites the template's
//! snapshot in one transaction. Later writes only update an existing row
//! and drop snapshots older than the stored revision, so a save that lands
//! after a delete cannot bring the template back and out-of-order saves
//! cannot roll it back.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use formfill_core::{BoundingBox, Field, Template, TemplateId, TemplateSnapshot, ValueType};
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{FromRow, Transaction};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            page_count INTEGER NOT NULL,
            uniform_height REAL,
            revision INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bounding_boxes (
            id INTEGER PRIMARY KEY,
            template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
            page INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            width REAL NOT NULL,
            height REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_mappings (
            id INTEGER PRIMARY KEY,
            template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            label TEXT NOT NULL,
            value_type TEXT NOT NULL,
            font_size REAL NOT NULL,
            UNIQUE (template_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per box in a field; a box appears in at most one field
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_box_mappings (
            field_id INTEGER NOT NULL REFERENCES field_mappings(id) ON DELETE CASCADE,
            box_id INTEGER NOT NULL UNIQUE REFERENCES bounding_boxes(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            PRIMARY KEY (field_id, box_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_boxes_template_page ON bounding_boxes(template_id, page)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

/// How the template row of a snapshot reaches the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowWrite {
    /// First save after upload
    Insert,
    /// Every later save; never creates a row
    Update,
}

/// Store a newly uploaded template. A save that raced ahead of this one is
/// overwritten only when this snapshot is newer.
pub async fn insert_snapshot(pool: &SqlitePool, snapshot: &TemplateSnapshot) -> Result<bool> {
    write_snapshot(pool, snapshot, RowWrite::Insert).await
}

/// Rewrite a stored template. Returns false when the template row is gone
/// or already holds this revision or a newer one.
pub async fn save_snapshot(pool: &SqlitePool, snapshot: &TemplateSnapshot) -> Result<bool> {
    write_snapshot(pool, snapshot, RowWrite::Update).await
}

async fn write_snapshot(
    pool: &SqlitePool,
    snapshot: &TemplateSnapshot,
    mode: RowWrite,
) -> Result<bool> {
    let t = &snapshot.template;
    let revision = snapshot.revision as i64;
    let mut tx = pool.begin().await?;

    let row = match mode {
        RowWrite::Insert => sqlx::query(
            r#"
            INSERT INTO templates
                (id, name, filename, file_path, page_count, uniform_height, revision, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                filename = excluded.filename,
                file_path = excluded.file_path,
                page_count = excluded.page_count,
                uniform_height = excluded.uniform_height,
                revision = excluded.revision
            WHERE excluded.revision > templates.revision
            "#,
        )
        .bind(t.id),
        RowWrite::Update => sqlx::query(
            r#"
            UPDATE templates
            SET name = ?, filename = ?, file_path = ?, page_count = ?,
                uniform_height = ?, revision = ?
            WHERE id = ? AND revision < ?
            "#,
        ),
    };
    let row = row
        .bind(&t.name)
        .bind(&t.filename)
        .bind(t.file_path.to_string_lossy().into_owned())
        .bind(i64::from(t.page_count))
        .bind(snapshot.uniform_height)
        .bind(revision);
    let row = match mode {
        RowWrite::Insert => row.bind(t.created_at),
        RowWrite::Update => row.bind(t.id).bind(revision),
    };
    let updated = row.execute(&mut *tx).await?.rows_affected();

    if updated == 0 {
        tx.rollback().await?;
        tracing::debug!(
            "Skipped snapshot of template {} at revision {}: row missing or newer",
            t.id,
            snapshot.revision
        );
        return Ok(false);
    }

    clear_template(&mut tx, t.id).await?;

    for b in &snapshot.boxes {
        sqlx::query(
            r#"
            INSERT INTO bounding_boxes (id, template_id, page, x, y, width, height)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(b.id)
        .bind(b.template_id)
        .bind(i64::from(b.page))
        .bind(b.x)
        .bind(b.y)
        .bind(b.width)
        .bind(b.height)
        .execute(&mut *tx)
        .await?;
    }

    for f in &snapshot.fields {
        sqlx::query(
            r#"
            INSERT INTO field_mappings (id, template_id, name, label, value_type, font_size)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(f.id)
        .bind(f.template_id)
        .bind(&f.name)
        .bind(&f.label)
        .bind(f.value_type.to_string())
        .bind(f.font_size)
        .execute(&mut *tx)
        .await?;

        for (position, box_id) in f.box_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO field_box_mappings (field_id, box_id, position) VALUES (?, ?, ?)",
            )
            .bind(f.id)
            .bind(box_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(true)
}

/// Remove a template's boxes, fields and their links, keeping the template row
async fn clear_template(tx: &mut Transaction<'_, Sqlite>, id: TemplateId) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM field_box_mappings
        WHERE field_id IN (SELECT id FROM field_mappings WHERE template_id = ?)
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;
    sqlx::query("DELETE FROM field_mappings WHERE template_id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM bounding_boxes WHERE template_id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn delete_template(pool: &SqlitePool, id: TemplateId) -> Result<()> {
    let mut tx = pool.begin().await?;
    clear_template(&mut tx, id).await?;
    sqlx::query("DELETE FROM templates WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[derive(FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    filename: String,
    file_path: String,
    page_count: i64,
    uniform_height: Option<f64>,
    revision: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct BoxRow {
    id: i64,
    template_id: i64,
    page: i64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(FromRow)]
struct FieldRow {
    id: i64,
    template_id: i64,
    name: String,
    label: String,
    value_type: String,
    font_size: f64,
}

#[derive(FromRow)]
struct FieldBoxRow {
    field_id: i64,
    box_id: i64,
}

fn page_number(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("page value {} out of range", value))
}

/// Load every stored template as a snapshot, oldest first
pub async fn load_snapshots(pool: &SqlitePool) -> Result<Vec<TemplateSnapshot>> {
    let templates: Vec<TemplateRow> = sqlx::query_as(
        r#"
        SELECT id, name, filename, file_path, page_count, uniform_height, revision, created_at
        FROM templates
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let boxes: Vec<BoxRow> = sqlx::query_as(
        "SELECT id, template_id, page, x, y, width, height FROM bounding_boxes ORDER BY page, id",
    )
    .fetch_all(pool)
    .await?;

    let fields: Vec<FieldRow> = sqlx::query_as(
        r#"
        SELECT id, template_id, name, label, value_type, font_size
        FROM field_mappings
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let links: Vec<FieldBoxRow> = sqlx::query_as(
        "SELECT field_id, box_id FROM field_box_mappings ORDER BY field_id, position",
    )
    .fetch_all(pool)
    .await?;

    let mut box_ids: HashMap<i64, Vec<i64>> = HashMap::new();
    for link in links {
        box_ids.entry(link.field_id).or_default().push(link.box_id);
    }

    let mut boxes_by_template: HashMap<i64, Vec<BoundingBox>> = HashMap::new();
    for b in boxes {
        boxes_by_template
            .entry(b.template_id)
            .or_default()
            .push(BoundingBox {
                id: b.id,
                template_id: b.template_id,
                page: page_number(b.page)?,
                x: b.x,
                y: b.y,
                width: b.width,
                height: b.height,
            });
    }

    let mut fields_by_template: HashMap<i64, Vec<Field>> = HashMap::new();
    for f in fields {
        let value_type: ValueType = f
            .value_type
            .parse()
            .with_context(|| format!("field {} has a bad value type", f.id))?;
        fields_by_template
            .entry(f.template_id)
            .or_default()
            .push(Field {
                id: f.id,
                template_id: f.template_id,
                name: f.name,
                label: f.label,
                value_type,
                font_size: f.font_size,
                box_ids: box_ids.remove(&f.id).unwrap_or_default(),
            });
    }

    templates
        .into_iter()
        .map(|t| {
            Ok(TemplateSnapshot {
                template: Template {
                    id: t.id,
                    name: t.name,
                    filename: t.filename,
                    file_path: PathBuf::from(t.file_path),
                    page_count: page_number(t.page_count)?,
                    created_at: t.created_at,
                },
                revision: u64::try_from(t.revision).unwrap_or(0),
                uniform_height: t.uniform_height,
                boxes: boxes_by_template.remove(&t.id).unwrap_or_default(),
                fields: fields_by_template.remove(&t.id).unwrap_or_default(),
            })
        })
        .collect()
}
