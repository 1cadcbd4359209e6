use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ReflectionDoc, Role, UserProfile};
use crate::store::{collections, Document, Filter, SnapshotStream, Store};

const SELECT_DOCS: &str = "SELECT id, version, data, created_at \
     FROM team_reflect.documents WHERE collection = $1 \
     ORDER BY created_at, id";

const SELECT_DOCS_FILTERED: &str = "SELECT id, version, data, created_at \
     FROM team_reflect.documents WHERE collection = $1 AND data @> $2 \
     ORDER BY created_at, id";

/// Postgres-backed document store. Documents are JSONB rows keyed by
/// (collection, id); a trigger NOTIFYs the collection name on every write,
/// which drives the snapshot subscriptions.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Insert only if the id is not already present. Returns false when the
    /// row existed, which keeps seed and import idempotent.
    async fn insert_new(&self, collection: &str, id: &str, data: &Value) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO team_reflect.documents (collection, id, version, data) \
             VALUES ($1, $2, 1, $3) \
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_document(row: sqlx::postgres::PgRow) -> Document {
    Document {
        id: row.get("id"),
        version: row.get("version"),
        data: row.get("data"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, version, data, created_at \
             FROM team_reflect.documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_document))
    }

    async fn list(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let rows = match filter.as_contains() {
            Some(contained) => {
                sqlx::query(SELECT_DOCS_FILTERED)
                    .bind(collection)
                    .bind(contained)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(SELECT_DOCS)
                    .bind(collection)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.into_iter().map(row_to_document).collect())
    }

    async fn insert(&self, collection: &str, data: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO team_reflect.documents (collection, id, version, data) \
             VALUES ($1, $2, 1, $3)",
        )
        .bind(collection)
        .bind(&id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        tracing::debug!(collection, %id, "inserted document");
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO team_reflect.documents AS d (collection, id, version, data) \
             VALUES ($1, $2, 1, $3) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET data = EXCLUDED.data, version = d.version + 1",
        )
        .bind(collection)
        .bind(id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        tracing::debug!(collection, id, "put document");
        Ok(())
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE team_reflect.documents \
             SET data = $4, version = version + 1 \
             WHERE collection = $1 AND id = $2 AND version = $3",
        )
        .bind(collection)
        .bind(id)
        .bind(expected_version)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Zero rows is either a version conflict or a missing document.
        match self.get(collection, id).await? {
            Some(_) => Ok(false),
            None => Err(Error::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<SnapshotStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen("document_changes").await?;

        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let collection = collection.to_string();

        tokio::spawn(async move {
            match store.list(&collection, &filter).await {
                Ok(snapshot) => {
                    if tx.send(snapshot).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(%collection, error = %err, "initial snapshot failed");
                    return;
                }
            }
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if notification.payload() != collection {
                            continue;
                        }
                        match store.list(&collection, &filter).await {
                            Ok(snapshot) => {
                                if tx.send(snapshot).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(%collection, error = %err, "snapshot refresh failed");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%collection, error = %err, "subscription listener closed");
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let store = PgStore::new(pool.clone());
    let team_id = "3f9a1c";

    let users = vec![
        (
            "7c1d2a4e-0b6f-4a39-9d1e-5f8a2b3c4d5e",
            "Dana Brooks",
            "dana.brooks@teamreflect.app",
            Role::Coach,
        ),
        (
            "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
            "Avery Lee",
            "avery.lee@teamreflect.app",
            Role::Athlete,
        ),
        (
            "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
            "Jules Moreno",
            "jules.moreno@teamreflect.app",
            Role::Athlete,
        ),
        (
            "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
            "Kiara Patel",
            "kiara.patel@teamreflect.app",
            Role::Athlete,
        ),
    ];

    for (uid, name, email, role) in &users {
        let profile = UserProfile {
            name: (*name).to_string(),
            email: (*email).to_string(),
            role: *role,
            team_id: team_id.to_string(),
        };
        store
            .put(collections::USERS, uid, serde_json::to_value(&profile)?)
            .await?;
    }

    let reflections = vec![
        (
            "seed-reflection-001",
            "avery.lee@teamreflect.app",
            Some("Avery Lee"),
            "Practice went great, feeling sharp before the weekend.",
            "Positive",
            8.5,
            false,
            "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
        ),
        (
            "seed-reflection-002",
            "jules.moreno@teamreflect.app",
            None,
            "Tired and a bit flat after the tournament.",
            "Red Flag",
            3.0,
            true,
            "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
        ),
        (
            "seed-reflection-003",
            "kiara.patel@teamreflect.app",
            Some("Kiara Patel"),
            "Okay session, still working through the new drills.",
            "Neutral",
            5.5,
            false,
            "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
        ),
    ];

    for (key, athlete, name, message, sentiment, score, anonymous, uid) in reflections {
        let doc = ReflectionDoc {
            athlete: athlete.to_string(),
            name: name.map(str::to_string),
            message: message.to_string(),
            sentiment: sentiment.to_string(),
            score,
            team_id: team_id.to_string(),
            anonymous,
            user_id: uid.to_string(),
            timestamp: Utc::now(),
        };
        store
            .insert_new(collections::REFLECTIONS, key, &serde_json::to_value(&doc)?)
            .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        athlete: String,
        name: Option<String>,
        message: String,
        sentiment: String,
        score: f64,
        #[serde(rename = "teamId")]
        team_id: String,
        #[serde(default)]
        anonymous: bool,
        #[serde(rename = "userId")]
        user_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
        source_key: Option<String>,
    }

    let store = PgStore::new(pool.clone());
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let doc = ReflectionDoc {
            user_id: row.user_id.unwrap_or_else(|| row.athlete.clone()),
            athlete: row.athlete,
            name: if row.anonymous { None } else { row.name },
            message: row.message,
            sentiment: row.sentiment,
            score: row.score,
            team_id: row.team_id,
            anonymous: row.anonymous,
            timestamp: row.timestamp.unwrap_or_else(Utc::now),
        };
        let key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if store
            .insert_new(collections::REFLECTIONS, &key, &serde_json::to_value(&doc)?)
            .await?
        {
            inserted += 1;
        }
    }

    Ok(inserted)
}
