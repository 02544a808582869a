// ============================================
// Interaction Log Storage
// ============================================
//
// Append-only log of InteractionEvent records, read back by the online CF
// fallback and the retraining job. The store sits behind a trait so the
// pipeline is testable against an in-memory log and deployable against
// Postgres.

use crate::error::Result;
use crate::models::{ActionKind, InteractionContext, InteractionEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persist one event. The event's reward has already been resolved
    /// against the default-reward table.
    async fn append(&self, event: InteractionEvent) -> Result<()>;

    /// Number of events with reward > 0, the retrain trigger's input.
    async fn positive_count(&self) -> Result<u64>;

    /// Every event, oldest first.
    async fn all_events(&self) -> Result<Vec<InteractionEvent>>;

    /// Events with reward > 0, oldest first.
    async fn positive_events(&self) -> Result<Vec<InteractionEvent>>;
}

// --------------------------------------------
// In-memory store (tests, local runs without a database)
// --------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryInteractionStore {
    events: RwLock<Vec<InteractionEvent>>,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
    async fn append(&self, event: InteractionEvent) -> Result<()> {
        self.events
            .write()
            .expect("interaction log lock poisoned")
            .push(event);
        Ok(())
    }

    async fn positive_count(&self) -> Result<u64> {
        let events = self.events.read().expect("interaction log lock poisoned");
        Ok(events.iter().filter(|e| e.is_positive()).count() as u64)
    }

    async fn all_events(&self) -> Result<Vec<InteractionEvent>> {
        Ok(self
            .events
            .read()
            .expect("interaction log lock poisoned")
            .clone())
    }

    async fn positive_events(&self) -> Result<Vec<InteractionEvent>> {
        let events = self.events.read().expect("interaction log lock poisoned");
        Ok(events.iter().filter(|e| e.is_positive()).cloned().collect())
    }
}

// --------------------------------------------
// Postgres store
// --------------------------------------------

pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections = max_connections, "interaction store connected");
        Ok(Self::new(pool))
    }

    /// Create the interactions table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                action TEXT NOT NULL,
                reward DOUBLE PRECISION NOT NULL,
                lat DOUBLE PRECISION,
                lng DOUBLE PRECISION,
                intent TEXT,
                cuisine TEXT,
                price_min DOUBLE PRECISION,
                price_max DOUBLE PRECISION
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_event(row: &PgRow) -> InteractionEvent {
        let action_raw: String = row.get("action");
        let action = ActionKind::parse(&action_raw).unwrap_or_else(|| {
            warn!(action = %action_raw, "unknown action kind in log; treating as impression");
            ActionKind::Impression
        });
        let cuisine: Option<String> = row.get("cuisine");
        InteractionEvent {
            id: row.get::<Uuid, _>("id"),
            user_id: row.get("user_id"),
            item_id: row.get("item_id"),
            timestamp: row.get::<DateTime<Utc>, _>("ts"),
            action,
            reward: row.get("reward"),
            context: InteractionContext {
                lat: row.get("lat"),
                lng: row.get("lng"),
                intent: row.get("intent"),
                cuisine: cuisine
                    .map(|c| {
                        c.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                price_min: row.get("price_min"),
                price_max: row.get("price_max"),
            },
        }
    }
}

#[async_trait]
impl InteractionStore for PgInteractionStore {
    async fn append(&self, event: InteractionEvent) -> Result<()> {
        let cuisine = if event.context.cuisine.is_empty() {
            None
        } else {
            Some(event.context.cuisine.join(", "))
        };
        sqlx::query(
            r#"
            INSERT INTO interactions
                (id, user_id, item_id, ts, action, reward,
                 lat, lng, intent, cuisine, price_min, price_max)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(&event.user_id)
        .bind(&event.item_id)
        .bind(event.timestamp)
        .bind(event.action.as_str())
        .bind(event.reward)
        .bind(event.context.lat)
        .bind(event.context.lng)
        .bind(&event.context.intent)
        .bind(cuisine)
        .bind(event.context.price_min)
        .bind(event.context.price_max)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn positive_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interactions WHERE reward > 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn all_events(&self) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query("SELECT * FROM interactions ORDER BY ts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_event).collect())
    }

    async fn positive_events(&self) -> Result<Vec<InteractionEvent>> {
        let rows = sqlx::query("SELECT * FROM interactions WHERE reward > 0 ORDER BY ts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_event).collect())
    }
}
