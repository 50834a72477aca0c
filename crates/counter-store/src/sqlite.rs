use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use counter_order::Order;
use counter_workflow::HistoryEvent;
use sqlx::FromRow;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
  Error, HistoryRecord, HistoryStore, InstanceStatus, OrderRepository, WorkflowInstance,
};

#[derive(FromRow)]
struct HistoryRow {
  position: i64,
  event: String,
  recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryRecord {
  type Error = Error;

  fn try_from(row: HistoryRow) -> Result<Self, Error> {
    let position = row.position as u64;
    let event = serde_json::from_str(&row.event).map_err(|e| Error::Corrupt {
      position,
      reason: e.to_string(),
    })?;
    Ok(Self {
      position,
      event,
      recorded_at: row.recorded_at,
    })
  }
}

/// SQLite-based store implementation.
///
/// Implements both [`HistoryStore`] and [`OrderRepository`] over one pool.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) the database at `url`, e.g. `sqlite://counter.db`.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(5)
      .connect_with(options)
      .await?;

    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl HistoryStore for SqliteStore {
  async fn create_instance(
    &self,
    instance: &WorkflowInstance,
    first_event: &HistoryEvent,
  ) -> Result<(), Error> {
    let mut tx = self.pool.begin().await?;

    let inserted = sqlx::query(
      r#"
            INSERT INTO workflow_instances (instance_id, status, last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
    )
    .bind(&instance.instance_id)
    .bind(instance.status)
    .bind(&instance.last_error)
    .bind(instance.created_at)
    .bind(instance.updated_at)
    .execute(&mut *tx)
    .await;

    match inserted {
      Ok(_) => {}
      Err(e) if is_unique_violation(&e) => {
        return Err(Error::AlreadyExists(instance.instance_id.clone()));
      }
      Err(e) => return Err(e.into()),
    }

    sqlx::query(
      r#"
            INSERT INTO workflow_history (instance_id, position, event, recorded_at)
            VALUES (?, 0, ?, ?)
            "#,
    )
    .bind(&instance.instance_id)
    .bind(Json(first_event))
    .bind(instance.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
  }

  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
    sqlx::query_as(
      r#"
            SELECT instance_id, status, last_error, created_at, updated_at
            FROM workflow_instances
            WHERE instance_id = ?
            "#,
    )
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(instance_id.to_string()))
  }

  async fn list_instances(
    &self,
    status: Option<InstanceStatus>,
  ) -> Result<Vec<WorkflowInstance>, Error> {
    let instances = sqlx::query_as(
      r#"
            SELECT instance_id, status, last_error, created_at, updated_at
            FROM workflow_instances
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY created_at ASC
            "#,
    )
    .bind(status)
    .fetch_all(&self.pool)
    .await?;

    Ok(instances)
  }

  async fn update_instance_status(
    &self,
    instance_id: &str,
    status: InstanceStatus,
    last_error: Option<&str>,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE workflow_instances
            SET status = ?, last_error = ?, updated_at = ?
            WHERE instance_id = ?
            "#,
    )
    .bind(status)
    .bind(last_error)
    .bind(Utc::now())
    .bind(instance_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(instance_id.to_string()));
    }

    Ok(())
  }

  async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<u64, Error> {
    // Position allocation and insert happen in one statement so concurrent
    // appends cannot observe the same MAX(position).
    let position: Option<i64> = sqlx::query_scalar(
      r#"
            INSERT INTO workflow_history (instance_id, position, event, recorded_at)
            SELECT instance_id,
                   (SELECT COALESCE(MAX(position) + 1, 0) FROM workflow_history WHERE instance_id = ?1),
                   ?2,
                   ?3
            FROM workflow_instances
            WHERE instance_id = ?1
            RETURNING position
            "#,
    )
    .bind(instance_id)
    .bind(Json(event))
    .bind(Utc::now())
    .fetch_optional(&self.pool)
    .await?;

    position
      .map(|p| p as u64)
      .ok_or_else(|| Error::NotFound(instance_id.to_string()))
  }

  async fn read_from(
    &self,
    instance_id: &str,
    position: u64,
  ) -> Result<Vec<HistoryRecord>, Error> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
      r#"
            SELECT position, event, recorded_at
            FROM workflow_history
            WHERE instance_id = ? AND position >= ?
            ORDER BY position ASC
            "#,
    )
    .bind(instance_id)
    .bind(position as i64)
    .fetch_all(&self.pool)
    .await?;

    if rows.is_empty() {
      // Distinguish "nothing past this position" from "no such instance".
      self.get_instance(instance_id).await?;
    }

    rows.into_iter().map(HistoryRecord::try_from).collect()
  }
}

#[async_trait]
impl OrderRepository for SqliteStore {
  async fn save(&self, order: &Order) -> Result<Order, Error> {
    let now = Utc::now();
    sqlx::query(
      r#"
            INSERT INTO orders (order_id, status, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (order_id) DO UPDATE
            SET status = excluded.status, body = excluded.body, updated_at = excluded.updated_at
            "#,
    )
    .bind(order.id.to_string())
    .bind(order.status.as_str())
    .bind(Json(order))
    .bind(order.created_at().unwrap_or(now))
    .bind(now)
    .execute(&self.pool)
    .await?;

    Ok(order.clone())
  }

  async fn find_by_id(&self, order_id: Uuid) -> Result<Order, Error> {
    let body: Option<Json<Order>> = sqlx::query_scalar(
      r#"
            SELECT body
            FROM orders
            WHERE order_id = ?
            "#,
    )
    .bind(order_id.to_string())
    .fetch_optional(&self.pool)
    .await?;

    body
      .map(|json| json.0)
      .ok_or_else(|| Error::NotFound(order_id.to_string()))
  }

  async fn list(&self) -> Result<Vec<Order>, Error> {
    let bodies: Vec<Json<Order>> = sqlx::query_scalar(
      r#"
            SELECT body
            FROM orders
            ORDER BY created_at ASC, order_id ASC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(bodies.into_iter().map(|json| json.0).collect())
  }
}
