use async_trait::async_trait;
use bankref_core::error::RefDataError;
use bankref_core::store::{
    document_watch, BatchWrite, Document, DocumentStore, DocumentWatch, Filter, FilterOp, OrderBy,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL-backed document store: one JSONB payload table keyed by
/// collection and document id.
///
/// Push subscriptions are fed by this process's own writes; a deployment with
/// multiple writers needs an external change feed instead.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<String>,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RefDataError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| RefDataError::Unavailable(format!("postgres connect failed: {e}")))?;

        let (changes, _) = broadcast::channel(256);
        let store = Self { pool, changes };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), RefDataError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bankref_documents (
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                payload JSONB NOT NULL,
                PRIMARY KEY (collection, doc_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("schema create", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bankref_documents_collection \
             ON bankref_documents (collection)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("index create", e))?;

        Ok(())
    }

    async fn run_query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError> {
        let sql = build_query_sql(filters, order_by);
        let mut query = sqlx::query(&sql).bind(collection);
        for filter in filters {
            query = query.bind(&filter.field).bind(&filter.value);
        }
        if let Some(order) = order_by {
            query = query.bind(&order.field);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("query", e))?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<Document, _>("payload")
                    .map_err(|e| RefDataError::Decode(format!("payload column: {e}")))
            })
            .collect()
    }

    fn notify(&self, collection: &str) {
        let _ = self.changes.send(collection.to_string());
    }
}

/// SELECT statement with one placeholder pair per filter, after the leading
/// collection placeholder; the optional order-by field takes the last slot.
fn build_query_sql(filters: &[Filter], order_by: Option<&OrderBy>) -> String {
    let mut sql = String::from("SELECT payload FROM bankref_documents WHERE collection = $1");
    let mut idx = 2;
    for filter in filters {
        let op = match filter.op {
            FilterOp::Eq => "=",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        };
        sql.push_str(&format!(
            " AND payload->(${}::text) {} ${}",
            idx,
            op,
            idx + 1
        ));
        idx += 2;
    }
    if let Some(order) = order_by {
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY payload->(${idx}::text) {direction}"));
    }
    sql
}

/// What a standing query does with one change-channel recv result.
#[derive(Debug, PartialEq, Eq)]
enum ChangeAction {
    Requery,
    Ignore,
    Stop,
}

fn on_change_signal(
    signal: Result<String, broadcast::error::RecvError>,
    collection: &str,
) -> ChangeAction {
    match signal {
        Ok(touched) if touched == collection => ChangeAction::Requery,
        Ok(_) => ChangeAction::Ignore,
        // Missed notifications collapse into one re-query; skipping here
        // would leave the last snapshot stale until the next write.
        Err(broadcast::error::RecvError::Lagged(_)) => ChangeAction::Requery,
        Err(broadcast::error::RecvError::Closed) => ChangeAction::Stop,
    }
}

fn map_sqlx(op: &str, err: sqlx::Error) -> RefDataError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => {
            RefDataError::Unavailable(format!("{op}: {err}"))
        }
        other => RefDataError::Store(format!("{op} failed: {other}")),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RefDataError> {
        let row = sqlx::query(
            "SELECT payload FROM bankref_documents WHERE collection = $1 AND doc_id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get", e))?;

        row.map(|row| {
            row.try_get::<Document, _>("payload")
                .map_err(|e| RefDataError::Decode(format!("payload column: {e}")))
        })
        .transpose()
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError> {
        self.run_query(collection, filters, order_by).await
    }

    async fn query_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>, RefDataError> {
        let rows = sqlx::query(
            "SELECT payload FROM bankref_documents \
             WHERE collection = $1 AND payload->>($2::text) = ANY($3)",
        )
        .bind(collection)
        .bind(field)
        .bind(values)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("query_in", e))?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<Document, _>("payload")
                    .map_err(|e| RefDataError::Decode(format!("payload column: {e}")))
            })
            .collect()
    }

    async fn insert(&self, collection: &str, mut fields: Document) -> Result<String, RefDataError> {
        let id = Uuid::new_v4().to_string();
        match fields.as_object_mut() {
            Some(map) => {
                map.insert("id".to_string(), serde_json::json!(id));
            }
            None => {
                return Err(RefDataError::Store(
                    "insert payload must be a JSON object".to_string(),
                ))
            }
        }

        sqlx::query(
            "INSERT INTO bankref_documents (collection, doc_id, payload) VALUES ($1, $2, $3)",
        )
        .bind(collection)
        .bind(&id)
        .bind(&fields)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("insert", e))?;

        self.notify(collection);
        debug!(collection, id = %id, "document inserted");
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), RefDataError> {
        let result = sqlx::query(
            "UPDATE bankref_documents SET payload = payload || $3 \
             WHERE collection = $1 AND doc_id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(&fields)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("update", e))?;

        if result.rows_affected() == 0 {
            return Err(RefDataError::not_found(collection, id));
        }
        self.notify(collection);
        Ok(())
    }

    async fn batch_commit(&self, writes: Vec<BatchWrite>) -> Result<(), RefDataError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx("batch begin", e))?;

        for write in &writes {
            let result = sqlx::query(
                "UPDATE bankref_documents SET payload = payload || $3 \
                 WHERE collection = $1 AND doc_id = $2",
            )
            .bind(&write.collection)
            .bind(&write.id)
            .bind(&write.fields)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("batch write", e))?;

            if result.rows_affected() == 0 {
                let _ = tx.rollback().await;
                return Err(RefDataError::BatchFailure(format!(
                    "missing document {}/{}",
                    write.collection, write.id
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| RefDataError::BatchFailure(format!("commit failed: {e}")))?;

        let mut touched: Vec<&str> = Vec::new();
        for write in &writes {
            if !touched.contains(&write.collection.as_str()) {
                touched.push(&write.collection);
                self.notify(&write.collection);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<DocumentWatch, RefDataError> {
        let (publisher, watch) = document_watch();
        let store = self.clone();
        let collection = collection.to_string();
        let mut changes = self.changes.subscribe();
        let mut cancelled = publisher.cancel_signal();

        let initial = store.run_query(&collection, &filters, None).await?;

        tokio::spawn(async move {
            let mut last = initial;
            if !publisher.publish(last.clone()) {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancelled.changed() => break,
                    changed = changes.recv() => match on_change_signal(changed, &collection) {
                        ChangeAction::Requery => {
                            match store.run_query(&collection, &filters, None).await {
                                Ok(current) => {
                                    if current != last {
                                        if !publisher.publish(current.clone()) {
                                            break;
                                        }
                                        last = current;
                                    }
                                }
                                Err(_) => {
                                    // Re-query failed: terminate the stream;
                                    // the consumer sees end-of-feed.
                                    break;
                                }
                            }
                        }
                        ChangeAction::Ignore => {}
                        ChangeAction::Stop => break,
                    },
                }
            }
        });

        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_sql_without_filters() {
        let sql = build_query_sql(&[], None);
        assert_eq!(
            sql,
            "SELECT payload FROM bankref_documents WHERE collection = $1"
        );
    }

    #[test]
    fn query_sql_numbers_placeholders_per_filter() {
        let filters = vec![
            Filter::eq("exchange_id", "e1"),
            Filter::eq("is_active", true),
        ];
        let sql = build_query_sql(&filters, Some(&OrderBy::asc("priority")));
        assert_eq!(
            sql,
            "SELECT payload FROM bankref_documents WHERE collection = $1 \
             AND payload->($2::text) = $3 AND payload->($4::text) = $5 \
             ORDER BY payload->($6::text) ASC"
        );
    }

    #[test]
    fn query_sql_supports_range_ops() {
        let filters = vec![Filter::gte("priority", 1), Filter::lte("priority", 5)];
        let sql = build_query_sql(&filters, None);
        assert!(sql.contains("payload->($2::text) >= $3"));
        assert!(sql.contains("payload->($4::text) <= $5"));
    }

    #[test]
    fn lagged_change_channel_forces_requery() {
        // Dropped notifications must not leave the last snapshot standing.
        let lagged = Err(broadcast::error::RecvError::Lagged(300));
        assert_eq!(on_change_signal(lagged, "platform_banks"), ChangeAction::Requery);
    }

    #[test]
    fn change_signals_route_by_collection() {
        assert_eq!(
            on_change_signal(Ok("platform_banks".to_string()), "platform_banks"),
            ChangeAction::Requery
        );
        assert_eq!(
            on_change_signal(Ok("users".to_string()), "platform_banks"),
            ChangeAction::Ignore
        );
        assert_eq!(
            on_change_signal(Err(broadcast::error::RecvError::Closed), "platform_banks"),
            ChangeAction::Stop
        );
    }
}
