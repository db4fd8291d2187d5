use {
    crate::domain::{
        audit::{AuditOutcome, NewAuditEntry, SubscriptionEventRecord},
        error::PipelineError,
        event::EventKind,
        id::UserId,
    },
    sqlx::Row,
};

pub async fn insert_audit_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    entry: &NewAuditEntry,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO subscription_events
            (id, user_id, event_kind, provider, product_id, transaction_id, outcome, actor, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(entry.id)
    .bind(entry.user_id.as_ref().map(UserId::as_str))
    .bind(entry.event_kind.as_str())
    .bind(entry.provider.as_deref())
    .bind(entry.product_id.as_deref())
    .bind(entry.transaction_id.as_deref())
    .bind(entry.outcome.as_str())
    .bind(&entry.actor)
    .bind(&entry.metadata)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Trail for one user, oldest first, optionally narrowed to one kind.
pub async fn list_for_user(
    pool: &sqlx::PgPool,
    user_id: &UserId,
    kind: Option<EventKind>,
) -> Result<Vec<SubscriptionEventRecord>, PipelineError> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, event_kind, provider, product_id, transaction_id,
               outcome, actor, metadata, created_at
        FROM subscription_events
        WHERE user_id = $1 AND ($2::text IS NULL OR event_kind = $2)
        ORDER BY created_at, id
        "#,
    )
    .bind(user_id.as_str())
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<SubscriptionEventRecord, PipelineError> {
            let user_id: Option<String> = row.try_get("user_id")?;
            let event_kind: String = row.try_get("event_kind")?;
            let outcome: String = row.try_get("outcome")?;
            Ok(SubscriptionEventRecord {
                id: row.try_get("id")?,
                user_id: user_id.map(UserId::new).transpose()?,
                event_kind: EventKind::try_from(event_kind.as_str())?,
                provider: row.try_get("provider")?,
                product_id: row.try_get("product_id")?,
                transaction_id: row.try_get("transaction_id")?,
                outcome: AuditOutcome::try_from(outcome.as_str())?,
                actor: row.try_get("actor")?,
                metadata: row.try_get("metadata")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
