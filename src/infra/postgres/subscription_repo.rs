use {
    crate::domain::{
        error::PipelineError,
        id::UserId,
        provider::Platform,
        subscription::{Plan, Subscription, SubscriptionStatus},
    },
    sqlx::{Row, postgres::PgRow},
};

const COLUMNS: &str = "user_id, plan, status, platform, product_id, original_transaction_id, \
     latest_transaction_id, expiry_date, auto_renew, refunded, refund_date, last_event_at, \
     updated_at, version";

fn from_row(row: &PgRow) -> Result<Subscription, PipelineError> {
    let user_id: String = row.try_get("user_id")?;
    let plan: String = row.try_get("plan")?;
    let status: String = row.try_get("status")?;
    let platform: Option<String> = row.try_get("platform")?;

    Ok(Subscription {
        user_id: UserId::new(user_id)?,
        plan: Plan::try_from(plan.as_str())?,
        status: SubscriptionStatus::try_from(status.as_str())?,
        platform: platform
            .as_deref()
            .map(Platform::try_from)
            .transpose()?,
        product_id: row.try_get("product_id")?,
        original_transaction_id: row.try_get("original_transaction_id")?,
        latest_transaction_id: row.try_get("latest_transaction_id")?,
        expiry_date: row.try_get("expiry_date")?,
        auto_renew: row.try_get("auto_renew")?,
        refunded: row.try_get("refunded")?,
        refund_date: row.try_get("refund_date")?,
        last_event_at: row.try_get("last_event_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

pub async fn get_subscription(
    pool: &sqlx::PgPool,
    user_id: &UserId,
) -> Result<Option<Subscription>, PipelineError> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM subscriptions WHERE user_id = $1"
    ))
    .bind(user_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(from_row).transpose()
}

pub async fn find_user_by_lineage(
    pool: &sqlx::PgPool,
    original_transaction_id: &str,
) -> Result<Option<UserId>, PipelineError> {
    let user_id: Option<String> = sqlx::query_scalar(
        "SELECT user_id FROM subscriptions WHERE original_transaction_id = $1 ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(original_transaction_id)
    .fetch_optional(pool)
    .await?;

    user_id.map(UserId::new).transpose()
}

/// Row version under a share lock, so a rejection can be checked against
/// the state it was decided on.
pub async fn lock_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: &UserId,
) -> Result<Option<i64>, PipelineError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM subscriptions WHERE user_id = $1 FOR SHARE")
            .bind(user_id.as_str())
            .fetch_optional(&mut **tx)
            .await?;
    Ok(version)
}

/// Returns `false` if a row for the user already exists.
pub async fn insert_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    s: &Subscription,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(&format!(
        r#"
        INSERT INTO subscriptions ({COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (user_id) DO NOTHING
        "#
    ))
    .bind(s.user_id.as_str())
    .bind(s.plan.as_str())
    .bind(s.status.as_str())
    .bind(s.platform.map(|p| p.as_str()))
    .bind(s.product_id.as_deref())
    .bind(s.original_transaction_id.as_deref())
    .bind(s.latest_transaction_id.as_deref())
    .bind(s.expiry_date)
    .bind(s.auto_renew)
    .bind(s.refunded)
    .bind(s.refund_date)
    .bind(s.last_event_at)
    .bind(s.updated_at)
    .bind(s.version)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Compare-and-swap on `version`. Returns `false` if another writer moved
/// the row first.
pub async fn update_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    s: &Subscription,
    expected_version: i64,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET plan = $2, status = $3, platform = $4, product_id = $5,
            original_transaction_id = $6, latest_transaction_id = $7,
            expiry_date = $8, auto_renew = $9, refunded = $10, refund_date = $11,
            last_event_at = $12, updated_at = $13, version = $14
        WHERE user_id = $1 AND version = $15
        "#,
    )
    .bind(s.user_id.as_str())
    .bind(s.plan.as_str())
    .bind(s.status.as_str())
    .bind(s.platform.map(|p| p.as_str()))
    .bind(s.product_id.as_deref())
    .bind(s.original_transaction_id.as_deref())
    .bind(s.latest_transaction_id.as_deref())
    .bind(s.expiry_date)
    .bind(s.auto_renew)
    .bind(s.refunded)
    .bind(s.refund_date)
    .bind(s.last_event_at)
    .bind(s.updated_at)
    .bind(s.version)
    .bind(expected_version)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}
