use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Opening lines: one immutable row per selection key.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS opening_lines (
  line_key TEXT PRIMARY KEY,
  payload TEXT NOT NULL,
  captured_at BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
