use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub async fn connect_pg(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Creates the `appointment` and `exam` tables if they are missing. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS appointment (
          appointment_id   BIGSERIAL PRIMARY KEY,
          patient_name     TEXT NOT NULL,
          patient_document TEXT,
          phone            TEXT NOT NULL,
          health_center    TEXT NOT NULL,
          specialty        TEXT NOT NULL,
          appointment_date DATE NOT NULL,
          appointment_time TEXT NOT NULL,
          reason           TEXT NOT NULL,
          status           SMALLINT NOT NULL DEFAULT 0,
          created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
          updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS appointment_patient_document_idx
        ON appointment (patient_document)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam (
          exam_id          BIGSERIAL PRIMARY KEY,
          patient_document TEXT NOT NULL,
          exam_type        TEXT NOT NULL,
          exam_date        DATE NOT NULL,
          result           TEXT NOT NULL,
          file_url         TEXT,
          created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS exam_patient_document_idx
        ON exam (patient_document)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("appointment and exam schema ready");
    Ok(())
}
