use anyhow::Result;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::saga::{SagaInstance, SagaStatus, StepData};

#[derive(Clone)]
pub struct SagaRepo {
    pub pool: PgPool,
}

impl SagaRepo {
    pub async fn upsert(&self, instance: &SagaInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_instances (
                id, saga_type, correlation_id, current_step, step_data, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (id) DO UPDATE
                SET current_step = EXCLUDED.current_step,
                    step_data = EXCLUDED.step_data,
                    status = EXCLUDED.status,
                    updated_at = now()
            "#,
        )
        .bind(instance.id)
        .bind(&instance.saga_type)
        .bind(instance.correlation_id)
        .bind(instance.current_step)
        .bind(serde_json::to_value(&instance.step_data)?)
        .bind(instance.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, saga_type, correlation_id, current_step, step_data, status
            FROM saga_instances WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status: String = r.try_get("status")?;
            let step_data: serde_json::Value = r.try_get("step_data")?;
            Ok(SagaInstance {
                id: r.try_get("id")?,
                saga_type: r.try_get("saga_type")?,
                correlation_id: r.try_get("correlation_id")?,
                current_step: r.try_get("current_step")?,
                step_data: serde_json::from_value::<Vec<StepData>>(step_data)?,
                status: SagaStatus::parse(&status),
            })
        })
        .transpose()
    }
}
