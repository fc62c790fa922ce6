//! Saga Orchestrator (C3): sequential forward steps with compensations,
//! retries with backoff, persisted state, and crash recovery.
//!
//! Ported from a Python orchestrator built around free-standing async
//! closures; the Rust rendition keeps the same step/compensation/retry
//! shape using boxed futures instead of dynamic closures over a GIL.

pub mod booking_saga;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum SagaStatus {
    Started,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SagaStatus::Started => "started",
            SagaStatus::Executing => "executing",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensating => "compensating",
            SagaStatus::Compensated => "compensated",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "started" => SagaStatus::Started,
            "executing" => SagaStatus::Executing,
            "completed" => SagaStatus::Completed,
            "failed" => SagaStatus::Failed,
            "compensating" => SagaStatus::Compensating,
            "compensated" => SagaStatus::Compensated,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

/// An action and its compensation, each a boxed future factory over the
/// merged saga+step context. Returning `Ok` stores the value on the step
/// record; returning `Err` triggers the step's retry policy.
pub type StepAction = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

pub struct SagaStep {
    pub name: String,
    pub action: StepAction,
    pub compensation: StepAction,
    pub context: Value,
    pub max_retries: u32,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub executed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
}

impl SagaStep {
    fn to_json(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "status": format!("{:?}", self.status),
            "result": self.result,
            "error": self.error,
            "retry_count": self.retry_count,
            "executed_at": self.executed_at,
            "compensated_at": self.compensated_at,
        })
    }
}

pub struct SagaTransaction {
    pub saga_id: Uuid,
    pub name: String,
    pub steps: Vec<SagaStep>,
    pub status: SagaStatus,
    pub context: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SagaTransaction {
    fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Completed).count()
    }
}

pub struct SagaStatusView {
    pub status: SagaStatus,
    pub completed_steps: usize,
    pub error: Option<String>,
}

/// Sequences steps, retries with bounded backoff, compensates in reverse
/// order on failure, and persists the envelope to the durable store after
/// every transition. Holds a weak in-memory index of active sagas; the
/// durable row is authoritative.
pub struct SagaOrchestrator {
    pool: PgPool,
    active_sagas: Mutex<HashMap<Uuid, ()>>,
    cleanup_registry: Mutex<HashSet<Uuid>>,
}

impl SagaOrchestrator {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active_sagas: Mutex::new(HashMap::new()),
            cleanup_registry: Mutex::new(HashSet::new()),
        }
    }

    pub async fn create_saga(&self, name: impl Into<String>, context: Value) -> SagaTransaction {
        let saga_id = Uuid::new_v4();
        {
            let mut active = self.active_sagas.lock().await;
            active.insert(saga_id, ());
            let mut registry = self.cleanup_registry.lock().await;
            registry.insert(saga_id);
        }
        SagaTransaction {
            saga_id,
            name: name.into(),
            steps: Vec::new(),
            status: SagaStatus::Started,
            context,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn add_step(
        saga: &mut SagaTransaction,
        name: impl Into<String>,
        action: StepAction,
        compensation: StepAction,
        context: Value,
        max_retries: u32,
    ) {
        saga.steps.push(SagaStep {
            name: name.into(),
            action,
            compensation,
            context,
            max_retries,
            status: StepStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            executed_at: None,
            compensated_at: None,
        });
    }

    /// Forward-executes every step; on failure runs the reverse
    /// compensation chain over already-completed steps. Always drains the
    /// in-memory registry on exit, success or failure.
    pub async fn execute_saga(&self, saga: &mut SagaTransaction) -> bool {
        saga.status = SagaStatus::Executing;
        self.persist(saga).await;

        let mut executed_indices = Vec::new();
        let mut failed = false;

        for i in 0..saga.steps.len() {
            if self.execute_step(saga, i).await {
                executed_indices.push(i);
                self.persist(saga).await;
            } else {
                failed = true;
                self.persist(saga).await;
                break;
            }
        }

        let result = if failed {
            saga.status = SagaStatus::Failed;
            self.persist(saga).await;
            self.compensate_saga(saga, &executed_indices).await;
            false
        } else {
            saga.status = SagaStatus::Completed;
            saga.completed_at = Some(Utc::now());
            self.persist(saga).await;
            true
        };

        self.cleanup_saga(saga.saga_id).await;
        result
    }

    async fn execute_step(&self, saga: &mut SagaTransaction, index: usize) -> bool {
        let saga_context = saga.context.clone();
        let saga_id = saga.saga_id;
        let step_name = saga.steps[index].name.clone();
        let max_retries = saga.steps[index].max_retries;

        for attempt in 0..=max_retries {
            let step = &mut saga.steps[index];
            step.status = StepStatus::Executing;
            let merged = merge_context(&saga_context, &step.context);
            let action = step.action.clone();

            match action(merged).await {
                Ok(value) => {
                    let step = &mut saga.steps[index];
                    step.status = StepStatus::Completed;
                    step.result = Some(value);
                    step.executed_at = Some(Utc::now());
                    return true;
                }
                Err(e) => {
                    let step = &mut saga.steps[index];
                    step.retry_count = attempt + 1;
                    step.error = Some(e.to_string());
                    warn!(saga_id = %saga_id, step = %step_name, attempt, error = %e, "saga step failed");
                    if attempt < max_retries {
                        tokio::time::sleep(std::time::Duration::from_secs(retry_backoff_seconds(attempt))).await;
                    } else {
                        step.status = StepStatus::Failed;
                    }
                }
            }
        }
        false
    }

    /// Runs compensations in reverse order over the steps that completed.
    /// A compensation failure is logged and does not abort the chain —
    /// partial compensation beats halting midway.
    async fn compensate_saga(&self, saga: &mut SagaTransaction, executed_indices: &[usize]) {
        saga.status = SagaStatus::Compensating;
        self.persist(saga).await;

        let saga_context = saga.context.clone();
        let saga_id = saga.saga_id;

        for &index in executed_indices.iter().rev() {
            let step = &mut saga.steps[index];
            if step.status != StepStatus::Completed {
                continue;
            }
            step.status = StepStatus::Compensating;
            let mut merged = merge_context(&saga_context, &step.context);
            if let (Some(obj), Some(result)) = (merged.as_object_mut(), step.result.clone()) {
                obj.insert("step_result".to_string(), result);
            }
            let compensation = step.compensation.clone();
            let step_name = step.name.clone();

            match compensation(merged).await {
                Ok(_) => {
                    let step = &mut saga.steps[index];
                    step.status = StepStatus::Compensated;
                    step.compensated_at = Some(Utc::now());
                }
                Err(e) => {
                    error!(saga_id = %saga_id, step = %step_name, error = %e, "compensation failed, continuing chain");
                }
            }
            self.persist(saga).await;
        }

        saga.status = SagaStatus::Compensated;
        self.persist(saga).await;
    }

    async fn cleanup_saga(&self, saga_id: Uuid) {
        let mut active = self.active_sagas.lock().await;
        active.remove(&saga_id);
        let mut registry = self.cleanup_registry.lock().await;
        registry.remove(&saga_id);
    }

    /// Reconciles the cleanup registry against the live map, dropping
    /// entries whose saga is no longer active. Catches pathological leaks;
    /// not on any hot path.
    pub async fn cleanup_orphaned_sagas(&self) -> usize {
        let active = self.active_sagas.lock().await;
        let mut registry = self.cleanup_registry.lock().await;
        let orphaned: Vec<Uuid> = registry.iter().filter(|id| !active.contains_key(id)).copied().collect();
        for id in &orphaned {
            registry.remove(id);
        }
        orphaned.len()
    }

    /// Best-effort upsert of the saga envelope. Persistence failures are
    /// logged but never bubble up — the in-memory path is authoritative for
    /// the running call; the durable record is for post-crash inspection.
    async fn persist(&self, saga: &SagaTransaction) {
        let steps_json = serde_json::Value::Array(saga.steps.iter().map(|s| s.to_json()).collect());
        let result = sqlx::query(
            r#"
            INSERT INTO saga_states (saga_id, saga_name, status, context, steps_data, completed_steps, started_at, completed_at, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (saga_id) DO UPDATE SET
                status = EXCLUDED.status,
                context = EXCLUDED.context,
                steps_data = EXCLUDED.steps_data,
                completed_steps = EXCLUDED.completed_steps,
                completed_at = EXCLUDED.completed_at,
                error_message = EXCLUDED.error_message,
                retry_count = EXCLUDED.retry_count
            "#,
        )
        .bind(saga.saga_id)
        .bind(&saga.name)
        .bind(saga.status.to_string())
        .bind(&saga.context)
        .bind(&steps_json)
        .bind(saga.completed_steps() as i32)
        .bind(saga.started_at)
        .bind(saga.completed_at)
        .bind(&saga.error)
        .bind(saga.steps.iter().map(|s| s.retry_count as i32).sum::<i32>())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(saga_id = %saga.saga_id, error = %e, "failed to persist saga state (best-effort)");
        }
    }

    pub async fn get_saga_status(&self, saga_id: Uuid) -> Option<SagaStatusView> {
        let row = sqlx::query_as::<_, (String, i32, Option<String>)>(
            "SELECT status, completed_steps, error_message FROM saga_states WHERE saga_id = $1",
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        Some(SagaStatusView {
            status: row.0.parse().unwrap_or(SagaStatus::Failed),
            completed_steps: row.1 as usize,
            error: row.2,
        })
    }

    /// Called at startup. Every saga whose persisted status is still
    /// in-flight is marked `failed` for manual investigation — no automatic
    /// forward recovery is attempted.
    pub async fn recover_incomplete_sagas(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE saga_states
            SET status = 'failed', error_message = 'Server restart during execution - requires manual investigation'
            WHERE status IN ('started', 'executing', 'compensating')
            "#,
        )
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(recovered, "marked incomplete sagas as failed after restart");
        }
        Ok(recovered)
    }
}

fn merge_context(saga_context: &Value, step_context: &Value) -> Value {
    let mut merged = saga_context.clone();
    if let (Some(dst), Some(src)) = (merged.as_object_mut(), step_context.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Exponential backoff for a failed step retry, capped at 10 seconds.
fn retry_backoff_seconds(attempt: u32) -> u64 {
    (2u64.pow(attempt)).min(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_then_caps_at_ten_seconds() {
        assert_eq!(retry_backoff_seconds(0), 1);
        assert_eq!(retry_backoff_seconds(1), 2);
        assert_eq!(retry_backoff_seconds(2), 4);
        assert_eq!(retry_backoff_seconds(3), 8);
        assert_eq!(retry_backoff_seconds(4), 10);
        assert_eq!(retry_backoff_seconds(10), 10);
    }

    #[test]
    fn merge_context_lets_step_context_override_saga_context() {
        let saga_context = json!({ "event_id": "e1", "shared": "saga" });
        let step_context = json!({ "shared": "step", "extra": 1 });
        let merged = merge_context(&saga_context, &step_context);
        assert_eq!(merged["event_id"], json!("e1"));
        assert_eq!(merged["shared"], json!("step"));
        assert_eq!(merged["extra"], json!(1));
    }

    #[test]
    fn saga_status_round_trips_through_display_and_from_str() {
        let all = [
            SagaStatus::Started,
            SagaStatus::Executing,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensating,
            SagaStatus::Compensated,
        ];
        for status in all {
            let rendered = status.to_string();
            let parsed: SagaStatus = rendered.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn saga_status_from_str_rejects_unknown_values() {
        assert!("bogus".parse::<SagaStatus>().is_err());
    }
}
