use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use prcard_db::{migrations::MIGRATOR, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    oauth_configured: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub schema: HealthCheck,
    /// Informational only; webhooks are relayed without git-host credentials.
    pub bitbucket_oauth: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, oauth_configured: bool) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthState { db_pool, oauth_configured })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let schema = schema_check(&state.db_pool).await;
    let ready = schema.status == "ready";

    let bitbucket_oauth = if state.oauth_configured {
        HealthCheck { status: "configured", detail: "token refresh available".to_string() }
    } else {
        HealthCheck {
            status: "disabled",
            detail: "bitbucket.client_id and bitbucket.client_secret are not set".to_string(),
        }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        schema,
        bitbucket_oauth,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn latest_known_migration() -> i64 {
    MIGRATOR.iter().map(|migration| migration.version).max().unwrap_or(0)
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    let tracked: Result<i64, sqlx::Error> = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await;
    let applied = match tracked {
        Ok(0) => Ok(0),
        Ok(_) => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations WHERE success = 1",
            )
            .fetch_one(pool)
            .await
        }
        Err(error) => Err(error),
    };

    let expected = latest_known_migration();
    match applied {
        Ok(version) if version >= expected => {
            HealthCheck { status: "ready", detail: format!("schema at migration {version}") }
        }
        Ok(version) => HealthCheck {
            status: "degraded",
            detail: format!("schema at migration {version}, migration {expected} pending"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
