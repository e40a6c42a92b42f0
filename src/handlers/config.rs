use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    /// One of `server`, `pipeline`, `providers`, `performance`
    pub section: Option<String>,
}

/// Read-only view of the effective configuration.
///
/// The provider API key is never echoed; only whether one is configured.
pub async fn get_config(
    state: web::Data<AppState>,
    query: web::Query<ConfigQuery>,
) -> AppResult<HttpResponse> {
    let view = public_view(&state.get_config())?;

    let config = match query.into_inner().section {
        None => view,
        Some(section) if section.trim().is_empty() => {
            return Err(AppError::BadRequest("section cannot be empty".to_string()))
        }
        Some(section) => view
            .get(section.as_str())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown config section '{}'", section)))?,
    };

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

fn public_view(config: &AppConfig) -> AppResult<Value> {
    let mut view = serde_json::to_value(config)
        .map_err(|e| AppError::ConfigError(format!("Failed to serialize configuration: {}", e)))?;

    if let Some(providers) = view.get_mut("providers").and_then(Value::as_object_mut) {
        providers.remove("api_key");
        providers.insert(
            "api_key_configured".to_string(),
            Value::Bool(config.providers.api_key.is_some()),
        );
    }
    Ok(view)
}
