//! # Health and Metrics Endpoints
//!
//! - `GET /health` and `GET /api/v1/health`: liveness, load and pipeline setup
//! - `GET /api/v1/metrics`: request, endpoint and interview statistics
//!
//! Both read a metrics snapshot, so neither holds a lock while serializing.

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "active_sessions": metrics.active_sessions
        },
        "pipeline": {
            "window_threshold_bytes": config.pipeline.window_threshold_bytes,
            "window_policy": config.pipeline.window_policy,
            "transcription_model": config.providers.transcription_model,
            "chat_model": config.providers.chat_model,
            "speech_model": config.providers.speech_model,
            "speech_format": config.providers.speech_format
        },
        "memory": get_memory_info(),
        "system": get_system_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoints: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoints.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let sessions = &metrics.sessions;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": ratio(metrics.error_count, metrics.request_count),
            "requests_per_second": ratio(metrics.request_count, uptime_seconds)
        },
        "sessions": {
            "active": metrics.active_sessions,
            "opened": sessions.opened,
            "rejected": sessions.rejected,
            "closed": sessions.closed,
            "windows_processed": sessions.windows_processed,
            "turns": sessions.turns,
            "dropped_audio_bytes": sessions.dropped_audio_bytes,
            "stage_errors": sessions.stage_errors
        },
        "endpoints": endpoints,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": state.get_config().performance.max_concurrent_sessions
        }
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// Resident and virtual memory of this process, from `/proc` on Linux.
fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let field_bytes = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

/// Load classification from session usage.
fn get_system_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let usage = ratio(metrics.active_sessions as u64, max_sessions as u64);

    let status = if usage >= 1.0 {
        "at_capacity"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": metrics.active_sessions
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_health_reports_pipeline() {
        let state = test_state(AppConfig::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pipeline"]["window_policy"], "drain");
        assert_eq!(body["system"]["status"], "normal");
    }

    #[actix_web::test]
    async fn test_metrics_include_sessions() {
        let state = test_state(AppConfig::default());
        assert!(state.try_open_session());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["sessions"]["opened"], 1);
    }

    #[test]
    fn test_system_status_thresholds() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 4;
        let mut metrics = AppMetrics::default();

        metrics.active_sessions = 1;
        assert_eq!(get_system_status(&config, &metrics)["status"], "normal");
        metrics.active_sessions = 3;
        assert_eq!(get_system_status(&config, &metrics)["status"], "high_load");
        metrics.active_sessions = 4;
        assert_eq!(get_system_status(&config, &metrics)["status"], "at_capacity");
    }
}
