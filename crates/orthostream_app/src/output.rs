use orthostream_engine::EngineEvent;
use serde_json::{json, Value};

/// One JSON line per engine event.
pub(crate) fn event_line(event: &EngineEvent) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&event_json(event)?)?)
}

fn event_json(event: &EngineEvent) -> Result<Value, serde_json::Error> {
    Ok(match event {
        EngineEvent::SearchMessage { job_id, message } => json!({
            "job": job_id,
            "event": "search_message",
            "message": serde_json::to_value(message)?,
        }),
        EngineEvent::SearchPage { job_id, page } => json!({
            "job": job_id,
            "event": "search_page",
            "page": serde_json::to_value(page)?,
        }),
        EngineEvent::TreePreview {
            job_id,
            preview,
            elapsed,
        } => json!({
            "job": job_id,
            "event": "tree_preview",
            "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
            "preview": serde_json::to_value(preview)?,
        }),
        EngineEvent::TreeMessage { job_id, message } => json!({
            "job": job_id,
            "event": "tree_message",
            "message": serde_json::to_value(message)?,
        }),
        EngineEvent::JobCompleted { job_id, result } => match result {
            Ok(outcome) => json!({
                "job": job_id,
                "event": "completed",
                "delivered": outcome.delivered,
                "violations": outcome.violations,
            }),
            Err(err) => json!({
                "job": job_id,
                "event": "failed",
                "error": err.to_string(),
            }),
        },
        EngineEvent::JobRejected { job_id } => json!({
            "job": job_id,
            "event": "rejected",
        }),
    })
}
