//! Static OpenAPI document (spec §4.8 surface, C8): `GET /api/v2/openapi.json`.
//! Hand-authored rather than generated — the router is small enough that a
//! macro-derived schema would buy little over listing the paths directly.

use axum::Json;
use serde_json::{json, Value};

pub async fn document() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Phoenix Control Plane API",
            "version": "2.0.0"
        },
        "paths": {
            "/health": { "get": { "summary": "Liveness probe" } },
            "/api/v1/tasks": { "get": { "summary": "Agent long-poll for the next task" } },
            "/api/v1/tasks/{id}/status": { "post": { "summary": "Agent reports task status" } },
            "/api/v1/heartbeat": { "post": { "summary": "Agent heartbeat" } },
            "/api/v1/metrics": { "post": { "summary": "Agent metric batch ingest" } },
            "/api/v1/logs": { "post": { "summary": "Agent log batch (best effort)" } },
            "/api/v2/experiments": { "get": { "summary": "List experiments" }, "post": { "summary": "Create experiment" } },
            "/api/v2/experiments/{id}": { "get": { "summary": "Get experiment" } },
            "/api/v2/experiments/{id}/overlap": { "post": { "summary": "Check host overlap" } },
            "/api/v2/experiments/{id}/start": { "post": { "summary": "Start experiment" } },
            "/api/v2/experiments/{id}/stop": { "post": { "summary": "Stop experiment" } },
            "/api/v2/experiments/{id}/rollback": { "post": { "summary": "Roll back experiment" } },
            "/api/v2/experiments/{id}/promote": { "post": { "summary": "Promote a variant" } },
            "/api/v2/experiments/{id}/kpis": { "get": { "summary": "Experiment KPIs" } },
            "/api/v2/deployments": { "get": { "summary": "List deployments" }, "post": { "summary": "Create deployment" } },
            "/api/v2/deployments/{id}": { "get": { "summary": "Get deployment" } },
            "/api/v2/deployments/{id}/deploy": { "post": { "summary": "Deploy a rendered version" } },
            "/api/v2/deployments/{id}/rollback": { "post": { "summary": "Roll back to a prior version" } },
            "/api/v2/deployments/{id}/versions": { "get": { "summary": "List versions" } },
            "/api/v2/deployments/{id}/config": { "get": { "summary": "Current rendered config" } },
            "/api/v2/agents": { "get": { "summary": "List agents" } },
            "/api/v2/agents/{host_id}": { "get": { "summary": "Get agent" } },
            "/api/v2/cost-flows": { "get": { "summary": "Top cost flows" } },
            "/ws": { "get": { "summary": "Event fan-out WebSocket" } }
        }
    }))
}
