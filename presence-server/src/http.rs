use std::net::SocketAddr;

use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE,
};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{error, warn};
use serde::Serialize;

use crate::error::ReportError;
use crate::messages::DriverStatus;
use crate::state::presence::PresenceReport;
use crate::state::SharedState;
use crate::ws::handle_connection;

fn decode_path_segment(seg: &str) -> String {
    match urlencoding::decode(seg) {
        Ok(s) => s.into_owned(),
        Err(_) => seg.to_string(),
    }
}

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(json) => {
            let mut resp = text_response(status, json);
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        Err(e) => {
            error!("Failed to encode response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failure")
        }
    }
}

fn with_cors(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    resp
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    drivers: usize,
    viewers: usize,
    connections: usize,
}

// ============================================
// HTTP REST API Handlers (driver reports)
// ============================================

async fn handle_api_request(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let path_parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();

    // /api/drivers[/{driver_id}/presence]
    if path_parts.len() < 3 || path_parts[1] != "api" || path_parts[2] != "drivers" {
        return Ok(text_response(StatusCode::NOT_FOUND, "API endpoint not found"));
    }

    match (method, path_parts.get(3), path_parts.get(4).copied()) {
        // GET /api/drivers - currently online drivers
        (Method::GET, None, None) => {
            let drivers: Vec<DriverStatus> = state
                .presence
                .online_drivers()
                .await
                .iter()
                .map(DriverStatus::from)
                .collect();
            Ok(json_response(StatusCode::OK, &drivers))
        }

        // POST /api/drivers/{driver_id}/presence - unary presence report
        (Method::POST, Some(raw_id), Some("presence")) if path_parts.len() == 5 => {
            let driver_id = decode_path_segment(raw_id);
            let body_bytes = hyper::body::to_bytes(req.into_body()).await?;
            let result = match serde_json::from_slice::<PresenceReport>(&body_bytes) {
                Ok(report) => state.presence.report(&driver_id, report).await,
                Err(e) => Err(ReportError::MalformedPayload(e.to_string())),
            };
            match result {
                Ok(()) => Ok(json_response(
                    StatusCode::OK,
                    &serde_json::json!({ "status": "ok" }),
                )),
                Err(e) => {
                    warn!("Rejected presence report for {:?}: {}", driver_id, e);
                    Ok(text_response(e.status(), e.to_string()))
                }
            }
        }

        (_, Some(_), Some("presence")) | (_, None, None) => Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        )),

        _ => Ok(text_response(StatusCode::NOT_FOUND, "API endpoint not found")),
    }
}

// ============================================
// Main Request Handler
// ============================================

pub async fn handle_request(
    mut req: Request<Body>,
    addr: SocketAddr,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method().clone();

    // CORS preflight for browser dashboards
    if method == Method::OPTIONS {
        let mut resp = with_cors(text_response(StatusCode::NO_CONTENT, Body::empty()));
        resp.headers_mut()
            .insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
        return Ok(resp);
    }

    if path == "/health" {
        let health = HealthResponse {
            status: "ok",
            drivers: state.presence.len().await,
            viewers: state.subscribers.viewer_count().await,
            connections: state.subscribers.connection_count().await,
        };
        return Ok(with_cors(json_response(StatusCode::OK, &health)));
    }

    if path.starts_with("/api/") || path == "/api" {
        let resp = handle_api_request(req, state).await?;
        return Ok(with_cors(resp));
    }

    if hyper_tungstenite::is_upgrade_request(&req) {
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                    }
                });
                return Ok(response);
            }
            Err(e) => {
                error!("WebSocket upgrade error: {}", e);
                return Ok(text_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid WebSocket upgrade request",
                ));
            }
        }
    }

    Ok(text_response(
        StatusCode::NOT_FOUND,
        "Not found. Use /health, POST /api/drivers/{id}/presence, GET /api/drivers, or upgrade to WebSocket.",
    ))
}
