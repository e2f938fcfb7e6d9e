//! Actix Web surface: the MJPEG feed, camera stop controls, the feedback
//! WebSocket, health and Prometheus metrics.

use std::sync::Arc;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, http::header, web};
use actix_ws::{Message, MessageStream, Session};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use ml_core::ScoreResult;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::coach::{
    broadcast::{FeedbackBroadcaster, HubMessage},
    camera::CameraManager,
    coordinator::ConnectionCoordinator,
    pipeline::{FrameProcessor, MULTIPART_CONTENT_TYPE, frame_stream},
    telemetry,
};

const STOP_EVENT: &str = "stop_camera";

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) cameras: Arc<CameraManager>,
    pub(crate) coordinator: ConnectionCoordinator,
    pub(crate) broadcaster: FeedbackBroadcaster,
    pub(crate) processor: Arc<FrameProcessor>,
    pub(crate) source_uri: String,
    pub(crate) frontend_url: String,
}

impl ServerState {
    pub(crate) fn new(
        cameras: Arc<CameraManager>,
        broadcaster: FeedbackBroadcaster,
        processor: Arc<FrameProcessor>,
        source_uri: String,
        frontend_url: String,
    ) -> Self {
        Self {
            coordinator: ConnectionCoordinator::new(cameras.clone()),
            cameras,
            broadcaster,
            processor,
            source_uri,
            frontend_url,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct HealthBody {
    status: String,
    camera_live: bool,
    subscribers: usize,
    poses: usize,
}

#[derive(Deserialize)]
struct ClientEvent {
    event: String,
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/stop_camera", web::get().to(stop_camera_handler))
        .route("/stop_camera", web::post().to(stop_camera_handler))
        .route("/ws", web::get().to(ws_handler))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Run the HTTP server on the current thread until it shuts down.
pub(crate) fn serve(state: ServerState, host: &str, port: u16) -> Result<()> {
    let state = web::Data::new(state);
    let addr = (host.to_string(), port);
    actix_web::rt::System::new().block_on(async move {
        let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
            .bind(addr.clone())
            .with_context(|| format!("failed to bind {}:{}", addr.0, addr.1))?
            .run();
        info!("serving on http://{}:{}", addr.0, addr.1);
        server.await.context("HTTP server error")
    })
}

/// Stop the camera and send the browser to the frontend.
async fn index_route(state: web::Data<ServerState>) -> HttpResponse {
    state.cameras.release();
    HttpResponse::Found()
        .insert_header((header::LOCATION, state.frontend_url.clone()))
        .finish()
}

/// Acquire the camera (replacing any live one) and stream annotated frames.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    let cameras = Arc::clone(&state.cameras);
    let uri = state.source_uri.clone();
    let lease = match web::block(move || cameras.acquire(&uri)).await {
        Ok(Ok(lease)) => lease,
        Ok(Err(err)) => {
            let err = anyhow::Error::from(err);
            warn!("video feed unavailable: {err:#}");
            return HttpResponse::ServiceUnavailable().json(ErrorBody {
                message: format!("{err:#}"),
            });
        }
        Err(err) => {
            error!("camera open worker failed: {err}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let stream = frame_stream(
        Arc::clone(&state.cameras),
        lease,
        Arc::clone(&state.processor),
        state.broadcaster.clone(),
    );
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE))
        .streaming(stream)
}

async fn stop_camera_handler(state: web::Data<ServerState>) -> HttpResponse {
    state.coordinator.stop();
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Camera stopped")
}

async fn health_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthBody {
        status: "ok".into(),
        camera_live: state.cameras.is_live(),
        subscribers: state.coordinator.subscriber_count(),
        poses: state.processor.library().pose_count(),
    })
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// Upgrade to a WebSocket subscriber of the feedback channel.
async fn ws_handler(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<ServerState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, messages) = actix_ws::handle(&req, body)?;
    let events = state.broadcaster.subscribe();
    state.coordinator.subscribe();
    actix_web::rt::spawn(run_subscriber(
        state.into_inner(),
        session,
        messages,
        events,
    ));
    Ok(response)
}

async fn run_subscriber(
    state: Arc<ServerState>,
    mut session: Session,
    mut messages: MessageStream,
    mut events: broadcast::Receiver<ScoreResult>,
) {
    let mut close_reason = None;
    if send(&mut session, &HubMessage::greeting()).await {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(result) => {
                        if !send(&mut session, &HubMessage::PoseFeedback(result)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "feedback subscriber lagging; events dropped");
                        metrics::counter!("pose_coach_feedback_lagged_total").increment(skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                message = messages.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if is_stop_request(&text) {
                            state.coordinator.stop();
                        }
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        close_reason = reason;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("websocket protocol error: {err}");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    let _ = session.close(close_reason).await;
    state.coordinator.unsubscribe();
}

/// Returns false once the client has gone away.
async fn send(session: &mut Session, message: &HubMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => session.text(json).await.is_ok(),
        Err(err) => {
            error!("failed to serialise hub message: {err}");
            true
        }
    }
}

/// Accepts a bare `stop_camera` or `{"event": "stop_camera"}`.
fn is_stop_request(text: &str) -> bool {
    let text = text.trim();
    text == STOP_EVENT
        || serde_json::from_str::<ClientEvent>(text).is_ok_and(|client| client.event == STOP_EVENT)
}
