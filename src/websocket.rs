//! # WebSocket Interview Handler
//!
//! Clients connect to `/ws/audio`; each connection is one interview.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: refused with 503 when the server is at capacity
//! 2. **Init**: `{"type":"init","voice":"..."}` → `{"type":"ack","data":"ready"}`
//! 3. **Audio Streaming**: binary frames of 16 kHz mono 16-bit PCM
//! 4. **Results**: `transcript` and `gpt` text frames, synthesized speech as binary frames
//! 5. **Keep-alive**: `{"type":"ping"}` at the application level, plus protocol
//!    pings sent by the server every `heartbeat_interval_secs`
//!
//! ## Actor Model:
//! The actor only moves frames. It forwards inbound frames to the session's
//! controller task over an unbounded channel and writes whatever the
//! controller queues on the outbound channel. When either side goes away the
//! other one follows: the controller sees its inbound channel close, and the
//! actor stops once the outbound stream ends.

use crate::error::{AppError, AppResult};
use crate::session::{FrameSink, InboundEvent, OutboundFrame, SessionController, SessionStatus};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channels and controller created with the actor, handed off in `started()`.
struct PendingSession {
    controller: SessionController,
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    outbound: mpsc::Receiver<OutboundFrame>,
}

/// WebSocket actor for one interview connection.
pub struct InterviewSocket {
    session_id: String,
    app_state: web::Data<AppState>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    status: watch::Receiver<SessionStatus>,
    pending: Option<PendingSession>,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl InterviewSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        let session_id = Uuid::new_v4().to_string();

        let (sink, outbound) = FrameSink::channel(config.pipeline.outbound_queue_frames);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (controller, status) = SessionController::new(
            session_id.clone(),
            config.pipeline.clone(),
            app_state.services.clone(),
            sink,
        );

        Self {
            session_id,
            inbound: inbound_tx,
            status,
            pending: Some(PendingSession {
                controller,
                inbound,
                outbound,
            }),
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(config.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.server.client_timeout_secs),
            app_state,
        }
    }

    /// Hand an event to the controller; stop if it is already gone.
    fn forward(&self, event: InboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        if self.inbound.send(event).is_err() {
            debug!(session_id = %self.session_id, "Session already closed, stopping socket");
            ctx.stop();
        }
    }
}

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket connection started");

        if let Some(PendingSession {
            mut controller,
            inbound,
            outbound,
        }) = self.pending.take()
        {
            ctx.add_stream(ReceiverStream::new(outbound));

            let app_state = self.app_state.clone();
            tokio::spawn(async move {
                let summary = controller.run(inbound).await;
                app_state.record_session_closed(&summary);
            });
        }

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                let _ = act.inbound.send(InboundEvent::Failed("heartbeat timeout".to_string()));
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let status = *self.status.borrow();
        info!(
            session_id = %self.session_id,
            state = %status.state,
            windows = status.windows_completed,
            "WebSocket connection stopped"
        );
        if !status.state.is_terminal() {
            debug!(session_id = %self.session_id, "Socket stopped before the session finished closing");
        }
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                self.forward(InboundEvent::Text(text.to_string()), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.forward(InboundEvent::Binary(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "WebSocket closed by client");
                let description = reason.as_ref().and_then(|r| r.description.clone());
                let _ = self.inbound.send(InboundEvent::Closed(description));
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session_id, "Received unsupported continuation frame");
                let _ = self
                    .inbound
                    .send(InboundEvent::Failed("fragmented frames are not supported".to_string()));
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                let _ = self.inbound.send(InboundEvent::Failed(err.to_string()));
                ctx.stop();
            }
        }
    }
}

/// Frames queued by the session controller.
impl StreamHandler<OutboundFrame> for InterviewSocket {
    fn handle(&mut self, frame: OutboundFrame, ctx: &mut Self::Context) {
        match frame {
            OutboundFrame::Text(message) => match message.to_json() {
                Ok(json) => ctx.text(json),
                Err(err) => error!(session_id = %self.session_id, error = %err, "Failed to encode frame"),
            },
            OutboundFrame::Binary(audio) => ctx.binary(audio),
        }
    }

    /// The controller finished; close the connection cleanly.
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, "Session ended, closing WebSocket");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The handshake is validated before a session slot is reserved, so a plain
/// GET never counts against capacity. At capacity the upgrade is refused with
/// 503 and a JSON error body.
pub async fn interview_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    ws::handshake(&req).map_err(|e| AppError::BadRequest(format!("WebSocket handshake failed: {}", e)))?;

    if !app_state.try_open_session() {
        let limit = app_state.get_config().performance.max_concurrent_sessions;
        warn!(limit, "Refusing interview: server at capacity");
        return Err(AppError::Unavailable(format!(
            "Interview capacity reached ({} sessions)",
            limit
        )));
    }

    let socket = InterviewSocket::new(app_state.clone());
    ws::start(socket, &req, stream).map_err(|e| {
        app_state.abandon_session();
        AppError::Internal(format!("Failed to start WebSocket session: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_plain_get_is_rejected_without_taking_a_slot() {
        let state = test_state(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/audio", web::get().to(interview_websocket)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ws/audio").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[actix_web::test]
    async fn test_upgrade_refused_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = test_state(config);
        assert!(state.try_open_session());

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/audio", web::get().to(interview_websocket)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ws/audio")
            .insert_header(("connection", "upgrade"))
            .insert_header(("upgrade", "websocket"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().sessions.rejected, 1);
    }
}
