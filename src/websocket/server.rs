//! WebSocket session streaming monitor events for one patient
//!
//! Each connection subscribes to the event bus and forwards the events
//! whose `patient_id` matches the path. The server pings every
//! `websocket.ping_interval` seconds and drops clients that stay silent
//! for twice that long.

use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse, Resource};
use actix_web_actors::ws;
use futures::stream;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{self, AppError};
use crate::events::MonitorEvent;
use crate::models::TelemetrySnapshot;
use crate::AppState;

pub struct PatientFeed {
    patient_id: String,
    events: Option<broadcast::Receiver<MonitorEvent>>,
    initial: Option<TelemetrySnapshot>,
    ping_interval: Duration,
    heartbeat: Instant,
}

impl PatientFeed {
    pub fn new(
        patient_id: String,
        events: broadcast::Receiver<MonitorEvent>,
        initial: Option<TelemetrySnapshot>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            patient_id,
            events: Some(events),
            initial,
            ping_interval,
            heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.ping_interval * 2;
        ctx.run_interval(self.ping_interval, move |feed, ctx| {
            if Instant::now().duration_since(feed.heartbeat) > timeout {
                info!(patient_id = %feed.patient_id, "WebSocket client timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

/// JSON frame for an event, or `None` when it belongs to another patient
pub(crate) fn encode_event(event: &MonitorEvent, patient_id: &str) -> Option<String> {
    if !event.concerns_patient(patient_id) {
        return None;
    }
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode event: {}", e);
            None
        }
    }
}

fn subscribe(
    rx: broadcast::Receiver<MonitorEvent>,
) -> impl futures::Stream<Item = MonitorEvent> + 'static {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket feed lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

impl Actor for PatientFeed {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(patient_id = %self.patient_id, "WebSocket client connected");
        self.start_heartbeat(ctx);

        if let Some(snapshot) = self.initial.take() {
            ctx.text(json!({ "type": "snapshot", "snapshot": snapshot }).to_string());
        }
        if let Some(rx) = self.events.take() {
            ctx.add_stream(subscribe(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(patient_id = %self.patient_id, "WebSocket client disconnected");
    }
}

impl StreamHandler<MonitorEvent> for PatientFeed {
    fn handle(&mut self, event: MonitorEvent, ctx: &mut Self::Context) {
        if let Some(text) = encode_event(&event, &self.patient_id) {
            ctx.text(text);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PatientFeed {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.heartbeat = Instant::now();
            }
            // the feed is one-way; client frames only count as liveness
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                self.heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "WebSocket close requested");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!("WebSocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

async fn patient_feed(
    req: HttpRequest,
    payload: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let patient_id = path.into_inner();
    let initial = state
        .db
        .active_session_for_patient(&patient_id)
        .await?
        .and_then(|session| state.engine.latest(&session.device_id));

    let feed = PatientFeed::new(
        patient_id,
        state.bus.subscribe(),
        initial,
        Duration::from_secs(state.config.websocket.ping_interval.max(1)),
    );
    ws::start(feed, &req, payload)
}

/// `GET /ws/patients/{patient_id}`
pub fn websocket_route() -> Resource {
    web::resource("/ws/patients/{patient_id}").route(web::get().to(patient_feed))
}

/// Path of a patient's feed with the id percent-encoded as one segment
pub fn feed_path(patient_id: &str) -> error::Result<String> {
    let mut url =
        Url::parse("http://localhost/").map_err(|e| AppError::Internal(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Internal("feed base URL has no path".into()))?
        .pop_if_empty()
        .extend(["ws", "patients", patient_id]);
    Ok(url.path().to_string())
}
