//! # WebSocket Live Recording Handler
//!
//! Clients connect to `/ws-record` and stream audio for one recording. Each
//! connection is an actor that owns its session, sink and timer; frames, timer
//! expiry and the pipeline's final notification all arrive through the actor's
//! mailbox and are handled one at a time.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Caller identity is read from the upgrade request
//! 2. **Binding** (optional): `{"conversationId": 42}` → `{"status":"ready"}`
//! 3. **Audio Streaming**: Binary frames are appended to the recording
//! 4. **Finish**: `{"done": true}`, the session timer, or a disconnect
//! 5. **Result**: `{"status":"complete","cid","url"}` or `{"status":"error","message"}`,
//!    then the server closes the connection
//!
//! ## Finalization triggers:
//! All triggers funnel into [`RecordingWebSocket::finalize`], and only the
//! first one gets past `Session::begin_finalizing`. The pipeline therefore runs
//! at most once per connection, whichever way it ends. Server shutdown counts
//! as a disconnect.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::recording::demux::{self, ControlSignal, Inbound, Notification};
use crate::recording::pipeline::ClientNotifier;
use crate::recording::session::{FinalizeTrigger, Session};
use crate::recording::sink::ChunkSink;
use crate::recording::timer::SessionTimer;
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Path the recording WebSocket is served on.
pub const RECORDING_PATH: &str = "/ws-record";

/// A message split across continuation frames, being reassembled.
enum Fragmented {
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl Fragmented {
    fn buffer(&mut self) -> &mut Vec<u8> {
        match self {
            Fragmented::Text(buf) | Fragmented::Binary(buf) => buf,
        }
    }
}

/// Connection supervisor for one live recording.
pub struct RecordingWebSocket {
    session: Session,
    sink: ChunkSink,
    timer: SessionTimer,
    app_state: AppState,

    /// Last time the client showed any sign of life
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,

    fragments: Option<Fragmented>,
    max_message_bytes: usize,
}

impl RecordingWebSocket {
    pub fn new(session: Session, sink: ChunkSink, app_state: AppState, config: &AppConfig) -> Self {
        Self {
            session,
            sink,
            timer: SessionTimer::new(config.recording.max_session_duration()),
            app_state,
            last_heartbeat: Instant::now(),
            heartbeat_interval: config.recording.heartbeat_interval(),
            client_timeout: config.recording.client_timeout(),
            fragments: None,
            max_message_bytes: config.recording.max_frame_bytes,
        }
    }

    fn dispatch(&mut self, inbound: Inbound<'_>, ctx: &mut ws::WebsocketContext<Self>) {
        match inbound {
            Inbound::Control(ControlSignal::BindConversation(conversation_id)) => {
                self.bind_conversation(conversation_id, ctx);
            }
            Inbound::Control(ControlSignal::Done { conversation_id }) => {
                if let Some(conversation_id) = conversation_id {
                    self.session.bind_conversation(conversation_id);
                }
                self.finalize(FinalizeTrigger::Done, ctx);
            }
            Inbound::Payload(bytes) => self.write_payload(bytes, ctx),
            Inbound::Rejected(reason) => {
                warn!(session_id = %self.session.id(), %reason, "Ignoring malformed control frame");
            }
        }
    }

    fn bind_conversation(&mut self, conversation_id: i64, ctx: &mut ws::WebsocketContext<Self>) {
        if self.session.bind_conversation(conversation_id) {
            debug!(session_id = %self.session.id(), conversation_id, "Bound conversation");
            ctx.text(Notification::Ready.to_json());
        } else {
            debug!(
                session_id = %self.session.id(),
                conversation_id,
                state = self.session.state().as_str(),
                "Discarding conversationId received after finalization began"
            );
        }
    }

    fn write_payload(&mut self, bytes: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.is_open() {
            debug!(session_id = %self.session.id(), len = bytes.len(), "Discarding payload after finalization began");
            return;
        }

        match self.sink.write(bytes) {
            Ok(()) => {}
            Err(AppError::SinkClosed) => {
                debug!(session_id = %self.session.id(), len = bytes.len(), "Discarding payload for closed sink");
            }
            Err(err) => {
                error!(session_id = %self.session.id(), error = %err, "Failed to write audio chunk");
                self.finalize(FinalizeTrigger::SinkFailure, ctx);
            }
        }
    }

    /// Leave `Open` and hand the recording to the finalization pipeline.
    ///
    /// Safe to call from every trigger; only the first call does anything.
    fn finalize(&mut self, trigger: FinalizeTrigger, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.session.begin_finalizing(trigger) {
            debug!(
                session_id = %self.session.id(),
                trigger = trigger.as_str(),
                state = self.session.state().as_str(),
                "Finalization already under way"
            );
            return;
        }
        self.timer.cancel::<Self>(ctx);

        let Some(artifact) = self.sink.finalize() else {
            warn!(session_id = %self.session.id(), "Sink was already closed, nothing to finalize");
            return;
        };

        let summary = self.session.summary();
        let bytes = self.sink.bytes_written();
        info!(
            session_id = %self.session.id(),
            trigger = trigger.as_str(),
            conversation_id = ?self.session.conversation_id(),
            bytes,
            chunks = self.sink.chunks_written(),
            interrupted = summary.interrupted,
            "Recording finalizing"
        );

        let pipeline = self.app_state.pipeline();
        let app_state = self.app_state.clone();
        let notifier = SessionMailbox(ctx.address());

        self.app_state.finalizations.spawn(async move {
            let result = pipeline.run(artifact, summary, notifier).await;
            app_state.record_finalization(result.is_ok(), bytes);
        });
    }

    fn start_fragment(&mut self, fragment: Fragmented) {
        if self.fragments.replace(fragment).is_some() {
            warn!(session_id = %self.session.id(), "New fragmented message before the previous one finished");
        }
    }

    /// Append a continuation frame. Returns false if the message outgrew the limit.
    fn extend_fragment(&mut self, bytes: &[u8]) -> bool {
        let Some(fragments) = self.fragments.as_mut() else {
            warn!(session_id = %self.session.id(), "Continuation frame without a first frame");
            return true;
        };
        let buffer = fragments.buffer();
        if buffer.len() + bytes.len() > self.max_message_bytes {
            return false;
        }
        buffer.extend_from_slice(bytes);
        true
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let within_limit = match item {
            Item::FirstText(bytes) => {
                self.start_fragment(Fragmented::Text(bytes.to_vec()));
                true
            }
            Item::FirstBinary(bytes) => {
                self.start_fragment(Fragmented::Binary(bytes.to_vec()));
                true
            }
            Item::Continue(bytes) => self.extend_fragment(&bytes),
            Item::Last(bytes) => {
                let within_limit = self.extend_fragment(&bytes);
                if within_limit {
                    match self.fragments.take() {
                        Some(Fragmented::Binary(message)) => self.dispatch(demux::classify_binary(&message), ctx),
                        Some(Fragmented::Text(message)) => match String::from_utf8(message) {
                            Ok(text) => self.dispatch(demux::classify_text(&text), ctx),
                            Err(_) => warn!(session_id = %self.session.id(), "Ignoring fragmented text frame that is not UTF-8"),
                        },
                        None => {}
                    }
                }
                within_limit
            }
        };

        if !within_limit {
            error!(
                session_id = %self.session.id(),
                limit = self.max_message_bytes,
                "Fragmented message exceeds size limit, closing connection"
            );
            self.fragments = None;
            ctx.close(Some(ws::CloseCode::Size.into()));
            ctx.stop();
        }
    }
}

/// Final notification from the pipeline back to the connection.
#[derive(Message)]
#[rtype(result = "()")]
struct DeliverNotification(Notification);

/// The pipeline finished and the artifact is gone.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionFinished;

/// Pipeline-side handle to a connection's mailbox.
struct SessionMailbox(Addr<RecordingWebSocket>);

impl ClientNotifier for SessionMailbox {
    fn notify(&self, notification: Notification) -> bool {
        self.0.connected() && self.0.try_send(DeliverNotification(notification)).is_ok()
    }

    fn finished(&self) -> bool {
        self.0.connected() && self.0.try_send(SessionFinished).is_ok()
    }
}

impl Actor for RecordingWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.increment_active_sessions();
        info!(
            session_id = %self.session.id(),
            user_id = ?self.session.user_id(),
            max_duration_ms = self.timer.max_duration().as_millis() as u64,
            "Live recording started"
        );

        self.timer.arm::<Self, _>(ctx, |act, ctx| {
            act.timer.expired();
            info!(session_id = %act.session.id(), "Maximum session duration reached");
            act.finalize(FinalizeTrigger::Timeout, ctx);
        });

        let shutdown = self.app_state.shutdown.clone();
        ctx.spawn(
            async move { shutdown.cancelled().await }
                .into_actor(self)
                .map(|_, act, ctx| {
                    if act.session.is_open() {
                        info!(session_id = %act.session.id(), "Server shutting down, finalizing recording");
                        act.finalize(FinalizeTrigger::Disconnect, ctx);
                    }
                }),
        );

        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(session_id = %act.session.id(), "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Any way out of the connection while still open is an abrupt disconnect:
    /// force-close the sink so the partial recording still gets uploaded.
    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        if self.session.is_open() {
            info!(session_id = %self.session.id(), "Connection closed before done, finalizing partial recording");
            self.finalize(FinalizeTrigger::Disconnect, ctx);
        }
        Running::Stop
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.app_state.decrement_active_sessions();
        info!(
            session_id = %self.session.id(),
            state = self.session.state().as_str(),
            trigger = self.session.trigger().map(|trigger| trigger.as_str()),
            "Live recording connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RecordingWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Binary(data)) => self.dispatch(demux::classify_binary(&data), ctx),
            Ok(ws::Message::Text(text)) => self.dispatch(demux::classify_text(&text), ctx),
            Ok(ws::Message::Continuation(item)) => self.handle_continuation(item, ctx),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id(), ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            // Frames that arrived before the connection dropped are still
            // buffered and follow this error; the stream's end stops the actor.
            Err(ws::ProtocolError::Io(err)) => {
                warn!(session_id = %self.session.id(), error = %err, "WebSocket connection lost");
            }
            Err(err) => {
                error!(session_id = %self.session.id(), error = %err, "WebSocket protocol error");
                let code = match err {
                    ws::ProtocolError::Overflow => ws::CloseCode::Size,
                    _ => ws::CloseCode::Protocol,
                };
                ctx.close(Some(code.into()));
                ctx.stop();
            }
        }
    }
}

impl Handler<DeliverNotification> for RecordingWebSocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverNotification, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_json());
    }
}

impl Handler<SessionFinished> for RecordingWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: SessionFinished, ctx: &mut Self::Context) {
        self.session.complete();
        debug!(session_id = %self.session.id(), "Session done");
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Opens the session's sink before upgrading, so a server that cannot write
/// recordings answers with an HTTP error instead of accepting audio it would lose.
pub async fn recording_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    let user_id = app_state.identity.user_id(&req);
    let session = Session::open(user_id);

    let sink = ChunkSink::create(
        Path::new(&config.recording.temp_dir),
        session.id(),
        &config.recording.file_extension,
    )
    .map_err(|err| {
        error!(session_id = %session.id(), error = %err, "Failed to open recording sink");
        err
    })?;

    info!(
        session_id = %session.id(),
        peer = ?req.connection_info().peer_addr(),
        "New live recording connection"
    );

    let actor = RecordingWebSocket::new(session, sink, app_state.get_ref().clone(), &config);
    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(config.recording.max_frame_bytes)
        .start()
}
