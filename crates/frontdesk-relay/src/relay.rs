//! The media relay: one caller WebSocket bridged to one AI WebSocket.
//!
//! The caller side speaks Twilio Media Streams; the AI side speaks the
//! realtime protocol. Audio passes through opaquely in both directions.
//! Function calls from the conversation are dispatched through the tool
//! pipeline and their results fed back to the AI.

use crate::call::CallFlags;
use crate::openai::{self, AiEvent, AiSocket, RealtimeSettings, CANCEL_NOT_ACTIVE};
use crate::twilio::{self, CallerFrame};
use axum::extract::ws::{Message as CallerMessage, WebSocket};
use frontdesk_connect::AlertApi;
use frontdesk_session::{transition, SessionHandle, SessionStore};
use frontdesk_tools::Dispatcher;
use frontdesk_types::CallStage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as AiMessage;

/// Entry point the server hands upgraded media-stream sockets to.
#[derive(Clone)]
pub struct MediaRelay {
    sessions: SessionStore,
    dispatcher: Dispatcher,
    settings: RealtimeSettings,
    alerts: Arc<dyn AlertApi>,
}

impl MediaRelay {
    pub fn new(
        sessions: SessionStore,
        dispatcher: Dispatcher,
        settings: RealtimeSettings,
        alerts: Arc<dyn AlertApi>,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            settings,
            alerts,
        }
    }

    /// Runs one call to completion. Consumes the caller socket; when this
    /// returns, both legs are closed and the session is finalized.
    pub async fn handle(&self, caller: WebSocket) {
        let ai = match openai::connect(&self.settings).await {
            Ok(socket) => socket,
            Err(e) => {
                // Dropping the socket closes the caller leg immediately.
                tracing::error!(error = %e, "cannot open AI socket; failing caller connection");
                return;
            }
        };

        let (ai_tx, ai_rx) = ai.split();
        let (caller_tx, caller_rx) = caller.split();
        let link = Arc::new(Link {
            sessions: self.sessions.clone(),
            dispatcher: self.dispatcher.clone(),
            settings: self.settings.clone(),
            alerts: self.alerts.clone(),
            flags: Mutex::new(CallFlags::new()),
            ids: Mutex::new(CallIds::default()),
            session: Mutex::new(None),
            ai_tx: Mutex::new(ai_tx),
            caller_tx: Mutex::new(caller_tx),
        });

        let ai_task = tokio::spawn(run_ai_loop(link.clone(), ai_rx));
        run_caller_loop(link.clone(), caller_rx).await;
        link.finalize("caller stream closed").await;
        let _ = ai_task.await;
    }
}

#[derive(Default)]
struct CallIds {
    call_sid: Option<String>,
    stream_sid: Option<String>,
}

/// Everything shared between the two relay legs for one call.
struct Link {
    sessions: SessionStore,
    dispatcher: Dispatcher,
    settings: RealtimeSettings,
    alerts: Arc<dyn AlertApi>,
    flags: Mutex<CallFlags>,
    ids: Mutex<CallIds>,
    session: Mutex<Option<SessionHandle>>,
    ai_tx: Mutex<SplitSink<AiSocket, AiMessage>>,
    caller_tx: Mutex<SplitSink<WebSocket, CallerMessage>>,
}

async fn run_caller_loop(link: Arc<Link>, mut rx: SplitStream<WebSocket>) {
    while let Some(message) = rx.next().await {
        match message {
            Ok(CallerMessage::Text(text)) => {
                let Some(frame) = CallerFrame::parse(text.as_str()) else {
                    continue;
                };
                if !link.on_caller_frame(frame).await {
                    break;
                }
            }
            Ok(CallerMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "caller socket error");
                break;
            }
        }
    }
}

async fn run_ai_loop(link: Arc<Link>, mut rx: SplitStream<AiSocket>) {
    while let Some(message) = rx.next().await {
        match message {
            Ok(AiMessage::Text(text)) => {
                link.clone().on_ai_event(AiEvent::parse(text.as_str())).await;
            }
            Ok(AiMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "AI socket error");
                break;
            }
        }
    }
    link.finalize("AI stream closed").await;
}

impl Link {
    /// Handles one caller frame; returns false when the stream is over.
    async fn on_caller_frame(&self, frame: CallerFrame) -> bool {
        match frame {
            CallerFrame::Connected => {
                tracing::debug!("caller stream connected");
            }
            CallerFrame::Start { start } => {
                tracing::info!(
                    call_sid = %start.call_sid,
                    stream_sid = %start.stream_sid,
                    "caller stream started"
                );
                let handle = self.sessions.create(&start.call_sid).await;
                {
                    let mut session = handle.lock().await;
                    session.stream_sid = Some(start.stream_sid.clone());
                    session.caller = start.custom_parameters.get("caller").cloned();
                }
                *self.session.lock().await = Some(handle);
                {
                    let mut ids = self.ids.lock().await;
                    ids.call_sid = Some(start.call_sid);
                    ids.stream_sid = Some(start.stream_sid);
                }
                if self.flags.lock().await.note_stream_started() {
                    self.greet().await;
                }
            }
            CallerFrame::Media { media } => {
                if self.flags.lock().await.barge_in() {
                    tracing::debug!("caller barge-in; cancelling AI response");
                    self.send_ai(openai::response_cancel()).await;
                    if let Some(stream_sid) = self.ids.lock().await.stream_sid.clone() {
                        self.send_caller(twilio::clear_frame(&stream_sid)).await;
                    }
                }
                self.send_ai(openai::input_audio_append(&media.payload)).await;
                self.touch_session().await;
            }
            CallerFrame::Mark => {}
            CallerFrame::Stop => {
                tracing::info!("caller stream stopped");
                return false;
            }
        }
        true
    }

    async fn on_ai_event(self: Arc<Self>, event: AiEvent) {
        match event {
            AiEvent::SessionReady => {
                self.send_ai(openai::session_update(&self.settings)).await;
                if self.flags.lock().await.note_config_sent() {
                    self.greet().await;
                }
            }
            AiEvent::AudioDelta { payload } => {
                self.flags.lock().await.note_ai_audio();
                if let Some(stream_sid) = self.ids.lock().await.stream_sid.clone() {
                    self.send_caller(twilio::media_frame(&stream_sid, &payload)).await;
                }
            }
            AiEvent::ResponseDone => {
                self.flags.lock().await.note_response_done();
            }
            AiEvent::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                // Dispatch off the relay loop so audio keeps flowing while
                // the tool runs.
                let link = self.clone();
                tokio::spawn(async move {
                    link.run_function_call(call_id, name, arguments).await;
                });
            }
            AiEvent::Error { code, message } => {
                if code.as_deref() == Some(CANCEL_NOT_ACTIVE) {
                    // Benign: the response ended on its own before our
                    // cancel arrived.
                    tracing::debug!("cancel raced a finished response");
                } else {
                    tracing::warn!(?code, message, "AI error event");
                    let context = serde_json::json!({
                        "call_sid": self.ids.lock().await.call_sid,
                        "code": code,
                        "message": message,
                    });
                    if let Err(e) = self.alerts.notify("ai_peer_error", &context).await {
                        tracing::warn!(error = %e, "alert delivery failed");
                    }
                }
            }
            AiEvent::Other => {}
        }
    }

    async fn run_function_call(&self, call_id: String, name: String, arguments: serde_json::Value) {
        let call_sid = self.ids.lock().await.call_sid.clone().unwrap_or_default();
        tracing::info!(call_sid = %call_sid, tool = %name, "dispatching function call");

        let result = self.dispatcher.dispatch(&call_sid, &name, arguments).await;
        let output = serde_json::to_value(&result).unwrap_or_default();
        self.send_ai(openai::function_call_output(&call_id, &output)).await;
        self.send_ai(openai::response_create()).await;
    }

    /// Sends the one-time greeting request.
    async fn greet(&self) {
        tracing::info!("requesting AI greeting");
        self.send_ai(openai::response_create()).await;
    }

    async fn send_ai(&self, text: String) {
        if let Err(e) = self.ai_tx.lock().await.send(AiMessage::text(text)).await {
            tracing::warn!(error = %e, "failed to send to AI peer");
        }
    }

    async fn send_caller(&self, text: String) {
        if let Err(e) = self
            .caller_tx
            .lock()
            .await
            .send(CallerMessage::Text(text.into()))
            .await
        {
            tracing::warn!(error = %e, "failed to send to caller");
        }
    }

    /// Refreshes session liveness without stalling the audio path: skipped
    /// when a dispatch holds the session.
    async fn touch_session(&self) {
        if let Some(handle) = self.session.lock().await.as_ref() {
            if let Ok(mut session) = handle.try_lock() {
                session.touch();
            }
        }
    }

    /// Closes both legs and retires the session. Safe to call from either
    /// leg; only the first caller acts.
    async fn finalize(&self, reason: &str) {
        if !self.flags.lock().await.finalize() {
            return;
        }
        tracing::info!(reason, "finalizing call");

        let _ = self.ai_tx.lock().await.close().await;
        let _ = self.caller_tx.lock().await.close().await;

        let call_sid = self.ids.lock().await.call_sid.clone();
        if let Some(call_sid) = call_sid {
            if let Some(handle) = self.sessions.remove(&call_sid).await {
                let mut session = handle.lock().await;
                if !session.stage.is_terminal() {
                    if let Err(e) = transition(&mut session, CallStage::CallEnded, reason) {
                        tracing::warn!(call_sid = %call_sid, error = %e, "end transition failed");
                    }
                }
                tracing::info!(
                    call_sid = %call_sid,
                    final_stage = %session.stage,
                    transitions = session.audit.len(),
                    "call retired"
                );
            }
        }
    }
}
