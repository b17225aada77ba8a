//! Run endpoint: starts a pipeline run and streams its events over SSE.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use qflow::core::types::Event;
use qflow::engine::context::RunContext;
use qflow::engine::inbox::{InboxKey, route_reply};
use qflow::io::run_log::RunLog;
use qflow::run::run_pipeline;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub user_id: String,
    pub session_id: String,
    pub new_message: String,
}

/// One SSE `data:` item: a pipeline event or the error that ended the run.
#[derive(Serialize)]
#[serde(untagged)]
enum RunMessage {
    Event(Event),
    Error { error: String },
}

/// POST /run_sse
///
/// A message carrying the reply prefix is written to the inbox slot of
/// `(session_id, user_id)` and answered with an empty body, or 404 when no run
/// owns that slot. Any other message is the input of a new run whose events
/// are streamed back; the run is cancelled if the client disconnects.
pub async fn run_sse(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Response {
    if let Some(reply) = route_reply(&request.new_message, &state.config.reply_prefix) {
        let key = InboxKey::new(&request.session_id, &request.user_id);
        if !state.inbox.write(&key, reply) {
            warn!(session_id = %request.session_id, user_id = %request.user_id, "reply for a session with no run");
            return StatusCode::NOT_FOUND.into_response();
        }
        info!(session_id = %request.session_id, user_id = %request.user_id, "reply routed to inbox");
        return ().into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive_run(state, request, tx));
    sse_response(rx).into_response()
}

/// Resolve the node list, run the pipeline and forward every event.
async fn drive_run(state: AppState, request: RunRequest, tx: mpsc::UnboundedSender<RunMessage>) {
    let nodes = match state.node_source.nodes(&request.new_message).await {
        Ok(nodes) => nodes,
        Err(err) => {
            warn!(session_id = %request.session_id, err = %err, "node source failed");
            let _ = tx.send(RunMessage::Error {
                error: format!("{err:#}"),
            });
            return;
        }
    };

    let mut ctx = RunContext::new(request.user_id, nodes, state.inbox.clone())
        .with_run_id(request.session_id);
    let log = match state.out_dir.as_deref().map(|dir| RunLog::create(dir, &ctx.run_id)) {
        Some(Ok(log)) => Some(log),
        Some(Err(err)) => {
            let _ = tx.send(RunMessage::Error {
                error: format!("{err:#}"),
            });
            return;
        }
        None => None,
    };

    let run_id = ctx.run_id.clone();
    let run = run_pipeline(&state.collaborators, &state.config, &mut ctx, log, |event| {
        let _ = tx.send(RunMessage::Event(event.clone()));
    });
    let result = tokio::select! {
        result = run => result,
        () = tx.closed() => {
            info!(run_id = %run_id, "client disconnected, run cancelled");
            return;
        }
    };
    if let Err(err) = result {
        error!(run_id = %run_id, err = %err, "run failed");
        let _ = tx.send(RunMessage::Error {
            error: format!("{err:#}"),
        });
    }
}

fn sse_response(
    mut rx: mpsc::UnboundedReceiver<RunMessage>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(data) => yield Ok(SseEvent::default().data(data)),
                Err(err) => warn!(err = %err, "dropping unserializable run message"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
