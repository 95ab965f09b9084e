use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use tracing::warn;

use query_engine::QueryEvent;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    session_id: String,
    repo_id: String,
    query: String,
}

/// Streamed conversational query.
///
/// Each event goes out as one JSON object on a `data:` line; the stream is
/// terminated by a literal `data: [DONE]`. Pre-stream failures (unknown
/// session, unusable provider) surface as plain JSON errors instead.
pub async fn run_query(
    State(state): State<ApiState>,
    Json(body): Json<QueryBody>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .query_engine
        .query(&body.session_id, &body.repo_id, &body.query)
        .await?;

    let sse_stream = into_sse_stream(events);

    Ok(Sse::new(sse_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn into_sse_stream(
    events: impl Stream<Item = QueryEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events
        .map(|event| match serde_json::to_string(&event) {
            Ok(payload) => Ok(Event::default().data(payload)),
            Err(err) => {
                warn!(error = %err, "failed to serialize query event");
                Ok(Event::default().data(
                    r#"{"type":"error","error":"event serialization failed"}"#,
                ))
            }
        })
        .chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_engine::SourceRef;

    #[tokio::test]
    async fn sse_stream_frames_events_and_terminates() {
        let events = stream::iter(vec![
            QueryEvent::AnswerChunk {
                content: "hello".to_string(),
            },
            QueryEvent::Done {
                sources: vec![SourceRef::file("a.py")],
                tool_calls: vec![],
            },
        ]);

        let frames: Vec<Event> = into_sse_stream(events)
            .map(|result| result.expect("infallible"))
            .collect()
            .await;

        assert_eq!(frames.len(), 3, "two events plus the [DONE] terminator");
    }
}
