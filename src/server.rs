use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info};

use crate::pipeline::{review, Context, Delegates, HistoryEntry, Pipeline};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared application state passed to the handlers. The history mutex also
/// serializes inquiries: a request holds it for its whole pipeline run, so
/// the single process-wide conversation never interleaves.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    history: Arc<Mutex<Vec<HistoryEntry>>>,
}

/// Forwards streamed deltas into the response body.
struct ChannelDelegates {
    tx: mpsc::UnboundedSender<Result<String, Infallible>>,
}

impl Delegates for ChannelDelegates {
    fn stream(&self, delta: &str) {
        let _ = self.tx.send(Ok(delta.to_string()));
    }
}

pub async fn serve(pipeline: Arc<Pipeline>, port: u16) -> Result<()> {
    let state = AppState {
        pipeline,
        history: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/chat", get(chat))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "HTTP front-end listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// The raw query string is the inquiry, urlencoded. `/reset` and `/review`
/// arrive in-band.
async fn chat(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let inquiry = percent_decode(query.as_deref().unwrap_or(""));
    let inquiry = inquiry.trim().to_string();

    let (tx, rx) = mpsc::unbounded_channel::<Result<String, Infallible>>();

    if inquiry == "/reset" {
        state.history.lock().await.clear();
        let _ = tx.send(Ok("History cleared.\n".to_string()));
    } else if inquiry == "/review" {
        let history = state.history.lock().await;
        let _ = tx.send(Ok(review::render(&history)));
    } else if !inquiry.is_empty() {
        tokio::spawn(async move {
            let mut history = state.history.lock().await;
            let delegates = Arc::new(ChannelDelegates { tx: tx.clone() });
            let ctx = Context::new(inquiry, history.clone(), delegates);
            match state.pipeline.run(ctx).await {
                Ok(ctx) => history.push(ctx.into_entry()),
                Err(e) => {
                    error!("{:#}", e);
                    let _ = tx.send(Ok(format!("Error: {:#}\n", e)));
                }
            }
        });
    }

    let body = Body::from_stream(UnboundedReceiverStream::new(rx));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Decode a urlencoded query: `+` as space, `%XX` as the byte it names.
fn percent_decode(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'+' => {
                out.push(b' ');
                pos += 1;
            }
            b'%' if pos + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[pos + 1..pos + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        pos += 3;
                    }
                    None => {
                        out.push(b'%');
                        pos += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                pos += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode_spaces_and_bytes() {
        assert_eq!(percent_decode("Who+is+the+CEO%3F"), "Who is the CEO?");
        assert_eq!(percent_decode("Pourquoi%20%3F"), "Pourquoi ?");
    }

    #[test]
    fn test_percent_decode_utf8_sequences() {
        assert_eq!(percent_decode("c%C3%A9l%C3%A8bre"), "célèbre");
    }

    #[test]
    fn test_percent_decode_malformed_escapes_pass_through() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
    }
}
