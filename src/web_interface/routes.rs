use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use warp::{http::StatusCode, reply, sse, Filter, Rejection, Reply};

use super::ApiError;
use crate::storage::event_reader::{overview, read_events, LogTail, DEFAULT_EVENT_LIMIT};
use crate::storage::EventKind;

/// Query string of `GET /events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl EventsQuery {
    /// An unknown type means no filter rather than an error.
    pub fn kind_filter(&self) -> Option<EventKind> {
        self.kind.as_deref().and_then(|k| k.parse().ok())
    }
}

fn error_reply(message: &str) -> reply::WithStatus<reply::Json> {
    reply::with_status(
        reply::json(&ApiError {
            message: message.to_string(),
        }),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

/// GET /events?limit=&type=
pub fn events_route(
    log_path: Arc<PathBuf>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and_then(move |query: EventsQuery| {
            let log_path = log_path.clone();
            async move {
                let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
                let kind = query.kind_filter();
                let result =
                    tokio::task::spawn_blocking(move || read_events(&log_path, limit, kind)).await;
                match result {
                    Ok(Ok(events)) => {
                        Ok::<_, Rejection>(reply::with_status(reply::json(&events), StatusCode::OK))
                    }
                    Ok(Err(e)) => {
                        warn!("Reading events failed: {}", e);
                        Ok::<_, Rejection>(error_reply("Failed to read events"))
                    }
                    Err(e) => {
                        warn!("Event reader task failed: {}", e);
                        Ok::<_, Rejection>(error_reply("Failed to read events"))
                    }
                }
            }
        })
}

/// GET /stats/overview
pub fn overview_route(
    log_path: Arc<PathBuf>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("stats" / "overview")
        .and(warp::get())
        .and_then(move || {
            let log_path = log_path.clone();
            async move {
                match tokio::task::spawn_blocking(move || overview(&log_path)).await {
                    Ok(Ok(stats)) => {
                        Ok::<_, Rejection>(reply::with_status(reply::json(&stats), StatusCode::OK))
                    }
                    _ => Ok::<_, Rejection>(error_reply("Failed to compute statistics")),
                }
            }
        })
}

/// GET /live
///
/// Server-sent events, one `data:` line per appended record, named after the record type.
/// Every subscriber follows the log on its own.
pub fn live_route(
    log_path: Arc<PathBuf>,
    poll_interval: Duration,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let log_path = log_path.clone();
            async move {
                let tail = match LogTail::open(&log_path, poll_interval).await {
                    Ok(tail) => tail,
                    Err(e) => {
                        warn!("Cannot follow {}: {}", log_path.display(), e);
                        return Ok::<_, Rejection>(
                            error_reply("Failed to open the event log").into_response(),
                        );
                    }
                };

                let (tx, rx) = mpsc::channel::<Result<sse::Event, Infallible>>(64);
                tokio::spawn(forward_tail(tail, tx));
                let stream = ReceiverStream::new(rx);
                Ok::<_, Rejection>(sse::reply(sse::keep_alive().stream(stream)).into_response())
            }
        })
}

async fn forward_tail(mut tail: LogTail, tx: mpsc::Sender<Result<sse::Event, Infallible>>) {
    loop {
        tokio::select! {
            event = tail.next_event() => {
                let line = match event.to_line() {
                    Ok(line) => line,
                    Err(_) => continue,
                };
                let message = sse::Event::default().event(event.kind().as_str()).data(line);
                if tx.send(Ok(message)).await.is_err() {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
    debug!("Live subscriber went away");
}

/// Every reporting route.
pub fn all(
    log_path: PathBuf,
    poll_interval: Duration,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let log_path = Arc::new(log_path);
    events_route(log_path.clone())
        .or(overview_route(log_path.clone()))
        .or(live_route(log_path, poll_interval))
}
