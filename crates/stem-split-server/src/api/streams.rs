//! Server-sent event responses.

use std::collections::VecDeque;
use std::time::Instant;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse};
use futures_util::{Stream, stream::unfold};
use tokio::sync::mpsc;
use tokio::time::{Duration, Interval, MissedTickBehavior};

use crate::relay::RelayEvent;

const PING_INTERVAL: Duration = Duration::from_secs(15);

struct RelayStreamState {
    receiver: mpsc::Receiver<RelayEvent>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_activity: Instant,
    finished: bool,
}

fn push_ping_if_needed(pending: &mut VecDeque<Bytes>, last_activity: &mut Instant) {
    if pending.is_empty() && last_activity.elapsed() >= PING_INTERVAL {
        *last_activity = Instant::now();
        pending.push_back(Bytes::from(": ping\n\n"));
    }
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

/// Stream a job's relay events to the client.
///
/// The body ends right after the terminal event. Idle periods are filled
/// with `: ping` comments, which clients ignore.
pub(crate) fn relay_response(receiver: mpsc::Receiver<RelayEvent>) -> HttpResponse {
    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let stream = unfold(
        RelayStreamState {
            receiver,
            interval,
            pending: VecDeque::new(),
            last_activity: Instant::now(),
            finished: false,
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }
                if ctx.finished {
                    return None;
                }

                tokio::select! {
                    _ = ctx.interval.tick() => {}
                    event = ctx.receiver.recv() => match event {
                        Some(event) => {
                            ctx.finished = event.is_terminal();
                            ctx.last_activity = Instant::now();
                            ctx.pending.push_back(event.to_sse());
                        }
                        None => return None,
                    },
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_activity);
            }
        },
    );

    sse_response(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[actix_web::test]
    async fn body_stops_after_terminal_event() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(RelayEvent::Progress(0)).await.unwrap();
        tx.send(RelayEvent::Progress(12)).await.unwrap();
        tx.send(RelayEvent::Error).await.unwrap();
        tx.send(RelayEvent::Progress(50)).await.unwrap();

        let resp = relay_response(rx);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let body = actix_web::body::to_bytes(resp.into_body()).await.ok().unwrap();
        assert_eq!(body, Bytes::from("data: 0\n\ndata: 12\n\ndata: ERROR\n\n"));
        drop(tx);
    }

    #[actix_web::test]
    async fn body_ends_when_producer_goes_away() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(RelayEvent::Progress(0)).await.unwrap();
        drop(tx);

        let body = relay_response(rx).into_body();
        let bytes = actix_web::body::to_bytes(body).await.ok().unwrap();
        assert_eq!(bytes, Bytes::from("data: 0\n\n"));
    }

    #[test]
    fn ping_only_when_idle() {
        let mut pending = VecDeque::new();
        let mut last = Instant::now();
        push_ping_if_needed(&mut pending, &mut last);
        assert!(pending.is_empty());

        let mut stale = Instant::now() - PING_INTERVAL;
        push_ping_if_needed(&mut pending, &mut stale);
        assert_eq!(pending.pop_front(), Some(Bytes::from(": ping\n\n")));
    }

    #[actix_web::test]
    async fn streaming_body_has_unknown_size() {
        let (_tx, rx) = mpsc::channel::<RelayEvent>(1);
        let body = relay_response(rx).into_body();
        assert!(matches!(body.size(), actix_web::body::BodySize::Stream));
    }
}
