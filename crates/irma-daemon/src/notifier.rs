//! Per-session status push channel.
//!
//! Each session carries at most one subscriber. The sender half lives
//! inside the session (see [`SessionGuard::subscribe`]); this module
//! wraps the receiver half into a stream the HTTP layer serves as
//! server-sent events.
//!
//! [`SessionGuard::subscribe`]: crate::session::SessionGuard::subscribe

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures::Stream;
use irma_core::messages::Status;
use tokio::sync::mpsc;

/// An ordered stream of session status transitions.
///
/// The first item is the status at subscription time; the stream ends
/// after a terminal status, or when the sink is closed (session removed
/// or subscriber replaced).
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<Status>,
}

impl StatusStream {
    /// Wraps a subscription receiver.
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<Status>) -> Self {
        Self { rx }
    }

    /// Awaits the next transition. `None` means end-of-stream, which the
    /// subscriber treats as terminal.
    pub async fn next_status(&mut self) -> Option<Status> {
        self.rx.recv().await
    }
}

impl Stream for StatusStream {
    type Item = Status;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Renders a status transition as a server-sent event. The payload is the
/// JSON-encoded status name.
#[must_use]
pub fn status_event(status: Status) -> Event {
    Event::default().data(format!("\"{}\"", status.as_str()))
}

/// Adapts a [`StatusStream`] into the event stream axum serves.
pub fn sse_events(stream: StatusStream) -> impl Stream<Item = Result<Event, Infallible>> {
    use futures::StreamExt as _;
    stream.map(|status| Ok(status_event(status)))
}
