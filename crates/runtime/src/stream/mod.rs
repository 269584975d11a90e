//! Streaming normalization.
//!
//! Providers decode their wire format into [`Delta`]s with a
//! [`FrameDecoder`]; [`normalize`] runs the decode on a background task and
//! hands the consumer a [`ChatStream`] of canonical [`ChatStreamEvent`]s.

mod assembler;
mod decode;
mod event;
mod pump;

pub use assembler::StreamAssembler;
pub use decode::{FrameDecoder, decode_frames};
pub use event::{ChatStreamEvent, Delta};
pub use pump::{CHANNEL_CAPACITY, normalize};

use crate::model::ChatResponse;
use crate::{PiError, Result};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A single-use, finite stream of canonical events.
///
/// Yields `Start` first and exactly one terminal event last, then `None`
/// forever. If the producer disappears without a terminal event, an `Error`
/// is synthesized. Once the cancel token fires, the next poll yields
/// `Error(Cancelled)`.
pub struct ChatStream {
    inner: BoxStream<'static, ChatStreamEvent>,
    cancel: Option<CancellationToken>,
    started: bool,
    finished: bool,
    pending: Option<ChatStreamEvent>,
}

impl ChatStream {
    /// Wrap an event source. The source is expected to start with `Start`.
    pub fn new(
        events: impl Stream<Item = ChatStreamEvent> + Send + 'static,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            inner: events.boxed(),
            cancel,
            started: false,
            finished: false,
            pending: None,
        }
    }

    pub(crate) fn from_receiver(
        rx: mpsc::Receiver<ChatStreamEvent>,
        cancel: Option<CancellationToken>,
    ) -> Self {
        let events = stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        });
        Self::new(events, cancel)
    }

    /// A stream that fails without contacting anything: `Start`, `Error`.
    pub fn failed(err: &PiError) -> Self {
        Self::new(
            stream::iter([ChatStreamEvent::Start, ChatStreamEvent::error(err)]),
            None,
        )
    }

    /// Rewrite the response carried by the `End` event.
    pub fn map_end<F>(self, mut f: F) -> Self
    where
        F: FnMut(ChatResponse) -> ChatResponse + Send + 'static,
    {
        let inner = self
            .inner
            .map(move |event| match event {
                ChatStreamEvent::End { response } => ChatStreamEvent::End {
                    response: f(response),
                },
                other => other,
            })
            .boxed();
        Self { inner, ..self }
    }

    /// Drain the stream, returning the final response or the terminal error.
    pub async fn into_response(mut self) -> Result<ChatResponse> {
        while let Some(event) = self.next().await {
            match event {
                ChatStreamEvent::End { response } => return Ok(response),
                event @ ChatStreamEvent::Error { .. } => {
                    return Err(event
                        .as_error()
                        .unwrap_or_else(|| PiError::provider("stream failed")));
                }
                _ => {}
            }
        }
        Err(PiError::Decode("stream ended without a terminal event".into()))
    }

    fn synthesize(&mut self, err: PiError) -> Poll<Option<ChatStreamEvent>> {
        let event = ChatStreamEvent::error(&err);
        if self.started {
            self.finished = true;
            Poll::Ready(Some(event))
        } else {
            self.started = true;
            self.pending = Some(event);
            Poll::Ready(Some(ChatStreamEvent::Start))
        }
    }
}

impl Stream for ChatStream {
    type Item = ChatStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(event) = this.pending.take() {
            this.finished = true;
            return Poll::Ready(Some(event));
        }
        if this.finished {
            return Poll::Ready(None);
        }
        if this
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return this.synthesize(PiError::Cancelled);
        }

        match ready!(this.inner.as_mut().poll_next(cx)) {
            Some(event) => {
                this.started = true;
                if event.is_terminal() {
                    this.finished = true;
                }
                Poll::Ready(Some(event))
            }
            None => this.synthesize(PiError::Decode(
                "stream ended without a terminal event".into(),
            )),
        }
    }
}

impl futures::stream::FusedStream for ChatStream {
    fn is_terminated(&self) -> bool {
        self.finished && self.pending.is_none()
    }
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn synthesizes_error_when_source_ends_early() {
        let events: Vec<_> = ChatStream::new(
            stream::iter([
                ChatStreamEvent::Start,
                ChatStreamEvent::TextDelta { text: "x".into() },
            ]),
            None,
        )
        .collect()
        .await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[2],
            ChatStreamEvent::Error {
                kind: ErrorKind::Decode,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_source_still_starts() {
        let events: Vec<_> = ChatStream::new(stream::empty(), None).collect().await;
        assert_eq!(events[0], ChatStreamEvent::Start);
        assert!(events[1].is_terminal());
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn nothing_after_terminal() {
        let mut s = ChatStream::failed(&PiError::Cancelled);
        assert_eq!(s.next().await, Some(ChatStreamEvent::Start));
        assert!(s.next().await.is_some_and(|e| e.is_terminal()));
        assert_eq!(s.next().await, None);
        assert_eq!(s.next().await, None);
    }

    #[tokio::test]
    async fn cancelled_token_ends_stream() {
        let cancel = CancellationToken::new();
        let mut s = ChatStream::new(
            stream::iter([ChatStreamEvent::Start]).chain(stream::pending()),
            Some(cancel.clone()),
        );
        assert_eq!(s.next().await, Some(ChatStreamEvent::Start));
        cancel.cancel();
        assert_eq!(
            s.next().await,
            Some(ChatStreamEvent::error(&PiError::Cancelled))
        );
        assert_eq!(s.next().await, None);
    }

    #[tokio::test]
    async fn into_response_returns_error() {
        let err = ChatStream::failed(&PiError::Decode("bad".into()))
            .into_response()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
