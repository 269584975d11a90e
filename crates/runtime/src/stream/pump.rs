//! Producer side of a [`ChatStream`].

use super::ChatStream;
use super::assembler::StreamAssembler;
use super::event::{ChatStreamEvent, Delta};
use crate::model::ChatResponse;
use crate::provider::ChatOptions;
use crate::{PiError, Result};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffered events between the decode task and the consumer.
pub const CHANNEL_CAPACITY: usize = 64;

/// Turn a provider's delta stream into a canonical [`ChatStream`].
///
/// `connect` opens the transport and resolves to the decoded deltas. Both
/// connecting and reading run on a spawned task that observes the cancel
/// token and deadline in `options`, and stops as soon as the returned
/// stream is dropped. On any terminal outcome the task drops the transport
/// and emits exactly one `End` or `Error`.
pub fn normalize<F, S>(connect: F, options: &ChatOptions) -> ChatStream
where
    F: Future<Output = Result<S>> + Send + 'static,
    S: Stream<Item = Result<Delta>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = options.cancel.clone().unwrap_or_default();
    let guard = Guard {
        consumer: tx.clone(),
        cancel: cancel.clone(),
        deadline: options.timeout.map(|after| (Instant::now() + after, after)),
    };
    tokio::spawn(produce(connect, tx, guard));
    ChatStream::from_receiver(rx, Some(cancel))
}

/// Cancellation, deadline and consumer liveness shared by every await in
/// the producer.
struct Guard {
    consumer: mpsc::Sender<ChatStreamEvent>,
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Guard {
    async fn run<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        let expired = async {
            match self.deadline {
                Some((at, after)) => {
                    tokio::time::sleep_until(at).await;
                    after
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PiError::Cancelled),
            _ = self.consumer.closed() => Err(PiError::Cancelled),
            after = expired => Err(PiError::Timeout { after }),
            out = fut => Ok(out),
        }
    }
}

async fn produce<F, S>(connect: F, tx: mpsc::Sender<ChatStreamEvent>, guard: Guard)
where
    F: Future<Output = Result<S>>,
    S: Stream<Item = Result<Delta>>,
{
    if tx.send(ChatStreamEvent::Start).await.is_err() {
        return;
    }

    let terminal = match drive(connect, &tx, &guard).await {
        Ok(response) => ChatStreamEvent::End { response },
        Err(err) => {
            match &err {
                PiError::Cancelled => debug!("stream cancelled"),
                err => warn!(error = %err, "stream failed"),
            }
            ChatStreamEvent::error(&err)
        }
    };
    // The consumer may already be gone; nothing left to release.
    let _ = tx.send(terminal).await;
}

async fn drive<F, S>(
    connect: F,
    tx: &mpsc::Sender<ChatStreamEvent>,
    guard: &Guard,
) -> Result<ChatResponse>
where
    F: Future<Output = Result<S>>,
    S: Stream<Item = Result<Delta>>,
{
    let deltas = guard.run(connect).await??;
    futures::pin_mut!(deltas);
    let mut assembler = StreamAssembler::new();

    loop {
        match guard.run(deltas.next()).await? {
            None => {
                return Err(PiError::Decode(
                    "connection closed before terminal marker".into(),
                ));
            }
            Some(Err(err)) => return Err(err),
            Some(Ok(Delta::Done)) => return assembler.finish(),
            Some(Ok(delta)) => {
                if let Some(event) = assembler.apply(delta) {
                    guard
                        .run(tx.send(event))
                        .await?
                        .map_err(|_| PiError::Cancelled)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StopReason, TokenUsage};
    use futures::stream;

    fn ok(deltas: Vec<Delta>) -> impl Stream<Item = Result<Delta>> + Send + 'static {
        stream::iter(deltas.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn well_formed_stream() {
        let deltas = vec![
            Delta::Text("Hel".into()),
            Delta::Text("lo".into()),
            Delta::Usage(TokenUsage::new(3, 2)),
            Delta::Stop(StopReason::Stop),
            Delta::Done,
        ];
        let events: Vec<_> = normalize(async move { Ok(ok(deltas)) }, &ChatOptions::default())
            .collect()
            .await;

        assert_eq!(events.first(), Some(&ChatStreamEvent::Start));
        match events.last() {
            Some(ChatStreamEvent::End { response }) => {
                assert_eq!(response.text(), "Hello");
                assert_eq!(response.usage, TokenUsage::new(3, 2));
            }
            other => panic!("expected End, got {other:?}"),
        }
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn missing_terminal_marker_is_decode_error() {
        let events: Vec<_> = normalize(
            async move { Ok(ok(vec![Delta::Text("partial".into())])) },
            &ChatOptions::default(),
        )
        .collect()
        .await;
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::Error {
                kind: crate::ErrorKind::Decode,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn connect_failure_is_single_error() {
        let connect = async {
            Err::<stream::Empty<Result<Delta>>, _>(PiError::Provider {
                status: Some(401),
                message: "bad key".into(),
            })
        };
        let events: Vec<_> = normalize(connect, &ChatOptions::default()).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChatStreamEvent::Start);
        assert!(events[1].is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_connecting_is_timeout() {
        let connect = async {
            std::future::pending::<Result<stream::Empty<Result<Delta>>>>().await
        };
        let options = ChatOptions::default().with_timeout(Duration::from_secs(5));
        let events: Vec<_> = normalize(connect, &options).collect().await;
        assert!(matches!(
            events.last(),
            Some(ChatStreamEvent::Error {
                kind: crate::ErrorKind::Timeout,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn dropped_consumer_releases_stalled_transport() {
        let (held, released) = tokio::sync::oneshot::channel::<()>();
        let transport = stream::iter([Ok(Delta::Text("x".into()))]).chain(stream::once(
            async move {
                let _held = held;
                std::future::pending::<Result<Delta>>().await
            },
        ));
        let mut events = normalize(async move { Ok(transport) }, &ChatOptions::default());
        assert_eq!(events.next().await, Some(ChatStreamEvent::Start));
        assert!(matches!(
            events.next().await,
            Some(ChatStreamEvent::TextDelta { .. })
        ));
        drop(events);

        let dropped = tokio::time::timeout(Duration::from_secs(5), released).await;
        assert!(matches!(dropped, Ok(Err(_))), "transport still held");
    }
}
