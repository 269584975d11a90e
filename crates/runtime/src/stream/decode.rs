//! Byte stream to [`Delta`] decoding.

use super::event::Delta;
use crate::Result;
use futures::{Stream, StreamExt, stream};
use std::collections::VecDeque;
use std::pin::Pin;

/// Incremental decoder for one provider's wire format.
///
/// `decode` is fed transport chunks of arbitrary size and must carry any
/// incomplete frame over to the next call.
pub trait FrameDecoder: Send + 'static {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Delta>>;

    /// Flush after the transport has ended.
    fn finish(&mut self) -> Result<Vec<Delta>> {
        Ok(Vec::new())
    }
}

struct DecodeState<D> {
    bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>,
    decoder: D,
    queue: VecDeque<Delta>,
    exhausted: bool,
}

/// Run `decoder` over a transport byte stream.
///
/// The output ends after the first error.
pub fn decode_frames<S, B, D>(bytes: S, decoder: D) -> impl Stream<Item = Result<Delta>> + Send
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
    D: FrameDecoder,
{
    let state = DecodeState {
        bytes: bytes.map(|chunk| chunk.map(|b| b.as_ref().to_vec())).boxed(),
        decoder,
        queue: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.queue.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.exhausted {
                return None;
            }
            let decoded = match st.bytes.next().await {
                Some(Ok(chunk)) => st.decoder.decode(&chunk),
                Some(Err(e)) => Err(e),
                None => {
                    st.exhausted = true;
                    st.decoder.finish()
                }
            };
            match decoded {
                Ok(deltas) => st.queue.extend(deltas),
                Err(e) => {
                    st.exhausted = true;
                    st.queue.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PiError;

    /// Splits on `\n`, one text delta per line, `!` is a terminal marker.
    #[derive(Default)]
    struct LineDecoder {
        buf: String,
    }

    impl FrameDecoder for LineDecoder {
        fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Delta>> {
            let text = std::str::from_utf8(chunk).map_err(|e| PiError::Decode(e.to_string()))?;
            self.buf.push_str(text);
            let mut out = Vec::new();
            while let Some(pos) = self.buf.find('\n') {
                let line: String = self.buf.drain(..=pos).collect();
                let line = line.trim_end();
                if line == "!" {
                    out.push(Delta::Done);
                } else if line == "bad" {
                    return Err(PiError::Decode("bad line".into()));
                } else {
                    out.push(Delta::Text(line.to_string()));
                }
            }
            Ok(out)
        }
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<&'static [u8]>> {
        parts.iter().map(|p| Ok(p.as_bytes())).collect()
    }

    #[tokio::test]
    async fn frames_cross_chunk_boundaries() {
        let deltas: Vec<_> = decode_frames(
            stream::iter(chunks(&["he", "llo\nwor", "ld\n!\n"])),
            LineDecoder::default(),
        )
        .collect()
        .await;
        let deltas: Vec<Delta> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(
            deltas,
            vec![
                Delta::Text("hello".into()),
                Delta::Text("world".into()),
                Delta::Done
            ]
        );
    }

    #[tokio::test]
    async fn stops_after_first_error() {
        let out: Vec<_> = decode_frames(
            stream::iter(chunks(&["a\nbad\nb\n", "c\n"])),
            LineDecoder::default(),
        )
        .collect()
        .await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(PiError::Decode(_))));
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let mut chunks = chunks(&["a\n"]);
        chunks.push(Err(PiError::provider("reset")));
        let out: Vec<_> = decode_frames(stream::iter(chunks), LineDecoder::default())
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(PiError::Provider { .. })));
    }
}
