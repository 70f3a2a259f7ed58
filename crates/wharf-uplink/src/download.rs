//! Tarball download streams.
//!
//! A [`DownloadStream`] yields the upstream body chunk by chunk, drives an
//! optional progress callback, and verifies at end-of-body that the number
//! of transferred bytes matches the announced `Content-Length`. Transport
//! and verification errors travel on the stream's item channel; the caller
//! decides whether a partially cached file must be rolled back.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use wharf_utils::CancelToken;

use crate::error::{Result, UplinkError};

/// Download lifecycle events for progress display.
#[derive(Clone, Copy, Debug)]
pub enum Progress {
    /// Upstream answered; the body is about to stream.
    Response { total: Option<u64> },
    /// One chunk arrived.
    Chunk { transferred: u64, total: Option<u64> },
    /// The body completed and passed length verification.
    Complete { transferred: u64 },
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub signal: CancelToken,
    pub progress: Option<ProgressFn>,
}

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub struct DownloadStream {
    content_length: Option<u64>,
    inner: BodyStream,
}

enum State {
    Running { body: BodyStream, transferred: u64 },
    Done,
}

impl DownloadStream {
    pub(crate) fn new(response: reqwest::Response, options: DownloadOptions) -> Self {
        let total = response.content_length();
        let body: BodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|item| item.map_err(UplinkError::Http)),
        );
        Self::from_parts(body, total, options)
    }

    pub(crate) fn from_parts(
        body: BodyStream,
        total: Option<u64>,
        options: DownloadOptions,
    ) -> Self {
        let DownloadOptions { signal, progress } = options;
        if let Some(cb) = &progress {
            cb(Progress::Response { total });
        }

        let inner = futures::stream::unfold(
            State::Running {
                body,
                transferred: 0,
            },
            move |state| {
                let signal = signal.clone();
                let progress = progress.clone();
                async move {
                    let State::Running {
                        mut body,
                        transferred,
                    } = state
                    else {
                        return None;
                    };

                    let next = tokio::select! {
                        biased;
                        _ = signal.cancelled() => {
                            return Some((Err(UplinkError::Cancelled), State::Done));
                        }
                        next = body.next() => next,
                    };

                    match next {
                        Some(Ok(chunk)) => {
                            let transferred = transferred + chunk.len() as u64;
                            if let Some(cb) = &progress {
                                cb(Progress::Chunk { transferred, total });
                            }
                            Some((Ok(chunk), State::Running { body, transferred }))
                        }
                        Some(Err(err)) => Some((Err(err), State::Done)),
                        None => match total {
                            Some(expected) if expected != transferred => Some((
                                Err(UplinkError::ContentMismatch {
                                    expected,
                                    transferred,
                                }),
                                State::Done,
                            )),
                            _ => {
                                if let Some(cb) = &progress {
                                    cb(Progress::Complete { transferred });
                                }
                                None
                            }
                        },
                    }
                }
            },
        );

        DownloadStream {
            content_length: total,
            inner: Box::pin(inner),
        }
    }

    /// `Content-Length` announced by upstream, when present.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn body_of(chunks: Vec<&'static [u8]>) -> BodyStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    async fn collect(stream: DownloadStream) -> Vec<Result<Bytes>> {
        stream.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn test_streams_chunks_and_completes() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let options = DownloadOptions {
            signal: CancelToken::never(),
            progress: Some(Arc::new(move |event| {
                seen.lock().unwrap().push(event);
            })),
        };

        let stream = DownloadStream::from_parts(body_of(vec![b"hello ", b"world"]), Some(11), options);
        assert_eq!(stream.content_length(), Some(11));

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_ok()));

        let events = events.lock().unwrap();
        assert!(matches!(events.first(), Some(Progress::Response { total: Some(11) })));
        assert!(matches!(
            events.last(),
            Some(Progress::Complete { transferred: 11 })
        ));
    }

    #[tokio::test]
    async fn test_short_body_is_content_mismatch() {
        let stream = DownloadStream::from_parts(
            body_of(vec![b"only-seven"]),
            Some(100),
            DownloadOptions::default(),
        );
        let items = collect(stream).await;
        assert!(matches!(
            items.last(),
            Some(Err(UplinkError::ContentMismatch {
                expected: 100,
                transferred: 10
            }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_length_skips_verification() {
        let stream = DownloadStream::from_parts(
            body_of(vec![b"whatever"]),
            None,
            DownloadOptions::default(),
        );
        let items = collect(stream).await;
        assert!(items.iter().all(|item| item.is_ok()));
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let (handle, signal) = CancelToken::new();
        let pending: BodyStream = Box::pin(futures::stream::pending());
        let mut stream = DownloadStream::from_parts(
            pending,
            None,
            DownloadOptions {
                signal,
                progress: None,
            },
        );

        handle.cancel();
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(UplinkError::Cancelled))));
        assert!(stream.next().await.is_none());
    }
}
