//! [`ResponseChannel`] adapters for axum

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::serve::ResponseChannel;

/// Collects one complete response in memory.
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    committed: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            committed: false,
        }
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.committed {
            Err(TransportError::HeadersCommitted)
        } else {
            Ok(())
        }
    }
}

impl ResponseChannel for BufferedResponse {
    fn set_content_type(&mut self, content_type: &'static str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(())
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.headers.insert(name, value);
        Ok(())
    }

    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.committed = true;
        self.body.extend_from_slice(&body);
        Ok(())
    }

    async fn send_server_error(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.committed = true;
        self.status = StatusCode::INTERNAL_SERVER_ERROR;
        self.headers.clear();
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        self.committed = true;
        self.body.extend_from_slice(&chunk);
        Ok(())
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Status line and headers of a chunked response.
#[derive(Debug)]
struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

/// Writer half of a chunked response.
///
/// Headers go out with the first chunk. Chunks travel through a bounded
/// channel to the body stream; once the server drops that stream (client
/// disconnected) every send fails with [`TransportError::Closed`].
pub struct ChunkedResponse {
    head: Head,
    head_tx: Option<oneshot::Sender<Head>>,
    body_tx: Option<flume::Sender<Bytes>>,
}

/// Reader half: resolves into the axum response once headers are committed.
pub struct PendingResponse {
    head_rx: oneshot::Receiver<Head>,
    body_rx: flume::Receiver<Bytes>,
}

/// Create a chunked response whose body buffers up to `capacity` chunks.
pub fn chunked(capacity: usize) -> (ChunkedResponse, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = flume::bounded(capacity.max(1));
    (
        ChunkedResponse {
            head: Head {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
            },
            head_tx: Some(head_tx),
            body_tx: Some(body_tx),
        },
        PendingResponse { head_rx, body_rx },
    )
}

impl ChunkedResponse {
    fn ensure_open(&self) -> Result<(), TransportError> {
        match &self.head_tx {
            None => Err(TransportError::HeadersCommitted),
            Some(tx) if tx.is_closed() => Err(TransportError::Closed),
            Some(_) => Ok(()),
        }
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        let Some(tx) = self.head_tx.take() else {
            return Ok(());
        };
        let head = Head {
            status: self.head.status,
            headers: std::mem::take(&mut self.head.headers),
        };
        tx.send(head).map_err(|_| TransportError::Closed)
    }

    async fn push(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let tx = self.body_tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send_async(chunk)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl ResponseChannel for ChunkedResponse {
    fn set_content_type(&mut self, content_type: &'static str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.head
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Ok(())
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.head.headers.insert(name, value);
        Ok(())
    }

    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        self.commit()?;
        let sent = self.push(body).await;
        // Complete response: end the body.
        self.body_tx = None;
        sent
    }

    async fn send_server_error(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.head.status = StatusCode::INTERNAL_SERVER_ERROR;
        self.head.headers.clear();
        self.commit()?;
        self.body_tx = None;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        self.commit()?;
        self.push(chunk).await
    }
}

impl PendingResponse {
    /// Wait for the writer to commit headers.
    ///
    /// A writer that goes away before committing yields a bare 500.
    pub async fn into_response(self) -> Response {
        let Ok(head) = self.head_rx.await else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let stream = self.body_rx.into_stream().map(Ok::<_, Infallible>);
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn buffered_response_rejects_headers_after_send() {
        let mut channel = BufferedResponse::new();
        channel.set_content_type("image/jpeg").unwrap();
        channel.send(Bytes::from_static(b"jpeg")).await.unwrap();

        assert!(matches!(
            channel.set_content_type("text/plain"),
            Err(TransportError::HeadersCommitted)
        ));

        let response = channel.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"jpeg");
    }

    #[tokio::test]
    async fn buffered_server_error_drops_staged_headers() {
        let mut channel = BufferedResponse::new();
        channel.set_content_type("image/jpeg").unwrap();
        channel.send_server_error().await.unwrap();

        let response = channel.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn chunked_commits_headers_with_first_chunk() {
        let (mut writer, pending) = chunked(4);
        writer.set_content_type("text/plain").unwrap();
        writer.send_chunk(Bytes::from_static(b"a")).await.unwrap();
        writer.send_chunk(Bytes::from_static(b"b")).await.unwrap();

        assert!(matches!(
            writer.set_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            Err(TransportError::HeadersCommitted)
        ));
        drop(writer);

        let response = pending.into_response().await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ab");
    }

    #[tokio::test]
    async fn chunked_send_fails_once_reader_is_gone() {
        let (mut writer, pending) = chunked(1);
        drop(pending);

        assert!(matches!(
            writer.set_content_type("text/plain"),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            writer.send_chunk(Bytes::from_static(b"a")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn abandoned_writer_yields_500() {
        let (writer, pending) = chunked(1);
        drop(writer);

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
