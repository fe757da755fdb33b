//! In-process HTTP fixtures for tests.

use axum::{
  body::Body,
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  Router,
};
use bytes::Bytes;
use std::{convert::Infallible, time::Duration};

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub(crate) async fn serve(router: Router) -> String {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let _ = axum::serve(listener, router).await;
  });
  format!("http://{addr}")
}

pub(crate) fn rom_bytes(len: usize) -> Vec<u8> {
  (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn full_body(data: Vec<u8>) -> Response {
  (
    StatusCode::OK,
    [(header::CONTENT_LENGTH, data.len().to_string())],
    data,
  )
    .into_response()
}

/// A body that trickles out `chunks` pieces with a pause before each one.
pub(crate) fn slow_body(chunks: usize, chunk_len: usize, delay: Duration) -> Response {
  Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_LENGTH, (chunks * chunk_len).to_string())
    .body(trickle(chunks, chunk_len, delay))
    .unwrap()
}

/// Like [`slow_body`] but without a length, so it goes out chunked.
pub(crate) fn chunked_body(chunks: usize, chunk_len: usize, delay: Duration) -> Response {
  Response::builder()
    .status(StatusCode::OK)
    .body(trickle(chunks, chunk_len, delay))
    .unwrap()
}

pub(crate) fn partial_body(rest: Vec<u8>) -> Response {
  (
    StatusCode::PARTIAL_CONTENT,
    [(header::CONTENT_LENGTH, rest.len().to_string())],
    rest,
  )
    .into_response()
}

/// Announces all of `data` but drops the connection after the first `keep` bytes.
pub(crate) fn cut_off_body(data: Vec<u8>, keep: usize) -> Response {
  let len = data.len();
  let head = Bytes::from(data[..keep.min(len)].to_vec());
  let stream = futures_util::stream::unfold(0u8, move |step| {
    let head = head.clone();
    async move {
      match step {
        0 => Some((Ok(head), 1)),
        1 => {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Some((Err(std::io::Error::other("connection dropped")), 2))
        }
        _ => None,
      }
    }
  });
  Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_LENGTH, len.to_string())
    .body(Body::from_stream(stream))
    .unwrap()
}

fn trickle(chunks: usize, chunk_len: usize, delay: Duration) -> Body {
  let stream = futures_util::stream::unfold(0usize, move |i| async move {
    if i >= chunks {
      return None;
    }
    tokio::time::sleep(delay).await;
    Some((Ok::<_, Infallible>(Bytes::from(vec![b'r'; chunk_len])), i + 1))
  });
  Body::from_stream(stream)
}
