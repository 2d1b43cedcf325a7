use bytes::Bytes;
use futures::stream::{self, Stream};
use reqwest::Body;

use courier_sync::ProgressFn;

/// Split `data` into `chunk_size` pieces, reporting `(sent, total)` as each
/// piece is handed to the connection.
pub(crate) fn progress_stream(
    data: Bytes,
    chunk_size: usize,
    progress: ProgressFn,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len() as u64;
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect();

    let mut sent = 0u64;
    stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        progress(sent, total);
        Ok(chunk)
    }))
}

pub(crate) fn progress_body(data: Bytes, chunk_size: usize, progress: ProgressFn) -> Body {
    Body::wrap_stream(progress_stream(data, chunk_size, progress))
}
