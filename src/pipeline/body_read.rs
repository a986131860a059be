use futures::TryStreamExt;
use http::header::CONTENT_LENGTH;
use ntex::{
    util::{Bytes, BytesMut},
    web::{self, HttpRequest},
};

use crate::pipeline::error::PipelineError;

/// Collects the request body stream into memory, bounded by `max_size`.
///
/// A Content-Length above the limit is rejected before reading anything; the
/// streaming guard covers bodies without (or lying about) that header. The
/// buffered bytes are what makes batch classification a zero-consumption
/// lookahead for the assembler.
#[inline]
pub async fn read_body_stream(
    req: &HttpRequest,
    mut body_stream: web::types::Payload,
    max_size: usize,
) -> Result<Bytes, PipelineError> {
    let content_length: Option<usize> = match req.headers().get(CONTENT_LENGTH) {
        Some(header) => {
            let length: usize = header
                .to_str()
                .map_err(|_| PipelineError::InvalidContentLengthHeader)?
                .parse()
                .map_err(|_| PipelineError::InvalidContentLengthHeader)?;
            if length > max_size {
                return Err(PipelineError::PayloadTooLarge);
            }
            Some(length)
        }
        None => None,
    };

    let mut body = match content_length {
        Some(content_length) => BytesMut::with_capacity(content_length),
        None => BytesMut::new(),
    };

    while let Some(chunk) = body_stream
        .try_next()
        .await
        .map_err(PipelineError::PayloadReadError)?
    {
        if chunk.len() > max_size.saturating_sub(body.len()) {
            return Err(PipelineError::PayloadTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}
