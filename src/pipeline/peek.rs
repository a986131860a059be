/// Upper bound on the bytes inspected per scan step, so classifying a payload
/// with a long whitespace prefix stays incremental.
const PEEK_CHUNK_SIZE: usize = 128;

/// Shape of an incoming GraphQL payload, decided once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The first non-whitespace byte is `[`: a batch of operations.
    Batched,
    /// The first non-whitespace byte is anything else: one operation.
    Single,
    /// The payload is empty or whitespace-only. Callers treat this the same
    /// as `Single` and let the JSON decoder produce the actual error.
    Indeterminate,
}

impl Classification {
    #[inline]
    pub fn is_batched(&self) -> bool {
        matches!(self, Classification::Batched)
    }
}

/// Classifies a payload by locating its first non-whitespace byte.
///
/// The scan walks the buffer in bounded chunks and is a pure lookahead: it
/// consumes nothing, so the caller re-reads the exact same bytes when
/// decoding. Payloads arrive here already buffered by `body_read`, which is
/// what makes the re-read possible for non-rewindable transport sources.
pub fn classify(bytes: &[u8]) -> Classification {
    for chunk in bytes.chunks(PEEK_CHUNK_SIZE) {
        for byte in chunk {
            if !byte.is_ascii_whitespace() {
                return if *byte == b'[' {
                    Classification::Batched
                } else {
                    Classification::Single
                };
            }
        }
    }

    Classification::Indeterminate
}

#[inline]
pub fn classify_str(payload: &str) -> Classification {
    classify(payload.as_bytes())
}
