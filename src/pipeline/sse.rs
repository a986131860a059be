use std::io;
use std::time::Duration;

use futures_timer::Delay;
use futures_util::{FutureExt, Stream, StreamExt};
use ntex::util::{Bytes, BytesMut};
use ntex::web::HttpResponse;
use tokio_util::bytes::BufMut;
use tracing::{error, warn};

use crate::engine::{SubscriptionHandle, SubscriptionSource};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream;charset=UTF-8";

/// Builds the SSE response for a subscription outcome. Headers go out
/// immediately; items follow as `data: <json>\n\n` frames.
pub fn subscription_response(source: SubscriptionSource, idle_timeout: Duration) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(EVENT_STREAM_CONTENT_TYPE)
        .streaming(create_stream(source, idle_timeout))
}

/// Drives subscription delivery with demand-of-1 backpressure.
///
/// The generator polls the upstream for the next item only after the
/// previous frame has been handed downstream, so at most one item is in
/// flight regardless of producer speed. Terminal paths:
/// - upstream completion: clean end of stream;
/// - upstream error: logged, stream ends with no further frames (headers
///   are already on the wire);
/// - idle timeout: the upstream subscription is cancelled and the stream
///   ends without emitting a partial frame;
/// - client disconnect: ntex drops the stream, and the drop guard cancels
///   the subscription through the same idempotent handle.
pub fn create_stream(
    source: SubscriptionSource,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
    let SubscriptionSource { items, handle } = source;
    let mut items = items.fuse();
    // Created outside the generator so a stream torn down before its first
    // poll still cancels the upstream subscription.
    let guard = CancelOnDrop(handle.clone());
    async_stream::stream! {
        let _guard = guard;
        loop {
            let mut idle = Delay::new(idle_timeout).fuse();
            futures_util::select! {
                item = items.next() => {
                    match item {
                        Some(Ok(value)) => {
                            match sonic_rs::to_vec(&value) {
                                Ok(json) => {
                                    let mut frame = BytesMut::with_capacity(json.len() + 8);
                                    frame.put_slice(b"data: ");
                                    frame.put_slice(&json);
                                    frame.put_slice(b"\n\n");
                                    yield Ok(frame.freeze());
                                }
                                Err(e) => {
                                    error!("Failed to serialize subscription item: {}", e);
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!("Subscription stream failed: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = idle => {
                    warn!("Subscription idle timeout reached, cancelling upstream");
                    handle.cancel();
                    break;
                }
            }
        }
    }
    .boxed()
}

/// Cancels the upstream subscription on every exit path, including client
/// disconnects that tear the stream down from outside.
struct CancelOnDrop(SubscriptionHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
