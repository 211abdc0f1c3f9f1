//! Server-Sent Events stream, one per connected viewer

use std::time::Duration;

use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use sensorcast_proto::Event;
use tracing::{info, warn};

use crate::http::{Context, HttpResult};
use crate::registry::Subscription;

/// Comment frame sent when nothing else went out for this long, so dead
/// connections are noticed even while the sensor is quiet
pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// `event: <name>\ndata: <json>\n\n`
pub fn encode(event: &Event) -> serde_json::Result<Bytes> {
    let data = event.to_json()?;
    Ok(Bytes::from(format!("event: {}\ndata: {data}\n\n", event.name())))
}

async fn next_frame(sub: &mut Subscription) -> Option<Bytes> {
    loop {
        match tokio::time::timeout(KEEP_ALIVE, sub.recv()).await {
            Ok(Some(event)) => match encode(&event) {
                Ok(bytes) => return Some(bytes),
                Err(e) => warn!("failed to encode {} for {}: {e}", event.name(), sub.id()),
            },
            // the registry dropped us
            Ok(None) => return None,
            Err(_) => return Some(Bytes::from_static(KEEP_ALIVE_FRAME)),
        }
    }
}

pub async fn handle(ctx: &Context) -> HttpResult {
    let subscription = ctx.registry.subscribe(ctx.subscriber_capacity).await;
    info!("viewer {} connected", subscription.id());

    // the subscription lives in the body; hyper dropping the body on
    // disconnect unregisters it
    let stream = futures::stream::unfold(subscription, |mut sub| async move {
        let bytes = next_frame(&mut sub).await?;
        Some((Ok::<_, std::io::Error>(Frame::data(bytes)), sub))
    });

    let mut r = hyper::Response::new(StreamBody::new(stream).boxed_unsync());
    let headers = r.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(r)
}
