use std::sync::mpsc;

use tracing::warn;
use worldmap_shared::protocol::{self, MapReply, MapRequest};

use crate::error::MapError;

/// Where outbound map requests go. Fire-and-forget: nothing is returned.
pub trait RequestSink {
    fn send(&mut self, request: MapRequest);
}

impl RequestSink for Vec<MapRequest> {
    fn send(&mut self, request: MapRequest) {
        self.push(request);
    }
}

/// Channel-backed sink for handing requests to a network thread.
pub struct RequestQueue {
    tx: mpsc::Sender<MapRequest>,
}

pub struct RequestReceiver {
    rx: mpsc::Receiver<MapRequest>,
}

pub fn request_queue() -> (RequestQueue, RequestReceiver) {
    let (tx, rx) = mpsc::channel();
    (RequestQueue { tx }, RequestReceiver { rx })
}

impl Clone for RequestQueue {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl RequestSink for RequestQueue {
    fn send(&mut self, request: MapRequest) {
        if let Err(err) = self.tx.send(request) {
            warn!("map request dropped, network side has gone away: {:?}", err.0);
        }
    }
}

impl RequestReceiver {
    pub fn try_recv(&self) -> Result<MapRequest, mpsc::TryRecvError> {
        self.rx.try_recv()
    }

    /// Everything queued so far, without blocking.
    pub fn drain(&self) -> Vec<MapRequest> {
        self.rx.try_iter().collect()
    }

    /// Encodes everything queued so far for the wire.
    pub fn drain_encoded(&self) -> Result<Vec<Vec<u8>>, MapError> {
        self.drain()
            .iter()
            .map(|request| protocol::encode(request).map_err(MapError::from))
            .collect()
    }
}

pub fn decode_reply(data: &[u8]) -> Result<MapReply, MapError> {
    Ok(protocol::decode::<MapReply>(data)?)
}
