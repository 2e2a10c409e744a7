//! Message pump and dispatcher.
//!
//! Reads the data connection line by line and routes each frame. A frame
//! that fails to decode is logged and dropped; only the stream itself
//! ending or erroring stops the pump.

use std::io;

use duosync_core::message::DISCONNECT_ACKNOWLEDGE;
use duosync_core::{Frame, SyncItem, SyncMessage};

use crate::engine::Engine;
use crate::error::SessionError;
use crate::transport::LineReader;

/// What the pump does after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Run until the stream ends, errors, or a disconnect frame arrives.
pub(crate) async fn run(engine: Engine, epoch: u64, mut reader: LineReader) {
    loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                engine.fail(epoch, SessionError::PeerClosed);
                return;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                engine.fail(epoch, SessionError::ProtocolViolation(e.to_string()));
                return;
            }
            Err(e) => {
                engine.fail(epoch, SessionError::Io(e));
                return;
            }
        };

        if dispatch(&engine, epoch, &line).await == Flow::Stop {
            return;
        }
    }
}

/// Route one line.
pub(crate) async fn dispatch(engine: &Engine, epoch: u64, line: &str) -> Flow {
    let frame = match Frame::decode(line) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("dropping malformed frame: {}", e);
            return Flow::Continue;
        }
    };

    match frame {
        Frame::Sync(SyncMessage::SyncRequest(remote)) => on_sync_request(engine, remote),
        Frame::Sync(SyncMessage::SyncResponse(items)) => {
            tracing::debug!("adopting {} merged items from peer", items.len());
            engine.adopt_items(items.clone());
            engine.listener().on_sync_response_received(&items);
        }
        Frame::Sync(SyncMessage::ItemAdded(item)) => {
            if !engine.add_remote_item(item.clone()) {
                tracing::debug!("item {} already present", item.id);
            }
            engine.listener().on_item_added(&item);
        }
        Frame::DeviceInfo(remote) => {
            tracing::info!("peer is {}", remote);
            if let Some(info) = engine.record_remote(epoch, remote) {
                engine.listener().on_connection_info_updated(Some(&info));
            }
        }
        Frame::DisconnectRequest => {
            acknowledge_disconnect(engine, epoch).await;
            return Flow::Stop;
        }
        Frame::DisconnectAcknowledge => {
            tracing::debug!("peer acknowledged disconnect");
            engine.close(Some(epoch));
            return Flow::Stop;
        }
        Frame::Text(text) => engine.listener().on_message_received(&text),
    }
    Flow::Continue
}

/// Merge, notify, and answer with the merged collection.
fn on_sync_request(engine: &Engine, remote: Vec<SyncItem>) {
    let merged = engine.merge_remote_items(&remote);
    tracing::debug!(
        "merged {} remote items into {} total",
        remote.len(),
        merged.len()
    );
    engine.listener().on_sync_request_received(&remote);

    if let Err(e) = engine.send(SyncMessage::SyncResponse(merged)) {
        tracing::warn!("could not answer sync request: {}", e);
    }
}

async fn acknowledge_disconnect(engine: &Engine, epoch: u64) {
    tracing::debug!("peer requested disconnect");
    if let Some(writer) = engine.writer_for(epoch) {
        if let Err(e) = writer.lock().await.write_line(DISCONNECT_ACKNOWLEDGE).await {
            tracing::debug!("failed to acknowledge disconnect: {}", e);
        }
    }
    engine.close(Some(epoch));
}
