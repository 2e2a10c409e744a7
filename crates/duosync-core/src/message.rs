//! Wire protocol message types.
//!
//! Both connections carry UTF-8 text, one message per line. The verification
//! connection carries the code and a single response; the data connection
//! carries [`Frame`]s.
//!
//! ```text
//! SYNC_REQUEST:<json array of items>
//! SYNC_RESPONSE:<json array of items>
//! ITEM_ADDED:<json item>
//! DEVICE_INFO:<name>|<address>|<port>
//! DISCONNECT_REQUEST
//! DISCONNECT_ACKNOWLEDGE
//! ```

use crate::error::{Result, WireError};
use crate::types::{DeviceInfo, SyncItem, VerificationResult};

pub const SYNC_REQUEST_PREFIX: &str = "SYNC_REQUEST:";
pub const SYNC_RESPONSE_PREFIX: &str = "SYNC_RESPONSE:";
pub const ITEM_ADDED_PREFIX: &str = "ITEM_ADDED:";
pub const DEVICE_INFO_PREFIX: &str = "DEVICE_INFO:";
pub const DISCONNECT_REQUEST: &str = "DISCONNECT_REQUEST";
pub const DISCONNECT_ACKNOWLEDGE: &str = "DISCONNECT_ACKNOWLEDGE";

pub const VERIFICATION_SUCCESS: &str = "VERIFICATION_SUCCESS";
pub const VERIFICATION_FAILED_PREFIX: &str = "VERIFICATION_FAILED:";

/// Application messages that drive reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Sender's full collection; the receiver merges and answers.
    SyncRequest(Vec<SyncItem>),
    /// Already-merged collection; the receiver adopts it verbatim.
    SyncResponse(Vec<SyncItem>),
    /// A single item created on the sender.
    ItemAdded(SyncItem),
}

/// One line on the data connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Sync(SyncMessage),
    DeviceInfo(DeviceInfo),
    DisconnectRequest,
    DisconnectAcknowledge,
    /// Anything unrecognised, passed through untouched.
    Text(String),
}

impl Frame {
    /// Encode to a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let line = match self {
            Frame::Sync(SyncMessage::SyncRequest(items)) => {
                format!("{SYNC_REQUEST_PREFIX}{}", serde_json::to_string(items)?)
            }
            Frame::Sync(SyncMessage::SyncResponse(items)) => {
                format!("{SYNC_RESPONSE_PREFIX}{}", serde_json::to_string(items)?)
            }
            Frame::Sync(SyncMessage::ItemAdded(item)) => {
                format!("{ITEM_ADDED_PREFIX}{}", serde_json::to_string(item)?)
            }
            Frame::DeviceInfo(device) => format!(
                "{DEVICE_INFO_PREFIX}{}|{}|{}",
                device.name, device.address, device.port
            ),
            Frame::DisconnectRequest => DISCONNECT_REQUEST.to_string(),
            Frame::DisconnectAcknowledge => DISCONNECT_ACKNOWLEDGE.to_string(),
            Frame::Text(text) => text.clone(),
        };
        Ok(line)
    }

    /// Classify and decode one line.
    ///
    /// Prefixes are checked in a fixed order; anything that matches none of
    /// them is returned as [`Frame::Text`].
    pub fn decode(line: &str) -> Result<Frame> {
        if let Some(payload) = line.strip_prefix(SYNC_REQUEST_PREFIX) {
            return Ok(Frame::Sync(SyncMessage::SyncRequest(serde_json::from_str(
                payload,
            )?)));
        }
        if let Some(payload) = line.strip_prefix(SYNC_RESPONSE_PREFIX) {
            return Ok(Frame::Sync(SyncMessage::SyncResponse(serde_json::from_str(
                payload,
            )?)));
        }
        if let Some(payload) = line.strip_prefix(ITEM_ADDED_PREFIX) {
            return Ok(Frame::Sync(SyncMessage::ItemAdded(serde_json::from_str(
                payload,
            )?)));
        }
        if let Some(payload) = line.strip_prefix(DEVICE_INFO_PREFIX) {
            return decode_device_info(payload).map(Frame::DeviceInfo);
        }
        Ok(match line {
            DISCONNECT_REQUEST => Frame::DisconnectRequest,
            DISCONNECT_ACKNOWLEDGE => Frame::DisconnectAcknowledge,
            other => Frame::Text(other.to_string()),
        })
    }
}

impl From<SyncMessage> for Frame {
    fn from(message: SyncMessage) -> Self {
        Frame::Sync(message)
    }
}

/// Parse `<name>|<address>|<port>`.
///
/// Fields are split from the right so a name containing `|` still decodes.
fn decode_device_info(payload: &str) -> Result<DeviceInfo> {
    let fields: Vec<&str> = payload.rsplitn(3, '|').collect();
    if fields.len() != 3 {
        return Err(WireError::FieldCount {
            expected: 3,
            got: fields.len(),
        });
    }
    let (port, address, name) = (fields[0], fields[1], fields[2]);
    let port = port
        .parse::<u16>()
        .map_err(|_| WireError::InvalidPort(port.to_string()))?;
    Ok(DeviceInfo::new(name, address, port))
}

impl VerificationResult {
    /// Encode as the server's single response line.
    pub fn encode(&self) -> String {
        match self {
            VerificationResult::Success => VERIFICATION_SUCCESS.to_string(),
            VerificationResult::Failure { reason } => {
                let reason: String = reason
                    .chars()
                    .map(|c| if c.is_control() { ' ' } else { c })
                    .collect();
                format!("{VERIFICATION_FAILED_PREFIX}{reason}")
            }
        }
    }

    /// Decode the server's response line.
    pub fn decode(line: &str) -> Result<Self> {
        if line == VERIFICATION_SUCCESS {
            return Ok(VerificationResult::Success);
        }
        match line.strip_prefix(VERIFICATION_FAILED_PREFIX) {
            Some(reason) => Ok(VerificationResult::failure(reason)),
            None => Err(WireError::UnexpectedLine(line.to_string())),
        }
    }
}
