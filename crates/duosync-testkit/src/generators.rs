//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;

use duosync_core::{DeviceInfo, SyncItem};

/// Generate an item id in the same shape `SyncItem::new` produces.
pub fn item_id() -> impl Strategy<Value = String> {
    "[0-9a-f]{32}".prop_map(String::from)
}

/// Generate item text, including characters that need JSON escaping.
pub fn item_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,40}".prop_map(String::from),
        any::<String>(),
    ]
}

/// Generate a reasonable timestamp in milliseconds.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_900_000_000_000i64
}

/// Generate a single item.
pub fn sync_item() -> impl Strategy<Value = SyncItem> {
    (item_id(), item_text(), timestamp())
        .prop_map(|(id, text, ts)| SyncItem::with_id(id, text, ts))
}

/// Generate up to `max` items with distinct ids.
pub fn unique_items(max: usize) -> impl Strategy<Value = Vec<SyncItem>> {
    prop::collection::btree_map(item_id(), (item_text(), timestamp()), 0..=max).prop_map(
        |items: BTreeMap<String, (String, i64)>| {
            items
                .into_iter()
                .map(|(id, (text, ts))| SyncItem::with_id(id, text, ts))
                .collect()
        },
    )
}

/// Generate a device name. May contain the field separator.
pub fn device_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 '|.-]{1,24}".prop_map(String::from)
}

/// Generate a device on an IPv4 address.
pub fn device_info() -> impl Strategy<Value = DeviceInfo> {
    (device_name(), any::<[u8; 4]>(), any::<u16>()).prop_map(|(name, ip, port)| {
        let address = format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
        DeviceInfo::new(name, address, port)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use duosync_core::{merge, Frame, SyncMessage};

    proptest! {
        #[test]
        fn test_device_info_frame_survives_separator_in_name(device in device_info()) {
            let line = Frame::DeviceInfo(device.clone()).encode().unwrap();
            prop_assert_eq!(Frame::decode(&line).unwrap(), Frame::DeviceInfo(device));
        }

        #[test]
        fn test_merged_response_decodes_to_same_order(
            local in unique_items(8),
            remote in unique_items(8),
        ) {
            let merged = merge(&local, &remote);
            let line = Frame::Sync(SyncMessage::SyncResponse(merged.clone()))
                .encode()
                .unwrap();

            prop_assert!(!line.contains('\n'));
            prop_assert_eq!(
                Frame::decode(&line).unwrap(),
                Frame::Sync(SyncMessage::SyncResponse(merged))
            );
        }
    }
}
