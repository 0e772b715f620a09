use std::collections::HashSet;

use reqwest::Url;
use tracing::{debug, info};
use vexport_core::path_utils::ExportPath;
use vexport_core::{DeviceEntry, TransferMethod};

use crate::export::ports::Connection;
use crate::export::ExportError;

/// One file to fetch, derived from a downloadable device entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferItem {
    pub index: usize,
    pub target_id: String,
    pub url: Url,
    /// Destination file name under the export root.
    pub file_name: String,
    pub method: TransferMethod,
    pub size_hint: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemSet {
    pub items: Vec<FileTransferItem>,
    pub skipped: usize,
}

/// Turn the lease's device list into transfer items, in enumeration order.
///
/// Devices without a target id are skipped. Any unresolvable URL fails the whole set so
/// that no partial transfer set is ever started.
pub fn build_items(
    devices: &[DeviceEntry],
    connection: &dyn Connection,
) -> Result<ItemSet, ExportError> {
    let mut set = ItemSet::default();
    let mut names = HashSet::new();

    for device in devices {
        if !device.is_downloadable() {
            info!("skipping device {} ({})", device.key, device.url);
            set.skipped += 1;
            continue;
        }

        let resolution_error = |reason: String| ExportError::UrlResolution {
            target_id: device.target_id.clone(),
            url: device.url.clone(),
            reason,
        };

        let url = connection.resolve_url(&device.url).map_err(resolution_error)?;
        let file_name = ExportPath::file_name_from_url_path(url.path())
            .ok_or_else(|| resolution_error("url has no usable file name".into()))?;
        if !names.insert(file_name.clone()) {
            return Err(resolution_error(format!(
                "file name {file_name} is granted more than once"
            )));
        }

        debug!(
            "device target {} size {:?} url {}",
            device.target_id, device.file_size, url
        );

        set.items.push(FileTransferItem {
            index: set.items.len(),
            target_id: device.target_id.clone(),
            url,
            file_name,
            method: TransferMethod::for_device(device),
            size_hint: device.size_hint(),
        });
    }

    Ok(set)
}
