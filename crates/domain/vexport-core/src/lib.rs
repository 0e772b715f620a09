use serde::{Deserialize, Serialize};

pub mod lease;
pub mod path_utils;

pub use lease::{DeviceEntry, LeaseInfo, LeaseState};

/// Content type announced for streamed disk transfers.
pub const STREAM_VMDK_CONTENT_TYPE: &str = "application/x-vnd.vmware-streamVmdk";

/// How a single device file is fetched from the lease endpoint.
///
/// Non-disk files (ISO images, NVRAM) use `Create`: the transfer is a fresh overwrite and
/// carries an explicit `Overwrite: t` directive. Disks use `Append`, a streamed partial update
/// tagged with the stream-optimized disk content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Create,
    Append,
}

impl TransferMethod {
    pub fn for_device(device: &DeviceEntry) -> Self {
        if device.disk {
            TransferMethod::Append
        } else {
            TransferMethod::Create
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            TransferMethod::Create => "PUT",
            TransferMethod::Append => "POST",
        }
    }

    pub fn headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            TransferMethod::Create => &[("Overwrite", "t")],
            TransferMethod::Append => &[],
        }
    }

    pub fn content_type(self) -> Option<&'static str> {
        match self {
            TransferMethod::Create => None,
            TransferMethod::Append => Some(STREAM_VMDK_CONTENT_TYPE),
        }
    }
}

/// One per-item progress observation handed to a progress sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub item_index: usize,
    pub item_name: String,
    pub percent_done: u8,
}

/// Integer percentage of `done` over `total`, clamped to 100.
/// `None` when `total` is zero: the hint is unknown and no estimate can be made.
pub fn percent_of(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (done as u128 * 100) / total as u128;
    Some(pct.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(disk: bool) -> DeviceEntry {
        DeviceEntry {
            key: "/vm-42/VirtualLsiLogicController0:0".into(),
            target_id: "disk-0.vmdk".into(),
            url: "https://*/nfc/52a4/disk-0.vmdk".into(),
            disk,
            file_size: Some(1024),
        }
    }

    #[test]
    fn disks_stream_and_other_files_overwrite() {
        let disk = TransferMethod::for_device(&device(true));
        assert_eq!(disk, TransferMethod::Append);
        assert_eq!(disk.verb(), "POST");
        assert_eq!(disk.content_type(), Some(STREAM_VMDK_CONTENT_TYPE));
        assert!(disk.headers().is_empty());

        let iso = TransferMethod::for_device(&device(false));
        assert_eq!(iso, TransferMethod::Create);
        assert_eq!(iso.verb(), "PUT");
        assert_eq!(iso.headers(), &[("Overwrite", "t")]);
        assert_eq!(iso.content_type(), None);
    }

    #[test]
    fn percent_of_handles_unknown_and_overshoot() {
        assert_eq!(percent_of(10, 0), None);
        assert_eq!(percent_of(0, 1000), Some(0));
        assert_eq!(percent_of(400, 1000), Some(40));
        assert_eq!(percent_of(999, 1000), Some(99));
        assert_eq!(percent_of(5000, 1000), Some(100));
        assert_eq!(percent_of(u64::MAX, u64::MAX), Some(100));
    }
}
