use super::{controls, CameraCandidate};
use crate::error::CameraError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// List V4L2 capture nodes with their sysfs labels and torch support
pub fn enumerate() -> Vec<CameraCandidate> {
    let mut candidates = scan_devices(Path::new("/dev"), Path::new("/sys/class/video4linux"));
    for candidate in &mut candidates {
        candidate.torch_capable = controls::has_torch(&candidate.id);
    }
    debug!("Found {} camera candidates", candidates.len());
    candidates
}

/// `videoN` entries of `dev_dir`, ordered by N, labelled from `sys_dir/videoN/name`
pub fn scan_devices(dev_dir: &Path, sys_dir: &Path) -> Vec<CameraCandidate> {
    let Ok(entries) = fs::read_dir(dev_dir) else {
        return Vec::new();
    };

    let mut nodes: Vec<(u32, String)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let index = name.strip_prefix("video")?.parse::<u32>().ok()?;
            Some((index, name))
        })
        .collect();
    nodes.sort();

    nodes
        .into_iter()
        .map(|(_, name)| {
            let label = fs::read_to_string(sys_dir.join(&name).join("name"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| name.clone());
            CameraCandidate {
                id: dev_dir.join(&name).to_string_lossy().into_owned(),
                label,
                torch_capable: false,
            }
        })
        .collect()
}

/// Fail early with a precise error when the node cannot be opened
pub fn check_access(device: &str) -> Result<(), CameraError> {
    match fs::OpenOptions::new().read(true).write(true).open(device) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(CameraError::PermissionDenied {
            device: device.to_string(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(CameraError::DeviceOpen {
            device: device.to_string(),
            details: "device not found".to_string(),
        }),
        Err(e) => Err(CameraError::DeviceOpen {
            device: device.to_string(),
            details: e.to_string(),
        }),
    }
}
