//! Utility functions for disk space queries and display formatting

use crate::error::{Error, Result};
use crate::output::UNKNOWN_ETA;
use std::path::Path;

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Format a transfer rate with one decimal place, e.g. `"125.5 KB/s"`
///
/// Thresholds are binary, matching how the accelerator reports rates.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec < KIB {
        format!("{:.1} B/s", bytes_per_sec)
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else if bytes_per_sec < GIB {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    } else {
        format!("{:.1} GB/s", bytes_per_sec / GIB)
    }
}

/// Format a remaining time as `MM:SS`, or `HH:MM:SS` from one hour up
///
/// Non-finite and non-positive inputs produce `"--:--"`.
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return UNKNOWN_ETA.to_string();
    }

    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Estimate the remaining time from bytes left and the current rate
pub fn estimate_eta(total_bytes: u64, downloaded_bytes: u64, bytes_per_sec: f64) -> String {
    if bytes_per_sec <= 0.0 || total_bytes <= downloaded_bytes {
        return UNKNOWN_ETA.to_string();
    }
    let remaining = (total_bytes - downloaded_bytes) as f64;
    format_eta(remaining / bytes_per_sec)
}

/// Verify that `path` has at least `required` bytes free
///
/// Returns the available byte count on success, [`Error::InsufficientSpace`]
/// when there is not enough room, and [`Error::DiskSpaceCheckFailed`] when the
/// filesystem cannot be queried.
pub fn check_free_space(path: &Path, required: u64) -> Result<u64> {
    let available = get_available_space(path).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!("{}: {}", path.display(), e))
    })?;

    if available < required {
        return Err(Error::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(available)
}

/// Get available disk space for a given path
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
///
/// # Examples
///
/// ```ignore
/// let available = get_available_space(Path::new("/downloads"))?;
/// println!("Available space: {} GB", available / (1024 * 1024 * 1024));
/// ```
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized,
        // and stat is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail counts blocks available to unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out-pointer refers to a
        // live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
