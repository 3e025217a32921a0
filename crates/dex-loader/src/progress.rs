//! Progress indicators for downloads and remote listings

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for a download of `size` bytes (0 when unknown)
pub fn create_download_progress(size: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(size);
    let style = ProgressStyle::default_bar()
        .template("{msg}\n[{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {percent:>3}% ({eta})")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Feed one progress callback into `pb`.
///
/// A total of 0 with bytes already transferred means the size is unknown and
/// keeps the current length; `transferred == total` finishes the bar.
pub fn update_download_progress(pb: &ProgressBar, transferred: u64, total: u64) {
    let unknown = total == 0 && transferred > 0;
    if !unknown && pb.length() != Some(total) {
        pb.set_length(total);
    }
    pb.set_position(transferred);
    if transferred == total {
        pb.finish();
    }
}

/// Size column of a remote listing: kilobytes with one decimal, or `<DIR>`
pub fn format_listing_size(size: Option<u64>, is_directory: bool) -> String {
    match size {
        Some(bytes) if !is_directory => format!("{:>10.1} kB", bytes as f64 / 1024.0),
        _ => format!("{:<12}", "<DIR>"),
    }
}
