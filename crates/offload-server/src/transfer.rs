//! Clip retrieval over the deck's file surface.
//!
//! The deck exposes one directory per slot (`ssd1/`, `ssd2/`) behind
//! anonymous FTP. Sessions are deliberately short-lived: every listing and
//! every retrieval opens a fresh session and closes it before returning,
//! so a failed transfer can never taint a later one.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use suppaftp::FtpStream;
use suppaftp::types::FileType;

use crate::error::OffloadError;
use crate::events::EventBus;

const ANONYMOUS: &str = "anonymous";

/// One clip visible on the deck's file surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClip {
    pub slot: u8,
    pub name: String,
}

/// Listing and retrieval surface of the deck's file service.
///
/// The monitor only needs these two operations; tests substitute an
/// in-memory implementation.
pub trait ClipSource: Send + Sync {
    /// List clip files across the given slots, newest name first.
    fn list_clips(&self, slots: &[u8]) -> Result<Vec<RemoteClip>, OffloadError>;

    /// Retrieve one clip into `dest_dir`, overwriting on name collision.
    /// Returns the destination path.
    fn fetch_clip(&self, clip: &RemoteClip, dest_dir: &Path) -> Result<PathBuf, OffloadError>;
}

/// The real deck file surface.
pub struct FtpClipSource {
    host: String,
    port: u16,
}

impl FtpClipSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn open_session(&self) -> Result<FtpStream, OffloadError> {
        let mut ftp = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| OffloadError::Transfer(format!("ftp connect {}: {e}", self.host)))?;
        ftp.login(ANONYMOUS, ANONYMOUS)
            .map_err(|e| OffloadError::Transfer(format!("ftp login: {e}")))?;
        Ok(ftp)
    }
}

impl ClipSource for FtpClipSource {
    fn list_clips(&self, slots: &[u8]) -> Result<Vec<RemoteClip>, OffloadError> {
        let mut ftp = self.open_session()?;
        let mut clips = Vec::new();
        for &slot in slots {
            let dir = slot_directory(slot);
            if let Err(e) = ftp.cwd(&dir) {
                tracing::warn!(slot, "slot directory {dir} not accessible: {e}");
                continue;
            }
            let names = ftp
                .nlst(None)
                .map_err(|e| OffloadError::Transfer(format!("list {dir}: {e}")))?;
            for name in names {
                // Some servers return full paths from NLST.
                let name = name.rsplit('/').next().unwrap_or(&name).to_string();
                if is_clip_file(&name) {
                    clips.push(RemoteClip { slot, name });
                }
            }
            ftp.cdup()
                .map_err(|e| OffloadError::Transfer(format!("leave {dir}: {e}")))?;
        }
        let _ = ftp.quit();
        sort_newest_first(&mut clips);
        Ok(clips)
    }

    fn fetch_clip(&self, clip: &RemoteClip, dest_dir: &Path) -> Result<PathBuf, OffloadError> {
        let mut ftp = self.open_session()?;
        let dir = slot_directory(clip.slot);
        ftp.cwd(&dir)
            .map_err(|e| OffloadError::Transfer(format!("enter {dir}: {e}")))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| OffloadError::Transfer(format!("binary mode: {e}")))?;

        let dest = dest_dir.join(&clip.name);
        let mut reader = ftp
            .retr_as_stream(&clip.name)
            .map_err(|e| OffloadError::Transfer(format!("retrieve {}: {e}", clip.name)))?;
        let mut file = File::create(&dest)
            .map_err(|e| OffloadError::Transfer(format!("create {}: {e}", dest.display())))?;
        io::copy(&mut reader, &mut file)
            .map_err(|e| OffloadError::Transfer(format!("copy {}: {e}", clip.name)))?;
        ftp.finalize_retr_stream(reader)
            .map_err(|e| OffloadError::Transfer(format!("finish {}: {e}", clip.name)))?;
        let _ = ftp.quit();

        tracing::info!(name = %clip.name, dest = %dest.display(), "clip offloaded");
        Ok(dest)
    }
}

/// Retrieve one clip and publish transfer events around it.
pub fn offload_clip(
    source: &dyn ClipSource,
    clip: &RemoteClip,
    dest_dir: &Path,
    events: &EventBus,
) -> Result<PathBuf, OffloadError> {
    events.transfer_started(&clip.name);
    let path = source.fetch_clip(clip, dest_dir)?;
    events.transfer_complete(&clip.name, &path);
    Ok(path)
}

/// Slot directory on the file surface (`ssd1`, `ssd2`).
pub fn slot_directory(slot: u8) -> String {
    format!("ssd{slot}")
}

/// Clip filter: the recorder's video extension, hidden files excluded.
pub fn is_clip_file(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .to_ascii_lowercase()
            .ends_with(deck_proto::CLIP_EXTENSION)
}

/// Reverse lexical order. Device clip names are monotonically increasing
/// zero-padded sequence numbers, so this puts the newest clip first;
/// remote modification times are not trustworthy for ordering.
pub fn sort_newest_first(clips: &mut [RemoteClip]) {
    clips.sort_by(|a, b| b.name.cmp(&a.name));
}

/// Rename an offloaded file in place. When `new_name` carries no
/// extension, the original file's extension is appended.
pub fn rename_clip(old_path: &Path, new_name: &str) -> Result<PathBuf, OffloadError> {
    if !old_path.exists() {
        return Err(OffloadError::NotFound(old_path.to_path_buf()));
    }
    let mut target_name = new_name.to_string();
    if Path::new(new_name).extension().is_none() {
        if let Some(ext) = old_path.extension().and_then(|e| e.to_str()) {
            target_name = format!("{new_name}.{ext}");
        }
    }
    let target = old_path.with_file_name(&target_name);
    std::fs::rename(old_path, &target)
        .map_err(|e| OffloadError::Transfer(format!("rename {}: {e}", old_path.display())))?;
    tracing::info!(from = %old_path.display(), to = %target.display(), "clip renamed");
    Ok(target)
}
