//! Attachment selection and upload tracking.
//!
//! Files picked by the user live in an [`AttachmentManager`] until a send
//! consumes them. Image files get a local preview, a resource acquired from
//! a [`PreviewStore`] and released when the owning [`Preview`] is dropped,
//! i.e. when the entry is removed or the selection is cleared.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_shared::constants::MAX_FILE_SIZE;
use courier_shared::AttachmentRef;

use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::ports::{ProgressFn, RemoteApi};

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

/// Identity of a locally selected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(Uuid);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file handle pending upload. Never sent to the remote store as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    id: FileId,
    name: String,
    mime_type: String,
    data: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: FileId(Uuid::new_v4()),
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, deriving its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::File(format!("Failed to read {}: {e}", path.display())))?;
        if metadata.len() > MAX_FILE_SIZE as u64 {
            return Err(SyncError::File(format!(
                "File too large: {} bytes (max {})",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::File(format!("Failed to read {}: {e}", path.display())))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Ok(Self::new(name, mime_from_extension(extension), data))
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

pub fn mime_from_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Previews
// ---------------------------------------------------------------------------

/// Backend that materializes image previews (object URLs, temp files, ...).
pub trait PreviewStore: Send + Sync {
    /// Create a preview for `file` and return its reference.
    fn acquire(&self, file: &LocalFile) -> String;

    fn release(&self, reference: &str);
}

/// An acquired preview; releases itself on drop.
pub struct Preview {
    reference: String,
    store: Arc<dyn PreviewStore>,
}

impl Preview {
    pub fn acquire(store: Arc<dyn PreviewStore>, file: &LocalFile) -> Self {
        let reference = store.acquire(file);
        Self { reference, store }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl Drop for Preview {
    fn drop(&mut self) {
        self.store.release(&self.reference);
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("reference", &self.reference)
            .finish()
    }
}

/// Previews held in memory under `preview://<uuid>` references.
#[derive(Debug, Default)]
pub struct MemoryPreviews {
    live: Mutex<HashMap<String, Bytes>>,
}

impl MemoryPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of previews acquired and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl PreviewStore for MemoryPreviews {
    fn acquire(&self, file: &LocalFile) -> String {
        let reference = format!("preview://{}", Uuid::new_v4());
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.clone(), file.data().clone());
        reference
    }

    fn release(&self, reference: &str) {
        let released = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reference);
        if released.is_none() {
            warn!(reference, "Released unknown preview");
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SelectedFile {
    file: LocalFile,
    preview: Option<Preview>,
    uploading: bool,
    /// Upload progress in percent (0-100).
    progress: u8,
    error: Option<String>,
}

impl SelectedFile {
    pub fn file(&self) -> &LocalFile {
        &self.file
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_ref().map(Preview::reference)
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn view(&self) -> SelectedFileView {
        SelectedFileView {
            id: self.file.id(),
            name: self.file.name().to_string(),
            mime_type: self.file.mime_type().to_string(),
            size: self.file.size(),
            preview: self.preview().map(str::to_string),
            uploading: self.uploading,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// Owned snapshot of a selected file for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFileView {
    pub id: FileId,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub preview: Option<String>,
    pub uploading: bool,
    pub progress: u8,
    pub error: Option<String>,
}

pub struct AttachmentManager {
    files: Vec<SelectedFile>,
    previews: Arc<dyn PreviewStore>,
}

impl AttachmentManager {
    pub fn new(previews: Arc<dyn PreviewStore>) -> Self {
        Self {
            files: Vec::new(),
            previews,
        }
    }

    pub fn add_file(&mut self, file: LocalFile) -> FileId {
        let preview = file
            .is_image()
            .then(|| Preview::acquire(self.previews.clone(), &file));
        let id = file.id();
        debug!(file_id = %id, name = %file.name(), size = file.size(), "File selected");
        self.files.push(SelectedFile {
            file,
            preview,
            uploading: false,
            progress: 0,
            error: None,
        });
        id
    }

    /// Remove the entry at `index`, releasing its preview.
    pub fn remove_file(&mut self, index: usize) -> Option<LocalFile> {
        if index >= self.files.len() {
            return None;
        }
        let SelectedFile { file, preview, .. } = self.files.remove(index);
        drop(preview);
        Some(file)
    }

    pub fn files(&self) -> &[SelectedFile] {
        &self.files
    }

    pub fn views(&self) -> Vec<SelectedFileView> {
        self.files.iter().map(SelectedFile::view).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Mark every entry as uploading and hand out the files.
    pub fn begin_upload(&mut self) -> Vec<LocalFile> {
        self.files
            .iter_mut()
            .map(|entry| {
                entry.uploading = true;
                entry.progress = 0;
                entry.error = None;
                entry.file.clone()
            })
            .collect()
    }

    pub fn set_progress(&mut self, id: &FileId, sent: u64, total: u64) -> bool {
        let percent = if total == 0 {
            100
        } else {
            (sent.saturating_mul(100) / total).min(100) as u8
        };
        self.with_entry(id, |entry| entry.progress = percent)
    }

    pub fn mark_uploaded(&mut self, id: &FileId) -> bool {
        self.with_entry(id, |entry| {
            entry.uploading = false;
            entry.progress = 100;
        })
    }

    pub fn mark_failed(&mut self, id: &FileId, error: String) -> bool {
        self.with_entry(id, |entry| {
            entry.uploading = false;
            entry.error = Some(error);
        })
    }

    /// Drop every entry, releasing all previews.
    pub fn clear(&mut self) {
        self.files.clear();
    }

    fn with_entry(&mut self, id: &FileId, f: impl FnOnce(&mut SelectedFile)) -> bool {
        match self.files.iter_mut().find(|entry| entry.file.id() == *id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for AttachmentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentManager")
            .field("files", &self.files)
            .finish()
    }
}

/// Shared handle over the manager that notifies the UI on every change.
#[derive(Clone)]
pub struct Selection {
    manager: Arc<Mutex<AttachmentManager>>,
    events: EventBus,
}

impl Selection {
    pub fn new(previews: Arc<dyn PreviewStore>, events: EventBus) -> Self {
        Self {
            manager: Arc::new(Mutex::new(AttachmentManager::new(previews))),
            events,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&AttachmentManager) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut AttachmentManager) -> R) -> R {
        let result = f(&mut self.lock());
        self.events.emit(SyncEvent::SelectionChanged);
        result
    }

    fn lock(&self) -> MutexGuard<'_, AttachmentManager> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

/// Upload one file, mirroring progress and failure onto its selection entry
/// (when the file came from the selection).
pub async fn upload_file(
    api: &dyn RemoteApi,
    selection: &Selection,
    file: &LocalFile,
) -> Result<AttachmentRef> {
    let id = file.id();
    let progress: ProgressFn = {
        let selection = selection.clone();
        Arc::new(move |sent: u64, total: u64| {
            selection.update(|m| m.set_progress(&id, sent, total));
        })
    };

    match api.upload_attachment(file, progress).await {
        Ok(reference) => {
            selection.update(|m| m.mark_uploaded(&id));
            debug!(file_id = %id, path = %reference.path, "Attachment uploaded");
            Ok(reference)
        }
        Err(e) => {
            warn!(file_id = %id, name = %file.name(), error = %e, "Attachment upload failed");
            selection.update(|m| m.mark_failed(&id, e.to_string()));
            Err(SyncError::Upload {
                file_name: file.name().to_string(),
                source: e,
            })
        }
    }
}

/// Upload all files concurrently. Fails as a whole if any upload fails;
/// every upload still runs to completion so each entry records its outcome.
pub async fn upload_all(
    api: &dyn RemoteApi,
    selection: &Selection,
    files: &[LocalFile],
) -> Result<Vec<AttachmentRef>> {
    join_all(files.iter().map(|file| upload_file(api, selection, file)))
        .await
        .into_iter()
        .collect()
}
