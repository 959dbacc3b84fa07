// src/images.rs
use crate::models::EquipmentId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error accessing image {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Invalid image name '{0}'. Expected a bare file name.")]
    InvalidName(String),
    #[error("Image loader has shut down")]
    LoaderClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
    Heif,
}

/// Recognizes the handful of formats a phone camera or photo library hands us.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        [_, _, _, _, b'f', b't', b'y', b'p', brand @ ..]
            if brand.starts_with(b"hei") || brand.starts_with(b"mif1") || brand.starts_with(b"msf1") =>
        {
            Some(ImageFormat::Heif)
        }
        _ => None,
    }
}

/// Image blobs, one file per image, named `<uuid>.<ext>` in a private directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// # Errors
    /// `Error::Io` if the directory can't be created.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::Io(dir.clone(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a stored image. Only bare file names are accepted.
    /// # Errors
    /// `Error::InvalidName` for empty names or names with path components.
    pub fn path(&self, name: &str) -> Result<PathBuf, Error> {
        let bare = Path::new(name)
            .file_name()
            .is_some_and(|f| f == name)
            && !name.starts_with('.');
        if !bare {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    /// Writes the blob under a fresh name and returns that name.
    /// # Errors
    /// `Error::Io` on write failure.
    pub fn save(&self, bytes: &[u8], extension: &str) -> Result<String, Error> {
        let ext = extension.trim_start_matches('.').to_lowercase();
        let ext = if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            DEFAULT_EXTENSION.to_string()
        } else {
            ext
        };
        let name = format!("{}.{ext}", Uuid::new_v4());
        let path = self.dir.join(&name);
        fs::write(&path, bytes).map_err(|e| Error::Io(path.clone(), e))?;
        debug!(%name, bytes = bytes.len(), "saved image");
        Ok(name)
    }

    /// Copies an image file from anywhere on disk into the store.
    /// # Errors
    /// `Error::Io` if the source can't be read or the copy can't be written.
    pub fn import(&self, source: &Path) -> Result<String, Error> {
        let bytes = fs::read(source).map_err(|e| Error::Io(source.to_path_buf(), e))?;
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        self.save(&bytes, ext)
    }

    /// # Errors
    /// `Error::InvalidName` or `Error::Io`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, Error> {
        let path = self.path(name)?;
        fs::read(&path).map_err(|e| Error::Io(path, e))
    }

    /// Deletes a stored image. Removing an image that is already gone is fine.
    /// # Errors
    /// `Error::InvalidName`, or `Error::Io` for failures other than not-found.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let path = self.path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(path, e)),
        }
    }
}

/// Result of a background load. Anything unreadable becomes a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedImage {
    Ready { format: ImageFormat, bytes: Vec<u8> },
    Placeholder,
}

fn load_image(path: &Path) -> LoadedImage {
    match fs::read(path) {
        Ok(bytes) => match sniff_format(&bytes) {
            Some(format) => LoadedImage::Ready { format, bytes },
            None => {
                debug!(?path, "unrecognized image data, showing placeholder");
                LoadedImage::Placeholder
            }
        },
        Err(e) => {
            debug!(?path, error = %e, "image load failed, showing placeholder");
            LoadedImage::Placeholder
        }
    }
}

struct LoadRequest {
    id: EquipmentId,
    generation: u64,
    path: PathBuf,
}

struct LoadResult {
    id: EquipmentId,
    generation: u64,
    image: LoadedImage,
}

/// Loads equipment images on a worker thread.
///
/// Results are handed back only through `drain`/`wait_for` on the owning
/// thread. For each equipment only the latest request counts: older results
/// and results for equipment that no longer exists are dropped.
pub struct ImageLoader {
    store: ImageStore,
    requests: Option<Sender<LoadRequest>>,
    results: Receiver<LoadResult>,
    pending: HashMap<EquipmentId, u64>,
    next_generation: u64,
    worker: Option<JoinHandle<()>>,
}

impl ImageLoader {
    pub fn new(store: ImageStore) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::channel::<LoadResult>();
        let worker = thread::Builder::new()
            .name("image-loader".to_string())
            .spawn(move || {
                for req in request_rx {
                    let image = load_image(&req.path);
                    let result = LoadResult {
                        id: req.id,
                        generation: req.generation,
                        image,
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| warn!(error = %e, "failed to start image loader thread"))
            .ok();
        Self {
            store,
            requests: worker.as_ref().map(|_| request_tx),
            results: result_rx,
            pending: HashMap::new(),
            next_generation: 0,
            worker,
        }
    }

    /// Queues a load of `name` for `id`, superseding any earlier request for it.
    /// # Errors
    /// `Error::InvalidName` for a bad file name, `Error::LoaderClosed` if the
    /// worker is gone.
    pub fn request(&mut self, id: EquipmentId, name: &str) -> Result<(), Error> {
        let path = self.store.path(name)?;
        self.next_generation += 1;
        let generation = self.next_generation;
        let sender = self.requests.as_ref().ok_or(Error::LoaderClosed)?;
        sender
            .send(LoadRequest {
                id,
                generation,
                path,
            })
            .map_err(|_| Error::LoaderClosed)?;
        self.pending.insert(id, generation);
        Ok(())
    }

    pub fn is_pending(&self, id: EquipmentId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn accept(
        &mut self,
        result: LoadResult,
        is_live: &impl Fn(EquipmentId) -> bool,
    ) -> Option<(EquipmentId, LoadedImage)> {
        if self.pending.get(&result.id) != Some(&result.generation) {
            debug!(id = %result.id, "dropping superseded image load");
            return None;
        }
        self.pending.remove(&result.id);
        if !is_live(result.id) {
            debug!(id = %result.id, "dropping image load for removed equipment");
            return None;
        }
        Some((result.id, result.image))
    }

    /// Collects whatever has finished so far without blocking.
    pub fn drain(&mut self, is_live: impl Fn(EquipmentId) -> bool) -> Vec<(EquipmentId, LoadedImage)> {
        let mut ready = Vec::new();
        loop {
            match self.results.try_recv() {
                Ok(result) => ready.extend(self.accept(result, &is_live)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        ready
    }

    /// Blocks until every pending load has finished or `timeout` passes.
    pub fn wait_for(
        &mut self,
        timeout: Duration,
        is_live: impl Fn(EquipmentId) -> bool,
    ) -> Vec<(EquipmentId, LoadedImage)> {
        let deadline = Instant::now() + timeout;
        let mut ready = Vec::new();
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok(result) => ready.extend(self.accept(result, &is_live)),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        ready
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_format(PNG), Some(ImageFormat::Png));
        assert_eq!(sniff_format(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_format(b"\0\0\0\x18ftypheic"), Some(ImageFormat::Heif));
        assert_eq!(sniff_format(b"hello"), None);
        assert_eq!(sniff_format(&[]), None);
    }

    #[test]
    fn save_returns_bare_name_with_extension() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let name = store.save(PNG, ".PNG").unwrap();
        assert!(name.ends_with(".png"));
        assert!(!name.contains('/'));
        assert_eq!(store.read(&name).unwrap(), PNG);

        store.remove(&name).unwrap();
        store.remove(&name).unwrap();
        assert!(store.read(&name).is_err());
    }

    #[test]
    fn rejects_names_with_path_components() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        assert!(matches!(store.path("../secret.jpg"), Err(Error::InvalidName(_))));
        assert!(matches!(store.path("a/b.jpg"), Err(Error::InvalidName(_))));
        assert!(matches!(store.path(""), Err(Error::InvalidName(_))));
    }

    #[test]
    fn loads_images_in_background() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let good = store.save(JPEG, "jpg").unwrap();
        let junk = store.save(b"not an image", "jpg").unwrap();

        let mut loader = ImageLoader::new(store);
        let (a, b, c) = (EquipmentId::new(), EquipmentId::new(), EquipmentId::new());
        loader.request(a, &good).unwrap();
        loader.request(b, &junk).unwrap();
        loader.request(c, "missing.jpg").unwrap();

        let mut loaded = loader.wait_for(Duration::from_secs(5), |_| true);
        loaded.sort_by_key(|(id, _)| *id);
        assert_eq!(loaded.len(), 3);
        let get = |id| loaded.iter().find(|(i, _)| *i == id).map(|(_, img)| img.clone());
        assert_eq!(
            get(a),
            Some(LoadedImage::Ready {
                format: ImageFormat::Jpeg,
                bytes: JPEG.to_vec()
            })
        );
        assert_eq!(get(b), Some(LoadedImage::Placeholder));
        assert_eq!(get(c), Some(LoadedImage::Placeholder));
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn drops_results_for_removed_or_superseded_equipment() {
        let dir = tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let first = store.save(JPEG, "jpg").unwrap();
        let second = store.save(PNG, "png").unwrap();

        let mut loader = ImageLoader::new(store);
        let kept = EquipmentId::new();
        let removed = EquipmentId::new();
        loader.request(kept, &first).unwrap();
        loader.request(kept, &second).unwrap();
        loader.request(removed, &first).unwrap();
        assert!(loader.is_pending(removed));

        let loaded = loader.wait_for(Duration::from_secs(5), |id| id == kept);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, kept);
        assert!(matches!(
            loaded[0].1,
            LoadedImage::Ready {
                format: ImageFormat::Png,
                ..
            }
        ));
        assert!(!loader.is_pending(removed));
    }
}
