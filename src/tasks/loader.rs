use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

/// A decoded image, oriented according to its EXIF metadata.
#[derive(Clone)]
pub struct LoadedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<RgbaImage>,
}

impl LoadedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            width,
            height,
            pixels: Arc::new(pixels),
        }
    }
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Why an image could not be shown. Display code absorbs all of these into
/// the placeholder; they exist for logging and for loader tests.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image source is empty")]
    Empty,

    #[error("unsupported source scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("decode task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

/// Host capability: resolve an image source and report success or failure.
pub trait ImageLoader: Send + Sync + 'static {
    fn load(&self, url: &str) -> impl Future<Output = Result<LoadedImage, LoadError>> + Send;
}

/// Loads `file://` URLs and plain paths from disk. Relative sources resolve
/// against `root`.
#[derive(Debug, Clone)]
pub struct FsImageLoader {
    root: PathBuf,
}

impl FsImageLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, url: &str) -> Result<PathBuf, LoadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LoadError::Empty);
        }
        let raw = match url.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => return Err(LoadError::UnsupportedScheme(scheme.to_string())),
            None => url,
        };
        let path = Path::new(raw);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

impl ImageLoader for FsImageLoader {
    fn load(&self, url: &str) -> impl Future<Output = Result<LoadedImage, LoadError>> + Send {
        let resolved = self.resolve(url);
        async move {
            let path = resolved?;
            tokio::task::spawn_blocking(move || decode_rgba8_apply_exif(&path)).await?
        }
    }
}

// Decodes to RGBA8 and applies EXIF orientation when present. Missing or
// unreadable metadata leaves the original orientation untouched.
fn decode_rgba8_apply_exif(path: &Path) -> Result<LoadedImage, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let decode_err = |source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let img = image::ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(decode_err)?;
    let mut img = img.to_rgba8();

    match read_orientation(path).unwrap_or(1) {
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }

    Ok(LoadedImage::new(img))
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(orientation, path = %path.display(), "exif orientation");
    Some(orientation)
}

/// In-flight loads owned by one display. Requests for a source that is
/// already loading or queued are coalesced; at most `max_in_flight` loads run
/// at once. Dropping the set aborts every outstanding load.
pub struct LoadSet<L> {
    loader: Arc<L>,
    tasks: JoinSet<Result<LoadedImage, LoadError>>,
    in_flight: HashMap<Id, String>,
    queued: VecDeque<String>,
    max_in_flight: usize,
}

impl<L: ImageLoader> LoadSet<L> {
    pub fn new(loader: Arc<L>, max_in_flight: usize) -> Self {
        Self {
            loader,
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            queued: VecDeque::new(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn request(&mut self, url: String) {
        if self.in_flight.values().any(|u| *u == url) || self.queued.contains(&url) {
            return;
        }
        if self.in_flight.len() < self.max_in_flight {
            self.spawn(url);
        } else {
            self.queued.push_back(url);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.queued.is_empty()
    }

    /// Drop queued (not yet started) requests that `keep` rejects.
    pub fn retain_queued(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.queued.retain(|url| keep(url));
    }

    /// Wait for the next finished load. Resolves to `None` once nothing is in
    /// flight, which disables the branch inside a `select!`. A load task that
    /// panicked still reports its source, as [`LoadError::Join`].
    pub async fn join_next(&mut self) -> Option<(String, Result<LoadedImage, LoadError>)> {
        loop {
            let (id, result) = match self.tasks.join_next_with_id().await? {
                Ok((id, result)) => (id, result),
                Err(err) => {
                    warn!(error = %err, "image load task aborted");
                    (err.id(), Err(LoadError::Join(err)))
                }
            };
            let Some(url) = self.in_flight.remove(&id) else {
                continue;
            };
            self.start_queued();
            return Some((url, result));
        }
    }

    fn start_queued(&mut self) {
        while self.in_flight.len() < self.max_in_flight {
            match self.queued.pop_front() {
                Some(url) => self.spawn(url),
                None => break,
            }
        }
    }

    fn spawn(&mut self, url: String) {
        let loader = Arc::clone(&self.loader);
        let source = url.clone();
        let handle = self
            .tasks
            .spawn(async move { loader.load(&source).await });
        self.in_flight.insert(handle.id(), url);
    }
}

/// Deterministic loader for tests: every source loads as a 1x1 image except
/// the ones listed as failing.
#[cfg(any(test, feature = "testing-support"))]
pub mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct ScriptedLoader {
        failing: HashSet<String>,
        latency: Option<Duration>,
        panic_once: parking_lot::Mutex<HashSet<String>>,
        calls: AtomicUsize,
        log: parking_lot::Mutex<Vec<String>>,
    }

    impl ScriptedLoader {
        pub fn failing<I, S>(urls: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                failing: urls.into_iter().map(Into::into).collect(),
                ..Self::default()
            }
        }

        /// The first load of each listed source panics; later loads succeed.
        pub fn panicking_once<I, S>(urls: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                panic_once: parking_lot::Mutex::new(urls.into_iter().map(Into::into).collect()),
                ..Self::default()
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn requested(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl ImageLoader for ScriptedLoader {
        fn load(&self, url: &str) -> impl Future<Output = Result<LoadedImage, LoadError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(url.to_string());
            let fails = url.trim().is_empty() || self.failing.contains(url);
            let panics = self.panic_once.lock().remove(url);
            let latency = self.latency;
            let url = url.to_string();
            async move {
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                if panics {
                    panic!("scripted panic for {url}");
                }
                if fails {
                    Err(LoadError::Other(format!("scripted failure for {url}")))
                } else {
                    Ok(LoadedImage::new(RgbaImage::new(1, 1)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedLoader;
    use super::*;
    use base64::Engine;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    #[tokio::test]
    async fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orient6.jpg"), &bytes).unwrap();

        let loader = FsImageLoader::new(dir.path());
        let img = loader.load("orient6.jpg").await.unwrap();
        assert_eq!((img.width, img.height), (1, 2));
    }

    #[test]
    fn resolves_file_urls_and_relative_paths() {
        let loader = FsImageLoader::new("/srv/images");
        assert_eq!(
            loader.resolve("cars/a.jpg").unwrap(),
            PathBuf::from("/srv/images/cars/a.jpg")
        );
        assert_eq!(
            loader.resolve("file:///tmp/b.png").unwrap(),
            PathBuf::from("/tmp/b.png")
        );
        assert_eq!(
            loader.resolve("file://c.png").unwrap(),
            PathBuf::from("/srv/images/c.png")
        );
        assert!(matches!(loader.resolve("  "), Err(LoadError::Empty)));
        assert!(matches!(
            loader.resolve("https://cdn.example.com/x.jpg"),
            Err(LoadError::UnsupportedScheme(s)) if s == "https"
        ));
    }

    #[tokio::test]
    async fn missing_and_garbage_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("garbage.jpg"), b"not an image").unwrap();
        let loader = FsImageLoader::new(dir.path());

        assert!(matches!(
            loader.load("missing.jpg").await,
            Err(LoadError::Io { .. })
        ));
        assert!(matches!(
            loader.load("garbage.jpg").await,
            Err(LoadError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn load_set_coalesces_and_limits() {
        let loader = Arc::new(ScriptedLoader::failing(["bad.jpg"]));
        let mut set = LoadSet::new(Arc::clone(&loader), 1);
        set.request("a.jpg".into());
        set.request("a.jpg".into());
        set.request("bad.jpg".into());
        set.request("bad.jpg".into());
        assert_eq!(set.in_flight(), 1);

        let (first, res) = set.join_next().await.unwrap();
        assert_eq!(first, "a.jpg");
        assert!(res.is_ok());
        let (second, res) = set.join_next().await.unwrap();
        assert_eq!(second, "bad.jpg");
        assert!(res.is_err());

        assert!(set.is_idle());
        assert!(set.join_next().await.is_none());
        assert_eq!(loader.requested(), vec!["a.jpg", "bad.jpg"]);
    }

    #[tokio::test]
    async fn panicked_load_frees_its_slot() {
        let loader = Arc::new(ScriptedLoader::panicking_once(["a.jpg"]));
        let mut set = LoadSet::new(Arc::clone(&loader), 1);
        set.request("a.jpg".into());
        set.request("b.jpg".into());

        let (url, res) = set.join_next().await.unwrap();
        assert_eq!(url, "a.jpg");
        assert!(matches!(res, Err(LoadError::Join(_))));

        // The queued request starts once the panicked slot is released.
        let (url, res) = set.join_next().await.unwrap();
        assert_eq!(url, "b.jpg");
        assert!(res.is_ok());
        assert!(set.is_idle());

        set.request("a.jpg".into());
        let (url, res) = set.join_next().await.unwrap();
        assert_eq!(url, "a.jpg");
        assert!(res.is_ok());
        assert_eq!(loader.calls(), 3);
    }

    #[tokio::test]
    async fn retain_queued_drops_unwanted_requests() {
        let loader = Arc::new(ScriptedLoader::default());
        let mut set = LoadSet::new(Arc::clone(&loader), 1);
        for url in ["a.jpg", "old-1.jpg", "old-2.jpg", "new.jpg"] {
            set.request(url.into());
        }
        set.retain_queued(|url| !url.starts_with("old"));

        let mut done = Vec::new();
        while let Some((url, _)) = set.join_next().await {
            done.push(url);
        }
        assert_eq!(done, vec!["a.jpg", "new.jpg"]);
        assert_eq!(loader.requested(), vec!["a.jpg", "new.jpg"]);
    }
}
