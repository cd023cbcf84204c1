//! Single image with a built-in placeholder for missing or broken sources.
//!
//! The state never surfaces an error: an empty source and a failed load both
//! collapse into [`ImageRef::Placeholder`], rendered with [`Fit::Contain`] so
//! the placeholder glyph is not cropped.

use crate::tasks::loader::{ImageLoader, LoadError, LoadedImage};
use tracing::debug;

/// What the presentation layer should draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Cover,
    Contain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub source: ImageRef,
    pub fit: Fit,
}

impl RenderedImage {
    pub fn placeholder() -> Self {
        Self {
            source: ImageRef::Placeholder,
            fit: Fit::Contain,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.source == ImageRef::Placeholder
    }
}

/// Passthrough presentation attributes. They never influence the fallback logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayAttrs {
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadStatus {
    /// A load for the current source has not been requested yet.
    Pending,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FallbackImage {
    url: Option<String>,
    status: LoadStatus,
    attrs: DisplayAttrs,
}

fn normalize(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.trim().is_empty())
}

impl FallbackImage {
    pub fn new(url: Option<String>) -> Self {
        let url = normalize(url);
        let status = if url.is_some() {
            LoadStatus::Pending
        } else {
            LoadStatus::Failed
        };
        Self {
            url,
            status,
            attrs: DisplayAttrs::default(),
        }
    }

    pub fn with_attrs(mut self, attrs: DisplayAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn attrs(&self) -> &DisplayAttrs {
        &self.attrs
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn has_load_error(&self) -> bool {
        self.status == LoadStatus::Failed
    }

    /// Replace the source. Returns `true` when it actually changed, in which
    /// case the error flag is reset and a new load becomes pending. The same
    /// source keeps whatever outcome is already latched.
    pub fn set_url(&mut self, url: Option<String>) -> bool {
        let url = normalize(url);
        if url == self.url {
            return false;
        }
        *self = Self::new(url).with_attrs(std::mem::take(&mut self.attrs));
        true
    }

    /// Claim the pending load, if any. The caller is expected to report the
    /// outcome through [`FallbackImage::on_load_result`].
    pub fn begin_load(&mut self) -> Option<String> {
        if self.status != LoadStatus::Pending {
            return None;
        }
        self.status = LoadStatus::Loading;
        self.url.clone()
    }

    /// Apply a load outcome. Results for a source other than the current one
    /// are stale and ignored. Returns `true` when the rendered output changed.
    pub fn on_load_result(&mut self, url: &str, result: &Result<LoadedImage, LoadError>) -> bool {
        if self.url.as_deref() != Some(url) {
            return false;
        }
        if !matches!(self.status, LoadStatus::Pending | LoadStatus::Loading) {
            return false;
        }
        match result {
            Ok(img) => {
                debug!(url, width = img.width, height = img.height, "image loaded");
                self.status = LoadStatus::Loaded;
                false
            }
            Err(err) => {
                debug!(url, error = %err, "image failed to load; showing placeholder");
                self.status = LoadStatus::Failed;
                true
            }
        }
    }

    /// Run the pending load, if there is one, against `loader`.
    pub async fn refresh<L: ImageLoader>(&mut self, loader: &L) {
        if let Some(url) = self.begin_load() {
            let result = loader.load(&url).await;
            self.on_load_result(&url, &result);
        }
    }

    pub fn render(&self) -> RenderedImage {
        match (&self.url, self.status) {
            (Some(url), LoadStatus::Pending | LoadStatus::Loading | LoadStatus::Loaded) => {
                RenderedImage {
                    source: ImageRef::Url(url.clone()),
                    fit: Fit::Cover,
                }
            }
            _ => RenderedImage::placeholder(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::loader::testing::ScriptedLoader;

    #[tokio::test]
    async fn loaded_url_renders_with_cover() {
        let loader = ScriptedLoader::failing(["broken.jpg"]);
        let mut img = FallbackImage::new(Some("house.jpg".into()));
        img.refresh(&loader).await;
        assert!(!img.has_load_error());
        assert_eq!(
            img.render(),
            RenderedImage {
                source: ImageRef::Url("house.jpg".into()),
                fit: Fit::Cover
            }
        );
    }

    #[tokio::test]
    async fn failed_url_renders_placeholder_with_contain() {
        let loader = ScriptedLoader::failing(["broken.jpg"]);
        let mut img = FallbackImage::new(Some("broken.jpg".into()));
        img.refresh(&loader).await;
        assert!(img.has_load_error());
        assert_eq!(img.render(), RenderedImage::placeholder());
    }

    #[tokio::test]
    async fn empty_url_never_loads() {
        let loader = ScriptedLoader::default();
        for url in [None, Some(String::new()), Some("   ".to_string())] {
            let mut img = FallbackImage::new(url);
            img.refresh(&loader).await;
            assert!(img.has_load_error());
            assert_eq!(img.render().fit, Fit::Contain);
        }
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn same_failing_url_is_latched() {
        let loader = ScriptedLoader::failing(["broken.jpg"]);
        let mut img = FallbackImage::new(Some("broken.jpg".into()));
        img.refresh(&loader).await;
        let first = img.render();

        assert!(!img.set_url(Some("broken.jpg".into())));
        img.refresh(&loader).await;
        assert_eq!(img.render(), first);
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn changing_url_resets_error() {
        let loader = ScriptedLoader::failing(["broken.jpg"]);
        let mut img = FallbackImage::new(Some("broken.jpg".into())).with_attrs(DisplayAttrs {
            alt: "front porch".into(),
            ..DisplayAttrs::default()
        });
        img.refresh(&loader).await;
        assert!(img.has_load_error());

        assert!(img.set_url(Some("porch.jpg".into())));
        assert!(!img.has_load_error());
        assert_eq!(img.attrs().alt, "front porch");
        img.refresh(&loader).await;
        assert!(!img.has_load_error());
        assert_eq!(loader.calls(), 2);
    }

    #[test]
    fn stale_result_is_ignored() {
        let mut img = FallbackImage::new(Some("a.jpg".into()));
        let claimed = img.begin_load().unwrap();
        img.set_url(Some("b.jpg".into()));
        let changed = img.on_load_result(&claimed, &Err(LoadError::Empty));
        assert!(!changed);
        assert!(!img.has_load_error());
        assert_eq!(img.begin_load().as_deref(), Some("b.jpg"));
    }
}
