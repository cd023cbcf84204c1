use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::display::RotationTiming;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Directory that relative and `file://` image sources resolve against.
    pub image_root: PathBuf,
    /// Image sources rotated by the demo display, in display order.
    pub sources: Vec<String>,
    /// Time a frame stays selected before the next rotation tick.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Crossfade duration between the outgoing and incoming frame.
    #[serde(with = "humantime_serde")]
    pub fade: Duration,
    /// Maximum number of image loads a rotator keeps in flight.
    pub max_concurrent_loads: usize,
    /// Optional YAML file with documents to seed the in-memory store.
    pub seed_documents: Option<PathBuf>,
    /// Collection holding listing documents with image lists.
    pub listing_collection: String,
    /// Field of a listing document holding its image sources.
    pub listing_images_field: String,
    /// Credentials for the in-memory admin auth service.
    pub auth: AuthOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.interval > Duration::ZERO,
            "interval must be greater than zero"
        );
        ensure!(self.fade > Duration::ZERO, "fade must be greater than zero");
        ensure!(
            self.max_concurrent_loads > 0,
            "max-concurrent-loads must be greater than zero"
        );
        ensure!(
            !self.listing_images_field.is_empty(),
            "listing-images-field must not be empty"
        );
        self.auth.validate().context("invalid auth configuration")?;
        Ok(self)
    }

    pub fn timing(&self) -> RotationTiming {
        RotationTiming {
            interval: self.interval,
            fade: self.fade,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("."),
            sources: Vec::new(),
            interval: RotationTiming::DEFAULT_INTERVAL,
            fade: RotationTiming::DEFAULT_FADE,
            max_concurrent_loads: 2,
            seed_documents: None,
            listing_collection: "listings".to_string(),
            listing_images_field: "images".to_string(),
            auth: AuthOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthOptions {
    /// Email to password table accepted by the admin sign-in.
    pub users: BTreeMap<String, String>,
    /// Lifetime of a session token before a fresh one is minted.
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

impl AuthOptions {
    const fn default_token_ttl() -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.token_ttl > Duration::ZERO,
            "auth.token-ttl must be positive"
        );
        for email in self.users.keys() {
            ensure!(
                email.contains('@'),
                "auth.users key {email:?} is not an email address"
            );
        }
        Ok(())
    }
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            token_ttl: Self::default_token_ttl(),
        }
    }
}
