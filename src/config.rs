//! Configuration types for the upload and conversion pipeline.
//!
//! Everything a component needs to know about its deployment lives in
//! [`DocshiftConfig`], built via [`DocshiftConfigBuilder`]. The value is passed
//! explicitly into the validator, dispatcher and sweeper; there are no globals,
//! so two pipelines with different roots can run side by side in one process
//! (the integration tests rely on this).

use crate::error::DocError;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling for a single upload: 40 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 40 * 1024 * 1024;

/// Default fill opacity for watermark text.
pub const DEFAULT_WATERMARK_OPACITY: f32 = 0.2;

/// Default age after which the sweeper removes upload-root files.
pub const DEFAULT_SWEEP_AGE: Duration = Duration::from_secs(60 * 60);

/// Configuration shared by every component of a pipeline.
///
/// Built via [`DocshiftConfig::builder()`] or using [`DocshiftConfig::default()`].
///
/// # Example
/// ```rust
/// use docshift::DocshiftConfig;
///
/// let config = DocshiftConfig::builder()
///     .upload_root("/srv/docshift/uploads")
///     .max_upload_mb(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocshiftConfig {
    /// Directory that holds every upload, intermediate and output.
    /// Default: `<system temp>/docshift_uploads`.
    pub upload_root: PathBuf,

    /// Largest accepted upload in bytes. Default: 40 MiB.
    pub max_upload_bytes: u64,

    /// Per-operation extension allow-lists.
    pub extensions: ExtensionPolicy,

    /// Watermark opacity used when a request does not carry one. Default: 0.2.
    pub default_opacity: f32,

    /// Explicit path to the office suite binary (`soffice`). When `None`,
    /// `soffice` and `libreoffice` are searched for on `PATH`.
    pub office_binary: Option<PathBuf>,

    /// Keep consumed inputs after dispatch instead of deleting them. Default: false.
    pub retain_inputs: bool,

    /// Minimum age before the sweeper deletes a file. Default: 1 hour.
    #[serde(with = "duration_secs")]
    pub sweep_age: Duration,
}

impl Default for DocshiftConfig {
    fn default() -> Self {
        Self {
            upload_root: std::env::temp_dir().join("docshift_uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            extensions: ExtensionPolicy::default(),
            default_opacity: DEFAULT_WATERMARK_OPACITY,
            office_binary: None,
            retain_inputs: false,
            sweep_age: DEFAULT_SWEEP_AGE,
        }
    }
}

impl DocshiftConfig {
    /// Create a new builder for `DocshiftConfig`.
    pub fn builder() -> DocshiftConfigBuilder {
        DocshiftConfigBuilder {
            config: Self::default(),
        }
    }

    /// Create the upload root if it does not exist yet.
    pub fn ensure_upload_root(&self) -> Result<(), DocError> {
        std::fs::create_dir_all(&self.upload_root)
            .map_err(|e| DocError::io(&self.upload_root, e))
    }
}

/// Builder for [`DocshiftConfig`].
#[derive(Debug)]
pub struct DocshiftConfigBuilder {
    config: DocshiftConfig,
}

impl DocshiftConfigBuilder {
    pub fn upload_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.upload_root = root.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Convenience for [`max_upload_bytes`](Self::max_upload_bytes) in MiB.
    pub fn max_upload_mb(mut self, mb: u64) -> Self {
        self.config.max_upload_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    pub fn extensions(mut self, policy: ExtensionPolicy) -> Self {
        self.config.extensions = policy;
        self
    }

    /// Replace the allow-list of one operation.
    pub fn allow_extensions<I, S>(mut self, op: Operation, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.extensions.set(op, exts);
        self
    }

    pub fn default_opacity(mut self, opacity: f32) -> Self {
        self.config.default_opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn office_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_binary = Some(path.into());
        self
    }

    pub fn retain_inputs(mut self, v: bool) -> Self {
        self.config.retain_inputs = v;
        self
    }

    pub fn sweep_age(mut self, age: Duration) -> Self {
        self.config.sweep_age = age;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DocshiftConfig, DocError> {
        let c = &self.config;
        if c.upload_root.as_os_str().is_empty() {
            return Err(DocError::InvalidConfig("Upload root must not be empty".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(DocError::InvalidConfig(
                "Maximum upload size must be ≥ 1 byte".into(),
            ));
        }
        if !c.default_opacity.is_finite() {
            return Err(DocError::InvalidConfig(format!(
                "Default opacity must be 0.0–1.0, got {}",
                c.default_opacity
            )));
        }
        if let Some(op) = Operation::ALL
            .into_iter()
            .find(|op| c.extensions.allowed(*op).is_empty())
        {
            return Err(DocError::InvalidConfig(format!(
                "Extension allow-list for {op} is empty"
            )));
        }
        Ok(self.config)
    }
}

// ── Extension policy ─────────────────────────────────────────────────────

/// Which file extensions each operation accepts.
///
/// Starts from [`Operation::default_extensions`]; overrides replace the whole
/// set for one operation. Extensions are stored lower-case without the dot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPolicy {
    overrides: BTreeMap<Operation, BTreeSet<String>>,
}

impl ExtensionPolicy {
    /// Replace the allow-list of `op`.
    pub fn set<I, S>(&mut self, op: Operation, exts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.overrides.insert(op, set);
    }

    /// The allow-list currently in force for `op`.
    pub fn allowed(&self, op: Operation) -> BTreeSet<String> {
        match self.overrides.get(&op) {
            Some(set) => set.clone(),
            None => op
                .default_extensions()
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
