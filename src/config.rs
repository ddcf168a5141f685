//! Configuration: runtime settings plus a layered config file.
//!
//! Precedence, lowest to highest: built-in defaults, config file
//! (`scansift.json` or `scansift.toml` next to the data directory),
//! environment variables, command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "scansift.db";

/// Default blob subdirectory name.
const BLOBS_SUBDIR: &str = "blobs";

/// OCR engine and preprocessing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// tesseract | ocrs (alias: easyocr) | paddle | textract | ensemble
    pub engine: String,
    /// ISO language codes.
    pub languages: Vec<String>,
    pub preprocess: bool,
    pub deskew: bool,
    /// Scale factors to try; boxes are mapped back to 1x coordinates.
    pub scales: Vec<f32>,
    /// Words below this confidence are dropped by the ensemble merge.
    pub drop_confidence: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: "tesseract".to_string(),
            languages: vec!["en".to_string()],
            preprocess: true,
            deskew: true,
            scales: vec![1.0],
            drop_confidence: 0.3,
        }
    }
}

/// Crawler politeness and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub rate_limit_per_host_ms: u64,
    pub max_concurrent_downloads: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_host_ms: 250,
            max_concurrent_downloads: 4,
        }
    }
}

/// Pending-pages worker loop options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub batch_size: u32,
    pub poll_seconds: u64,
    pub claim_ttl_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            poll_seconds: 10,
            claim_ttl_seconds: 900,
        }
    }
}

/// Periodic site ingest loop options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteIngestConfig {
    pub skip_existing: bool,
    pub run_interval_seconds: u64,
}

impl Default for SiteIngestConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            run_interval_seconds: 600,
        }
    }
}

/// Search engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub fuzzy_threshold: f32,
    pub default_limit: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            default_limit: 50,
        }
    }
}

/// Config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path (database + blobs).
    pub data_dir: Option<String>,
    /// Rasterization DPI for PDF pages.
    pub pdf_dpi: Option<u32>,
    /// Generic source base URL for `ingest`.
    pub source_endpoint: Option<String>,
    /// Site-specific crawl root.
    pub site_root: Option<String>,
    pub ocr: OcrConfig,
    pub crawler: CrawlerConfig,
    pub worker: WorkerConfig,
    pub site_ingest: SiteIngestConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from a specific file path (JSON or TOML by
    /// extension).
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => {
                toml::from_str(&contents).map_err(|e| format!("Failed to parse TOML config: {e}"))
            }
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {e}")),
        }
    }

    /// Look for `scansift.{json,toml}` or `config.{json,toml}` inside
    /// `dir` and load the first that exists.
    pub fn discover(dir: &Path) -> Option<Self> {
        for basename in ["scansift", "config"] {
            for ext in ["json", "toml"] {
                let path = dir.join(format!("{basename}.{ext}"));
                if path.exists() {
                    match Self::load_from_path(&path) {
                        Ok(config) => return Some(config),
                        Err(e) => {
                            tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                        }
                    }
                }
            }
        }
        None
    }

    /// Apply environment variable overrides (highest file-level layer).
    pub fn apply_env(&mut self) {
        if let Some(v) = env_string("SCANSIFT_DATA_DIR") {
            self.data_dir = Some(v);
        }
        if let Some(v) = env_string("SCANSIFT_SOURCE_ENDPOINT") {
            self.source_endpoint = Some(v);
        }
        if let Some(v) = env_string("SCANSIFT_SITE_ROOT") {
            self.site_root = Some(v);
        }
        if let Some(v) = env_string("SCANSIFT_OCR_ENGINE") {
            self.ocr.engine = v;
        }
        if let Some(v) = env_string("SCANSIFT_OCR_LANGUAGES") {
            self.ocr.languages = v.split(',').map(|s| s.trim().to_string()).collect();
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Root of the filesystem blob store.
    pub blobs_dir: PathBuf,
    pub pdf_dpi: u32,
    pub source_endpoint: Option<String>,
    pub site_root: String,
    pub ocr: OcrConfig,
    pub crawler: CrawlerConfig,
    pub worker: WorkerConfig,
    pub site_ingest: SiteIngestConfig,
    pub search: SearchConfig,
    /// Per-request HTTP deadline.
    pub http_timeout_seconds: u64,
    /// Per-page OCR deadline.
    pub ocr_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scansift");
        Self {
            blobs_dir: data_dir.join(BLOBS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            pdf_dpi: 200,
            source_endpoint: None,
            site_root: "https://www.justice.gov/epstein".to_string(),
            ocr: OcrConfig::default(),
            crawler: CrawlerConfig::default(),
            worker: WorkerConfig::default(),
            site_ingest: SiteIngestConfig::default(),
            search: SearchConfig::default(),
            http_timeout_seconds: 30,
            ocr_timeout_seconds: 300,
        }
    }
}

impl Settings {
    /// Full path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.blobs_dir)?;
        Ok(())
    }

    fn apply_config(&mut self, config: &Config, base_dir: &Path) {
        if let Some(ref dir) = config.data_dir {
            let path = Path::new(dir);
            self.data_dir = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base_dir.join(path)
            };
            self.blobs_dir = self.data_dir.join(BLOBS_SUBDIR);
        }
        if let Some(dpi) = config.pdf_dpi {
            self.pdf_dpi = dpi;
        }
        if let Some(ref endpoint) = config.source_endpoint {
            self.source_endpoint = Some(endpoint.clone());
        }
        if let Some(ref root) = config.site_root {
            self.site_root = root.clone();
        }
        self.ocr = config.ocr.clone();
        self.crawler = config.crawler.clone();
        self.worker = config.worker.clone();
        self.site_ingest = config.site_ingest.clone();
        self.search = config.search.clone();
    }
}

/// Load settings: defaults, then discovered config file, then env, then
/// the `--data` override.
pub fn load_settings(data_override: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let search_dir = data_override
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| settings.data_dir.clone());

    let mut config = Config::discover(&search_dir)
        .or_else(|| Config::discover(Path::new(".")))
        .unwrap_or_default();
    config.apply_env();

    settings.apply_config(&config, &search_dir);

    if let Some(dir) = data_override {
        settings.data_dir = dir.to_path_buf();
        settings.blobs_dir = settings.data_dir.join(BLOBS_SUBDIR);
    }

    settings
}
