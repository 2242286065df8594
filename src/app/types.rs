#[derive(Debug, Parser, Clone)]
#[command(
    name = "katalog-snap",
    version,
    about = "Render catalog product pages through WebDriver and flatten the snapshots into CSV/JSON"
)]
struct Cli {
    #[command(subcommand)]
    stage: Stage,

    #[arg(long, global = true, value_name = "URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Catalog listing URL; `{}` is replaced by the page number.
    #[arg(long, global = true, value_name = "TEMPLATE", default_value = DEFAULT_CATALOG_URL)]
    catalog_url: String,

    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_SNAPSHOT_DIR)]
    snapshot_dir: PathBuf,

    /// Directory parsed by `parse`/`run`; defaults to the snapshot directory.
    #[arg(long, global = true, value_name = "DIR")]
    source_dir: Option<PathBuf>,

    #[arg(short, long, global = true, value_name = "FILE", default_value = DEFAULT_OUTPUT_FILE)]
    output: PathBuf,

    #[arg(long, global = true, value_enum)]
    format: Option<FileFormatArg>,

    #[arg(long, global = true, value_name = "FILE")]
    failures: Option<PathBuf>,

    #[arg(long, global = true, value_name = "GLOB", default_value = "*.html")]
    pattern: String,

    /// Extra snapshot to parse: a file path, or the HTML itself (repeatable).
    #[arg(long = "page", global = true, value_name = "FILE|HTML")]
    pages: Vec<String>,

    #[arg(long, global = true, value_name = "N", default_value_t = 10_000)]
    max_pages: usize,

    /// Pause after navigation so deferred scripts can finish rendering.
    #[arg(long, global = true, value_name = "MS", default_value_t = 1_000)]
    sleep_ms: u64,

    #[arg(long, global = true, value_name = "N", default_value_t = 3)]
    max_retries: usize,

    #[arg(long, global = true, value_name = "PATH", default_value = "geckodriver")]
    driver_path: PathBuf,

    #[arg(long, global = true, value_name = "URL", default_value = "http://127.0.0.1:4444")]
    webdriver_url: String,

    #[arg(long, global = true, value_enum, default_value_t = BrowserArg::Firefox)]
    browser: BrowserArg,

    #[arg(long, global = true, default_value_t = false)]
    headed: bool,

    /// Characteristic label parsed as a number (repeatable).
    #[arg(long = "numeric-field", global = true, value_name = "LABEL")]
    numeric_fields: Vec<String>,

    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Copy, Clone, Subcommand, PartialEq, Eq)]
enum Stage {
    /// Walk the catalog and save rendered product pages.
    Crawl,
    /// Parse saved snapshots and export the dataset.
    Parse,
    /// Crawl, then parse what was saved.
    Run,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
enum BrowserArg {
    Chrome,
    Firefox,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
enum FileFormatArg {
    Csv,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DataFormat {
    Csv,
    Json,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Csv => DataFormat::Csv,
            FileFormatArg::Json => DataFormat::Json,
        }
    }
}

const DEFAULT_BASE_URL: &str = "https://e-katalog.pl";
const DEFAULT_CATALOG_URL: &str =
    "https://e-katalog.pl/ek-list.php?katalog_=264&page_={}&preset_mode_=0";
const DEFAULT_SNAPSHOT_DIR: &str = "ekatalog_pl_bikes";
const DEFAULT_OUTPUT_FILE: &str = "bikes_ekatalog.csv";
const DEFAULT_NUMERIC_FIELDS: [&str; 3] = ["Диагональ", "Частота", "Яркость"];

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_WAIT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(2);
const DRIVER_START_TIMEOUT: Duration = Duration::from_secs(12);

/// Process-wide settings, built once from the command line and passed down by reference.
#[derive(Debug, Clone)]
struct Config {
    base_url: Url,
    catalog_url: String,
    snapshot_dir: PathBuf,
    source_dir: PathBuf,
    output: PathBuf,
    format: DataFormat,
    failures: Option<PathBuf>,
    pattern: String,
    pages: Vec<String>,
    max_pages: usize,
    sleep_interval: Duration,
    max_retries: usize,
    driver_path: PathBuf,
    webdriver_url: String,
    browser: BrowserArg,
    headless: bool,
    numeric_fields: Vec<String>,
}

impl Config {
    fn from_cli(cli: &Cli) -> Result<Self, AppError> {
        let base_url = Url::parse(&cli.base_url)
            .map_err(|e| AppError::Config(format!("invalid --base-url {}: {e}", cli.base_url)))?;
        if !cli.catalog_url.contains("{}") {
            return Err(AppError::Config(format!(
                "--catalog-url must contain a `{{}}` page placeholder: {}",
                cli.catalog_url
            )));
        }
        let output_path = cli.output.to_string_lossy();
        let format = cli
            .format
            .map(DataFormat::from)
            .unwrap_or_else(|| detect_data_format(&output_path, DataFormat::Csv));
        let numeric_fields = if cli.numeric_fields.is_empty() {
            DEFAULT_NUMERIC_FIELDS.iter().map(|s| s.to_string()).collect()
        } else {
            cli.numeric_fields.clone()
        };

        Ok(Self {
            base_url,
            catalog_url: cli.catalog_url.clone(),
            snapshot_dir: cli.snapshot_dir.clone(),
            source_dir: cli
                .source_dir
                .clone()
                .unwrap_or_else(|| cli.snapshot_dir.clone()),
            output: cli.output.clone(),
            format,
            failures: cli.failures.clone(),
            pattern: cli.pattern.clone(),
            pages: cli.pages.clone(),
            max_pages: cli.max_pages,
            sleep_interval: Duration::from_millis(cli.sleep_ms),
            max_retries: cli.max_retries,
            driver_path: cli.driver_path.clone(),
            webdriver_url: cli.webdriver_url.clone(),
            browser: cli.browser,
            headless: !cli.headed,
            numeric_fields,
        })
    }

    fn catalog_page_url(&self, page: usize) -> String {
        self.catalog_url.replacen("{}", &page.to_string(), 1)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{v}"),
            Number::Float(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for Number {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Number::Int(v) => serializer.serialize_i64(*v),
            Number::Float(v) => serializer.serialize_f64(*v),
        }
    }
}

/// A cleaned characteristic value: free text, or a number for allow-listed labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum CleanValue {
    Number(Number),
    Text(String),
}

impl fmt::Display for CleanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanValue::Number(n) => n.fmt(f),
            CleanValue::Text(s) => f.write_str(s),
        }
    }
}

/// Label → value pairs in first-seen order. Re-inserting a label replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
struct Characteristics(Vec<(String, Option<CleanValue>)>);

impl Characteristics {
    fn insert(&mut self, key: String, value: Option<CleanValue>) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    fn get(&self, key: &str) -> Option<&Option<CleanValue>> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

impl Serialize for Characteristics {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ExtractionMetadata {
    total_characteristics: usize,
    has_price_info: bool,
    total_links: usize,
    total_headers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProductRecord {
    name: String,
    characteristics: Characteristics,
    min_price: Option<Number>,
    max_price: Option<Number>,
    related_links: Vec<String>,
    headers: Vec<String>,
    extraction_metadata: ExtractionMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct FailureRecord {
    source: String,
    error: String,
}

#[derive(Debug, Error)]
enum ParseError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("page load timed out: {0}")]
    Timeout(String),

    #[error("received empty html")]
    EmptyPage,

    #[error("{context}: {message}")]
    WebDriver {
        context: &'static str,
        message: String,
    },

    #[error("webdriver request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
enum ExportError {
    #[error("no data to export, process some pages first")]
    EmptyDataset,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("webdriver unavailable: {0}")]
    Driver(String),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod types_tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["katalog-snap"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("cli parses")
    }

    #[test]
    fn config_defaults_follow_deployment() {
        let config = Config::from_cli(&cli(&["parse"])).unwrap();
        assert_eq!(config.base_url.as_str(), "https://e-katalog.pl/");
        assert_eq!(config.source_dir, PathBuf::from(DEFAULT_SNAPSHOT_DIR));
        assert_eq!(config.format, DataFormat::Csv);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.sleep_interval, Duration::from_secs(1));
        assert!(config.headless);
        assert_eq!(config.numeric_fields.len(), 3);
    }

    #[test]
    fn output_extension_picks_json_unless_format_is_forced() {
        let config = Config::from_cli(&cli(&["parse", "-o", "bikes.json"])).unwrap();
        assert_eq!(config.format, DataFormat::Json);

        let config =
            Config::from_cli(&cli(&["parse", "-o", "bikes.json", "--format", "csv"])).unwrap();
        assert_eq!(config.format, DataFormat::Csv);
    }

    #[test]
    fn numeric_fields_override_defaults() {
        let config = Config::from_cli(&cli(&[
            "parse",
            "--numeric-field",
            "Diagonal",
            "--numeric-field",
            "Weight",
        ]))
        .unwrap();
        assert_eq!(config.numeric_fields, vec!["Diagonal", "Weight"]);
    }

    #[test]
    fn catalog_template_requires_placeholder() {
        let err = Config::from_cli(&cli(&["crawl", "--catalog-url", "https://x.test/list"]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn catalog_page_url_substitutes_page_number() {
        let config = Config::from_cli(&cli(&["crawl"])).unwrap();
        assert_eq!(
            config.catalog_page_url(7),
            "https://e-katalog.pl/ek-list.php?katalog_=264&page_=7&preset_mode_=0"
        );
    }

    #[test]
    fn characteristics_overwrite_keeps_first_position() {
        let mut chars = Characteristics::default();
        chars.insert("a".into(), Some(CleanValue::Text("1".into())));
        chars.insert("b".into(), None);
        chars.insert("a".into(), Some(CleanValue::Number(Number::Int(2))));
        assert_eq!(chars.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(chars.get("a"), Some(&Some(CleanValue::Number(Number::Int(2)))));
        assert_eq!(chars.len(), 2);
    }

    #[test]
    fn record_serializes_characteristics_as_map() {
        let mut chars = Characteristics::default();
        chars.insert("Rama".into(), Some(CleanValue::Text("aluminium".into())));
        chars.insert("Диагональ".into(), Some(CleanValue::Number(Number::Float(15.6))));
        let value = serde_json::to_value(&chars).unwrap();
        assert_eq!(value, json!({"Rama": "aluminium", "Диагональ": 15.6}));
    }
}
