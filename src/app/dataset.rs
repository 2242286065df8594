const BASE_COLUMNS: [&str; 6] = [
    "name",
    "min_price",
    "max_price",
    "headers",
    "related_links",
    "total_characteristics",
];

const CHARACTERISTIC_PREFIX: &str = "char_";
const LIST_SEPARATOR: &str = "; ";

/// Where a page comes from: a saved snapshot on disk or markup already in memory.
#[derive(Debug, Clone)]
enum PageSource {
    File(PathBuf),
    Markup(String),
}

impl PageSource {
    /// Treats `input` as a path when such a file exists, otherwise as HTML.
    fn detect(input: &str) -> Self {
        let path = Path::new(input);
        if path.is_file() {
            PageSource::File(path.to_path_buf())
        } else {
            PageSource::Markup(input.to_string())
        }
    }

    fn label(&self) -> String {
        match self {
            PageSource::File(path) => path.display().to_string(),
            PageSource::Markup(html) => truncate_for_log(html.trim(), 120),
        }
    }

    fn load(&self) -> Result<Cow<'_, str>, ParseError> {
        match self {
            PageSource::File(path) => fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| ParseError::Read {
                    path: path.display().to_string(),
                    source,
                }),
            PageSource::Markup(html) => Ok(Cow::Borrowed(html)),
        }
    }
}

/// Accumulates extracted products and per-page failures, then exports them once.
#[derive(Debug, Default)]
struct DatasetBuilder {
    numeric_fields: Vec<String>,
    records: Vec<ProductRecord>,
    failures: Vec<FailureRecord>,
}

impl DatasetBuilder {
    fn new(numeric_fields: Vec<String>) -> Self {
        Self {
            numeric_fields,
            ..Self::default()
        }
    }

    fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    fn process_page(&mut self, source: PageSource) -> bool {
        let result = source
            .load()
            .and_then(|html| extract_product(&html, &self.numeric_fields));
        match result {
            Ok(record) => {
                debug!(source = %source.label(), name = %record.name, "page parsed");
                self.records.push(record);
                true
            }
            Err(err) => {
                warn!(source = %source.label(), "page failed: {err}");
                self.failures.push(FailureRecord {
                    source: source.label(),
                    error: err.to_string(),
                });
                false
            }
        }
    }

    /// Parses every regular file (or link to one) directly under `dir` whose name matches `pattern`.
    ///
    /// Files are visited in name order. Returns how many files matched.
    fn process_directory(&mut self, dir: &Path, pattern: &str) -> io::Result<usize> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name();
            if matches_pattern(pattern, &name.to_string_lossy()) {
                files.push(entry.path());
            }
        }
        files.sort();

        info!(dir = %dir.display(), files = files.len(), "parsing snapshots");
        for path in &files {
            self.process_page(PageSource::File(path.clone()));
        }
        Ok(files.len())
    }

    fn export(&self, path: &Path, format: DataFormat) -> Result<(), ExportError> {
        match format {
            DataFormat::Csv => self.export_to_csv(path),
            DataFormat::Json => self.export_to_json(path),
        }
    }

    fn export_to_csv(&self, path: &Path) -> Result<(), ExportError> {
        if self.records.is_empty() {
            return Err(ExportError::EmptyDataset);
        }

        let keys = characteristic_columns(&self.records);
        let mut writer = csv::Writer::from_path(path)?;
        let header = BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(keys.iter().map(|k| format!("{CHARACTERISTIC_PREFIX}{k}")));
        writer.write_record(header)?;
        for record in &self.records {
            writer.write_record(flatten_record(record, &keys))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn export_to_json(&self, path: &Path) -> Result<(), ExportError> {
        if self.records.is_empty() {
            return Err(ExportError::EmptyDataset);
        }
        let file = File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.records)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn export_failures(&self, path: &Path) -> Result<(), ExportError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["source", "error"])?;
        for failure in &self.failures {
            writer.write_record([&failure.source, &failure.error])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Union of characteristic labels across records, in first-seen order.
fn characteristic_columns(records: &[ProductRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for key in records.iter().flat_map(|r| r.characteristics.keys()) {
        if seen.insert(key) {
            keys.push(key.to_string());
        }
    }
    keys
}

fn flatten_record(record: &ProductRecord, keys: &[String]) -> Vec<String> {
    let mut row = vec![
        record.name.clone(),
        cell(record.min_price.as_ref()),
        cell(record.max_price.as_ref()),
        record.headers.join(LIST_SEPARATOR),
        record.related_links.join(LIST_SEPARATOR),
        record.extraction_metadata.total_characteristics.to_string(),
    ];
    row.extend(
        keys.iter()
            .map(|key| cell(record.characteristics.get(key).and_then(Option::as_ref))),
    );
    row
}

fn cell<T: fmt::Display>(value: Option<&T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Shell-style wildcard match on a file name: `*` spans any run, `?` one character.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern = pattern.chars().collect::<Vec<_>>();
    let name = name.chars().collect::<Vec<_>>();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    p = star_p + 1;
                    n = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

fn detect_data_format(path: &str, fallback: DataFormat) -> DataFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        DataFormat::Json
    } else if lower.ends_with(".csv") {
        DataFormat::Csv
    } else {
        fallback
    }
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}
