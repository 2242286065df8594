/// Renders pages through a WebDriver endpoint, one fresh browser session per attempt.
struct PageFetcher {
    client: reqwest::Client,
    endpoint: String,
    capabilities: Value,
    settle_delay: Duration,
    retry_delay: Duration,
    max_retries: usize,
}

impl PageFetcher {
    fn new(config: &Config, endpoint: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(PAGE_LOAD_TIMEOUT + IMPLICIT_WAIT + Duration::from_secs(20))
            .build()
            .map_err(|e| AppError::Driver(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            capabilities: webdriver_capabilities(config.browser, config.headless),
            settle_delay: config.sleep_interval,
            retry_delay: RETRY_DELAY,
            max_retries: config.max_retries,
        })
    }

    /// Rendered markup of `url`, or `None` once every attempt has failed.
    async fn fetch(&self, url: &str) -> Option<String> {
        fetch_with_retries(url, self.max_retries, self.retry_delay, |_| {
            self.render_once(url)
        })
        .await
    }

    async fn render_once(&self, url: &str) -> Result<String, FetchError> {
        let session_id =
            webdriver_create_session(&self.client, &self.endpoint, &self.capabilities).await?;
        let result = self.render_in_session(&session_id, url).await;
        if let Err(err) = webdriver_delete_session(&self.client, &self.endpoint, &session_id).await
        {
            warn!(url, session = %session_id, "error at browser quit: {err}");
        }
        result
    }

    async fn render_in_session(&self, session_id: &str, url: &str) -> Result<String, FetchError> {
        webdriver_navigate(&self.client, &self.endpoint, session_id, url).await?;
        tokio::time::sleep(self.settle_delay).await;
        let html = webdriver_page_source(&self.client, &self.endpoint, session_id).await?;
        if html.is_empty() {
            return Err(FetchError::EmptyPage);
        }
        Ok(html)
    }
}

/// Runs `attempt` until it yields markup, at most `max_retries` times (at least once).
///
/// Every failure kind is retried; the last one is logged and turned into `None`.
async fn fetch_with_retries<F, Fut>(
    url: &str,
    max_retries: usize,
    retry_delay: Duration,
    mut attempt: F,
) -> Option<String>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let attempts = max_retries.max(1);
    for n in 1..=attempts {
        match attempt(n).await {
            Ok(html) => return Some(html),
            Err(err) => {
                if err.is_timeout() {
                    error!(url, attempt = n, "timeout on loading: {err}");
                } else {
                    error!(url, attempt = n, "render failed: {err}");
                }
                if n == attempts {
                    error!(url, "did not succeed after {attempts} attempts");
                    return None;
                }
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
    None
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CrawlSummary {
    catalog_pages: usize,
    saved: usize,
    failed: usize,
}

/// Walks the paginated catalog and saves every product page under `config.snapshot_dir`.
///
/// A catalog page that renders but lists no products ends the walk.
async fn crawl_catalog(config: &Config, fetcher: &PageFetcher) -> CrawlSummary {
    let mut summary = CrawlSummary::default();

    for page_num in 1..=config.max_pages {
        let catalog_url = config.catalog_page_url(page_num);
        let Some(listing) = fetcher.fetch(&catalog_url).await else {
            error!(url = %catalog_url, page = page_num, "catalog page unavailable, skipping");
            continue;
        };
        summary.catalog_pages += 1;

        let product_links = extract_product_links(&listing, &config.base_url);
        if product_links.is_empty() {
            info!(page = page_num, "catalog page lists no products, stopping");
            break;
        }

        for (idx, product_url) in product_links.iter().enumerate() {
            let path = snapshot_path(&config.snapshot_dir, page_num, idx + 1);
            match fetch_and_save(fetcher, product_url, &path).await {
                Ok(()) => {
                    info!(path = %path.display(), "saved");
                    summary.saved += 1;
                }
                Err(err) => {
                    warn!(url = %product_url, "error downloading: {err}");
                    summary.failed += 1;
                }
            }
        }

        info!(page = page_num, products = product_links.len(), "processed catalog page");
    }

    summary
}

async fn fetch_and_save(fetcher: &PageFetcher, url: &str, path: &Path) -> Result<(), String> {
    let html = fetcher
        .fetch(url)
        .await
        .ok_or_else(|| "no content after retries".to_string())?;
    save_snapshot(path, &html).map_err(|e| format!("write {} failed: {e}", path.display()))
}

fn snapshot_path(dir: &Path, page_num: usize, product_idx: usize) -> PathBuf {
    dir.join(format!("page{page_num}_product{product_idx}.html"))
}

fn save_snapshot(path: &Path, html: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, html)
}
