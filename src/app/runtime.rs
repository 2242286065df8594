fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: &Cli) -> Result<(), AppError> {
    let config = Config::from_cli(cli)?;
    match cli.stage {
        Stage::Crawl => {
            run_crawl(&config).await?;
        }
        Stage::Parse => run_parse(&config)?,
        Stage::Run => {
            run_crawl(&config).await?;
            run_parse(&config)?;
        }
    }
    Ok(())
}

async fn run_crawl(config: &Config) -> Result<CrawlSummary, AppError> {
    let (endpoint, driver) = ensure_webdriver(config).await?;
    let fetcher = PageFetcher::new(config, endpoint)?;
    let summary = crawl_catalog(config, &fetcher).await;
    drop(driver);

    info!(
        catalog_pages = summary.catalog_pages,
        saved = summary.saved,
        failed = summary.failed,
        dir = %config.snapshot_dir.display(),
        "finished crawl"
    );
    Ok(summary)
}

fn run_parse(config: &Config) -> Result<(), AppError> {
    let mut builder = DatasetBuilder::new(config.numeric_fields.clone());
    let matched = builder.process_directory(&config.source_dir, &config.pattern)?;
    for page in &config.pages {
        builder.process_page(PageSource::detect(page));
    }
    info!(
        matched,
        parsed = builder.records().len(),
        failed = builder.failures().len(),
        "finished parsing"
    );

    if let Some(path) = &config.failures {
        builder.export_failures(path)?;
        info!(path = %path.display(), "failure report written");
    }

    builder.export(&config.output, config.format)?;
    info!(
        output = %config.output.display(),
        records = builder.records().len(),
        "dataset exported"
    );
    Ok(())
}
