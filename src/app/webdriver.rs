/// A driver process spawned for this run; killed and reaped when dropped.
struct DriverProcess {
    child: Child,
    binary: String,
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            warn!(driver = %self.binary, "failed to stop webdriver: {err}");
        }
        let _ = self.child.wait();
    }
}

/// Returns a usable WebDriver endpoint, spawning `config.driver_path` when nothing is listening.
async fn ensure_webdriver(config: &Config) -> Result<(String, Option<DriverProcess>), AppError> {
    let endpoint = normalize_local_webdriver_endpoint(&config.webdriver_url);
    if webdriver_reachable(&endpoint) {
        info!(endpoint = %endpoint, "webdriver endpoint reachable");
        return Ok((endpoint, None));
    }

    let process = start_webdriver(&config.driver_path, config.browser, &endpoint)
        .await
        .map_err(AppError::Driver)?;
    info!(endpoint = %endpoint, driver = %process.binary, "webdriver started");
    Ok((endpoint, Some(process)))
}

fn webdriver_reachable(endpoint: &str) -> bool {
    let parsed = match Url::parse(endpoint) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

fn normalize_local_webdriver_endpoint(endpoint: &str) -> String {
    let Ok(url) = Url::parse(endpoint) else {
        return endpoint.to_string();
    };
    let Some(host) = url.host_str() else {
        return endpoint.to_string();
    };
    if host != "localhost" && host != "127.0.0.1" {
        return endpoint.trim_end_matches('/').to_string();
    }
    let scheme = url.scheme();
    let port = url.port_or_known_default().unwrap_or(4444);
    format!("{scheme}://127.0.0.1:{port}")
}

async fn start_webdriver(
    driver_path: &Path,
    browser: BrowserArg,
    endpoint: &str,
) -> Result<DriverProcess, String> {
    let parsed = Url::parse(endpoint).map_err(|e| format!("invalid webdriver url: {e}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| "webdriver url has no host".to_string())?
        .to_ascii_lowercase();
    if host != "localhost" && host != "127.0.0.1" {
        return Err(format!("{endpoint} is unreachable and not local, cannot autostart"));
    }
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let binary = driver_path.display().to_string();

    let mut cmd = Command::new(driver_path);
    configure_webdriver_command(&mut cmd, browser, port);
    cmd.stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null());

    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {binary}: {e}"))?;
    let mut process = DriverProcess { child, binary };

    let steps = (DRIVER_START_TIMEOUT.as_millis() / 200).max(1);
    for _ in 0..steps {
        if webdriver_reachable(endpoint) {
            return Ok(process);
        }
        if let Ok(Some(status)) = process.child.try_wait() {
            return Err(format!(
                "{} exited early with status {status}",
                process.binary
            ));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Err(format!("{} did not become ready in time", process.binary))
}

fn configure_webdriver_command(cmd: &mut Command, browser: BrowserArg, port: u16) {
    match browser {
        BrowserArg::Firefox => {
            cmd.arg("--port").arg(port.to_string());
        }
        BrowserArg::Chrome => {
            cmd.arg(format!("--port={port}"));
            cmd.arg("--log-level=SEVERE");
        }
    }
}

/// New-session payload: eager page loads, fixed page-load and implicit-wait timeouts.
fn webdriver_capabilities(browser: BrowserArg, headless: bool) -> Value {
    let timeouts = json!({
        "pageLoad": PAGE_LOAD_TIMEOUT.as_millis() as u64,
        "implicit": IMPLICIT_WAIT.as_millis() as u64
    });
    match browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "pageLoadStrategy": "eager",
                        "timeouts": timeouts,
                        "moz:firefoxOptions": { "args": args }
                    }
                }
            })
        }
        BrowserArg::Chrome => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1400,1200".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "pageLoadStrategy": "eager",
                        "timeouts": timeouts,
                        "goog:chromeOptions": { "args": args }
                    }
                }
            })
        }
    }
}

/// Maps a WebDriver response body to its `value`, or to the error it reports.
fn webdriver_value(
    context: &'static str,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<Value, FetchError> {
    let parsed = serde_json::from_str::<Value>(body).ok();
    if let Some(value) = parsed.as_ref() {
        if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown webdriver error");
            if err == "timeout" {
                return Err(FetchError::Timeout(message.to_string()));
            }
            return Err(FetchError::WebDriver {
                context,
                message: format!("{err}: {}", truncate_for_log(message, 240)),
            });
        }
    }
    if !status.is_success() {
        return Err(FetchError::WebDriver {
            context,
            message: format!("HTTP {}: {}", status.as_u16(), truncate_for_log(body, 240)),
        });
    }
    parsed
        .and_then(|mut v| v.get_mut("value").map(Value::take))
        .ok_or_else(|| FetchError::WebDriver {
            context,
            message: format!("malformed response: {}", truncate_for_log(body, 240)),
        })
}

async fn webdriver_create_session(
    client: &reqwest::Client,
    endpoint: &str,
    capabilities: &Value,
) -> Result<String, FetchError> {
    let res = client
        .post(format!("{endpoint}/session"))
        .json(capabilities)
        .send()
        .await?;
    let status = res.status();
    let body = res.text().await?;
    let value = webdriver_value("session create", status, &body)?;
    value
        .get("sessionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| FetchError::WebDriver {
            context: "session create",
            message: format!("session id missing in response: {}", truncate_for_log(&body, 220)),
        })
}

async fn webdriver_navigate(
    client: &reqwest::Client,
    endpoint: &str,
    session_id: &str,
    url: &str,
) -> Result<(), FetchError> {
    let res = client
        .post(format!("{endpoint}/session/{session_id}/url"))
        .json(&json!({ "url": url }))
        .send()
        .await?;
    let status = res.status();
    let body = res.text().await?;
    webdriver_value("navigate", status, &body).map(|_| ())
}

async fn webdriver_page_source(
    client: &reqwest::Client,
    endpoint: &str,
    session_id: &str,
) -> Result<String, FetchError> {
    let res = client
        .get(format!("{endpoint}/session/{session_id}/source"))
        .send()
        .await?;
    let status = res.status();
    let body = res.text().await?;
    let value = webdriver_value("page source", status, &body)?;
    Ok(value.as_str().unwrap_or_default().to_string())
}

async fn webdriver_delete_session(
    client: &reqwest::Client,
    endpoint: &str,
    session_id: &str,
) -> Result<(), FetchError> {
    let res = client
        .delete(format!("{endpoint}/session/{session_id}"))
        .send()
        .await?;
    let status = res.status();
    let body = res.text().await?;
    webdriver_value("delete session", status, &body).map(|_| ())
}
