use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::page::{AdapterError, ElementHandle, PageAdapter};

/// W3C key under which a WebDriver element reference is serialised.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4a5dc3f3a1f6";
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_millis(250);

const SCROLL_BY_SCRIPT: &str = "const el = arguments[0]; \
     el.scrollTop = el.scrollTop + arguments[1]; \
     return Math.round(el.scrollTop);";
const SCROLL_TO_SCRIPT: &str = "const el = arguments[0]; \
     el.scrollTop = arguments[1]; \
     return Math.round(el.scrollTop);";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Start a new browser through the driver.
    Launch { headless: bool },
    /// Drive a browser already started with `--remote-debugging-port`.
    Attach { debug_port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub mode: SessionMode,
    pub timeout_ms: u64,
}

impl WebDriverConfig {
    pub fn from_settings(settings: &BrowserSettings) -> Self {
        let mode = if settings.connect_existing {
            SessionMode::Attach {
                debug_port: settings.debug_port,
            }
        } else {
            SessionMode::Launch {
                headless: settings.headless,
            }
        };
        Self {
            endpoint: settings.webdriver_url.trim_end_matches('/').to_string(),
            mode,
            timeout_ms: settings.timeout_ms,
        }
    }

    fn capabilities(&self) -> Value {
        let chrome_options = match self.mode {
            SessionMode::Launch { headless: true } => {
                json!({ "args": ["--headless=new", "--disable-gpu"] })
            }
            SessionMode::Launch { headless: false } => json!({ "args": [] }),
            SessionMode::Attach { debug_port } => {
                json!({ "debuggerAddress": format!("127.0.0.1:{debug_port}") })
            }
        };
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": chrome_options,
                }
            }
        })
    }
}

/// `PageAdapter` backed by a WebDriver server (chromedriver or compatible).
pub struct WebDriverPage {
    client: Client,
    config: WebDriverConfig,
    session_id: String,
}

impl WebDriverPage {
    pub fn connect(config: WebDriverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.saturating_add(5_000)))
            .build()
            .context("failed to build WebDriver HTTP client")?;

        let response = client
            .post(format!("{}/session", config.endpoint))
            .json(&config.capabilities())
            .send()
            .with_context(|| format!("failed to reach WebDriver at {}", config.endpoint))?;
        let payload: Value = response
            .json()
            .context("failed to decode WebDriver new-session response")?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(anyhow!("WebDriver refused to create a session: {error}: {message}"));
        }
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("WebDriver new-session response has no sessionId"))?
            .to_string();

        let page = Self {
            client,
            config,
            session_id,
        };
        info!(
            session_id = %page.session_id,
            mode = ?page.config.mode,
            "WebDriver session created"
        );

        let timeout_ms = page.config.timeout_ms;
        page.command(
            Method::POST,
            "timeouts",
            Some(json!({ "implicit": 0, "pageLoad": timeout_ms, "script": timeout_ms })),
        )
        .map_err(|error| anyhow!("failed to configure WebDriver timeouts: {error}"))?;
        Ok(page)
    }

    fn owns_browser(&self) -> bool {
        matches!(self.config.mode, SessionMode::Launch { .. })
    }

    fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> std::result::Result<Value, AdapterError> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.config.endpoint, self.session_id)
        } else {
            format!(
                "{}/session/{}/{path}",
                self.config.endpoint, self.session_id
            )
        };
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().map_err(classify_transport_error)?;
        let status = response.status();
        let payload: Value = match response.json() {
            Ok(payload) => payload,
            Err(error) if status.is_server_error() => {
                return Err(AdapterError::Transient(format!(
                    "WebDriver returned HTTP {status}: {error}"
                )));
            }
            Err(error) => {
                return Err(AdapterError::Fatal(format!(
                    "failed to decode WebDriver response: {error}"
                )));
            }
        };
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if let Some(code) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(classify_webdriver_error(code, message));
        }
        Ok(value)
    }

    fn find_element(&self, selector: &str) -> std::result::Result<ElementHandle, AdapterError> {
        let value = self.command(
            Method::POST,
            "element",
            Some(json!({ "using": "css selector", "value": selector })),
        )?;
        element_from_value(&value)
    }

    fn run_scroll_script(
        &self,
        script: &str,
        container: &ElementHandle,
        amount: i64,
    ) -> std::result::Result<i64, AdapterError> {
        let value = self.command(
            Method::POST,
            "execute/sync",
            Some(json!({
                "script": script,
                "args": [element_reference(container), amount],
            })),
        )?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|position| position.round() as i64))
            .ok_or_else(|| AdapterError::Fatal(format!("scroll script returned {value}")))
    }
}

impl PageAdapter for WebDriverPage {
    fn open(&mut self, url: &str) -> std::result::Result<(), AdapterError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn current_url(&mut self) -> std::result::Result<String, AdapterError> {
        let value = self.command(Method::GET, "url", None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Fatal(format!("unexpected url payload: {value}")))
    }

    fn find_container(
        &mut self,
        selector: &str,
    ) -> std::result::Result<Option<ElementHandle>, AdapterError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        loop {
            match self.find_element(selector) {
                Ok(element) => return Ok(Some(element)),
                Err(AdapterError::NotFound(_)) if Instant::now() < deadline => {
                    thread::sleep(CONTAINER_POLL_INTERVAL);
                }
                Err(AdapterError::NotFound(message)) => {
                    debug!(selector, reason = %message, "container did not appear before timeout");
                    return Ok(None);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn query_all(
        &mut self,
        scope: &ElementHandle,
        selector: &str,
    ) -> std::result::Result<Vec<ElementHandle>, AdapterError> {
        let value = self.command(
            Method::POST,
            &format!("element/{}/elements", scope.id()),
            Some(json!({ "using": "css selector", "value": selector })),
        )?;
        value
            .as_array()
            .ok_or_else(|| AdapterError::Fatal(format!("unexpected elements payload: {value}")))?
            .iter()
            .map(element_from_value)
            .collect()
    }

    fn read_text(&mut self, element: &ElementHandle) -> std::result::Result<String, AdapterError> {
        let value = self.command(Method::GET, &format!("element/{}/text", element.id()), None)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn scroll_by(
        &mut self,
        container: &ElementHandle,
        pixels: i64,
    ) -> std::result::Result<i64, AdapterError> {
        self.run_scroll_script(SCROLL_BY_SCRIPT, container, pixels)
    }

    fn scroll_to(
        &mut self,
        container: &ElementHandle,
        position: i64,
    ) -> std::result::Result<i64, AdapterError> {
        self.run_scroll_script(SCROLL_TO_SCRIPT, container, position)
    }

    fn wait(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl Drop for WebDriverPage {
    fn drop(&mut self) {
        // Attached browsers belong to the user and stay open.
        if !self.owns_browser() {
            return;
        }
        match self.command(Method::DELETE, "", None) {
            Ok(_) => debug!(session_id = %self.session_id, "WebDriver session closed"),
            Err(error) => warn!(
                session_id = %self.session_id,
                error = %error,
                "failed to close WebDriver session"
            ),
        }
    }
}

fn element_reference(element: &ElementHandle) -> Value {
    json!({ ELEMENT_KEY: element.id() })
}

fn element_from_value(value: &Value) -> std::result::Result<ElementHandle, AdapterError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementHandle::new)
        .ok_or_else(|| AdapterError::Fatal(format!("not an element reference: {value}")))
}

fn classify_transport_error(error: reqwest::Error) -> AdapterError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AdapterError::Transient(error.to_string())
    } else {
        AdapterError::Fatal(error.to_string())
    }
}

/// Maps a W3C error code onto the retry taxonomy.
pub fn classify_webdriver_error(code: &str, message: &str) -> AdapterError {
    let detail = if message.is_empty() {
        code.to_string()
    } else {
        format!("{code}: {message}")
    };
    match code {
        "no such element" => AdapterError::NotFound(detail),
        "stale element reference" | "timeout" | "script timeout" => AdapterError::Transient(detail),
        "invalid selector" => AdapterError::InvalidSelector(detail),
        _ => AdapterError::Fatal(detail),
    }
}
