//! Browser-driven conversion service.
//!
//! Logs into the web converter with a headless Chromium, uploads the file
//! through the page's file input and reads the converted text back out of the
//! page with configurable scripts.

use std::fmt::Display;
use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ConversionConfig;
use crate::conversion::{
    ConversionFile, ConversionService, ConversionSession, ConversionStatus, UploadTicket,
};
use crate::error::{ConfigError, ConversionError};
use crate::secrets::resolve_secret;

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub login_url: String,
    pub converter_url: String,
    pub username: String,
    pub password: SecretString,
    pub username_selector: String,
    pub password_selector: String,
    pub login_button_selector: String,
    pub file_input_selector: String,
    pub convert_button_selector: String,
    /// Script returning `true` once the login succeeded.
    pub logged_in_script: String,
    /// Script returning `"pending"`, `"done"` or `"failed:<reason>"`.
    pub status_script: String,
    /// Script returning the converted text.
    pub text_script: String,
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
}

impl BrowserSettings {
    /// Builds the settings from the `conversion` config section, resolving the
    /// password from whichever source is configured.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, ConfigError> {
        let password = resolve_secret(
            config.password.as_deref(),
            config.password_file.as_deref(),
            config.password_env.as_deref(),
        )?;

        Ok(Self {
            login_url: config.login_url.clone(),
            converter_url: config.converter_url.clone(),
            username: config.username.clone(),
            password,
            username_selector: config.selectors.username.clone(),
            password_selector: config.selectors.password.clone(),
            login_button_selector: config.selectors.login_button.clone(),
            file_input_selector: config.selectors.file_input.clone(),
            convert_button_selector: config.selectors.convert_button.clone(),
            logged_in_script: config.scripts.logged_in.clone(),
            status_script: config.scripts.status.clone(),
            text_script: config.scripts.text.clone(),
            chrome_executable: config.chrome_executable.as_ref().map(PathBuf::from),
            headless: config.headless,
        })
    }
}

struct BrowserState {
    session_id: String,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    upload_dir: tempfile::TempDir,
}

pub struct BrowserConversionService {
    settings: BrowserSettings,
    state: Mutex<Option<BrowserState>>,
}

fn browser_err(e: impl Display) -> ConversionError {
    ConversionError::Browser(e.to_string())
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

impl BrowserConversionService {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), ConversionError> {
        let mut builder = BrowserConfig::builder()
            .args(vec!["--no-sandbox", "--disable-gpu", "--disable-dev-shm-usage"]);
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ConversionError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn login(&self, page: &Page) -> Result<(), ConversionError> {
        page.wait_for_navigation().await.map_err(browser_err)?;

        let script = format!(
            "(() => {{
                const user = document.querySelector({user_sel});
                const pass = document.querySelector({pass_sel});
                if (!user || !pass) return false;
                user.value = {user};
                pass.value = {pass};
                document.querySelector({button_sel})?.click();
                return true;
            }})()",
            user_sel = js_string(&self.settings.username_selector),
            pass_sel = js_string(&self.settings.password_selector),
            button_sel = js_string(&self.settings.login_button_selector),
            user = js_string(&self.settings.username),
            pass = js_string(self.settings.password.expose_secret()),
        );

        let filled: bool = page
            .evaluate(script)
            .await
            .map_err(browser_err)?
            .into_value()
            .map_err(browser_err)?;
        if !filled {
            return Err(ConversionError::Authentication(
                "login form not found".to_string(),
            ));
        }

        page.wait_for_navigation().await.map_err(browser_err)?;

        let logged_in: bool = page
            .evaluate(self.settings.logged_in_script.as_str())
            .await
            .map_err(browser_err)?
            .into_value()
            .map_err(browser_err)?;
        if !logged_in {
            return Err(ConversionError::Authentication(
                "credentials rejected".to_string(),
            ));
        }

        Ok(())
    }

    async fn evaluate_string(&self, page: &Page, script: &str) -> Result<String, ConversionError> {
        page.evaluate(script)
            .await
            .map_err(browser_err)?
            .into_value()
            .map_err(browser_err)
    }
}

/// Checks the session handed in by the lease is the one this browser holds.
fn state_for<'a>(
    state: &'a Option<BrowserState>,
    session: &ConversionSession,
) -> Result<&'a BrowserState, ConversionError> {
    match state {
        Some(s) if s.session_id == session.id => Ok(s),
        _ => Err(ConversionError::Authentication(format!(
            "session {} is no longer open",
            session.id
        ))),
    }
}

#[async_trait]
impl ConversionService for BrowserConversionService {
    async fn authenticate(&self) -> Result<ConversionSession, ConversionError> {
        let mut state = self.state.lock().await;
        if let Some(old) = state.take() {
            close_state(old).await;
        }

        let (browser, handler) = self.launch().await?;
        let page = match browser.new_page(self.settings.login_url.as_str()).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(browser_err(e));
            }
        };

        if let Err(e) = self.login(&page).await {
            handler.abort();
            return Err(e);
        }

        let session = ConversionSession::new(uuid::Uuid::new_v4().to_string());
        *state = Some(BrowserState {
            session_id: session.id.clone(),
            browser,
            page,
            handler,
            upload_dir: tempfile::tempdir()?,
        });

        Ok(session)
    }

    async fn upload(
        &self,
        session: &ConversionSession,
        file: &ConversionFile,
    ) -> Result<UploadTicket, ConversionError> {
        let state = self.state.lock().await;
        let state = state_for(&state, session)?;

        // Keep the original extension; the converter dispatches on it.
        let safe_name: String = file
            .filename
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        let path = state.upload_dir.path().join(&safe_name);
        tokio::fs::write(&path, &file.bytes).await?;

        state
            .page
            .goto(self.settings.converter_url.as_str())
            .await
            .map_err(browser_err)?;

        let input = state
            .page
            .find_element(self.settings.file_input_selector.as_str())
            .await
            .map_err(browser_err)?;

        let params = SetFileInputFilesParams::builder()
            .file(path.to_string_lossy().to_string())
            .backend_node_id(input.backend_node_id)
            .build()
            .map_err(ConversionError::Browser)?;
        state.page.execute(params).await.map_err(browser_err)?;

        state
            .page
            .find_element(self.settings.convert_button_selector.as_str())
            .await
            .map_err(browser_err)?
            .click()
            .await
            .map_err(browser_err)?;

        Ok(UploadTicket(safe_name))
    }

    async fn poll_status(
        &self,
        session: &ConversionSession,
        _ticket: &UploadTicket,
    ) -> Result<ConversionStatus, ConversionError> {
        let state = self.state.lock().await;
        let state = state_for(&state, session)?;

        let status = self
            .evaluate_string(&state.page, &self.settings.status_script)
            .await?;

        Ok(match status.as_str() {
            "done" => ConversionStatus::Done,
            s if s.starts_with("failed") => ConversionStatus::Failed(
                s.trim_start_matches("failed")
                    .trim_start_matches(':')
                    .trim()
                    .to_string(),
            ),
            _ => ConversionStatus::Pending,
        })
    }

    async fn download_text(
        &self,
        session: &ConversionSession,
        _ticket: &UploadTicket,
    ) -> Result<String, ConversionError> {
        let state = self.state.lock().await;
        let state = state_for(&state, session)?;
        self.evaluate_string(&state.page, &self.settings.text_script)
            .await
    }

    async fn discard(
        &self,
        session: &ConversionSession,
        ticket: &UploadTicket,
    ) -> Result<(), ConversionError> {
        let state = self.state.lock().await;
        let state = state_for(&state, session)?;
        let path = state.upload_dir.path().join(&ticket.0);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn release(&self, session: ConversionSession) -> Result<(), ConversionError> {
        let mut state = self.state.lock().await;
        if state.as_ref().map(|s| s.session_id == session.id) == Some(true) {
            if let Some(old) = state.take() {
                close_state(old).await;
            }
        }
        Ok(())
    }
}

async fn close_state(mut state: BrowserState) {
    if let Err(e) = state.browser.close().await {
        log::debug!("Browser close failed: {}", e);
    }
    let _ = state.browser.wait().await;
    state.handler.abort();
}
