use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkFossaConfig;

const EMAIL_INPUT: &str = "input[type='email'], input[name='email']";
const PASSWORD_INPUT: &str = "input[type='password']";
const SUBMIT_BUTTON: &str = "button[type='submit'], input[type='submit']";
const EQUIPMENT_TAB: &str = "a[href*='equipment'], [data-tab='equipment']";
const WORK_ORDER_MARKERS: &str = "table tbody tr, .work-order, .work-list-item";
const EQUIPMENT_MARKERS: &str = ".equipment-item, .dispenser-card, li.equipment, .panel.equipment";

/// Where things live on the WorkFossa site.
#[derive(Debug, Clone)]
pub struct SiteUrls {
    base: Url,
}

impl SiteUrls {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).context("invalid WorkFossa base URL")?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn login(&self) -> Result<Url> {
        Ok(self.base.join("login")?)
    }

    pub fn work_orders(&self) -> Result<Url> {
        Ok(self.base.join("app/work/")?)
    }

    /// Detail page of a work order. Scraped links win over the id-derived
    /// path since the site sometimes nests them under the customer.
    pub fn work_order(&self, external_id: &str, detail_url: Option<&str>) -> Result<Url> {
        if let Some(detail) = detail_url {
            return Ok(self.base.join(detail)?);
        }
        let numeric = external_id.trim_start_matches(|c: char| !c.is_ascii_digit());
        if numeric.is_empty() {
            return Err(anyhow!("work order id '{}' has no number", external_id));
        }
        Ok(self.base.join(&format!("app/work/{}/", numeric))?)
    }

    /// Whether the browser is still on the login form.
    pub fn is_login_page(&self, current: &str) -> bool {
        Url::parse(current)
            .map(|u| u.path().trim_end_matches('/').ends_with("/login"))
            .unwrap_or(false)
    }
}

/// Drives a headless Chrome against WorkFossa. All CDP calls block, so
/// they run on the blocking pool.
pub struct WorkFossaScraper {
    config: WorkFossaConfig,
    urls: SiteUrls,
    browser: Mutex<Option<Browser>>,
}

/// A logged-in tab. Closed on drop.
pub struct Session {
    tab: Arc<Tab>,
    urls: SiteUrls,
    config: WorkFossaConfig,
}

impl WorkFossaScraper {
    pub fn new(config: WorkFossaConfig) -> Result<Self> {
        let urls = SiteUrls::new(&config.base_url)?;
        Ok(Self {
            config,
            urls,
            browser: Mutex::new(None),
        })
    }

    pub fn launch_options(&self) -> Result<LaunchOptions<'static>> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(self.config.request_timeout() * 4)
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| anyhow!("Failed to create launch options: {}", e))?;

        if let Some(chrome_path) = &self.config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        Ok(launch_options)
    }

    fn browser(&self) -> Result<Browser> {
        let mut guard = self
            .browser
            .lock()
            .map_err(|_| anyhow!("browser lock poisoned"))?;
        if let Some(browser) = guard.as_ref() {
            // A dead browser fails this cheaply, relaunch below
            if browser.get_version().is_ok() {
                return Ok(browser.clone());
            }
            warn!("browser stopped responding, relaunching");
        }

        let browser = Browser::new(self.launch_options()?)
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;
        info!("launched headless Chrome");
        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Log in, retrying with a fixed delay up to `retry_attempts` times.
    pub async fn login(self: &Arc<Self>) -> Result<Session> {
        let (username, password) = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => return Err(anyhow!("WorkFossa credentials are not configured")),
        };

        let retries = FixedInterval::new(self.config.retry_delay())
            .take(self.config.retry_attempts.saturating_sub(1) as usize);

        let mut attempt = 0u32;
        Retry::spawn(retries, || {
            attempt += 1;
            let scraper = Arc::clone(self);
            let (username, password) = (username.clone(), password.clone());
            async move {
                let result =
                    tokio::task::spawn_blocking(move || scraper.login_blocking(&username, &password))
                        .await
                        .map_err(|e| anyhow!("login task panicked: {}", e))
                        .and_then(|r| r);
                if let Err(e) = &result {
                    warn!(attempt, error = %e, "WorkFossa login failed");
                }
                result
            }
        })
        .await
    }

    fn login_blocking(&self, username: &str, password: &str) -> Result<Session> {
        let browser = self.browser()?;
        let tab = browser
            .new_tab()
            .map_err(|e| anyhow!("Failed to create tab: {}", e))?;
        tab.set_default_timeout(self.config.request_timeout());
        tab.set_user_agent(&self.config.user_agent, None, None)
            .map_err(|e| anyhow!("Failed to set user agent: {}", e))?;

        let session = Session {
            tab,
            urls: self.urls.clone(),
            config: self.config.clone(),
        };

        session.with_screenshot_on_error("login", |tab| {
            let login_url = session.urls.login()?;
            tab.navigate_to(login_url.as_str())
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| anyhow!("Navigation to login failed: {}", e))?;

            tab.wait_for_element(EMAIL_INPUT)
                .and_then(|e| e.click().map(|_| ()))
                .map_err(|e| anyhow!("Email field not found: {}", e))?;
            tab.type_str(username)
                .map_err(|e| anyhow!("Typing e-mail failed: {}", e))?;

            tab.wait_for_element(PASSWORD_INPUT)
                .and_then(|e| e.click().map(|_| ()))
                .map_err(|e| anyhow!("Password field not found: {}", e))?;
            tab.type_str(password)
                .map_err(|e| anyhow!("Typing password failed: {}", e))?;

            tab.find_element(SUBMIT_BUTTON)
                .and_then(|e| e.click().map(|_| ()))
                .map_err(|e| anyhow!("Submit button not found: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| anyhow!("Login submit did not navigate: {}", e))?;

            if session.urls.is_login_page(&tab.get_url()) {
                return Err(anyhow!("still on the login page, credentials rejected"));
            }
            Ok(())
        })?;

        debug!(url = %session.tab.get_url(), "logged in to WorkFossa");
        Ok(session)
    }

    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.browser.lock() {
            // Dropping the last handle kills the Chrome process
            guard.take();
        }
    }
}

impl Session {
    /// HTML of the work order list.
    pub async fn fetch_work_orders(self: &Arc<Self>) -> Result<String> {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let url = session.urls.work_orders()?;
            session.page_html("work_orders", url.as_str(), None, WORK_ORDER_MARKERS)
        })
        .await
        .map_err(|e| anyhow!("scrape task panicked: {}", e))?
    }

    /// HTML of one work order's equipment tab.
    pub async fn fetch_equipment(
        self: &Arc<Self>,
        external_id: &str,
        detail_url: Option<&str>,
    ) -> Result<String> {
        let session = Arc::clone(self);
        let url = self.urls.work_order(external_id, detail_url)?;
        let label = format!("equipment_{}", external_id);
        tokio::task::spawn_blocking(move || {
            session.page_html(&label, url.as_str(), Some(EQUIPMENT_TAB), EQUIPMENT_MARKERS)
        })
        .await
        .map_err(|e| anyhow!("scrape task panicked: {}", e))?
    }

    fn page_html(
        &self,
        label: &str,
        url: &str,
        tab_selector: Option<&str>,
        ready_selector: &str,
    ) -> Result<String> {
        self.with_screenshot_on_error(label, |tab| {
            tab.navigate_to(url)
                .and_then(|t| t.wait_until_navigated())
                .map_err(|e| anyhow!("Navigation to {} failed: {}", url, e))?;

            if self.urls.is_login_page(&tab.get_url()) {
                return Err(anyhow!("session expired, redirected to login"));
            }

            if let Some(selector) = tab_selector {
                // Not every layout splits equipment into its own tab
                if let Ok(element) = tab.find_element(selector) {
                    element
                        .click()
                        .map_err(|e| anyhow!("Clicking '{}' failed: {}", selector, e))?;
                }
            }

            // Empty lists never render the markers; the parsers cope with that
            if let Err(e) = tab.wait_for_element(ready_selector) {
                debug!(url, error = %e, "content markers did not appear");
            }

            tab.get_content()
                .map_err(|e| anyhow!("Failed to get page content: {}", e))
        })
    }

    fn with_screenshot_on_error<T>(
        &self,
        label: &str,
        f: impl FnOnce(&Tab) -> Result<T>,
    ) -> Result<T> {
        let result = f(&self.tab);
        if result.is_err() {
            if let Some(dir) = &self.config.screenshots_dir {
                match self.take_screenshot(dir, label) {
                    Ok(path) => info!(path = %path.display(), "saved failure screenshot"),
                    Err(e) => warn!(error = %e, "failure screenshot not saved"),
                }
            }
        }
        result
    }

    fn take_screenshot(&self, dir: &std::path::Path, label: &str) -> Result<PathBuf> {
        let screenshot_data = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| anyhow!("Screenshot capture failed: {}", e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(screenshot_name(label, &timestamp.to_string()));

        std::fs::create_dir_all(dir).context("Failed to create screenshot directory")?;
        std::fs::write(&path, screenshot_data).context("Failed to write screenshot")?;

        Ok(path)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.tab.close(true);
    }
}

fn screenshot_name(label: &str, timestamp: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}_{}.png", label, timestamp, uuid::Uuid::new_v4().simple())
}
