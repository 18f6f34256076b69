use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use atelier_core::{AtelierError, Result};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, warn};

use crate::instructions::{BrowserAction, ScrapeInstructions};
use crate::{emit, format_items, persist, site, Item, Scraper, ScraperParams};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on waiting for the page to settle when no `WAIT_FOR:` is set.
const IDLE_SETTLE: Duration = Duration::from_secs(10);

const VISION_PROMPT: &str = "Liste les éléments visibles sur cette capture d'écran de page web \
sous forme d'un tableau JSON d'objets avec les champs title, price et link quand ils existent. \
Réponds uniquement avec le tableau JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chromium,
    Chrome,
    Msedge,
    Firefox,
}

impl BrowserKind {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "chrome" => Self::Chrome,
            "msedge" | "edge" => Self::Msedge,
            "firefox" => Self::Firefox,
            _ => Self::Chromium,
        }
    }

    /// Installation paths probed per OS family, most common first.
    fn executable_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Chromium => &[
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/snap/bin/chromium",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
                "C:\\Program Files\\Chromium\\Application\\chrome.exe",
            ],
            Self::Chrome => &[
                "/usr/bin/google-chrome",
                "/usr/bin/google-chrome-stable",
                "/opt/google/chrome/chrome",
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
                "C:\\Program Files (x86)\\Google\\Chrome\\Application\\chrome.exe",
            ],
            Self::Msedge => &[
                "/usr/bin/microsoft-edge",
                "/usr/bin/microsoft-edge-stable",
                "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
                "C:\\Program Files (x86)\\Microsoft\\Edge\\Application\\msedge.exe",
                "C:\\Program Files\\Microsoft\\Edge\\Application\\msedge.exe",
            ],
            // Not drivable over CDP; the launch chain falls through to the
            // chromium candidates.
            Self::Firefox => &[],
        }
    }

    fn find_executable(&self) -> Option<PathBuf> {
        self.executable_candidates()
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }
}

/// Browser-automation scraper. Launches real Chrome-family browsers with a
/// persistent profile when one is installed, and degrades to whatever
/// `headless_chrome` can auto-detect.
pub struct BrowserScraper {
    params: ScraperParams,
    instructions: ScrapeInstructions,
}

impl BrowserScraper {
    pub fn new(params: ScraperParams) -> Self {
        let instructions = ScrapeInstructions::parse(&params.url_instructions);
        Self {
            params,
            instructions,
        }
    }

    /// (a) persistent profile on a system browser, (b) plain launch of the
    /// same executable, (c) auto-detected chromium.
    fn launch(&self) -> Result<Browser> {
        let kind = self.params.browser;
        if kind == BrowserKind::Firefox {
            warn!("firefox n'est pas pilotable ici, repli sur chromium");
        }
        let executable = kind.find_executable().or_else(|| {
            BrowserKind::Chromium.find_executable()
        });
        let (width, height) = crate::agents::random_viewport();
        let user_agent: OsString = format!("--user-agent={}", crate::agents::random_user_agent()).into();

        if let Some(path) = &executable {
            if kind != BrowserKind::Firefox {
                let profile = self.params.root.browser_profile_dir();
                let _ = fs::create_dir_all(&profile);
                let persistent = LaunchOptions::default_builder()
                    .headless(!self.params.visible)
                    .path(Some(path.clone()))
                    .user_data_dir(Some(profile))
                    .window_size(Some((width, height)))
                    .args(vec![user_agent.as_os_str()])
                    .build()
                    .map_err(|e| AtelierError::ToolLaunchFailed(e.to_string()))?;
                match Browser::new(persistent) {
                    Ok(browser) => return Ok(browser),
                    Err(err) => warn!(%err, "lancement avec profil persistant impossible"),
                }
            }
            let plain = LaunchOptions::default_builder()
                .headless(!self.params.visible)
                .path(Some(path.clone()))
                .window_size(Some((width, height)))
                .args(vec![user_agent.as_os_str()])
                .build()
                .map_err(|e| AtelierError::ToolLaunchFailed(e.to_string()))?;
            match Browser::new(plain) {
                Ok(browser) => return Ok(browser),
                Err(err) => warn!(%err, "lancement direct impossible"),
            }
        }

        let fallback = LaunchOptions::default_builder()
            .headless(!self.params.visible)
            .window_size(Some((width, height)))
            .args(vec![user_agent.as_os_str()])
            .build()
            .map_err(|e| AtelierError::ToolLaunchFailed(e.to_string()))?;
        Browser::new(fallback).map_err(|e| AtelierError::ToolLaunchFailed(e.to_string()))
    }

    fn run(&self, tab: &Arc<Tab>, url: &str, query: &str) -> Result<Vec<Item>> {
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        if self.params.browser != BrowserKind::Firefox {
            // Mask the automation flag before any site script runs.
            let _ = tab.evaluate(
                "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})",
                false,
            );
        }

        emit(&self.params.log, &format!("Navigation vers {url}"));
        step(tab.navigate_to(url))?;
        step(tab.wait_until_navigated())?;

        for action in &self.instructions.before_search {
            match action {
                BrowserAction::Click(selector) => {
                    debug!(selector, "action CLICK");
                    step(tab.wait_for_element(selector))?.click().map_err(to_err)?;
                }
                BrowserAction::Wait(duration) => std::thread::sleep(*duration),
                BrowserAction::Type { selector, text } => {
                    debug!(selector, "action TYPE");
                    step(tab.wait_for_element(selector))?.click().map_err(to_err)?;
                    step(tab.type_str(text))?;
                }
            }
        }

        if !query.is_empty() {
            if let Some(selector) = &self.instructions.search_input {
                emit(&self.params.log, "Saisie de la recherche");
                step(tab.wait_for_element(selector))?.click().map_err(to_err)?;
                step(tab.type_str(query))?;
                match &self.instructions.search_button {
                    Some(button) => {
                        step(tab.wait_for_element(button))?.click().map_err(to_err)?;
                    }
                    None => {
                        step(tab.press_key("Enter"))?;
                    }
                }
                step(tab.wait_until_navigated())?;
            }
        }

        if let Some(selector) = &self.instructions.wait_for {
            step(tab.wait_for_element_with_custom_timeout(selector, NAVIGATION_TIMEOUT))?;
        } else if let Err(err) = tab.wait_until_navigated() {
            debug!(%err, "pas de repos réseau, attente bornée");
            std::thread::sleep(IDLE_SETTLE);
        }

        // A human reader scrolls; lazy-loaded listings need it too.
        for _ in 0..3 {
            let _ = tab.evaluate("window.scrollBy(0, window.innerHeight * 0.8)", false);
            std::thread::sleep(Duration::from_millis(400));
        }

        emit(&self.params.log, "Extraction du contenu");
        let html = step(tab.get_content())?;
        Ok(site::extract_items(&html, url, &self.instructions))
    }

    fn vision_fallback(&self, tab: &Arc<Tab>) -> Vec<Item> {
        let png = match tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        {
            Ok(png) => png,
            Err(err) => {
                warn!(%err, "capture d'écran impossible");
                return Vec::new();
            }
        };
        emit(&self.params.log, "Analyse visuelle de la page");
        match self
            .params
            .client
            .describe_image_blocking(&png, VISION_PROMPT)
        {
            Ok(reply) => tag_vision(parse_array(&reply)),
            Err(err) => {
                warn!(%err, "analyse visuelle indisponible");
                Vec::new()
            }
        }
    }

    fn write_storage_state(&self, tab: &Arc<Tab>) {
        let Ok(cookies) = tab.get_cookies() else {
            return;
        };
        let state = serde_json::json!({ "cookies": cookies });
        if let Err(err) = fs::write(
            self.params.root.browser_state_file(),
            state.to_string(),
        ) {
            warn!(%err, "état de session non sauvegardé");
        }
    }
}

impl Scraper for BrowserScraper {
    fn search(
        &self,
        url: &str,
        query: &str,
        extraction_prompt: &str,
    ) -> Result<(String, Option<PathBuf>)> {
        let browser = self.launch()?;
        let tab = browser
            .new_tab()
            .map_err(|e| AtelierError::ToolLaunchFailed(e.to_string()))?;

        let (mut items, closed_note) = match self.run(&tab, url, query) {
            Ok(items) => (items, None),
            Err(err) if is_target_closed(&err) => {
                emit(&self.params.log, "Fenêtre fermée, résultats partiels");
                (Vec::new(), Some("Navigateur fermé avant la fin de l'extraction.".to_string()))
            }
            Err(err) => return Err(err),
        };

        if items.is_empty() && closed_note.is_none() {
            items = self.vision_fallback(&tab);
        }

        self.write_storage_state(&tab);

        let formatted = finalize(&items, closed_note.as_deref())?;
        let raw = Value::Array(items.into_iter().map(Value::Object).collect());
        let path = persist(&self.params, url, query, extraction_prompt, &formatted, raw);
        Ok((formatted, path))
    }
}

fn step<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(|e| AtelierError::Other(e.to_string()))
}

fn to_err(err: anyhow::Error) -> AtelierError {
    AtelierError::Other(err.to_string())
}

/// A closed window keeps its partial-result note; a page that yielded
/// nothing, even after the vision pass, is an extraction failure rather
/// than an empty success.
fn finalize(items: &[Item], closed_note: Option<&str>) -> Result<String> {
    if let Some(note) = closed_note {
        return Ok(note.to_string());
    }
    if items.is_empty() {
        return Err(AtelierError::ExtractionEmpty);
    }
    Ok(format_items(items))
}

fn is_target_closed(err: &AtelierError) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("closed") || text.contains("target") && text.contains("detach")
}

fn parse_array(reply: &str) -> Vec<Item> {
    let Some(start) = reply.find('[') else {
        return Vec::new();
    };
    let Some(end) = reply.rfind(']') else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    serde_json::from_str::<Value>(&reply[start..=end])
        .ok()
        .and_then(|value| value.as_array().cloned())
        .map(|array| {
            array
                .into_iter()
                .filter_map(|value| match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn tag_vision(mut items: Vec<Item>) -> Vec<Item> {
    for item in &mut items {
        item.insert("source".to_string(), Value::String("vision".to_string()));
    }
    items
}
