use std::time::Duration;

use tracing::debug;

/// Pre-search action from a `BEFORE_SEARCH:` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserAction {
    Click(String),
    Wait(Duration),
    Type { selector: String, text: String },
}

/// Parsed form of the line-oriented instruction text an assistant carries in
/// `url_instructions`. Parsing is lenient: unknown lines are logged and
/// skipped, a malformed `WAIT:` drops that action only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeInstructions {
    pub search_input: Option<String>,
    pub search_button: Option<String>,
    pub wait_for: Option<String>,
    pub results: Option<String>,
    pub before_search: Vec<BrowserAction>,
    pub extract: Vec<(String, String)>,
}

enum Section {
    Top,
    BeforeSearch,
    Extract,
}

impl ScrapeInstructions {
    pub fn parse(text: &str) -> Self {
        let mut parsed = Self::default();
        let mut section = Section::Top;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(item) = line.strip_prefix("- ") {
                match section {
                    Section::BeforeSearch => {
                        if let Some(action) = parse_action(item) {
                            parsed.before_search.push(action);
                        }
                    }
                    Section::Extract => {
                        if let Some((field, selector)) = split_key(item) {
                            if !selector.is_empty() {
                                parsed.extract.push((field, selector));
                            }
                        }
                    }
                    Section::Top => debug!(line, "élément de liste hors section, ignoré"),
                }
                continue;
            }
            match line {
                "BEFORE_SEARCH:" => section = Section::BeforeSearch,
                "EXTRACT:" => section = Section::Extract,
                _ => {
                    section = Section::Top;
                    match split_key(line) {
                        Some((key, value)) => {
                            let slot = match key.to_uppercase().as_str() {
                                "SEARCH_INPUT" => &mut parsed.search_input,
                                "SEARCH_BUTTON" => &mut parsed.search_button,
                                "WAIT_FOR" => &mut parsed.wait_for,
                                "RESULTS" => &mut parsed.results,
                                _ => {
                                    debug!(line, "ligne d'instruction inconnue, ignorée");
                                    continue;
                                }
                            };
                            if !value.is_empty() {
                                *slot = Some(value);
                            }
                        }
                        None => debug!(line, "ligne d'instruction inconnue, ignorée"),
                    }
                }
            }
        }
        parsed
    }
}

fn parse_action(item: &str) -> Option<BrowserAction> {
    let (key, value) = split_key(item)?;
    match key.to_uppercase().as_str() {
        "CLICK" if !value.is_empty() => Some(BrowserAction::Click(value)),
        "WAIT" => match parse_duration(&value) {
            Some(duration) => Some(BrowserAction::Wait(duration)),
            None => {
                debug!(value, "durée WAIT illisible, action abandonnée");
                None
            }
        },
        "TYPE" => {
            let (selector, text) = value.split_once(',')?;
            let selector = selector.trim();
            if selector.is_empty() {
                return None;
            }
            Some(BrowserAction::Type {
                selector: selector.to_string(),
                text: text.trim().to_string(),
            })
        }
        _ => {
            debug!(item, "action inconnue, ignorée");
            None
        }
    }
}

fn split_key(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim().to_string(), value.trim().to_string()))
}

/// `2s`, `500ms`, or a bare number of seconds.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.trim().parse::<f64>().ok().map(Duration::from_secs_f64);
    }
    value.parse::<f64>().ok().map(Duration::from_secs_f64)
}

/// Reports problems in the raw instruction text without refusing any of it.
pub fn validate(text: &str) -> Vec<String> {
    let mut problems = Vec::new();
    let mut section = Section::Top;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "BEFORE_SEARCH:" {
            section = Section::BeforeSearch;
            continue;
        }
        if line == "EXTRACT:" {
            section = Section::Extract;
            continue;
        }
        if let Some(item) = line.strip_prefix("- ") {
            match section {
                Section::Top => problems.push(format!("élément hors section : {item}")),
                Section::BeforeSearch => match split_key(item) {
                    Some((key, value)) => match key.to_uppercase().as_str() {
                        "CLICK" if value.is_empty() => {
                            problems.push("CLICK sans sélecteur".to_string())
                        }
                        "WAIT" if parse_duration(&value).is_none() => {
                            problems.push(format!("durée WAIT illisible : {value}"))
                        }
                        "TYPE" if value.split_once(',').is_none() => {
                            problems.push(format!("TYPE sans texte : {value}"))
                        }
                        "CLICK" | "WAIT" | "TYPE" => {}
                        other => problems.push(format!("action inconnue : {other}")),
                    },
                    None => problems.push(format!("action illisible : {item}")),
                },
                Section::Extract => {
                    if split_key(item).map(|(_, v)| v.is_empty()).unwrap_or(true) {
                        problems.push(format!("champ EXTRACT sans sélecteur : {item}"));
                    }
                }
            }
            continue;
        }
        section = Section::Top;
        match split_key(line) {
            Some((key, value)) => match key.to_uppercase().as_str() {
                "SEARCH_INPUT" | "SEARCH_BUTTON" | "WAIT_FOR" | "RESULTS" => {
                    if value.is_empty() {
                        problems.push(format!("{key} sans sélecteur"));
                    }
                }
                other => problems.push(format!("clé inconnue : {other}")),
            },
            None => problems.push(format!("ligne illisible : {line}")),
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
SEARCH_INPUT: input[name=q]
SEARCH_BUTTON: button[type=submit]
WAIT_FOR: .results
RESULTS: .result
BEFORE_SEARCH:
- CLICK: #accept-cookies
- WAIT: 2s
- TYPE: #zip, 75001
EXTRACT:
- title: .result h3
- price: .result .price
";

    #[test]
    fn full_sample_parses() {
        let parsed = ScrapeInstructions::parse(SAMPLE);
        assert_eq!(parsed.search_input.as_deref(), Some("input[name=q]"));
        assert_eq!(parsed.results.as_deref(), Some(".result"));
        assert_eq!(
            parsed.before_search,
            vec![
                BrowserAction::Click("#accept-cookies".to_string()),
                BrowserAction::Wait(Duration::from_secs(2)),
                BrowserAction::Type {
                    selector: "#zip".to_string(),
                    text: "75001".to_string(),
                },
            ]
        );
        assert_eq!(parsed.extract.len(), 2);
        assert_eq!(parsed.extract[0], ("title".to_string(), ".result h3".to_string()));
        assert!(validate(SAMPLE).is_empty());
    }

    #[test]
    fn durations_accept_seconds_millis_and_bare_numbers() {
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("bientôt"), None);
    }

    #[test]
    fn malformed_wait_drops_only_that_action() {
        let parsed = ScrapeInstructions::parse(
            "BEFORE_SEARCH:\n- WAIT: bientôt\n- CLICK: #ok\n",
        );
        assert_eq!(
            parsed.before_search,
            vec![BrowserAction::Click("#ok".to_string())]
        );
    }

    #[test]
    fn unknown_lines_are_ignored_but_reported_by_validate() {
        let text = "SEARCH_INPUT: #q\nFROBNICATE: oui\n";
        let parsed = ScrapeInstructions::parse(text);
        assert_eq!(parsed.search_input.as_deref(), Some("#q"));
        let problems = validate(text);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("FROBNICATE"));
    }

    #[test]
    fn empty_text_parses_to_default() {
        assert_eq!(ScrapeInstructions::parse(""), ScrapeInstructions::default());
        assert!(validate("").is_empty());
    }
}
