use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::instructions::ScrapeInstructions;
use crate::Item;

/// Container selectors tried in order by the generic strategy.
const CONTAINER_CASCADE: &[&str] = &[
    "article",
    ".product",
    ".item",
    ".result",
    ".card",
    "[class*=product]",
    "[class*=result]",
    "li",
];

const TITLE_CASCADE: &[&str] = &["h1", "h2", "h3", ".title", "[class*=title]", "a"];
const PRICE_CASCADE: &[&str] = &[".price", "[class*=price]", "[class*=prix]"];

const MAX_ITEMS: usize = 50;

/// Extracts structured items from a page. Explicit `EXTRACT:` instructions
/// win, then a handler keyed on the host, then the generic CSS cascade.
pub fn extract_items(html: &str, url: &str, instructions: &ScrapeInstructions) -> Vec<Item> {
    let document = Html::parse_document(html);
    if !instructions.extract.is_empty() {
        let items = extract_with_instructions(&document, instructions);
        if !items.is_empty() {
            return items;
        }
    }
    if let Some(handler) = handler_for(url) {
        let items = extract_cascade(&document, &[handler.container], handler.title, handler.price);
        if !items.is_empty() {
            return items;
        }
        debug!(host = handler.host, "gestionnaire de site sans résultat, cascade générique");
    }
    extract_cascade(&document, CONTAINER_CASCADE, TITLE_CASCADE, PRICE_CASCADE)
}

struct SiteHandler {
    host: &'static str,
    container: &'static str,
    title: &'static [&'static str],
    price: &'static [&'static str],
}

/// Known marketplaces whose listings do not answer to the generic cascade.
const SITE_HANDLERS: &[SiteHandler] = &[
    SiteHandler {
        host: "amazon.",
        container: "div[data-component-type='s-search-result']",
        title: &["h2 a span", "h2 span"],
        price: &[".a-price .a-offscreen", ".a-price-whole"],
    },
    SiteHandler {
        host: "ebay.",
        container: ".s-item",
        title: &[".s-item__title"],
        price: &[".s-item__price"],
    },
    SiteHandler {
        host: "leboncoin.",
        container: "a[data-test-id='ad']",
        title: &["[data-test-id='adcard-title']", "p"],
        price: &["[data-test-id='price']", "span"],
    },
];

fn handler_for(url: &str) -> Option<&'static SiteHandler> {
    let host = Url::parse(url).ok()?.host_str()?.to_lowercase();
    SITE_HANDLERS.iter().find(|h| host.contains(h.host))
}

fn extract_with_instructions(document: &Html, instructions: &ScrapeInstructions) -> Vec<Item> {
    let container = instructions.results.as_deref().unwrap_or("body");
    let Ok(container_selector) = Selector::parse(container) else {
        debug!(container, "sélecteur RESULTS invalide");
        return Vec::new();
    };
    let mut items = Vec::new();
    for element in document.select(&container_selector).take(MAX_ITEMS) {
        let mut item = Item::new();
        for (field, selector_text) in &instructions.extract {
            let Ok(selector) = Selector::parse(selector_text) else {
                debug!(selector = selector_text, "sélecteur EXTRACT invalide");
                continue;
            };
            if let Some(found) = element.select(&selector).next() {
                let text = node_text(found);
                if !text.is_empty() {
                    item.insert(field.clone(), Value::String(text));
                }
            }
        }
        if !item.is_empty() {
            items.push(item);
        }
    }
    items
}

fn extract_cascade(
    document: &Html,
    containers: &[&str],
    titles: &[&str],
    prices: &[&str],
) -> Vec<Item> {
    for container in containers {
        let Ok(selector) = Selector::parse(container) else {
            continue;
        };
        let mut items = Vec::new();
        for element in document.select(&selector).take(MAX_ITEMS) {
            if let Some(item) = item_from_element(element, titles, prices) {
                items.push(item);
            }
        }
        // One hit is usually page furniture matching by accident.
        if items.len() >= 2 {
            debug!(container, count = items.len(), "extraction par cascade");
            return items;
        }
    }
    Vec::new()
}

fn item_from_element(element: ElementRef<'_>, titles: &[&str], prices: &[&str]) -> Option<Item> {
    let title = first_text(element, titles)?;
    let mut item = Item::new();
    item.insert("title".to_string(), Value::String(title));
    if let Some(price) = first_text(element, prices) {
        item.insert("price".to_string(), Value::String(price));
    }
    if let Some(link) = first_link(element) {
        item.insert("link".to_string(), Value::String(link));
    }
    Some(item)
}

fn first_text(element: ElementRef<'_>, cascade: &[&str]) -> Option<String> {
    for selector_text in cascade {
        let Ok(selector) = Selector::parse(selector_text) else {
            continue;
        };
        if let Some(found) = element.select(&selector).next() {
            let text = node_text(found);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn first_link(element: ElementRef<'_>) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;
    let href = if element.value().name() == "a" {
        element.value().attr("href")
    } else {
        element
            .select(&selector)
            .next()
            .and_then(|a| a.value().attr("href"))
    }?;
    Some(href.to_string())
}

fn node_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"
        <html><body>
          <div class="product"><h2>Basket courante</h2><span class="price">49€</span>
            <a href="/p/1">voir</a></div>
          <div class="product"><h2>Sandale d'été</h2><span class="price">29€</span>
            <a href="/p/2">voir</a></div>
        </body></html>"#;

    #[test]
    fn generic_cascade_reads_title_price_and_link() {
        let items = extract_items(SHOP, "https://boutique.example", &ScrapeInstructions::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "Basket courante");
        assert_eq!(items[0]["price"], "49€");
        assert_eq!(items[1]["link"], "/p/2");
    }

    #[test]
    fn explicit_extract_instructions_take_precedence() {
        let instructions = ScrapeInstructions::parse(
            "RESULTS: .product\nEXTRACT:\n- nom: h2\n- tarif: .price\n",
        );
        let items = extract_items(SHOP, "https://boutique.example", &instructions);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["nom"], "Basket courante");
        assert_eq!(items[0]["tarif"], "49€");
        assert!(items[0].get("title").is_none());
    }

    #[test]
    fn single_accidental_match_is_discarded() {
        let html = r#"<html><body><article><h1>Mentions légales</h1></article>
            <p>rien d'autre</p></body></html>"#;
        let items = extract_items(html, "https://example.com", &ScrapeInstructions::default());
        assert!(items.is_empty());
    }

    #[test]
    fn known_host_uses_its_handler() {
        let html = r#"<html><body>
            <div class="s-item"><div class="s-item__title">Vélo</div>
              <span class="s-item__price">120 EUR</span><a href="/itm/9">lien</a></div>
            <div class="s-item"><div class="s-item__title">Casque</div>
              <span class="s-item__price">25 EUR</span><a href="/itm/10">lien</a></div>
        </body></html>"#;
        let items = extract_items(html, "https://www.ebay.fr/sch/velo", &ScrapeInstructions::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "Vélo");
        assert_eq!(items[0]["price"], "120 EUR");
    }
}
