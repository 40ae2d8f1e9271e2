use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref SEL_TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref SEL_LINK: Selector = Selector::parse("a[href]").expect("valid selector");
}

const SKIPPED: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of the document with whitespace collapsed to single spaces.
pub fn strip_to_plain_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().map_or(false, |e| SKIPPED.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

pub fn extract_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&SEL_TITLE)
        .next()
        .map(|n| n.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Absolute http(s) targets of every `<a href>`, fragments removed, in
/// document order.
pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    for a in doc.select(&SEL_LINK) {
        let Some(href) = a.value().attr("href") else { continue };
        let Ok(mut u) = base.join(href.trim()) else { continue };
        if !u.scheme().starts_with("http") {
            continue;
        }
        u.set_fragment(None);
        links.push(u.to_string());
    }
    links
}

pub fn path_of(url: &str) -> Result<String, url::ParseError> {
    Ok(Url::parse(url)?.path().to_string())
}

/// Canonical form used for visited-set membership.
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => url.to_string(),
    }
}
