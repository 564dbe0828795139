use scraper::{Html, Selector};

const UNAVAILABLE_MARKERS: &[&str] = &[
    "this community has been banned",
    "this community is private",
    "this subreddit has been banned",
    "you must be invited",
    "this community has been set to private",
    // a redirect to r/all means the community does not exist
    "r/all - reddit",
    "page not found",
    "sorry, this community is private",
];

const TITLE_INDICATORS: &[&str] = &["banned", "private", "not found", "reddit - dive into anything"];

const VISITORS_SLOT: &str = r#"[slot="weekly-active-users-count"]"#;
const CONTRIBUTION_SLOTS: &[&str] = &[
    r#"[slot="weekly-posts-count"]"#,
    r#"[slot="weekly-contributions-count"]"#,
];

/// Weekly community metrics read off a rendered page.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PageMetrics {
    pub weekly_visitors: Option<u64>,
    pub weekly_contributions: Option<u64>,
}

impl PageMetrics {
    pub fn is_empty(&self) -> bool {
        self.weekly_visitors.is_none() && self.weekly_contributions.is_none()
    }

    /// Contributions per visitor, rounded to 6 decimals. `None` unless both
    /// inputs are present and visitors is non-zero.
    pub fn competition_score(&self) -> Option<f64> {
        match (self.weekly_contributions, self.weekly_visitors) {
            (Some(contributions), Some(visitors)) if visitors > 0 => {
                let ratio = contributions as f64 / visitors as f64;
                Some((ratio * 1_000_000.0).round() / 1_000_000.0)
            }
            _ => None,
        }
    }
}

pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Returns the reason a community page should be treated as permanently
/// unavailable, or `None` if it looks like a live community.
pub fn detect_unavailable(name: &str, title: Option<&str>, body: &str) -> Option<String> {
    let body_lower = body.to_lowercase();
    let name_lower = name.to_lowercase();

    if let Some(marker) = UNAVAILABLE_MARKERS.iter().find(|m| body_lower.contains(*m)) {
        return Some(format!("unavailable: {}", marker));
    }

    if let Some(title) = title {
        let title_lower = title.to_lowercase();
        if !title_lower.contains(&name_lower) {
            if let Some(indicator) = TITLE_INDICATORS.iter().find(|i| title_lower.contains(*i)) {
                return Some(format!("unavailable: title indicates {}", indicator));
            }
        }
    }

    let has_header =
        body.contains("shreddit-subreddit-header") || body_lower.contains(&format!("r/{}", name_lower));
    let has_content = body.contains("shreddit-post") || body.contains("slot=");
    if !has_header && !has_content {
        return Some("unavailable: no community content on page".to_string());
    }

    None
}

pub fn extract_metrics(html: &str) -> PageMetrics {
    let document = Html::parse_document(html);

    let weekly_visitors = slot_value(&document, VISITORS_SLOT);
    let weekly_contributions = CONTRIBUTION_SLOTS
        .iter()
        .find_map(|slot| slot_value(&document, slot));

    PageMetrics {
        weekly_visitors,
        weekly_contributions,
    }
}

fn slot_value(document: &Html, selector: &str) -> Option<u64> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| parse_metric(&el.text().collect::<String>()))
}

/// Parse display counts such as `1,234`, `1.2K` or `3M`.
pub fn parse_metric(text: &str) -> Option<u64> {
    let cleaned = text.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }

    let (number, multiplier) = match cleaned.chars().last()?.to_ascii_uppercase() {
        'K' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'M' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        'B' => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    let value: f64 = number.trim().parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
