use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Authors the content graph uses for removed or anonymised accounts.
const ANONYMISED_AUTHORS: &[&str] = &["[deleted]", "[removed]", "AutoModerator"];

/// Envelope used by every JSON endpoint: `{"kind": .., "data": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    #[serde(default)]
    pub kind: Option<String>,
    pub data: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostData {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub over_18: bool,
}

/// Summary info from `/r/<name>/about.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AboutData {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub over18: bool,
    #[serde(default)]
    pub subscribers: Option<u64>,
    #[serde(default)]
    pub public_description: Option<String>,
}

/// Error body returned instead of an about page, e.g.
/// `{"reason": "banned", "message": "Not Found", "error": 404}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<u16>,
}

pub type PostListing = Thing<Listing<PostData>>;
pub type About = Thing<AboutData>;

pub fn new_posts_path(name: &str) -> String {
    format!("/r/{}/new.json?limit=25", name)
}

pub fn submitted_path(author: &str) -> String {
    format!("/user/{}/submitted.json?limit=100", author)
}

pub fn about_path(name: &str) -> String {
    format!("/r/{}/about.json", name)
}

impl Listing<PostData> {
    /// Distinct, real authors in listing order.
    pub fn authors(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.children
            .iter()
            .filter_map(|post| post.data.author.as_deref())
            .filter(|author| !author.is_empty() && !ANONYMISED_AUTHORS.contains(author))
            .filter(|author| seen.insert(author.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Distinct lowercase community names of posts flagged adult-content.
    pub fn adult_communities(&self) -> BTreeSet<String> {
        self.children
            .iter()
            .filter(|post| post.data.over_18)
            .filter_map(|post| post.data.subreddit.as_deref())
            .map(str::to_lowercase)
            .collect()
    }
}
