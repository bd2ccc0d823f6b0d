use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespace marker for file pages.
pub const FILE_PREFIX: &str = "File:";
/// Namespace marker for category pages.
pub const CATEGORY_PREFIX: &str = "Category:";

/// One entry of a `list=categorymembers` page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMember {
    #[serde(default)]
    pub pageid: Option<i64>,
    #[serde(default)]
    pub ns: Option<i64>,
    pub title: String,
    /// Whatever else the listing returned (sortkey, timestamp, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// All members of one category, across continuation pages.
#[derive(Debug, Clone, Default)]
pub struct CategoryListing {
    pub category: String,
    pub members: Vec<CategoryMember>,
    pub pages_fetched: usize,
    /// Set when the page cap was hit while the API still offered a continuation.
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryMembersPage {
    #[serde(default)]
    pub query: Option<CategoryMembersQuery>,
    /// Opaque continuation parameters; echoed back verbatim on the next request.
    #[serde(default, rename = "continue")]
    pub continuation: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CategoryMembersQuery {
    #[serde(default)]
    pub categorymembers: Vec<CategoryMember>,
}

impl CategoryMembersPage {
    pub(crate) fn into_parts(self) -> (Vec<CategoryMember>, Option<Vec<(String, String)>>) {
        let members = self.query.map(|q| q.categorymembers).unwrap_or_default();
        let next = self
            .continuation
            .filter(|c| c.contains_key("cmcontinue"))
            .map(|c| {
                c.into_iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, v)
                    })
                    .collect()
            });
        (members, next)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub info: String,
}
