//! Reddit JSON payloads and their conversion into domain values.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stance_core::{CoreError, RedditApiError, Submission};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
}

impl RedditPostData {
    pub fn into_submission(self, fallback_source: &str) -> Submission {
        let source = if self.subreddit.is_empty() {
            fallback_source.to_string()
        } else {
            self.subreddit
        };
        Submission {
            id: strip_fullname(&self.id).to_string(),
            source,
            created_utc: epoch_to_utc(self.created_utc),
            title: self.title,
            selftext: self.selftext,
            score: self.score,
            num_comments: self.num_comments,
            permalink: self.permalink,
            url: self.url.filter(|url| !url.is_empty()),
        }
    }
}

/// Where a comment claims to hang in the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Submission(String),
    Comment(String),
}

impl ParentRef {
    pub fn parse(fullname: &str) -> Option<Self> {
        let fullname = fullname.trim();
        if fullname.is_empty() {
            return None;
        }
        if let Some(id) = fullname.strip_prefix("t3_") {
            return Some(ParentRef::Submission(id.to_string()));
        }
        Some(ParentRef::Comment(strip_fullname(fullname).to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawComment {
    pub id: String,
    /// `None` when the payload omitted `parent_id`.
    pub parent: Option<ParentRef>,
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
    pub permalink: Option<String>,
    pub created_utc: Option<DateTime<Utc>>,
    pub replies: Vec<RawNode>,
}

/// A "load more comments" stub listing child ids still to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct MorePlaceholder {
    pub id: String,
    pub parent: Option<ParentRef>,
    pub children: Vec<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawNode {
    Comment(RawComment),
    More(MorePlaceholder),
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    replies: Value,
}

#[derive(Debug, Deserialize)]
struct MoreData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    count: i64,
}

/// One listing page: submissions and the `after` cursor.
pub fn parse_listing(
    payload: Value,
    source: &str,
) -> Result<(Vec<Submission>, Option<String>), CoreError> {
    let listing: RedditListing<RedditPostData> =
        serde_json::from_value(payload).map_err(|e| invalid(format!("listing for r/{}: {}", source, e)))?;

    let after = listing.data.after.filter(|cursor| !cursor.is_empty());
    let submissions = listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t3")
        .map(|child| child.data.into_submission(source))
        .collect();

    Ok((submissions, after))
}

/// `/comments/{id}` returns `[post listing, comment listing]`.
pub fn parse_thread(payload: Value, source: &str) -> Result<(Option<Submission>, Vec<RawNode>), CoreError> {
    let mut parts = match payload {
        Value::Array(parts) => parts.into_iter(),
        other => {
            return Err(invalid(format!(
                "thread payload is not an array (got {})",
                kind_name(&other)
            )))
        }
    };

    let submission = match parts.next() {
        Some(post_listing) => parse_listing(post_listing, source)?.0.into_iter().next(),
        None => None,
    };
    let forest = match parts.next() {
        Some(comment_listing) => parse_comment_listing(&comment_listing)?,
        None => Vec::new(),
    };

    Ok((submission, forest))
}

/// `/api/morechildren` returns a flat `json.data.things` list.
pub fn parse_morechildren(payload: &Value) -> Result<Vec<RawNode>, CoreError> {
    if let Some(errors) = payload.pointer("/json/errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Err(invalid(format!("morechildren errors: {}", Value::Array(errors.clone()))));
        }
    }

    let things = payload
        .pointer("/json/data/things")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("morechildren payload has no json.data.things".to_string()))?;

    let mut nodes = Vec::with_capacity(things.len());
    for thing in things {
        if let Some(node) = parse_thing(thing)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn parse_comment_listing(listing: &Value) -> Result<Vec<RawNode>, CoreError> {
    let children = match listing.pointer("/data/children").and_then(Value::as_array) {
        Some(children) => children,
        None => return Ok(Vec::new()),
    };

    let mut nodes = Vec::with_capacity(children.len());
    for child in children {
        if let Some(node) = parse_thing(child)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn parse_thing(thing: &Value) -> Result<Option<RawNode>, CoreError> {
    let kind = thing.get("kind").and_then(Value::as_str).unwrap_or_default();
    let data = match thing.get("data") {
        Some(data) => data.clone(),
        None => return Ok(None),
    };

    match kind {
        "t1" => {
            let data: CommentData =
                serde_json::from_value(data).map_err(|e| invalid(format!("comment: {}", e)))?;
            let replies = if data.replies.is_object() {
                parse_comment_listing(&data.replies)?
            } else {
                Vec::new()
            };
            Ok(Some(RawNode::Comment(RawComment {
                id: strip_fullname(&data.id).to_string(),
                parent: data.parent_id.as_deref().and_then(ParentRef::parse),
                author: normalize_author(data.author),
                body: data.body,
                score: data.score,
                permalink: data.permalink.filter(|link| !link.is_empty()),
                created_utc: data.created_utc.map(epoch_to_utc),
                replies,
            })))
        }
        "more" => {
            let data: MoreData =
                serde_json::from_value(data).map_err(|e| invalid(format!("more stub: {}", e)))?;
            Ok(Some(RawNode::More(MorePlaceholder {
                id: data.id,
                parent: data.parent_id.as_deref().and_then(ParentRef::parse),
                children: data
                    .children
                    .iter()
                    .map(|child| strip_fullname(child).to_string())
                    .collect(),
                count: data.count,
            })))
        }
        other => {
            debug!("Ignoring thing of kind {:?}", other);
            Ok(None)
        }
    }
}

/// `t1_abc` / `t3_abc` → `abc`.
pub fn strip_fullname(id: &str) -> &str {
    let id = id.trim();
    match id.split_once('_') {
        Some((prefix, rest)) if prefix.len() == 2 && prefix.starts_with('t') => rest,
        _ => id,
    }
}

fn normalize_author(author: Option<String>) -> Option<String> {
    author.filter(|name| !name.is_empty() && name != "[deleted]")
}

fn epoch_to_utc(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds.fract().abs()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single().unwrap_or_default()
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn invalid(details: String) -> CoreError {
    CoreError::RedditApi(RedditApiError::InvalidResponse { details })
}
