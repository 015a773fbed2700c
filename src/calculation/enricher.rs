use serde_json::{Map, Value};

use crate::config::columns::{TAG_CLIENT, TAG_USER};
use crate::prelude::*;

use super::resolver::PatternResolver;

/// The three states a `resource_tags` cell can be in.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributionTag {
    /// Absent, blank, or `{}`. Needs the pattern resolver.
    Empty,
    /// A JSON object. Either key may be missing.
    Parsed {
        client: Option<String>,
        user: Option<String>,
    },
    /// Not JSON, or JSON that isn't an object.
    Malformed,
}

impl AttributionTag {
    pub fn parse(blob: Option<&str>) -> Self {
        let Some(blob) = blob.map(str::trim).filter(|blob| !blob.is_empty()) else {
            return AttributionTag::Empty;
        };

        match serde_json::from_str::<Value>(blob) {
            Ok(Value::Object(tags)) if tags.is_empty() => AttributionTag::Empty,
            Ok(Value::Object(tags)) => AttributionTag::Parsed {
                client: tag_text(&tags, TAG_CLIENT),
                user: tag_text(&tags, TAG_USER),
            },
            Ok(_) | Err(_) => AttributionTag::Malformed,
        }
    }

    /// Canonical JSON form of the tag, the way it would be written back to the row.
    pub fn encode(&self) -> String {
        match self {
            AttributionTag::Empty | AttributionTag::Malformed => "{}".to_owned(),
            AttributionTag::Parsed { client, user } => {
                let mut tags = Map::new();
                if let Some(client) = client {
                    tags.insert(TAG_CLIENT.to_owned(), Value::from(client.as_str()));
                }
                if let Some(user) = user {
                    tags.insert(TAG_USER.to_owned(), Value::from(user.as_str()));
                }

                Value::Object(tags).to_string()
            }
        }
    }
}

/// Which branch produced an attribution. Only used for run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributionSource {
    Tagged,
    Pattern,
    Unresolved,
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub client: String,
    pub user: String,
    pub source: AttributionSource,
    /// The tag after resolution, in canonical form.
    pub tag: AttributionTag,
}

/// Turns a tag blob and a resource id into a `(client, user)` pair. Never fails.
pub fn enrich(
    blob: Option<&str>,
    resource_id: Option<&str>,
    resolver: &PatternResolver,
) -> Attribution {
    let (tag, source) = match AttributionTag::parse(blob) {
        AttributionTag::Empty => match resource_id.and_then(|id| resolver.resolve(id)) {
            Some(token) => (
                AttributionTag::Parsed {
                    client: Some(token.to_owned()),
                    user: None,
                },
                AttributionSource::Pattern,
            ),
            None => (AttributionTag::Empty, AttributionSource::Unresolved),
        },
        parsed @ AttributionTag::Parsed { .. } => (parsed, AttributionSource::Tagged),
        AttributionTag::Malformed => (AttributionTag::Malformed, AttributionSource::Malformed),
    };

    let (client, user) = match &tag {
        AttributionTag::Parsed { client, user } => (
            client.clone().unwrap_or_else(|| UNKNOWN.to_owned()),
            user.clone().unwrap_or_else(|| UNKNOWN.to_owned()),
        ),
        AttributionTag::Empty | AttributionTag::Malformed => {
            (UNKNOWN.to_owned(), UNKNOWN.to_owned())
        }
    };

    Attribution {
        client,
        user,
        source,
        tag,
    }
}

// private

/// Strings as they are, other scalars as their JSON text, `null` as missing.
fn tag_text(tags: &Map<String, Value>, key: &str) -> Option<String> {
    match tags.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
