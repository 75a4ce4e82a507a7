use serde::{Deserialize, Serialize};

/// The well-known kind used for the replaceable checkpoint record.
pub const CHECKPOINT_KIND: u32 = 30078;

/// An ordered sequence of strings, e.g. `["d", "wss://source.example"]`.
pub type Tag = Vec<String>;

/// A signed, immutable event as received from or published to a relay.
///
/// The core treats events as opaque payloads except for `id`, `pubkey`,
/// `kind`, and — for checkpoints — specific tag values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Value of the first `d` tag, if any.
    pub fn d_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some("d"))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// Value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// An event prior to id computation and signing.
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// A query filter, matching the subset of NIP-01 filter fields this core
/// uses: authors, kinds, a half-open `[since, until)` time range, a result
/// limit, and a tag-value constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Tag-name -> allowed values, e.g. `{"d": ["wss://source.example"]}`.
    #[serde(flatten, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub tags: std::collections::HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn checkpoint(signer_pubkey: &str, source_url: &str) -> Self {
        let mut tags = std::collections::HashMap::new();
        tags.insert("#d".to_string(), vec![source_url.to_string()]);
        Filter {
            authors: Some(vec![signer_pubkey.to_string()]),
            kinds: Some(vec![CHECKPOINT_KIND]),
            limit: Some(1),
            tags,
            ..Default::default()
        }
    }

    pub fn window(since: i64, until: i64, limit: u32) -> Self {
        Filter {
            since: Some(since),
            until: Some(until),
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn realtime(limit: u32) -> Self {
        Filter {
            limit: Some(limit),
            ..Default::default()
        }
    }
}
