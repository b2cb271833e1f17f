use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// Number of leading image bytes folded into an image dedup key.
const DEDUP_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Text,
    Image,
}

/// One retained clipboard capture.
///
/// `text` is present for [`EntryKind::Text`] entries and `image_data` (JPEG
/// bytes) for [`EntryKind::Image`] entries. The dedup key is derived from the
/// payload when the entry is built and recomputed when it is deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredEntry")]
pub struct ClipboardEntry {
    pub id: Uuid,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub image_data: Option<Vec<u8>>,
    pub date_added: DateTime<Utc>,
    pub pinned: bool,
    dedup_key: String,
}

// Wire shape; `dedupKey` is accepted but never trusted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    id: Uuid,
    kind: EntryKind,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, with = "base64_bytes")]
    image_data: Option<Vec<u8>>,
    date_added: DateTime<Utc>,
    #[serde(default)]
    pinned: bool,
}

impl From<StoredEntry> for ClipboardEntry {
    fn from(stored: StoredEntry) -> Self {
        Self::with_parts(
            stored.id,
            stored.kind,
            stored.text,
            stored.image_data,
            stored.date_added,
            stored.pinned,
        )
    }
}

impl ClipboardEntry {
    pub fn text(text: String) -> Self {
        Self::with_parts(
            Uuid::new_v4(),
            EntryKind::Text,
            Some(text),
            None,
            Utc::now(),
            false,
        )
    }

    pub fn image(jpeg: Vec<u8>) -> Self {
        Self::with_parts(
            Uuid::new_v4(),
            EntryKind::Image,
            None,
            Some(jpeg),
            Utc::now(),
            false,
        )
    }

    pub fn with_parts(
        id: Uuid,
        kind: EntryKind,
        text: Option<String>,
        image_data: Option<Vec<u8>>,
        date_added: DateTime<Utc>,
        pinned: bool,
    ) -> Self {
        let dedup_key = dedup_key(kind, text.as_deref(), image_data.as_deref(), id);
        Self {
            id,
            kind,
            text,
            image_data,
            date_added,
            pinned,
            dedup_key,
        }
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn display_title(&self) -> &str {
        match self.kind {
            EntryKind::Text => self.text.as_deref().unwrap_or(""),
            EntryKind::Image => "Image",
        }
    }

    /// Single-line preview cut to at most `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let flat = self.display_title().replace(['\n', '\t'], " ");
        if flat.chars().count() <= max_chars {
            flat
        } else {
            let mut cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
            cut.push('…');
            cut
        }
    }

    /// Case-insensitive text match; image entries only match the empty query.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        match &self.text {
            Some(text) => text.to_lowercase().contains(&query.to_lowercase()),
            None => false,
        }
    }

    /// Wipe the text payload before the entry is dropped.
    pub fn scrub(&mut self) {
        if let Some(text) = self.text.as_mut() {
            text.zeroize();
        }
        self.dedup_key.zeroize();
    }
}

/// Text entries key on the literal text. Image entries key on byte length
/// plus a hex prefix of the encoded stream, which can collide for distinct
/// images with equal length and leading bytes.
pub fn dedup_key(kind: EntryKind, text: Option<&str>, image_data: Option<&[u8]>, id: Uuid) -> String {
    match kind {
        EntryKind::Text => text.unwrap_or_default().to_string(),
        EntryKind::Image => match image_data {
            Some(data) => {
                let prefix: String = data
                    .iter()
                    .take(DEDUP_PREFIX_LEN)
                    .map(|b| format!("{:02x}", b))
                    .collect();
                format!("{}-{}", data.len(), prefix)
            }
            None => id.to_string(),
        },
    }
}

pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let ago_secs = (now - then).num_seconds().max(0);

    if ago_secs < 60 {
        format!("{}s", ago_secs)
    } else if ago_secs < 3600 {
        format!("{}m", ago_secs / 60)
    } else if ago_secs < 86400 {
        format!("{}h", ago_secs / 3600)
    } else {
        format!("{}d", ago_secs / 86400)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
