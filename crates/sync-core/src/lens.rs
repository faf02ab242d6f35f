//! Projection from raw store documents to engine-facing records.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::types::{Document, Fields, ForeignRef, Patch, Record, UpdatePatch};

/// How a record's unread flag is derived from its fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnreadRule {
    /// Unread iff the boolean field is false or absent (notification `read`).
    Flag { field: String },
    /// Unread iff the lens viewer is the recipient and the counter is
    /// positive (chat-room `recipientId`/`unreadCount`).
    RecipientCounter {
        recipient_field: String,
        count_field: String,
    },
}

/// How a record's foreign-key reference is derived from its fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ForeignRefRule {
    /// The referenced profile is whichever of the two member fields is not
    /// the viewer (chat-room partner account).
    Partner {
        first_field: String,
        second_field: String,
        collection: String,
    },
}

/// Per-screen interpretation of raw documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordLens {
    /// Viewer id used by recipient and partner rules.
    pub viewer_id: Option<String>,
    /// Field holding the epoch-millisecond sort key.
    pub sort_field: String,
    /// Unread derivation; `None` means nothing is ever unread.
    pub unread: Option<UnreadRule>,
    /// Foreign-key derivation; `None` means nothing is resolved.
    pub foreign_ref: Option<ForeignRefRule>,
}

impl RecordLens {
    pub fn new(sort_field: impl Into<String>) -> Self {
        Self {
            viewer_id: None,
            sort_field: sort_field.into(),
            unread: None,
            foreign_ref: None,
        }
    }

    pub fn with_viewer(mut self, viewer_id: impl Into<String>) -> Self {
        self.viewer_id = Some(viewer_id.into());
        self
    }

    pub fn with_unread(mut self, rule: UnreadRule) -> Self {
        self.unread = Some(rule);
        self
    }

    pub fn with_foreign_ref(mut self, rule: ForeignRefRule) -> Self {
        self.foreign_ref = Some(rule);
        self
    }

    /// Project one raw document into an engine record.
    ///
    /// A record whose sort field is absent or malformed is clamped to
    /// `now_ms` rather than dropped.
    pub fn project(&self, doc: Document, now_ms: i64) -> Record {
        let Document { id, fields } = doc;
        let sort_key_ms = match field_ms(fields.get(&self.sort_field)) {
            Some(ms) => ms,
            None => {
                warn!(
                    record_id = %id,
                    sort_field = %self.sort_field,
                    "sort field missing or malformed; clamping to now"
                );
                now_ms
            }
        };

        Record {
            unread: self.is_unread(&fields),
            foreign_ref: self.foreign_ref_of(&fields),
            id,
            sort_key_ms,
            fields,
        }
    }

    /// Remote patch transitioning an item to read under this lens.
    pub fn mark_read_patch(&self) -> Option<Patch> {
        match self.unread.as_ref()? {
            UnreadRule::Flag { field } => {
                Some(Patch::Update(UpdatePatch::default().set(field, json!(true))))
            }
            UnreadRule::RecipientCounter { count_field, .. } => Some(Patch::Update(
                UpdatePatch::default().set(count_field, json!(0)),
            )),
        }
    }

    fn is_unread(&self, fields: &Fields) -> bool {
        match &self.unread {
            None => false,
            Some(UnreadRule::Flag { field }) => {
                !fields.get(field).and_then(Value::as_bool).unwrap_or(false)
            }
            Some(UnreadRule::RecipientCounter {
                recipient_field,
                count_field,
            }) => {
                let recipient = fields.get(recipient_field).and_then(Value::as_str);
                let count = fields.get(count_field).and_then(Value::as_i64).unwrap_or(0);
                self.viewer_id.as_deref() == recipient && recipient.is_some() && count > 0
            }
        }
    }

    fn foreign_ref_of(&self, fields: &Fields) -> Option<ForeignRef> {
        let ForeignRefRule::Partner {
            first_field,
            second_field,
            collection,
        } = self.foreign_ref.as_ref()?;

        let first = fields.get(first_field).and_then(Value::as_str);
        let second = fields.get(second_field).and_then(Value::as_str);
        let viewer = self.viewer_id.as_deref();

        let partner = if first == viewer { second } else { first };
        let partner = partner?.trim();
        if partner.is_empty() {
            return None;
        }

        Some(ForeignRef {
            collection: collection.clone(),
            id: partner.to_owned(),
        })
    }
}

fn field_ms(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64)),
        _ => None,
    }
}
