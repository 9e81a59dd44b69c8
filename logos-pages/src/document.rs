//! Version-stamped updates and the local state of an open page.

use std::collections::HashMap;

use ropey::Rope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::{ChangeSet, Cursor};
use crate::error::{Result, SyncError};
use crate::registry::PageMeta;

/// One edit, in the local model.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub changes: ChangeSet,
    /// Client that produced the edit
    pub client_id: String,
    /// Cursor effects riding alongside the change set
    pub cursors: Vec<Cursor>,
}

impl Update {
    pub fn new(changes: ChangeSet, client_id: impl Into<String>) -> Self {
        Self {
            changes,
            client_id: client_id.into(),
            cursors: Vec::new(),
        }
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursors.push(cursor);
        self
    }

    pub fn to_wire(&self) -> Result<WireUpdate> {
        let cursors = if self.cursors.is_empty() {
            None
        } else {
            Some(self.cursors.iter().map(Cursor::to_raw).collect::<Result<Vec<_>>>()?)
        };
        Ok(WireUpdate {
            client_id: self.client_id.clone(),
            changes: self.changes.to_json(),
            cursors,
        })
    }

    pub fn from_wire(wire: WireUpdate) -> Result<Self> {
        let cursors = wire
            .cursors
            .unwrap_or_default()
            .into_iter()
            .map(Cursor::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            changes: ChangeSet::from_json(&wire.changes)?,
            client_id: wire.client_id,
            cursors,
        })
    }
}

/// Wire shape of an update: `{clientID, changes, cursors?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUpdate {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub changes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursors: Option<Vec<Value>>,
}

/// Payload of `page.readPage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub text: String,
    pub meta: PageMeta,
}

/// Payload of `page.openPage`: full collaborative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedPage {
    pub text: String,
    pub version: u64,
    #[serde(default)]
    pub cursors: HashMap<String, Cursor>,
}

/// Local editable state of an open page.
#[derive(Debug, Clone, PartialEq)]
pub struct CollabDocument {
    name: String,
    text: Rope,
    version: u64,
    cursors: HashMap<String, Cursor>,
}

impl CollabDocument {
    pub fn new(name: impl Into<String>, text: &str, version: u64) -> Self {
        Self {
            name: name.into(),
            text: Rope::from_str(text),
            version,
            cursors: HashMap::new(),
        }
    }

    pub fn from_opened(name: impl Into<String>, opened: OpenedPage) -> Self {
        Self {
            name: name.into(),
            text: Rope::from_str(&opened.text),
            version: opened.version,
            cursors: opened.cursors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &Rope {
        &self.text
    }

    /// Version of the last applied update, as assigned by the server.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cursors(&self) -> &HashMap<String, Cursor> {
        &self.cursors
    }

    /// Replace the cursor map wholesale (e.g. from a cursor snapshot).
    pub fn set_cursors(&mut self, cursors: HashMap<String, Cursor>) {
        self.cursors = cursors;
    }

    /// Apply an update set pulled starting at `from_version`.
    ///
    /// `from_version` must equal the local version. The whole set is applied or
    /// none of it: on error the document is left untouched.
    pub fn apply_updates(&mut self, from_version: u64, updates: &[Update]) -> Result<()> {
        if from_version != self.version {
            return Err(SyncError::OutOfOrder {
                local: self.version,
                pulled: from_version,
            });
        }

        // Committed only if every update applies.
        let mut text = self.text.clone();
        let mut cursors = self.cursors.clone();
        for update in updates {
            update.changes.apply(&mut text)?;
            for cursor in cursors.values_mut() {
                *cursor = cursor.mapped(&update.changes);
            }
            for cursor in &update.cursors {
                cursors.insert(cursor.user_id.clone(), cursor.clone());
            }
        }

        self.text = text;
        self.cursors = cursors;
        self.version += updates.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(doc_len: usize, pos: usize, text: &str, client: &str) -> Update {
        Update::new(ChangeSet::insert(doc_len, pos, text).unwrap(), client)
    }

    #[test]
    fn test_wire_shape() {
        let update = insert(0, 0, "hi", "c1").with_cursor(Cursor::new("c1", 2));
        let wire = serde_json::to_value(update.to_wire().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({"clientID": "c1", "changes": [[0, "hi"]], "cursors": [{"userId": "c1", "pos": 2}]})
        );
    }

    #[test]
    fn test_wire_omits_empty_cursors() {
        let wire = serde_json::to_value(insert(0, 0, "hi", "c1").to_wire().unwrap()).unwrap();
        assert!(wire.get("cursors").is_none());
    }

    #[test]
    fn test_from_wire_rebuilds_cursor_effects() {
        let wire: WireUpdate = serde_json::from_value(json!({
            "clientID": "peer",
            "changes": [3, [0, "!"]],
            "cursors": [{"userId": "peer", "pos": 4, "color": "red"}]
        }))
        .unwrap();
        let update = Update::from_wire(wire).unwrap();
        assert_eq!(update.client_id, "peer");
        let mut rope = Rope::from_str("abc");
        update.changes.apply(&mut rope).unwrap();
        assert_eq!(rope.to_string(), "abc!");
        assert_eq!(update.cursors[0].color.as_deref(), Some("red"));
    }

    #[test]
    fn test_apply_updates_in_order() {
        let mut doc = CollabDocument::new("notes", "ab", 5);
        let updates = vec![insert(2, 2, "c", "x"), insert(3, 0, ">", "y")];
        doc.apply_updates(5, &updates).unwrap();
        assert_eq!(doc.text().to_string(), ">abc");
        assert_eq!(doc.version(), 7);
    }

    #[test]
    fn test_apply_rejects_wrong_start_version() {
        let mut doc = CollabDocument::new("notes", "ab", 5);
        let err = doc.apply_updates(4, &[insert(2, 0, "x", "p")]).unwrap_err();
        assert!(matches!(err, SyncError::OutOfOrder { local: 5, pulled: 4 }));
        assert_eq!(doc.version(), 5);
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let mut doc = CollabDocument::new("notes", "ab", 0);
        // Second update expects a 10-char document.
        let updates = vec![insert(2, 0, "x", "p"), insert(10, 0, "y", "p")];
        assert!(doc.apply_updates(0, &updates).is_err());
        assert_eq!(doc.text().to_string(), "ab");
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn test_remote_cursors_follow_edits() {
        let mut cursors = HashMap::new();
        cursors.insert("peer".to_string(), Cursor::new("peer", 2));
        let mut doc = CollabDocument::from_opened(
            "notes",
            OpenedPage {
                text: "abcd".into(),
                version: 1,
                cursors,
            },
        );

        let update = insert(4, 0, "xy", "other").with_cursor(Cursor::new("other", 2));
        doc.apply_updates(1, &[update]).unwrap();

        assert_eq!(doc.cursors()["peer"].pos, 4);
        assert_eq!(doc.cursors()["other"].pos, 2);
    }

    #[test]
    fn test_empty_pull_keeps_version() {
        let mut doc = CollabDocument::new("notes", "ab", 3);
        doc.apply_updates(3, &[]).unwrap();
        assert_eq!(doc.version(), 3);
    }
}
