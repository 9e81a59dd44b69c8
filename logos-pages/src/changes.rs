//! Change sets and cursor effects.
//!
//! A [`ChangeSet`] describes one edit against a document of known length as a
//! run of sections: keep `n` characters, or replace `delete` characters with an
//! inserted string. Lengths and positions count Unicode scalar values, the
//! same char indices [`Rope`] uses.
//!
//! Wire form (JSON array, one entry per section):
//! ```text
//! [5, [0, "hello"], 3]        keep 5, insert "hello", keep 3
//! [2, [4], 1]                 keep 2, delete 4, keep 1
//! [[1, "line one", "two"]]    replace 1 char with "line one\ntwo"
//! ```

use ropey::Rope;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Which side of an insertion a mapped position lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Stay before text inserted at the position.
    Left,
    /// Move after text inserted at the position.
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Retain(usize),
    Replace { delete: usize, insert: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    sections: Vec<Section>,
}

impl ChangeSet {
    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    /// A change set that keeps a document of `doc_len` characters untouched.
    pub fn identity(doc_len: usize) -> Self {
        let sections = if doc_len > 0 {
            vec![Section::Retain(doc_len)]
        } else {
            Vec::new()
        };
        Self { sections }
    }

    /// Replace `from..to` in a document of `doc_len` characters with `text`.
    pub fn replace(doc_len: usize, from: usize, to: usize, text: impl Into<String>) -> Result<Self> {
        if from > to || to > doc_len {
            return Err(SyncError::ChangeSet(format!(
                "range {from}..{to} outside document of length {doc_len}"
            )));
        }
        let mut sections = Vec::with_capacity(3);
        if from > 0 {
            sections.push(Section::Retain(from));
        }
        sections.push(Section::Replace {
            delete: to - from,
            insert: text.into(),
        });
        if doc_len > to {
            sections.push(Section::Retain(doc_len - to));
        }
        Ok(Self { sections })
    }

    pub fn insert(doc_len: usize, pos: usize, text: impl Into<String>) -> Result<Self> {
        Self::replace(doc_len, pos, pos, text)
    }

    pub fn delete(doc_len: usize, from: usize, to: usize) -> Result<Self> {
        Self::replace(doc_len, from, to, "")
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Length of the document this change set applies to.
    pub fn len(&self) -> usize {
        self.sections
            .iter()
            .map(|s| match s {
                Section::Retain(n) => *n,
                Section::Replace { delete, .. } => *delete,
            })
            .sum()
    }

    /// Length of the document after applying.
    pub fn new_len(&self) -> usize {
        self.sections
            .iter()
            .map(|s| match s {
                Section::Retain(n) => *n,
                Section::Replace { insert, .. } => insert.chars().count(),
            })
            .sum()
    }

    /// Whether the change set leaves its document untouched.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| match s {
            Section::Retain(_) => true,
            Section::Replace { delete, insert } => *delete == 0 && insert.is_empty(),
        })
    }

    /// Apply to `doc` in place. Its length must equal [`ChangeSet::len`];
    /// on mismatch the document is left untouched.
    pub fn apply(&self, doc: &mut Rope) -> Result<()> {
        let doc_len = doc.len_chars();
        if doc_len != self.len() {
            return Err(SyncError::ChangeSet(format!(
                "change set expects length {}, document has {doc_len}",
                self.len()
            )));
        }

        let mut pos = 0;
        for section in &self.sections {
            match section {
                Section::Retain(n) => pos += n,
                Section::Replace { delete, insert } => {
                    if *delete > 0 {
                        doc.remove(pos..pos + delete);
                    }
                    if !insert.is_empty() {
                        doc.insert(pos, insert);
                        pos += insert.chars().count();
                    }
                }
            }
        }
        Ok(())
    }

    /// Map a position in the old document to the new one.
    ///
    /// `bias` decides where a position exactly at an insertion point ends up.
    /// A position inside or at the end of a deleted range moves after the
    /// replacement text.
    pub fn map_pos(&self, pos: usize, bias: Bias) -> usize {
        let (mut old, mut new) = (0usize, 0usize);
        for section in &self.sections {
            match section {
                Section::Retain(n) => {
                    if old + n > pos {
                        return new + (pos - old);
                    }
                    old += n;
                    new += n;
                }
                Section::Replace { delete, insert } => {
                    let inserted = insert.chars().count();
                    if pos == old && bias == Bias::Left {
                        return new;
                    }
                    if pos <= old + delete {
                        return new + inserted;
                    }
                    old += delete;
                    new += inserted;
                }
            }
        }
        new + pos.saturating_sub(old)
    }

    pub fn to_json(&self) -> Value {
        let sections = self
            .sections
            .iter()
            .map(|s| match s {
                Section::Retain(n) => Value::from(*n),
                Section::Replace { delete, insert } => {
                    let mut entry = vec![Value::from(*delete)];
                    if !insert.is_empty() {
                        entry.extend(insert.split('\n').map(Value::from));
                    }
                    Value::Array(entry)
                }
            })
            .collect();
        Value::Array(sections)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let entries = value
            .as_array()
            .ok_or_else(|| SyncError::ChangeSet("expected an array of sections".into()))?;

        let mut sections = Vec::with_capacity(entries.len());
        for entry in entries {
            let section = match entry {
                Value::Number(_) => Section::Retain(as_len(entry)?),
                Value::Array(parts) => {
                    let (first, lines) = parts
                        .split_first()
                        .ok_or_else(|| SyncError::ChangeSet("empty replace section".into()))?;
                    let delete = as_len(first)?;
                    let lines = lines
                        .iter()
                        .map(|l| {
                            l.as_str()
                                .ok_or_else(|| SyncError::ChangeSet(format!("non-string line {l}")))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Section::Replace {
                        delete,
                        insert: lines.join("\n"),
                    }
                }
                other => {
                    return Err(SyncError::ChangeSet(format!("unexpected section {other}")));
                }
            };
            sections.push(section);
        }
        Ok(Self { sections })
    }
}

fn as_len(value: &Value) -> Result<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| SyncError::ChangeSet(format!("invalid length {value}")))
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Caret position of a collaborator, riding alongside a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    pub pos: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Cursor {
    pub fn new(user_id: impl Into<String>, pos: usize) -> Self {
        Self {
            user_id: user_id.into(),
            pos,
            color: None,
        }
    }

    /// Rebuild a cursor effect from its raw wire value.
    pub fn from_raw(raw: Value) -> Result<Self> {
        serde_json::from_value(raw).map_err(|e| SyncError::Payload(format!("cursor: {e}")))
    }

    pub fn to_raw(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// The same cursor moved through `changes`. A remote caret stays before
    /// text inserted right at it.
    pub fn mapped(&self, changes: &ChangeSet) -> Self {
        Self {
            pos: changes.map_pos(self.pos, Bias::Left),
            ..self.clone()
        }
    }
}
