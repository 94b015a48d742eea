//! Structural diffs between documents.
//!
//! [`diff`] describes how to turn one document into another as a list of [`Change`]s.
//! [`apply`] replays such a list onto a document. Replaying the diff of `a` to `b` onto
//! `a` yields `b`.
//!
//! Arrays are compared index by index. When an array shrinks, the removed indices are
//! emitted highest first, so replaying removals in order never shifts a pending one.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// One step of a change path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(u32),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<u32> for PathSegment {
    fn from(index: u32) -> Self {
        PathSegment::Index(index)
    }
}

/// A single structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Bson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Bson>,
}

impl Change {
    pub fn add(path: Vec<PathSegment>, new: Bson) -> Self {
        Self { kind: ChangeKind::Add, path, old: None, new: Some(new) }
    }

    pub fn update(path: Vec<PathSegment>, old: Bson, new: Bson) -> Self {
        Self { kind: ChangeKind::Update, path, old: Some(old), new: Some(new) }
    }

    pub fn delete(path: Vec<PathSegment>, old: Bson) -> Self {
        Self { kind: ChangeKind::Delete, path, old: Some(old), new: None }
    }

    /// Dot-joined path, as in `sections.1.heading`.
    pub fn dotted_path(&self) -> String {
        self.path
            .iter()
            .map(|segment| match segment {
                PathSegment::Key(key) => key.clone(),
                PathSegment::Index(index) => index.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Changes that turn `prev` into `next`.
pub fn diff(prev: &Document, next: &Document) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_documents(&mut Vec::new(), prev, next, &mut changes);
    changes
}

fn diff_documents(path: &mut Vec<PathSegment>, prev: &Document, next: &Document, changes: &mut Vec<Change>) {
    for (key, old) in prev {
        path.push(PathSegment::Key(key.clone()));

        match next.get(key) {
            Some(new) => diff_values(path, old, new, changes),
            None => changes.push(Change::delete(path.clone(), old.clone())),
        }

        path.pop();
    }

    for (key, new) in next {
        if !prev.contains_key(key) {
            let mut added = path.clone();
            added.push(PathSegment::Key(key.clone()));
            changes.push(Change::add(added, new.clone()));
        }
    }
}

fn diff_arrays(path: &mut Vec<PathSegment>, prev: &[Bson], next: &[Bson], changes: &mut Vec<Change>) {
    let common = prev.len().min(next.len());

    for (index, (old, new)) in prev.iter().zip(next).enumerate() {
        path.push(PathSegment::Index(index as u32));
        diff_values(path, old, new, changes);
        path.pop();
    }

    for (index, new) in next.iter().enumerate().skip(common) {
        let mut added = path.clone();
        added.push(PathSegment::Index(index as u32));
        changes.push(Change::add(added, new.clone()));
    }

    for (index, old) in prev.iter().enumerate().skip(common).rev() {
        let mut removed = path.clone();
        removed.push(PathSegment::Index(index as u32));
        changes.push(Change::delete(removed, old.clone()));
    }
}

fn diff_values(path: &mut Vec<PathSegment>, old: &Bson, new: &Bson, changes: &mut Vec<Change>) {
    match (old, new) {
        (Bson::Document(old), Bson::Document(new)) => diff_documents(path, old, new, changes),
        (Bson::Array(old), Bson::Array(new)) => diff_arrays(path, old, new, changes),
        (old, new) if old == new => {}
        (old, new) => changes.push(Change::update(path.clone(), old.clone(), new.clone())),
    }
}

/// Replays `changes` onto `state`, in order.
///
/// Missing intermediate containers are created for additions and updates. Deleting a
/// path that does not exist is a no-op.
pub fn apply(state: &mut Document, changes: &[Change]) {
    let mut root = Bson::Document(std::mem::take(state));

    for change in changes {
        if !change.path.is_empty() {
            apply_change(&mut root, &change.path, change);
        }
    }

    if let Bson::Document(document) = root {
        *state = document;
    }
}

fn apply_change(node: &mut Bson, path: &[PathSegment], change: &Change) {
    let Some((segment, rest)) = path.split_first() else {
        return;
    };

    let writing = change.kind != ChangeKind::Delete;

    if rest.is_empty() {
        match (segment, writing) {
            (PathSegment::Key(key), true) => {
                if let Some(document) = ensure_document(node) {
                    document.insert(key.clone(), change.new.clone().unwrap_or(Bson::Null));
                }
            }
            (PathSegment::Key(key), false) => {
                if let Bson::Document(document) = node {
                    document.remove(key);
                }
            }
            (PathSegment::Index(index), true) => {
                if let Some(array) = ensure_array(node) {
                    let index = *index as usize;
                    let value = change.new.clone().unwrap_or(Bson::Null);

                    if index < array.len() {
                        array[index] = value;
                    } else {
                        array.resize(index, Bson::Null);
                        array.push(value);
                    }
                }
            }
            (PathSegment::Index(index), false) => {
                if let Bson::Array(array) = node {
                    let index = *index as usize;
                    if index < array.len() {
                        array.remove(index);
                    }
                }
            }
        }

        return;
    }

    let child = match segment {
        PathSegment::Key(key) => {
            if !writing && !matches!(node, Bson::Document(document) if document.contains_key(key)) {
                return;
            }

            ensure_document(node).and_then(|document| {
                if !document.contains_key(key) {
                    document.insert(key.clone(), empty_container(&rest[0]));
                }

                document.get_mut(key)
            })
        }
        PathSegment::Index(index) => {
            let index = *index as usize;
            if !writing && !matches!(node, Bson::Array(array) if index < array.len()) {
                return;
            }

            ensure_array(node).and_then(|array| {
                if index >= array.len() {
                    array.resize(index, Bson::Null);
                    array.push(empty_container(&rest[0]));
                }

                array.get_mut(index)
            })
        }
    };

    if let Some(child) = child {
        apply_change(child, rest, change);
    }
}

/// Turns `node` into an empty document unless it already is one.
fn ensure_document(node: &mut Bson) -> Option<&mut Document> {
    if !matches!(node, Bson::Document(_)) {
        *node = Bson::Document(Document::new());
    }

    match node {
        Bson::Document(document) => Some(document),
        _ => None,
    }
}

fn ensure_array(node: &mut Bson) -> Option<&mut Vec<Bson>> {
    if !matches!(node, Bson::Array(_)) {
        *node = Bson::Array(Vec::new());
    }

    match node {
        Bson::Array(array) => Some(array),
        _ => None,
    }
}

fn empty_container(next: &PathSegment) -> Bson {
    match next {
        PathSegment::Key(_) => Bson::Document(Document::new()),
        PathSegment::Index(_) => Bson::Array(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn replay(prev: &Document, next: &Document) -> Document {
        let mut state = prev.clone();
        apply(&mut state, &diff(prev, next));
        state
    }

    #[test]
    fn identical_documents_have_no_changes() {
        let document = doc! { "title": "a", "tags": ["x"], "body": { "intro": "hi" } };

        assert!(diff(&document, &document).is_empty());
    }

    #[test]
    fn reports_adds_updates_and_deletes_by_path() {
        let prev = doc! { "title": "a", "body": { "intro": "hi", "outro": "bye" } };
        let next = doc! { "title": "b", "body": { "intro": "hi" }, "draft": true };

        assert_eq!(
            diff(&prev, &next),
            vec![
                Change::update(vec!["title".into()], Bson::from("a"), Bson::from("b")),
                Change::delete(vec!["body".into(), "outro".into()], Bson::from("bye")),
                Change::add(vec!["draft".into()], Bson::Boolean(true)),
            ]
        );
    }

    #[test]
    fn array_shrinkage_deletes_from_the_end() {
        let prev = doc! { "tags": ["a", "b", "c", "d"] };
        let next = doc! { "tags": ["a", "x"] };
        let changes = diff(&prev, &next);

        assert_eq!(
            changes.iter().map(Change::dotted_path).collect::<Vec<_>>(),
            vec!["tags.1", "tags.3", "tags.2"]
        );
        assert_eq!(replay(&prev, &next), next);
    }

    #[test]
    fn replay_reproduces_the_target() {
        let cases = [
            (doc! {}, doc! { "title": "a", "tags": ["x", "y"] }),
            (doc! { "tags": ["x"] }, doc! { "tags": ["x", "y", "z"] }),
            (
                doc! { "sections": [{ "heading": "a" }, { "heading": "b" }] },
                doc! { "sections": [{ "heading": "a", "text": "t" }] },
            ),
            (doc! { "value": { "nested": 1 } }, doc! { "value": 1 }),
            (doc! { "value": 1 }, doc! { "value": [1, 2] }),
        ];

        for (prev, next) in cases {
            assert_eq!(replay(&prev, &next), next);
        }
    }

    #[test]
    fn applying_onto_missing_paths_creates_containers() {
        let mut state = Document::new();
        apply(
            &mut state,
            &[
                Change::add(vec!["a".into(), "b".into()], Bson::Int32(1)),
                Change::add(vec!["list".into(), 1u32.into(), "x".into()], Bson::Int32(2)),
            ],
        );

        assert_eq!(state, doc! { "a": { "b": 1 }, "list": [null, { "x": 2 }] });
    }

    #[test]
    fn deleting_missing_paths_is_a_no_op() {
        let mut state = doc! { "a": 1 };
        apply(
            &mut state,
            &[
                Change::delete(vec!["b".into(), "c".into()], Bson::Null),
                Change::delete(vec!["a".into(), 3u32.into()], Bson::Null),
                Change::delete(vec!["missing".into()], Bson::Null),
            ],
        );

        assert_eq!(state, doc! { "a": 1 });
    }

    #[test]
    fn changes_survive_a_bson_round_trip() {
        let change = Change::update(vec!["list".into(), 2u32.into()], Bson::from("a"), Bson::from("b"));
        let bson = bson::ser::serialize_to_bson(&change).unwrap();

        assert_eq!(bson::de::deserialize_from_bson::<Change>(bson).unwrap(), change);
    }
}
