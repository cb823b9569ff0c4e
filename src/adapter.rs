//! Turns result lists into rows: incremental diffs and match highlighting.

use std::collections::{HashMap, HashSet};

use crate::document::TEXT_PROPERTY;
use crate::types::{Note, NoteSearchResult};

/// One step of turning the old list into the new one. Steps are applied in
/// order; every index refers to the list as it is after the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Remove { index: usize },
    /// Take the item at `from` out, then put it back at `to`.
    Move { from: usize, to: usize },
    Insert { index: usize },
    /// Same note identity, different content. Index in the final list.
    Change { index: usize },
}

type Key<'a> = (&'a str, &'a str);

fn key(result: &NoteSearchResult) -> Key<'_> {
    (result.note.namespace.as_str(), result.note.id.as_str())
}

/// Items of the longest common subsequence of `a` and `b`.
fn lcs<'a>(a: &[Key<'a>], b: &[Key<'a>]) -> HashSet<Key<'a>> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut common = HashSet::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            common.insert(a[i]);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    common
}

/// Minimal edit script from `old` to `new`, keyed by note identity.
///
/// Identities present in both lists stay put when they belong to the longest
/// common subsequence and are moved otherwise, so the number of moves is the
/// smallest possible. Both lists must hold each identity at most once.
pub fn diff(old: &[NoteSearchResult], new: &[NoteSearchResult]) -> Vec<DiffOp> {
    let old_keys: HashSet<Key> = old.iter().map(key).collect();
    let new_keys: HashSet<Key> = new.iter().map(key).collect();
    let mut ops = Vec::new();

    for (index, item) in old.iter().enumerate().rev() {
        if !new_keys.contains(&key(item)) {
            ops.push(DiffOp::Remove { index });
        }
    }

    let mut work: Vec<Key> = old.iter().map(key).filter(|k| new_keys.contains(k)).collect();
    let target: Vec<Key> = new.iter().map(key).filter(|k| old_keys.contains(k)).collect();
    let anchors = lcs(&work, &target);

    let mut previous: Option<Key> = None;
    for &k in &target {
        if !anchors.contains(&k) {
            if let Some(from) = work.iter().position(|w| *w == k) {
                work.remove(from);
                let to = previous
                    .and_then(|p| work.iter().position(|w| *w == p))
                    .map_or(0, |i| i + 1);
                work.insert(to, k);
                if from != to {
                    ops.push(DiffOp::Move { from, to });
                }
            }
        }
        previous = Some(k);
    }

    for (index, item) in new.iter().enumerate() {
        if !old_keys.contains(&key(item)) {
            ops.push(DiffOp::Insert { index });
        }
    }

    let old_notes: HashMap<Key, &Note> = old.iter().map(|r| (key(r), &r.note)).collect();
    for (index, item) in new.iter().enumerate() {
        if old_notes.get(&key(item)).is_some_and(|n| **n != item.note) {
            ops.push(DiffOp::Change { index });
        }
    }
    ops
}

/// A piece of note text, bold when it is part of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub bold: bool,
}

/// Split the note text into plain and bold segments. Only exact-match
/// ranges reported for the `text` property count.
pub fn highlight(result: &NoteSearchResult) -> Vec<Segment<'_>> {
    let text = result.note.text.as_str();
    let mut ranges: Vec<(usize, usize)> = result
        .matches
        .iter()
        .filter(|m| m.property_path == TEXT_PROPERTY && m.full_text == text)
        .map(|m| m.exact_match_range)
        .filter(|r| !r.is_empty() && text.get(r.as_range()).is_some())
        .map(|r| (r.start, r.end))
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut segments = Vec::new();
    let mut cursor = 0;
    for (start, end) in merged {
        if start > cursor {
            segments.push(Segment { text: &text[cursor..start], bold: false });
        }
        segments.push(Segment { text: &text[start..end], bold: true });
        cursor = end;
    }
    if cursor < text.len() {
        segments.push(Segment { text: &text[cursor..], bold: false });
    }
    segments
}

/// Render segments, wrapping bold ones in `open`/`close`.
pub fn render_segments(segments: &[Segment<'_>], open: &str, close: &str) -> String {
    segments.iter().fold(String::new(), |mut out, s| {
        if s.bold {
            out.push_str(open);
            out.push_str(s.text);
            out.push_str(close);
        } else {
            out.push_str(s.text);
        }
        out
    })
}

type DeleteHandler = Box<dyn Fn(&Note) + Send + Sync>;

/// Holds the displayed list and applies new lists as diffs.
pub struct NoteListAdapter {
    items: Vec<NoteSearchResult>,
    on_delete: DeleteHandler,
}

impl NoteListAdapter {
    /// `on_delete` runs when a row's delete action fires.
    pub fn new(on_delete: impl Fn(&Note) + Send + Sync + 'static) -> Self {
        Self {
            items: Vec::new(),
            on_delete: Box::new(on_delete),
        }
    }

    /// Replace the list, returning the edits that were needed.
    pub fn submit_list(&mut self, list: Vec<NoteSearchResult>) -> Vec<DiffOp> {
        let ops = diff(&self.items, &list);
        tracing::debug!("List update: {} items, {} edits", list.len(), ops.len());
        self.items = list;
        ops
    }

    pub fn items(&self) -> &[NoteSearchResult] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, row: usize) -> Option<&NoteSearchResult> {
        self.items.get(row)
    }

    /// Fire the delete action for `row`. Returns false if there is no such row.
    pub fn delete(&self, row: usize) -> bool {
        match self.items.get(row) {
            Some(item) => {
                (self.on_delete)(&item.note);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchInfo, MatchRange};
    use std::sync::{Arc, Mutex};

    fn result(id: &str, text: &str) -> NoteSearchResult {
        NoteSearchResult {
            note: Note::new(id, text),
            creation_timestamp_millis: 0,
            matches: Vec::new(),
        }
    }

    fn list(ids: &[&str]) -> Vec<NoteSearchResult> {
        ids.iter().map(|id| result(id, id)).collect()
    }

    /// Replays `ops` over the ids of `old`.
    fn apply(old: &[NoteSearchResult], new: &[NoteSearchResult], ops: &[DiffOp]) -> Vec<String> {
        let mut ids: Vec<String> = old.iter().map(|r| r.note.id.clone()).collect();
        for op in ops {
            match *op {
                DiffOp::Remove { index } => {
                    ids.remove(index);
                }
                DiffOp::Move { from, to } => {
                    let id = ids.remove(from);
                    ids.insert(to, id);
                }
                DiffOp::Insert { index } => ids.insert(index, new[index].note.id.clone()),
                DiffOp::Change { .. } => {}
            }
        }
        ids
    }

    fn moves(ops: &[DiffOp]) -> usize {
        ops.iter().filter(|op| matches!(op, DiffOp::Move { .. })).count()
    }

    #[test]
    fn identical_lists_need_no_edits() {
        assert!(diff(&list(&["a", "b"]), &list(&["a", "b"])).is_empty());
    }

    #[test]
    fn new_note_on_top_is_a_single_insert() {
        let ops = diff(&list(&["b", "a"]), &list(&["c", "b", "a"]));
        assert_eq!(ops, vec![DiffOp::Insert { index: 0 }]);
    }

    #[test]
    fn removal_only() {
        let ops = diff(&list(&["c", "b", "a"]), &list(&["c", "a"]));
        assert_eq!(ops, vec![DiffOp::Remove { index: 1 }]);
    }

    #[test]
    fn replaced_note_moves_to_top_once() {
        let old = list(&["d", "c", "b", "a"]);
        let mut new = list(&["b", "d", "c", "a"]);
        new[0].note.text = "edited".into();
        let ops = diff(&old, &new);

        assert_eq!(moves(&ops), 1);
        assert!(ops.contains(&DiffOp::Change { index: 0 }));
        assert_eq!(apply(&old, &new, &ops), vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn mixed_edits_replay_to_the_new_list() {
        let cases: &[(&[&str], &[&str], usize)] = &[
            (&["a", "b", "c", "d", "e"], &["e", "d", "c", "b", "a"], 4),
            (&["a", "b", "c"], &["x", "c", "a", "y"], 1),
            (&["a", "b", "c", "d"], &["b", "a", "d", "c"], 2),
            (&[], &["a", "b"], 0),
            (&["a", "b"], &[], 0),
        ];
        for (old, new, expected_moves) in cases {
            let (old, new) = (list(old), list(new));
            let ops = diff(&old, &new);
            let replayed = apply(&old, &new, &ops);
            let expected: Vec<String> = new.iter().map(|r| r.note.id.clone()).collect();
            assert_eq!(replayed, expected, "ops {ops:?}");
            assert_eq!(moves(&ops), *expected_moves, "ops {ops:?}");
        }
    }

    #[test]
    fn same_id_in_another_namespace_is_a_different_row() {
        let old = vec![result("a", "x")];
        let mut moved = result("a", "x");
        moved.note.namespace = "shared".into();
        let ops = diff(&old, &[moved]);
        assert_eq!(ops, vec![DiffOp::Remove { index: 0 }, DiffOp::Insert { index: 0 }]);
    }

    fn text_match(text: &str, start: usize, end: usize) -> MatchInfo {
        MatchInfo {
            property_path: TEXT_PROPERTY.into(),
            full_text: text.into(),
            exact_match_range: MatchRange::new(start, end),
            submatch_range: MatchRange::new(start, end),
        }
    }

    #[test]
    fn highlight_bolds_exact_matches_of_text_only() {
        let mut r = result("n1", "buy milk now");
        r.matches.push(text_match("buy milk now", 4, 8));
        r.matches.push(MatchInfo {
            property_path: "title".into(),
            ..text_match("buy milk now", 0, 3)
        });

        let segments = highlight(&r);
        assert_eq!(
            segments,
            vec![
                Segment { text: "buy ", bold: false },
                Segment { text: "milk", bold: true },
                Segment { text: " now", bold: false },
            ]
        );
        assert_eq!(render_segments(&segments, "[", "]"), "buy [milk] now");
    }

    #[test]
    fn overlapping_and_bogus_ranges() {
        let text = "milkmaid";
        let mut r = result("n1", text);
        r.matches.push(text_match(text, 0, 4));
        r.matches.push(text_match(text, 2, 8));
        r.matches.push(text_match(text, 5, 99));
        assert_eq!(render_segments(&highlight(&r), "*", "*"), "*milkmaid*");
    }

    #[test]
    fn delete_action_hands_out_the_row_note() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deleted);
        let mut adapter = NoteListAdapter::new(move |note: &Note| {
            sink.lock().unwrap().push(note.id.clone());
        });
        adapter.submit_list(list(&["b", "a"]));

        assert!(adapter.delete(1));
        assert!(!adapter.delete(5));
        assert_eq!(*deleted.lock().unwrap(), vec!["a".to_string()]);
    }
}
