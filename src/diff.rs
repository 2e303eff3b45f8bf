//! Text diff engine behind the merge protocol.
//!
//! Home-grown on purpose: the synchronization scheme needs coarse, mergeable
//! patches and a forgiving apply, not a general-purpose diff library.
//!
//! Pipeline:
//!
//! ```text
//! diff(old, new)          Myers bisect + semantic cleanup → Vec<DiffOp>
//!       │
//!       ▼
//! PatchSet::from_diffs    hunks with positional context
//!       │
//!       ▼
//! PatchSet::apply(base)   exact match, else nearest-occurrence fuzzy match
//!       │
//!       ▼
//! merge_three_way         ancestor → local patch → remote patch on top
//! ```
//!
//! All positions are `char` offsets; multi-byte text never splits. Apply and
//! merge are total functions: a hunk that cannot be placed is skipped and
//! reported, never an error.

use crate::protocol::DocKind;

/// Equalities shorter than this are folded into surrounding edits so one
/// logical change stays one hunk.
const SEMANTIC_THRESHOLD: usize = 4;

/// Context characters kept on each side of a hunk.
const PATCH_CONTEXT: usize = 4;

/// Gap below which two changed ranges are treated as one (conflict scan).
const RANGE_MERGE_GAP: usize = 3;

/// Near-miss distance that still counts as a conflict.
const RANGE_PROXIMITY: usize = 2;

/// A single diff operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    /// Text present in both snapshots.
    Equal(String),
    /// Text present only in the new snapshot.
    Insert(String),
    /// Text present only in the old snapshot.
    Delete(String),
}

impl DiffOp {
    pub fn text(&self) -> &str {
        match self {
            DiffOp::Equal(s) | DiffOp::Insert(s) | DiffOp::Delete(s) => s,
        }
    }

    fn char_len(&self) -> usize {
        self.text().chars().count()
    }
}

/// Which side of a three-way merge wins when both edited the same region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The remote patch is applied last and overrides on direct conflict.
    #[default]
    RemoteWins,
    /// The local patch is applied last.
    LocalWins,
}

/// Compute the operations transforming `old` into `new`.
///
/// Includes semantic cleanup: trivially small equalities between edits are
/// absorbed so the result stays coarse-grained and mergeable.
pub fn diff(old: &str, new: &str) -> Vec<DiffOp> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let mut ops = diff_chars(&old_chars, &new_chars);
    cleanup_semantic(&mut ops);
    ops
}

fn diff_chars(old: &[char], new: &[char]) -> Vec<DiffOp> {
    if old == new {
        if old.is_empty() {
            return Vec::new();
        }
        return vec![DiffOp::Equal(old.iter().collect())];
    }

    let prefix_len = common_prefix(old, new);
    let old_rest = &old[prefix_len..];
    let new_rest = &new[prefix_len..];
    let suffix_len = common_suffix(old_rest, new_rest);
    let old_mid = &old_rest[..old_rest.len() - suffix_len];
    let new_mid = &new_rest[..new_rest.len() - suffix_len];

    let mut ops = Vec::new();
    if prefix_len > 0 {
        ops.push(DiffOp::Equal(old[..prefix_len].iter().collect()));
    }
    ops.extend(diff_middle(old_mid, new_mid));
    if suffix_len > 0 {
        ops.push(DiffOp::Equal(
            old_rest[old_rest.len() - suffix_len..].iter().collect(),
        ));
    }
    cleanup_merge(&mut ops);
    ops
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Diff of the trimmed middle region (no common prefix/suffix remains).
fn diff_middle(old: &[char], new: &[char]) -> Vec<DiffOp> {
    if old.is_empty() && new.is_empty() {
        return Vec::new();
    }
    if old.is_empty() {
        return vec![DiffOp::Insert(new.iter().collect())];
    }
    if new.is_empty() {
        return vec![DiffOp::Delete(old.iter().collect())];
    }

    // Containment shortcut: one side is a pure insertion around the other.
    let (short, long, short_is_old) = if old.len() <= new.len() {
        (old, new, true)
    } else {
        (new, old, false)
    };
    if let Some(at) = find_subslice(long, short, 0) {
        let before: String = long[..at].iter().collect();
        let equal: String = short.iter().collect();
        let after: String = long[at + short.len()..].iter().collect();
        let mut ops = Vec::with_capacity(3);
        let wrap = if short_is_old {
            DiffOp::Insert
        } else {
            DiffOp::Delete
        };
        if !before.is_empty() {
            ops.push(wrap(before));
        }
        ops.push(DiffOp::Equal(equal));
        if !after.is_empty() {
            ops.push(wrap(after));
        }
        return ops;
    }
    if short.len() == 1 {
        // Single char with no match in the other side: plain replace.
        return vec![
            DiffOp::Delete(old.iter().collect()),
            DiffOp::Insert(new.iter().collect()),
        ];
    }

    bisect(old, new)
}

/// Myers O(ND) bisect: walk the forward and reverse D-paths simultaneously,
/// split at the overlap, recurse on both halves.
fn bisect(old: &[char], new: &[char]) -> Vec<DiffOp> {
    let n = old.len() as isize;
    let m = new.len() as isize;
    let max_d = (n + m + 1) / 2;
    let v_offset = max_d;
    let v_len = (2 * max_d + 1) as usize;
    let mut v1 = vec![-1isize; v_len];
    let mut v2 = vec![-1isize; v_len];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;
    let delta = n - m;
    // With an odd delta the forward path detects the overlap, otherwise the
    // reverse path does.
    let front = delta % 2 != 0;
    let mut k1start = 0isize;
    let mut k1end = 0isize;
    let mut k2start = 0isize;
    let mut k2end = 0isize;

    for d in 0..max_d {
        // Forward path.
        let mut k1 = -d + k1start;
        while k1 <= d - k1end {
            let k1_off = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_off - 1] < v1[k1_off + 1]) {
                v1[k1_off + 1]
            } else {
                v1[k1_off - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < n && y1 < m && old[x1 as usize] == new[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_off] = x1;
            if x1 > n {
                k1end += 2;
            } else if y1 > m {
                k1start += 2;
            } else if front {
                let k2_off = v_offset + delta - k1;
                if k2_off >= 0 && (k2_off as usize) < v_len && v2[k2_off as usize] != -1 {
                    let x2 = n - v2[k2_off as usize];
                    if x1 >= x2 {
                        return bisect_split(old, new, x1 as usize, y1 as usize);
                    }
                }
            }
            k1 += 2;
        }

        // Reverse path.
        let mut k2 = -d + k2start;
        while k2 <= d - k2end {
            let k2_off = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_off - 1] < v2[k2_off + 1]) {
                v2[k2_off + 1]
            } else {
                v2[k2_off - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < n && y2 < m && old[(n - x2 - 1) as usize] == new[(m - y2 - 1) as usize] {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_off] = x2;
            if x2 > n {
                k2end += 2;
            } else if y2 > m {
                k2start += 2;
            } else if !front {
                let k1_off = v_offset + delta - k2;
                if k1_off >= 0 && (k1_off as usize) < v_len && v1[k1_off as usize] != -1 {
                    let x1 = v1[k1_off as usize];
                    let y1 = v_offset + x1 - k1_off;
                    let x2_abs = n - x2;
                    if x1 >= x2_abs {
                        return bisect_split(old, new, x1 as usize, y1 as usize);
                    }
                }
            }
            k2 += 2;
        }
    }

    // No commonality at all.
    vec![
        DiffOp::Delete(old.iter().collect()),
        DiffOp::Insert(new.iter().collect()),
    ]
}

fn bisect_split(old: &[char], new: &[char], x: usize, y: usize) -> Vec<DiffOp> {
    let mut ops = diff_chars(&old[..x], &new[..y]);
    ops.extend(diff_chars(&old[x..], &new[y..]));
    ops
}

/// Merge adjacent same-type operations, drop empties, order mixed runs as
/// delete-then-insert.
fn cleanup_merge(ops: &mut Vec<DiffOp>) {
    let drained = std::mem::take(ops);
    let mut equal = String::new();
    let mut delete = String::new();
    let mut insert = String::new();

    let mut flush_edits = |out: &mut Vec<DiffOp>, delete: &mut String, insert: &mut String| {
        if !delete.is_empty() {
            out.push(DiffOp::Delete(std::mem::take(delete)));
        }
        if !insert.is_empty() {
            out.push(DiffOp::Insert(std::mem::take(insert)));
        }
    };

    for op in drained {
        match op {
            DiffOp::Equal(s) => {
                if s.is_empty() {
                    continue;
                }
                flush_edits(ops, &mut delete, &mut insert);
                equal.push_str(&s);
                // Merge consecutive equalities lazily; flush when an edit
                // interrupts them.
                if let Some(DiffOp::Equal(prev)) = ops.last_mut() {
                    prev.push_str(&equal);
                    equal.clear();
                } else {
                    ops.push(DiffOp::Equal(std::mem::take(&mut equal)));
                }
            }
            DiffOp::Delete(s) => delete.push_str(&s),
            DiffOp::Insert(s) => insert.push_str(&s),
        }
    }
    flush_edits(ops, &mut delete, &mut insert);
}

/// Fold short equalities sandwiched between edits into the edits themselves.
fn cleanup_semantic(ops: &mut Vec<DiffOp>) {
    if ops.len() < 3 {
        return;
    }
    let mut changed = false;
    let mut i = 1;
    while i + 1 < ops.len() {
        let small_equal = matches!(&ops[i], DiffOp::Equal(s) if s.chars().count() < SEMANTIC_THRESHOLD);
        let edited_before = !matches!(&ops[i - 1], DiffOp::Equal(_));
        let edited_after = !matches!(&ops[i + 1], DiffOp::Equal(_));
        if small_equal && edited_before && edited_after {
            let text = ops[i].text().to_string();
            ops.splice(i..=i, [DiffOp::Delete(text.clone()), DiffOp::Insert(text)]);
            changed = true;
            i += 2;
        } else {
            i += 1;
        }
    }
    if changed {
        cleanup_merge(ops);
    }
}

fn find_subslice(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

// ─── Patches ──────────────────────────────────────────────────────────

/// One replaceable region: expected position in the source text, the text
/// expected there (context + deletions) and its replacement (context +
/// insertions).
#[derive(Debug, Clone, PartialEq)]
pub struct PatchHunk {
    /// Char offset in the text the patch was made against.
    pub start: usize,
    old_text: Vec<char>,
    new_text: Vec<char>,
}

impl PatchHunk {
    fn old_len(&self) -> usize {
        self.old_text.len()
    }
}

/// An ordered set of hunks transforming one snapshot into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSet {
    hunks: Vec<PatchHunk>,
}

/// Detailed apply result; the public API exposes the `(text, clean)` pair.
struct ApplyReport {
    text: String,
    applied: usize,
    total: usize,
}

impl ApplyReport {
    fn clean(&self) -> bool {
        self.applied == self.total
    }
}

impl PatchSet {
    /// Build a patch set directly from two texts.
    pub fn from_texts(old: &str, new: &str) -> Self {
        Self::from_diffs(old, &diff(old, new))
    }

    /// Build a patch set from precomputed diffs against `old`.
    pub fn from_diffs(old: &str, diffs: &[DiffOp]) -> Self {
        let old_chars: Vec<char> = old.chars().collect();
        let mut hunks = Vec::new();

        // Walk the ops, opening a hunk at the first edit and closing it once
        // an equality long enough to supply context on both sides appears.
        let mut pos = 0usize; // position in old
        let mut i = 0usize;
        while i < diffs.len() {
            if matches!(&diffs[i], DiffOp::Equal(_)) {
                pos += diffs[i].char_len();
                i += 1;
                continue;
            }

            // Hunk starts here; pull leading context from the old text.
            let lead = pos.min(PATCH_CONTEXT);
            let hunk_start = pos - lead;
            let mut old_text: Vec<char> = old_chars[hunk_start..pos].to_vec();
            let mut new_text: Vec<char> = old_text.clone();

            while i < diffs.len() {
                match &diffs[i] {
                    DiffOp::Equal(s) => {
                        let len = s.chars().count();
                        if len > 2 * PATCH_CONTEXT {
                            break;
                        }
                        old_text.extend(s.chars());
                        new_text.extend(s.chars());
                        pos += len;
                    }
                    DiffOp::Delete(s) => {
                        old_text.extend(s.chars());
                        pos += s.chars().count();
                    }
                    DiffOp::Insert(s) => {
                        new_text.extend(s.chars());
                    }
                }
                i += 1;
            }

            // Trailing context from whatever old text follows.
            let tail_end = (pos + PATCH_CONTEXT).min(old_chars.len());
            old_text.extend(&old_chars[pos..tail_end]);
            new_text.extend(&old_chars[pos..tail_end]);

            hunks.push(PatchHunk {
                start: hunk_start,
                old_text,
                new_text,
            });
        }

        Self { hunks }
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    /// Apply to a possibly-diverged base.
    ///
    /// Each hunk is placed at its expected position when the context matches
    /// exactly, otherwise at the nearest occurrence of its expected text.
    /// Hunks that cannot be placed are skipped. Returns the resulting text
    /// and whether every hunk was applied.
    pub fn apply(&self, base: &str) -> (String, bool) {
        let report = self.apply_report(base);
        (report.text, report.clean())
    }

    fn apply_report(&self, base: &str) -> ApplyReport {
        let mut text: Vec<char> = base.chars().collect();
        let mut shift = 0isize;
        let mut applied = 0usize;

        for hunk in &self.hunks {
            let expected = hunk.start as isize + shift;
            match place_hunk(&text, &hunk.old_text, expected) {
                Some(at) => {
                    text.splice(at..at + hunk.old_len(), hunk.new_text.iter().copied());
                    shift = at as isize - hunk.start as isize
                        + (hunk.new_text.len() as isize - hunk.old_len() as isize);
                    applied += 1;
                }
                None => {
                    log::debug!(
                        "patch hunk at {} did not match target text, skipped",
                        hunk.start
                    );
                }
            }
        }

        ApplyReport {
            text: text.into_iter().collect(),
            applied,
            total: self.hunks.len(),
        }
    }
}

/// Locate `pattern` in `text`, preferring the occurrence closest to
/// `expected`. Exact position match is free; otherwise every occurrence is
/// scanned and the nearest wins.
fn place_hunk(text: &[char], pattern: &[char], expected: isize) -> Option<usize> {
    if pattern.is_empty() {
        let at = expected.clamp(0, text.len() as isize) as usize;
        return Some(at);
    }
    let clamped = expected.clamp(0, text.len() as isize) as usize;
    if clamped + pattern.len() <= text.len() && &text[clamped..clamped + pattern.len()] == pattern {
        return Some(clamped);
    }

    let mut best: Option<(usize, usize)> = None; // (distance, position)
    let mut from = 0;
    while let Some(at) = find_subslice(text, pattern, from) {
        let distance = at.abs_diff(clamped);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, at));
        }
        from = at + 1;
    }
    best.map(|(_, at)| at)
}

// ─── Three-way merge ──────────────────────────────────────────────────

/// Merge two descendants of a common ancestor.
///
/// The losing side's patch is applied to the ancestor first (which
/// reconstructs that side verbatim), then the winning side's patch is applied
/// fuzzily on top. If the winning patch places nothing at all, the winning
/// text is returned verbatim rather than losing those edits.
pub fn merge_three_way(ancestor: &str, local: &str, remote: &str, policy: MergePolicy) -> String {
    let (first, second) = match policy {
        MergePolicy::RemoteWins => (local, remote),
        MergePolicy::LocalWins => (remote, local),
    };

    let second_patch = PatchSet::from_texts(ancestor, second);
    if second_patch.is_empty() {
        // The winning side made no changes; the losing side stands alone.
        return first.to_string();
    }

    let report = second_patch.apply_report(first);
    if report.applied == 0 {
        log::warn!("three-way merge could not place any hunk, taking winning side verbatim");
        return second.to_string();
    }
    report.text
}

/// Whether the two descendants changed overlapping (or nearly overlapping)
/// regions of the ancestor. Diagnostics only — merges proceed regardless.
pub fn has_conflict(ancestor: &str, local: &str, remote: &str) -> bool {
    let local_ranges = changed_ranges(&diff(ancestor, local));
    let remote_ranges = changed_ranges(&diff(ancestor, remote));

    for a in &local_ranges {
        for b in &remote_ranges {
            if ranges_collide(*a, *b) {
                return true;
            }
        }
    }
    false
}

/// Extract changed regions as `[start, end)` ranges over the old text, close
/// ranges merged.
fn changed_ranges(diffs: &[DiffOp]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut pos = 0usize;
    let mut open: Option<usize> = None;

    for op in diffs {
        match op {
            DiffOp::Equal(s) => {
                if let Some(start) = open.take() {
                    ranges.push((start, pos));
                }
                pos += s.chars().count();
            }
            DiffOp::Delete(s) => {
                open.get_or_insert(pos);
                pos += s.chars().count();
            }
            DiffOp::Insert(_) => {
                open.get_or_insert(pos);
            }
        }
    }
    if let Some(start) = open {
        ranges.push((start, pos));
    }

    // Merge overlapping or near-adjacent ranges.
    ranges.sort_by_key(|r| r.0);
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.0 <= last.1 + RANGE_MERGE_GAP => last.1 = last.1.max(r.1),
            _ => merged.push(r),
        }
    }
    merged
}

fn ranges_collide(a: (usize, usize), b: (usize, usize)) -> bool {
    if a.0.max(b.0) <= a.1.min(b.1) {
        return true;
    }
    let gap = if a.1 <= b.0 { b.0 - a.1 } else { a.0 - b.1 };
    gap <= RANGE_PROXIMITY
}

/// Reconstruct the new text from a diff (insertions kept, deletions dropped).
pub fn text_after(diffs: &[DiffOp]) -> String {
    diffs
        .iter()
        .filter(|op| !matches!(op, DiffOp::Delete(_)))
        .map(|op| op.text())
        .collect()
}

/// Log-friendly summary of a merge decision.
pub fn log_conflict(kind: DocKind, team: &str, ancestor: &str, local: &str, remote: &str) {
    if has_conflict(ancestor, local, remote) {
        log::warn!("{kind}: overlapping edits with team {team}, merge may be approximate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_diff(old: &str, new: &str) -> String {
        text_after(&diff(old, new))
    }

    #[test]
    fn test_diff_identity() {
        assert_eq!(diff("abc", "abc"), vec![DiffOp::Equal("abc".into())]);
        assert!(diff("", "").is_empty());
    }

    #[test]
    fn test_diff_insert_delete_only() {
        assert_eq!(diff("", "abc"), vec![DiffOp::Insert("abc".into())]);
        assert_eq!(diff("abc", ""), vec![DiffOp::Delete("abc".into())]);
    }

    #[test]
    fn test_diff_reconstructs_new() {
        let cases = [
            ("the quick brown fox", "the quick red fox"),
            ("<div>hello</div>", "<div>hello world</div>"),
            ("abcdef", "xyz"),
            ("line one\nline two\n", "line one\nline 2\nline three\n"),
            ("", "fresh"),
            ("stale", ""),
            ("aaaa", "aaba"),
        ];
        for (old, new) in cases {
            assert_eq!(apply_diff(old, new), new, "diff({old:?}, {new:?})");
        }
    }

    #[test]
    fn test_diff_multibyte() {
        let old = "привет мир";
        let new = "привет, мир!";
        assert_eq!(apply_diff(old, new), new);
    }

    #[test]
    fn test_semantic_cleanup_folds_small_equality() {
        // "ab" between two edits is below the threshold and should not
        // survive as a standalone equality.
        let ops = diff("xxxabyyy", "111ab222");
        assert!(
            !ops.iter()
                .any(|op| matches!(op, DiffOp::Equal(s) if s == "ab")),
            "small equality should be folded: {ops:?}"
        );
        assert_eq!(text_after(&ops), "111ab222");
    }

    #[test]
    fn test_patch_apply_exact() {
        let old = "body { color: red; }";
        let new = "body { color: blue; }";
        let patch = PatchSet::from_texts(old, new);
        let (result, clean) = patch.apply(old);
        assert!(clean);
        assert_eq!(result, new);
    }

    #[test]
    fn test_patch_apply_with_drift() {
        let old = "header\nbody { color: red; }\nfooter";
        let new = "header\nbody { color: blue; }\nfooter";
        let patch = PatchSet::from_texts(old, new);

        // The target gained a prefix; the hunk must still find its context.
        let drifted = "/* note */\nheader\nbody { color: red; }\nfooter";
        let (result, clean) = patch.apply(drifted);
        assert!(clean);
        assert_eq!(result, "/* note */\nheader\nbody { color: blue; }\nfooter");
    }

    #[test]
    fn test_patch_apply_mismatch_reported() {
        let patch = PatchSet::from_texts("abcdef", "abXdef");
        let (result, clean) = patch.apply("completely different");
        assert!(!clean);
        assert_eq!(result, "completely different");
    }

    #[test]
    fn test_patch_empty_for_equal_texts() {
        assert!(PatchSet::from_texts("same", "same").is_empty());
    }

    #[test]
    fn test_merge_disjoint_edits() {
        // The canonical disjoint case: an insertion near the front and an
        // append both survive.
        let merged = merge_three_way("A B C", "A X B C", "A B C Y", MergePolicy::RemoteWins);
        assert_eq!(merged, "A X B C Y");
    }

    #[test]
    fn test_merge_remote_wins_on_overlap() {
        let merged = merge_three_way("value: 1", "value: 2", "value: 3", MergePolicy::RemoteWins);
        assert_eq!(merged, "value: 3");
    }

    #[test]
    fn test_merge_local_wins_on_overlap() {
        let merged = merge_three_way("value: 1", "value: 2", "value: 3", MergePolicy::LocalWins);
        assert_eq!(merged, "value: 2");
    }

    #[test]
    fn test_merge_remote_unchanged_keeps_local() {
        let merged = merge_three_way("base", "base edited", "base", MergePolicy::RemoteWins);
        assert_eq!(merged, "base edited");
    }

    #[test]
    fn test_merge_empty_ancestor() {
        let merged = merge_three_way("", "local text", "remote text", MergePolicy::RemoteWins);
        // Both sides are pure insertions at position zero; the winning side
        // must be present in full.
        assert!(merged.contains("remote text"));
    }

    #[test]
    fn test_conflict_detection_overlap() {
        assert!(has_conflict("shared text", "shared NEW text", "shared OLD text"));
    }

    #[test]
    fn test_conflict_detection_disjoint() {
        let ancestor = "first paragraph here\n\nsecond paragraph there";
        let local = "FIRST paragraph here\n\nsecond paragraph there";
        let remote = "first paragraph here\n\nsecond paragraph THERE";
        assert!(!has_conflict(ancestor, local, remote));
    }

    #[test]
    fn test_conflict_proximity_counts() {
        // Edits two characters apart are close enough to flag.
        let ancestor = "abcdefgh";
        let local = "Xbcdefgh";
        let remote = "abcXefgh";
        assert!(has_conflict(ancestor, local, remote));
    }

    #[test]
    fn test_changed_ranges_positions() {
        let diffs = diff("hello world", "hello brave world");
        let ranges = changed_ranges(&diffs);
        assert_eq!(ranges.len(), 1);
        // Insertion lands inside the old text, before "world".
        assert!(ranges[0].0 >= 5 && ranges[0].0 <= 6, "{ranges:?}");
    }

    #[test]
    fn test_place_hunk_prefers_nearest() {
        let text: Vec<char> = "abc---abc---abc".chars().collect();
        let pattern: Vec<char> = "abc".chars().collect();
        assert_eq!(place_hunk(&text, &pattern, 5), Some(6));
        assert_eq!(place_hunk(&text, &pattern, 0), Some(0));
        assert_eq!(place_hunk(&text, &pattern, 14), Some(12));
    }
}
