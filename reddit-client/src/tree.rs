//! Comment tree reconstruction.
//!
//! Input is the raw forest of a thread: nested listings from `/comments`
//! plus any flat fragments appended after placeholder expansion. Output is a
//! pre-order sequence of [`Comment`]s with depth computed from the parent
//! chain.

use crate::wire::{MorePlaceholder, ParentRef, RawComment, RawNode};
use stance_core::Comment;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltTree {
    pub comments: Vec<Comment>,
    /// Nodes never reachable from a root (parent cycles).
    pub skipped_cycles: usize,
    pub duplicates: usize,
}

struct Record<'a> {
    raw: &'a RawComment,
    parent: Option<String>,
}

/// Reconstruct the comment tree of `submission_id` from `forest`.
pub fn build(submission_id: &str, forest: &[RawNode]) -> BuiltTree {
    let mut records: Vec<Record<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut duplicates = 0;

    // Document order walk; the stack carries the enclosing comment id.
    let mut stack: Vec<(&RawNode, Option<&str>)> =
        forest.iter().rev().map(|node| (node, None)).collect();
    while let Some((node, enclosing)) = stack.pop() {
        let raw = match node {
            RawNode::Comment(raw) => raw,
            RawNode::More(_) => continue,
        };

        if index.contains_key(raw.id.as_str()) {
            duplicates += 1;
        } else {
            let parent = match &raw.parent {
                Some(ParentRef::Comment(id)) => Some(id.clone()),
                Some(ParentRef::Submission(_)) => None,
                None => enclosing.map(str::to_string),
            };
            index.insert(raw.id.as_str(), records.len());
            records.push(Record { raw, parent });
        }

        for reply in raw.replies.iter().rev() {
            stack.push((reply, Some(raw.id.as_str())));
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        match record
            .parent
            .as_deref()
            .and_then(|parent| index.get(parent).copied())
        {
            Some(parent_position) if parent_position != position => {
                children.entry(parent_position).or_default().push(position)
            }
            // Self-parented nodes can never be reached.
            Some(_) => {}
            None => roots.push(position),
        }
    }

    let mut comments = Vec::with_capacity(records.len());
    let mut visited: HashSet<usize> = HashSet::with_capacity(records.len());
    let mut walk: Vec<(usize, u32)> = roots.iter().rev().map(|root| (*root, 0)).collect();
    while let Some((position, depth)) = walk.pop() {
        if !visited.insert(position) {
            continue;
        }
        let record = &records[position];
        comments.push(to_comment(submission_id, record, depth));

        if let Some(kids) = children.get(&position) {
            for kid in kids.iter().rev() {
                walk.push((*kid, depth + 1));
            }
        }
    }

    let skipped_cycles = records.len() - visited.len();
    if skipped_cycles > 0 {
        warn!(
            "Skipped {} comments on parent cycles in submission {}",
            skipped_cycles, submission_id
        );
    }
    if duplicates > 0 {
        debug!(
            "Dropped {} duplicate comments in submission {}",
            duplicates, submission_id
        );
    }

    BuiltTree {
        comments,
        skipped_cycles,
        duplicates,
    }
}

/// Every placeholder in `forest`, nested ones included, in document order.
pub fn collect_placeholders(forest: &[RawNode]) -> Vec<&MorePlaceholder> {
    let mut found = Vec::new();
    let mut stack: Vec<&RawNode> = forest.iter().rev().collect();
    while let Some(node) = stack.pop() {
        match node {
            RawNode::More(more) => found.push(more),
            RawNode::Comment(raw) => stack.extend(raw.replies.iter().rev()),
        }
    }
    found
}

/// Ids of every comment in `forest`, nested ones included.
pub fn collect_comment_ids(forest: &[RawNode]) -> HashSet<String> {
    let mut ids = HashSet::new();
    let mut stack: Vec<&RawNode> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        if let RawNode::Comment(raw) = node {
            ids.insert(raw.id.clone());
            stack.extend(raw.replies.iter());
        }
    }
    ids
}

fn to_comment(submission_id: &str, record: &Record<'_>, depth: u32) -> Comment {
    let raw = record.raw;
    Comment {
        id: raw.id.clone(),
        submission_id: submission_id.to_string(),
        parent_id: record.parent.clone(),
        depth,
        author: raw.author.clone(),
        body: raw.body.clone(),
        score: raw.score,
        permalink: raw.permalink.clone(),
        created_utc: raw.created_utc,
    }
}
