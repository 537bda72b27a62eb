//! Trim planning and execution
//!
//! ## Overview
//!
//! A trim compares a *current* snapshot against one or more *reference*
//! snapshots (typically backups) and finds the files of the current tree
//! whose content already exists in a reference. Those files can be removed
//! without losing anything.
//!
//! Content duplicated only inside the current tree is never a candidate: the
//! planner seeds a [`DedupEngine`] with the current tree, intersects every
//! reference into it and prunes the groups that stayed single-tree.
//!
//! Nonces are checked before any comparison: the current tree may not be
//! used as its own reference and no reference may be given twice. A
//! candidate whose absolute path is also listed by a reference is kept, as
//! both snapshots describe the same file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hashsnap::codec::{read_tree, FileStore};
//! use hashsnap::trim::{NoOpReporter, TrimPlanner};
//!
//! # fn main() -> hashsnap::Result<()> {
//! let current = read_tree(&FileStore::new("/home/me/.hsnap"))?;
//! let backup = read_tree(&FileStore::new("/mnt/backup/.hsnap"))?;
//!
//! let plan = TrimPlanner::new(&current).reference(&backup).plan()?;
//! println!("{} files could go", plan.candidate_count());
//!
//! let outcome = plan.execute(&mut NoOpReporter);
//! println!("{} removed, {} failed", outcome.removed, outcome.failed);
//! # Ok(())
//! # }
//! ```

use crate::collections::{HashMap, HashSet};
use crate::dedup::{DedupEngine, Member};
use crate::error::{HashsnapError, Result};
use crate::tree::Tree;
use crate::types::{Digest, Node};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Content found in the current tree and in at least one reference
#[derive(Debug, Clone)]
pub struct TrimGroup<'t> {
    hash: Digest,
    size: u64,
    candidates: Vec<Member<'t>>,
    evidence: Vec<Member<'t>>,
}

impl<'t> TrimGroup<'t> {
    /// Content digest
    pub fn hash(&self) -> Digest {
        self.hash
    }

    /// Size of one copy
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Members of the current tree, safe to remove
    pub fn candidates(&self) -> &[Member<'t>] {
        &self.candidates
    }

    /// Members of reference trees proving a copy exists elsewhere
    pub fn evidence(&self) -> &[Member<'t>] {
        &self.evidence
    }

    /// Bytes freed by removing every candidate
    pub fn wasted(&self) -> u64 {
        self.size.saturating_mul(self.candidates.len() as u64)
    }
}

/// Result of a single file removal
#[derive(Debug)]
pub enum RemovalOutcome<'a> {
    /// File removed
    Removed {
        /// Removed node
        node: &'a Node,
        /// Path it was removed from
        path: PathBuf,
    },
    /// File could not be removed
    Failed {
        /// Node that was kept
        node: &'a Node,
        /// Path, when it could be resolved
        path: Option<PathBuf>,
        /// Cause
        error: HashsnapError,
    },
}

/// Totals of a dry run or an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Groups reported
    pub groups: usize,
    /// Files removed
    pub removed: usize,
    /// Files that could not be removed
    pub failed: usize,
    /// Bytes freed by the removed files
    pub freed: u64,
    /// Bytes the plan could free in total
    pub wasted: u64,
}

/// Receives trim facts for rendering
///
/// The library never formats user facing text itself, implementations
/// decide how to present groups and removals.
pub trait Reporter {
    /// Called once per group, before its candidates are removed
    fn group(&mut self, group: &TrimGroup<'_>);

    /// Called once per candidate during execution
    fn removal(&mut self, outcome: &RemovalOutcome<'_>);

    /// Called at the end with the totals
    fn finished(&mut self, outcome: &TrimOutcome);
}

/// Reporter that ignores everything
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl Reporter for NoOpReporter {
    fn group(&mut self, _group: &TrimGroup<'_>) {}

    fn removal(&mut self, _outcome: &RemovalOutcome<'_>) {}

    fn finished(&mut self, _outcome: &TrimOutcome) {}
}

/// Builder for a [`TrimPlan`]
#[derive(Debug, Clone)]
pub struct TrimPlanner<'t> {
    current: &'t Tree,
    references: Vec<&'t Tree>,
}

impl<'t> TrimPlanner<'t> {
    /// Plan removals from `current`
    pub fn new(current: &'t Tree) -> Self {
        Self {
            current,
            references: Vec::new(),
        }
    }

    /// Compare against `tree` too
    pub fn reference(mut self, tree: &'t Tree) -> Self {
        self.references.push(tree);
        self
    }

    /// Compare against every tree of `trees` too
    pub fn references<I>(mut self, trees: I) -> Self
    where
        I: IntoIterator<Item = &'t Tree>,
    {
        self.references.extend(trees);
        self
    }

    fn validate(&self) -> Result<()> {
        let current = self.current.nonce();
        let mut seen: HashSet<Uuid> = HashSet::default();
        for reference in self.references.iter().copied() {
            let nonce = reference.nonce();
            if nonce == current {
                return Err(HashsnapError::SelfTrim(nonce));
            }
            if !seen.insert(nonce) {
                return Err(HashsnapError::DuplicateReference(nonce));
            }
        }
        Ok(())
    }

    /// Compute the plan
    ///
    /// # Errors
    ///
    /// - [`HashsnapError::SelfTrim`] if a reference is the current tree
    /// - [`HashsnapError::DuplicateReference`] if a reference is given twice
    /// - [`HashsnapError::HashCollision`] if the trees disagree on a digest
    #[instrument(skip(self), fields(current = %self.current.header(), references = self.references.len()))]
    pub fn plan(&self) -> Result<TrimPlan<'t>> {
        self.validate()?;

        let mut engine = DedupEngine::new();
        engine.add_tree(self.current)?;
        for reference in self.references.iter().copied() {
            engine.intersect_tree(reference)?;
        }
        let groups_before_prune = engine.len();
        let pruned = engine.prune_single_tree_groups();

        let current = self.current;
        let mut groups: Vec<TrimGroup<'t>> = engine
            .into_groups()
            .into_iter()
            .filter_map(|group| {
                let (mut candidates, evidence): (Vec<_>, Vec<_>) = group
                    .members()
                    .iter()
                    .copied()
                    .partition(|m| m.belongs_to(current));
                retain_distinct_copies(&mut candidates, &evidence);
                (!candidates.is_empty()).then(|| TrimGroup {
                    hash: group.hash(),
                    size: group.size(),
                    candidates,
                    evidence,
                })
            })
            .collect();
        groups.sort_by(|a, b| b.wasted().cmp(&a.wasted()).then(a.hash.cmp(&b.hash)));

        let plan = TrimPlan {
            current,
            groups,
            groups_before_prune,
            pruned,
        };
        info!(
            "Trim plan: {} groups, {} candidates, {} bytes",
            plan.groups.len(),
            plan.candidate_count(),
            plan.wasted()
        );
        Ok(plan)
    }
}

/// Drop candidates that are the very file a reference points at
///
/// A reference taken inside the current root lists the same paths, so its
/// "copy" would vanish together with the candidate.
fn retain_distinct_copies(candidates: &mut Vec<Member<'_>>, evidence: &[Member<'_>]) {
    let evidence_paths: HashSet<PathBuf> =
        evidence.iter().filter_map(|m| m.abs_path().ok()).collect();
    candidates.retain(|candidate| match candidate.abs_path() {
        Ok(path) if evidence_paths.contains(&path) => {
            debug!("Keeping {:?}, a reference lists the same file", path);
            false
        }
        _ => true,
    });
}

/// Files of the current tree that exist in a reference
#[derive(Debug, Clone)]
pub struct TrimPlan<'t> {
    current: &'t Tree,
    groups: Vec<TrimGroup<'t>>,
    groups_before_prune: usize,
    pruned: HashMap<Uuid, usize>,
}

impl<'t> TrimPlan<'t> {
    /// Tree files would be removed from
    pub fn current(&self) -> &'t Tree {
        self.current
    }

    /// Groups, largest waste first
    pub fn groups(&self) -> &[TrimGroup<'t>] {
        &self.groups
    }

    /// Whether there is nothing to trim
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every candidate node, group by group
    pub fn candidates(&self) -> impl Iterator<Item = &'t Node> + '_ {
        self.groups
            .iter()
            .flat_map(|g| g.candidates.iter().map(|m| m.node))
    }

    /// Number of candidate files
    pub fn candidate_count(&self) -> usize {
        self.groups.iter().map(|g| g.candidates.len()).sum()
    }

    /// Bytes freed by removing every candidate
    pub fn wasted(&self) -> u64 {
        self.groups
            .iter()
            .map(TrimGroup::wasted)
            .fold(0, u64::saturating_add)
    }

    /// Number of groups before single-tree groups were pruned
    pub fn groups_before_prune(&self) -> usize {
        self.groups_before_prune
    }

    /// Single-tree groups pruned, per tree nonce
    pub fn pruned(&self) -> &HashMap<Uuid, usize> {
        &self.pruned
    }

    fn totals(&self) -> TrimOutcome {
        TrimOutcome {
            groups: self.groups.len(),
            wasted: self.wasted(),
            ..TrimOutcome::default()
        }
    }

    /// Report the plan without touching the filesystem
    pub fn report(&self, reporter: &mut dyn Reporter) -> TrimOutcome {
        for group in &self.groups {
            reporter.group(group);
        }
        let outcome = self.totals();
        reporter.finished(&outcome);
        outcome
    }

    /// Remove every candidate file
    ///
    /// Files are removed one at a time. A file that cannot be removed is
    /// reported and skipped, the rest of the plan still runs.
    #[instrument(skip(self, reporter), fields(candidates = self.candidate_count()))]
    pub fn execute(&self, reporter: &mut dyn Reporter) -> TrimOutcome {
        let mut outcome = self.totals();

        for group in &self.groups {
            reporter.group(group);
            for member in &group.candidates {
                let removal = remove_member(member);
                match &removal {
                    RemovalOutcome::Removed { node, .. } => {
                        outcome.removed += 1;
                        outcome.freed = outcome.freed.saturating_add(node.size);
                    }
                    RemovalOutcome::Failed { error, path, .. } => {
                        warn!("Cannot remove {:?}: {}", path, error);
                        outcome.failed += 1;
                    }
                }
                reporter.removal(&removal);
            }
        }

        debug!(
            "Trim removed {} files ({} bytes), {} failures",
            outcome.removed, outcome.freed, outcome.failed
        );
        reporter.finished(&outcome);
        outcome
    }
}

fn remove_member<'a>(member: &Member<'a>) -> RemovalOutcome<'a> {
    let node = member.node;
    let path = match member.abs_path() {
        Ok(path) => path,
        Err(error) => {
            return RemovalOutcome::Failed {
                node,
                path: None,
                error,
            }
        }
    };
    match fs::remove_file(&path) {
        Ok(()) => RemovalOutcome::Removed { node, path },
        Err(e) => RemovalOutcome::Failed {
            node,
            path: Some(path),
            error: e.into(),
        },
    }
}
