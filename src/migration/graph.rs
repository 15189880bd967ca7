//! Revision graph - validated parent/child structure over a revision set
//!
//! [`RevisionGraph::build`] checks a set of revisions for structural
//! integrity, in this order:
//! 1. every id is unique ([`GraphError::DuplicateRevision`])
//! 2. every `parent_id` names a revision in the set ([`GraphError::OrphanParent`])
//! 3. following parents from any revision terminates ([`GraphError::Cycle`])
//! 4. exactly one revision has no parent ([`GraphError::MultipleRoots`])
//!
//! An empty set is a valid, empty graph. Branches are allowed in the set; only
//! resolving "head" requires a single leaf.

use crate::migration::error::GraphError;
use crate::migration::revision::{Revision, RevisionId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which way a path is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Run `operations_up`, marker advances to each revision
    Forward,
    /// Run `operations_down` in reverse, marker retreats to each parent
    Backward,
}

impl Direction {
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Direction::Forward => "upgrade",
            Direction::Backward => "downgrade",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Ordered revisions between two points of the graph
///
/// Forward paths run from the child of `from` down to `to`; backward paths
/// run from `from` up to the child of `to`. Either way the revisions are
/// listed in the order they must be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPath<'a> {
    pub direction: Direction,
    pub revisions: Vec<&'a Revision>,
}

impl MigrationPath<'_> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&RevisionId> {
        self.revisions.iter().map(|r| &r.id).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RevisionGraph {
    revisions: BTreeMap<RevisionId, Revision>,
    children: BTreeMap<RevisionId, Vec<RevisionId>>,
    root: Option<RevisionId>,
}

impl RevisionGraph {
    /// Validate `revisions` and index them
    pub fn build(revisions: Vec<Revision>) -> Result<Self, GraphError> {
        let mut by_id = BTreeMap::new();
        for revision in revisions {
            if by_id.contains_key(&revision.id) {
                return Err(GraphError::DuplicateRevision(revision.id));
            }
            by_id.insert(revision.id.clone(), revision);
        }

        for revision in by_id.values() {
            if let Some(parent) = &revision.parent_id {
                if !by_id.contains_key(parent) {
                    return Err(GraphError::OrphanParent {
                        revision: revision.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        detect_cycle(&by_id)?;

        let roots: Vec<RevisionId> = by_id
            .values()
            .filter(|r| r.is_root())
            .map(|r| r.id.clone())
            .collect();
        if roots.len() > 1 {
            return Err(GraphError::MultipleRoots(roots));
        }

        let mut children: BTreeMap<RevisionId, Vec<RevisionId>> = BTreeMap::new();
        for revision in by_id.values() {
            if let Some(parent) = &revision.parent_id {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(revision.id.clone());
            }
        }

        Ok(Self {
            revisions: by_id,
            children,
            root: roots.into_iter().next(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.revisions.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    /// Look up `id`, failing with `UnknownRevision`
    pub fn require(&self, id: &str) -> Result<&Revision, GraphError> {
        self.get(id)
            .ok_or_else(|| GraphError::UnknownRevision(id.to_string()))
    }

    #[must_use]
    pub fn root(&self) -> Option<&Revision> {
        self.root.as_ref().and_then(|id| self.revisions.get(id))
    }

    /// Children of `id` ordered by id; the root when `id` is `None`
    #[must_use]
    pub fn children(&self, id: Option<&RevisionId>) -> Vec<&Revision> {
        match id {
            None => self.root().into_iter().collect(),
            Some(id) => self
                .children
                .get(id)
                .map(|ids| ids.iter().filter_map(|c| self.revisions.get(c)).collect())
                .unwrap_or_default(),
        }
    }

    /// All leaf revisions, ordered by id
    #[must_use]
    pub fn heads(&self) -> Vec<&Revision> {
        self.revisions
            .values()
            .filter(|r| !self.children.contains_key(&r.id))
            .collect()
    }

    /// The single leaf revision; `None` for an empty graph
    pub fn head(&self) -> Result<Option<&Revision>, GraphError> {
        let heads = self.heads();
        if heads.len() > 1 {
            return Err(GraphError::MultipleHeads(
                heads.into_iter().map(|r| r.id.clone()).collect(),
            ));
        }
        Ok(heads.into_iter().next())
    }

    /// Revisions from `id` up to the root, `id` first
    fn lineage(&self, id: &RevisionId) -> Vec<&Revision> {
        let mut chain = Vec::new();
        let mut cursor = self.revisions.get(id);
        while let Some(revision) = cursor {
            chain.push(revision);
            cursor = revision
                .parent_id
                .as_ref()
                .and_then(|parent| self.revisions.get(parent));
        }
        chain
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors
    ///
    /// `None` stands for base and is an ancestor of every revision.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: Option<&RevisionId>, descendant: Option<&RevisionId>) -> bool {
        match (ancestor, descendant) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(ancestor), Some(descendant)) => self
                .lineage(descendant)
                .iter()
                .any(|r| &r.id == ancestor),
        }
    }

    /// Every revision, parents before children, siblings by id
    #[must_use]
    pub fn history(&self) -> Vec<&Revision> {
        let mut ordered = Vec::with_capacity(self.revisions.len());
        let mut stack: Vec<&Revision> = self.root().into_iter().collect();
        while let Some(revision) = stack.pop() {
            ordered.push(revision);
            // reversed so the smallest id is visited first
            for child in self.children(Some(&revision.id)).into_iter().rev() {
                stack.push(child);
            }
        }
        ordered
    }

    /// Revisions to apply to move from `from` to `to`
    ///
    /// `None` on either side means base (nothing applied). Equal endpoints give
    /// an empty forward path.
    pub fn path_to(
        &self,
        from: Option<&RevisionId>,
        to: Option<&RevisionId>,
    ) -> Result<MigrationPath<'_>, GraphError> {
        for id in [from, to].into_iter().flatten() {
            self.require(id.as_str())?;
        }

        if from == to {
            return Ok(MigrationPath {
                direction: Direction::Forward,
                revisions: Vec::new(),
            });
        }

        if self.is_ancestor(from, to) {
            let mut revisions = match to {
                Some(to) => self.lineage(to),
                None => Vec::new(),
            };
            if let Some(from) = from {
                if let Some(pos) = revisions.iter().position(|r| &r.id == from) {
                    revisions.truncate(pos);
                }
            }
            revisions.reverse();
            return Ok(MigrationPath {
                direction: Direction::Forward,
                revisions,
            });
        }

        if self.is_ancestor(to, from) {
            let mut revisions = match from {
                Some(from) => self.lineage(from),
                None => Vec::new(),
            };
            if let Some(to) = to {
                if let Some(pos) = revisions.iter().position(|r| &r.id == to) {
                    revisions.truncate(pos);
                }
            }
            return Ok(MigrationPath {
                direction: Direction::Backward,
                revisions,
            });
        }

        Err(GraphError::Divergent {
            from: base_or(from),
            to: base_or(to),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }
}

fn base_or(id: Option<&RevisionId>) -> String {
    id.map_or_else(|| "base".to_string(), ToString::to_string)
}

/// Walk parent links from every revision; a walk that revisits a revision on
/// its own trail has found a cycle
fn detect_cycle(revisions: &BTreeMap<RevisionId, Revision>) -> Result<(), GraphError> {
    let mut settled: BTreeSet<&RevisionId> = BTreeSet::new();

    for start in revisions.keys() {
        let mut trail: Vec<&RevisionId> = Vec::new();
        let mut on_trail: BTreeSet<&RevisionId> = BTreeSet::new();
        let mut cursor = Some(start);

        while let Some(id) = cursor {
            if settled.contains(id) {
                break;
            }
            if !on_trail.insert(id) {
                return Err(GraphError::Cycle(id.clone()));
            }
            trail.push(id);
            cursor = revisions.get(id).and_then(|r| r.parent_id.as_ref());
        }

        settled.extend(trail);
    }

    Ok(())
}
