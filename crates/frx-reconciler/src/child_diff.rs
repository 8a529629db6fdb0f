#![forbid(unsafe_code)]

//! Keyed child reconciliation.
//!
//! Children are matched by key, or by position when unkeyed. A match of the
//! same kind reuses the old fiber; anything else is created fresh. Among the
//! reused children, those on a longest increasing run of old positions stay
//! put and the rest are flagged [`EffectFlags::MOVE`], which yields the
//! minimum number of host moves.

use std::collections::{HashMap, HashSet};

use frx_core::EffectFlags;

use crate::effects::Effect;
use crate::element::{Element, Key};
use crate::fiber::FiberId;
use crate::work_loop::Renderer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Identity {
    Key(Key),
    Index(usize),
}

/// Marks the members of one longest strictly increasing subsequence.
pub(crate) fn longest_increasing_subsequence(seq: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, &value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut members = vec![false; seq.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        members[i] = true;
        cursor = prev[i];
    }
    members
}

impl Renderer<'_> {
    /// Reconcile the children of `parent` against `elements` and return the
    /// first new child.
    pub(crate) fn reconcile_children(
        &mut self,
        parent: FiberId,
        elements: Vec<Element>,
    ) -> Option<FiberId> {
        let current = self.store.alternate(parent);
        let track = current.is_some();
        let old = current.map(|c| self.store.children(c)).unwrap_or_default();

        let mut by_identity: HashMap<Identity, (usize, FiberId)> = HashMap::with_capacity(old.len());
        let mut deletions: Vec<(usize, FiberId)> = Vec::new();
        for (pos, &id) in old.iter().enumerate() {
            let fiber = &self.store[id];
            let identity = match &fiber.key {
                Some(key) => Identity::Key(key.clone()),
                None => Identity::Index(fiber.index),
            };
            if by_identity.contains_key(&identity) {
                deletions.push((pos, id));
            } else {
                by_identity.insert(identity, (pos, id));
            }
        }

        let mut seen: HashSet<Key> = HashSet::new();
        let mut children: Vec<FiberId> = Vec::with_capacity(elements.len());
        // (index into `children`, old position) of every reused fiber.
        let mut reused: Vec<(usize, usize)> = Vec::new();

        for (i, element) in elements.into_iter().enumerate() {
            let identity = match element.key() {
                Some(key) if !seen.insert(key.clone()) => {
                    tracing::warn!(
                        key = %key,
                        parent = %self.store[parent].kind.label(),
                        "duplicate key among siblings; creating a fresh child"
                    );
                    children.push(self.create_child(&element, track));
                    continue;
                }
                Some(key) => Identity::Key(key.clone()),
                None => Identity::Index(i),
            };
            let id = match by_identity.remove(&identity) {
                Some((pos, old_id)) if self.store[old_id].kind.matches(&element) => {
                    reused.push((children.len(), pos));
                    self.store.create_work_in_progress(old_id, Some(element))
                }
                Some((pos, old_id)) => {
                    deletions.push((pos, old_id));
                    self.create_child(&element, track)
                }
                None => self.create_child(&element, track),
            };
            children.push(id);
        }

        if track {
            deletions.extend(by_identity.into_values());
            deletions.sort_by_key(|(pos, _)| *pos);
            if !deletions.is_empty() {
                self.store[parent].flags |= EffectFlags::CHILD_DELETION;
            }
            for (_, fiber) in deletions {
                self.pass.effects.push(Effect::Deletion { parent, fiber });
            }

            let positions: Vec<usize> = reused.iter().map(|(_, pos)| *pos).collect();
            let stable = longest_increasing_subsequence(&positions);
            for ((slot, _), stays) in reused.iter().zip(stable) {
                if !stays {
                    self.store[children[*slot]].flags |= EffectFlags::MOVE;
                }
            }
        }

        for (i, &id) in children.iter().enumerate() {
            let fiber = &mut self.store[id];
            fiber.parent = Some(parent);
            fiber.index = i;
            fiber.sibling = children.get(i + 1).copied();
        }
        self.store[parent].child = children.first().copied();
        self.store[parent].child
    }

    fn create_child(&mut self, element: &Element, track: bool) -> FiberId {
        let id = self.store.create_from_element(element);
        if track {
            self.store[id].flags |= EffectFlags::PLACEMENT;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lis_len(seq: &[usize]) -> usize {
        longest_increasing_subsequence(seq).into_iter().filter(|m| *m).count()
    }

    #[test]
    fn rotation_keeps_the_longest_run() {
        // [A, B, C] -> [C, A, B]: only C moves.
        let members = longest_increasing_subsequence(&[2, 0, 1]);
        assert_eq!(members, vec![false, true, true]);
    }

    #[test]
    fn lengths() {
        assert_eq!(lis_len(&[]), 0);
        assert_eq!(lis_len(&[0, 1, 2, 3]), 4);
        assert_eq!(lis_len(&[3, 2, 1, 0]), 1);
        assert_eq!(lis_len(&[1, 3, 0, 2, 4]), 3);
    }

    #[test]
    fn members_are_increasing() {
        let seq = [5, 1, 4, 2, 3, 0, 6];
        let members = longest_increasing_subsequence(&seq);
        let picked: Vec<usize> = seq
            .iter()
            .zip(&members)
            .filter(|(_, m)| **m)
            .map(|(v, _)| *v)
            .collect();
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(picked.len(), 4);
    }
}
