//! Loop-nest conflict tree and selection.
//!
//! Streams mapped at a loop occupy the hardware's data movers for the whole
//! nest around it, so no two selected loops may be in an ancestor/descendant
//! relationship. The tree mirrors one top-level loop nest, carries an
//! estimated gain per loop, and `find_best` picks the non-overlapping set
//! with the highest combined value, preferring a parent over its subtree on
//! ties.

use rustc_hash::FxHashMap;

/// A value-annotated mirror of one loop nest.
///
/// Nodes are loop indices into the function's loop forest. Each loop is
/// inserted exactly once, parents before children.
#[derive(Debug, Default)]
pub struct ConflictTree {
    values: FxHashMap<usize, i64>,
    children: FxHashMap<usize, Vec<usize>>,
    root: Option<usize>,
}

impl ConflictTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node` with `value` as a child of `parent`; `None` makes it
    /// the root.
    pub fn insert_node(&mut self, node: usize, value: i64, parent: Option<usize>) {
        assert!(
            !self.values.contains_key(&node),
            "loop inserted twice into conflict tree"
        );
        self.values.insert(node, value);
        self.children.insert(node, Vec::new());
        match parent {
            None => {
                assert!(self.root.is_none(), "conflict tree already has a root");
                self.root = Some(node);
            }
            Some(p) => {
                self.children
                    .get_mut(&p)
                    .expect("parent inserted before child")
                    .push(node);
            }
        }
    }

    /// Pick the set of nodes maximizing the combined value under the
    /// no-ancestor/descendant constraint. `combine` must be commutative and
    /// associative. A parent is preferred whenever its value is at least the
    /// combined value of the best selection in its subtrees.
    pub fn find_best(&self, combine: impl Fn(i64, i64) -> i64 + Copy) -> Vec<usize> {
        let mut res = Vec::new();
        if let Some(root) = self.root {
            self.find_best_in(root, combine, &mut res);
        }
        res
    }

    fn find_best_in(
        &self,
        node: usize,
        combine: impl Fn(i64, i64) -> i64 + Copy,
        res: &mut Vec<usize>,
    ) -> i64 {
        let mark = res.len();
        let mut child_total = 0;
        for &child in &self.children[&node] {
            child_total = combine(child_total, self.find_best_in(child, combine, res));
        }
        let own = self.values[&node];
        if child_total > own {
            child_total
        } else {
            // Discard the subtree selections and take this node instead.
            res.truncate(mark);
            res.push(node);
            own
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(a: i64, b: i64) -> i64 {
        a + b
    }

    #[test]
    fn empty_tree_selects_nothing() {
        let tree = ConflictTree::new();
        assert!(tree.find_best(sum).is_empty());
    }

    #[test]
    fn single_node_is_selected() {
        let mut tree = ConflictTree::new();
        tree.insert_node(0, 5, None);
        assert_eq!(tree.find_best(sum), vec![0]);
    }

    #[test]
    fn parent_wins_on_tie() {
        let mut tree = ConflictTree::new();
        tree.insert_node(0, 10, None);
        tree.insert_node(1, 4, Some(0));
        tree.insert_node(2, 6, Some(0));
        assert_eq!(tree.find_best(sum), vec![0]);
    }

    #[test]
    fn children_win_when_strictly_better() {
        let mut tree = ConflictTree::new();
        tree.insert_node(0, 9, None);
        tree.insert_node(1, 4, Some(0));
        tree.insert_node(2, 6, Some(0));
        let best = tree.find_best(sum);
        assert_eq!(best, vec![1, 2]);
    }

    #[test]
    fn selection_is_never_nested() {
        // root(1) -> a(8) -> b(5), and root -> c(2)
        let mut tree = ConflictTree::new();
        tree.insert_node(0, 1, None);
        tree.insert_node(1, 8, Some(0));
        tree.insert_node(2, 5, Some(1));
        tree.insert_node(3, 2, Some(0));
        let best = tree.find_best(sum);
        // a beats b; a + c beats root
        assert_eq!(best, vec![1, 3]);
        assert!(!best.contains(&2));
    }

    #[test]
    #[should_panic(expected = "inserted twice")]
    fn double_insert_panics() {
        let mut tree = ConflictTree::new();
        tree.insert_node(0, 1, None);
        tree.insert_node(0, 2, None);
    }
}
