//! Dynamic call trees recorded while the original tests run, and the
//! functions (testees) each test reaches through them.
//!
//! Instrumented functions report entry and exit through a [`CallRecorder`].
//! The recorder keeps a flat parent mapping indexed by function index, with
//! index 0 reserved:
//!
//! - `mapping[n] == 0`: function `n` was never called,
//! - `mapping[n] == n`: function `n` was called with an empty call stack,
//! - otherwise `mapping[n]` is the function that called `n` first.

use crate::mutation::ReachableTest;
use crate::unit_test::Test;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRecorder {
    mapping: Vec<u32>,
    stack: Vec<u32>,
}

impl CallRecorder {
    /// Recorder for functions indexed `1..=function_count`.
    pub fn new(function_count: usize) -> Self {
        Self {
            mapping: vec![0; function_count + 1],
            stack: Vec::new(),
        }
    }

    pub fn enter_function(&mut self, index: u32) {
        let Some(parent) = self.mapping.get_mut(index as usize) else {
            return;
        };
        match self.stack.last() {
            None => *parent = index,
            Some(&caller) if *parent == 0 => *parent = caller,
            Some(_) => {}
        }
        self.stack.push(index);
    }

    pub fn leave_function(&mut self, _index: u32) {
        self.stack.pop();
    }

    pub fn mapping(&self) -> &[u32] {
        &self.mapping
    }

    /// Forgets everything recorded so far, ready for the next test.
    pub fn reset(&mut self) {
        self.mapping.iter_mut().for_each(|parent| *parent = 0);
        self.stack.clear();
    }
}

/// Handle to a node of a [`CallTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct CallTreeNode {
    /// `None` only for the phony root.
    function: Option<String>,
    level: u32,
    children: Vec<usize>,
}

/// Tree of first calls, hanging from a phony root that stands for "no caller".
#[derive(Debug, Clone)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
}

/// A function reached by a test, `distance` calls below the test's entry point.
#[derive(Clone)]
pub struct Testee {
    pub function: String,
    pub test: Arc<dyn Test>,
    pub distance: u32,
}

impl fmt::Debug for Testee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Testee")
            .field("function", &self.function)
            .field("test", &self.test.id())
            .field("distance", &self.distance)
            .finish()
    }
}

pub struct DynamicCallTree;

impl DynamicCallTree {
    /// Builds the tree recorded in `mapping`. `functions[i - 1]` names the
    /// function with index `i`; indices without a name are ignored.
    pub fn build(mapping: &[u32], functions: &[String]) -> CallTree {
        let len = mapping.len().min(functions.len() + 1);
        let mut nodes: Vec<CallTreeNode> = (0..len)
            .map(|index| CallTreeNode {
                function: index.checked_sub(1).map(|i| functions[i].clone()),
                level: 0,
                children: Vec::new(),
            })
            .collect();

        for (index, &parent) in mapping.iter().enumerate().take(len).skip(1) {
            let parent = parent as usize;
            if parent == 0 {
                continue;
            }
            let attach_to = if parent == index || parent >= len || mapping[parent] == 0 {
                0
            } else {
                parent
            };
            nodes[attach_to].children.push(index);
        }

        let mut queue = VecDeque::from([0usize]);
        let mut visited = vec![false; len];
        visited[0] = true;
        while let Some(node) = queue.pop_front() {
            let level = nodes[node].level;
            for child in nodes[node].children.clone() {
                if !visited[child] {
                    visited[child] = true;
                    nodes[child].level = level + 1;
                    queue.push_back(child);
                }
            }
        }
        // Nodes caught in a parent cycle can never be reached from the root.
        for node in &mut nodes {
            node.children.retain(|&child| visited[child]);
        }

        CallTree { nodes }
    }
}

impl CallTree {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn function(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0)?.function.as_deref()
    }

    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .get(node.0)
            .into_iter()
            .flat_map(|n| n.children.iter().map(|&child| NodeId(child)))
    }

    /// Nodes, in breadth-first order, whose function is one of the test's
    /// entry points.
    pub fn test_subtrees(&self, entry_points: &[&str]) -> Vec<NodeId> {
        let mut subtrees = Vec::new();
        let mut queue = VecDeque::from([0usize]);
        while let Some(index) = queue.pop_front() {
            let node = &self.nodes[index];
            if node
                .function
                .as_deref()
                .is_some_and(|function| entry_points.contains(&function))
            {
                subtrees.push(NodeId(index));
            }
            queue.extend(node.children.iter().copied());
        }
        subtrees
    }

    /// Functions reached from `subtrees`, each with its distance from the
    /// subtree root. Skipped functions hide their whole subtree; children are
    /// only explored while the distance is below `max_distance`.
    pub fn testees(
        &self,
        subtrees: &[NodeId],
        test: &Arc<dyn Test>,
        max_distance: u32,
        skip: impl Fn(&str) -> bool,
    ) -> Vec<Testee> {
        let mut testees = Vec::new();
        for &NodeId(root) in subtrees {
            let Some(root_node) = self.nodes.get(root) else {
                continue;
            };
            let offset = root_node.level;
            let mut queue = VecDeque::from([root]);
            while let Some(index) = queue.pop_front() {
                let node = &self.nodes[index];
                let Some(function) = node.function.as_deref() else {
                    continue;
                };
                if skip(function) {
                    continue;
                }
                let distance = node.level - offset;
                testees.push(Testee {
                    function: function.to_string(),
                    test: Arc::clone(test),
                    distance,
                });
                if distance < max_distance {
                    queue.extend(node.children.iter().copied());
                }
            }
        }
        testees
    }
}

/// The tests reaching `function`, in testee order, each test at most once
/// with the smallest distance it was seen at.
pub fn reachable_tests(function: &str, testees: &[Testee]) -> Vec<ReachableTest> {
    let mut reachable: Vec<ReachableTest> = Vec::new();
    for testee in testees.iter().filter(|t| t.function == function) {
        match reachable
            .iter_mut()
            .find(|r| r.test.id() == testee.test.id())
        {
            Some(existing) => existing.distance = existing.distance.min(testee.distance),
            None => reachable.push(ReachableTest {
                test: Arc::clone(&testee.test),
                distance: testee.distance,
            }),
        }
    }
    reachable
}
