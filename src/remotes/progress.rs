// ABOUTME: Copy progress tree shared by concurrent copy tasks.
// ABOUTME: Each node is individually locked; reporting reads an immutable deep snapshot.

use crate::types::Descriptor;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Progress of a single descriptor and the descriptors it references.
#[derive(Debug)]
pub struct DescriptorProgress {
    descriptor: Descriptor,
    state: RwLock<NodeState>,
}

#[derive(Debug, Default)]
struct NodeState {
    done: bool,
    action: String,
    error: Option<String>,
    children: Vec<Arc<DescriptorProgress>>,
}

impl DescriptorProgress {
    pub fn new(descriptor: Descriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            state: RwLock::new(NodeState::default()),
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn mark_done(&self) {
        self.state.write().done = true;
    }

    pub fn set_action(&self, action: impl Into<String>) {
        self.state.write().action = action.into();
    }

    pub fn set_error(&self, error: &dyn std::error::Error) {
        self.state.write().error = Some(error.to_string());
    }

    pub fn add_child(&self, child: Arc<DescriptorProgress>) {
        self.state.write().children.push(child);
    }

    pub fn is_done(&self) -> bool {
        self.state.read().done
    }

    pub fn action(&self) -> String {
        self.state.read().action.clone()
    }

    pub fn snapshot(&self) -> DescriptorProgressSnapshot {
        let state = self.state.read();
        DescriptorProgressSnapshot {
            descriptor: self.descriptor.clone(),
            done: state.done,
            action: state.action.clone(),
            error: state.error.clone(),
            children: state.children.iter().map(|c| c.snapshot()).collect(),
        }
    }
}

/// Roots of the progress tree for one fixup invocation.
#[derive(Debug, Default)]
pub struct Progress {
    roots: RwLock<Vec<Arc<DescriptorProgress>>>,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_root(&self, root: Arc<DescriptorProgress>) {
        self.roots.write().push(root);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            roots: self.roots.read().iter().map(|r| r.snapshot()).collect(),
        }
    }
}

/// Immutable copy of the progress tree handed to event listeners.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub roots: Vec<DescriptorProgressSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorProgressSnapshot {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    pub done: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DescriptorProgressSnapshot>,
}

impl ProgressSnapshot {
    /// Visit every node depth-first.
    pub fn nodes(&self) -> Vec<&DescriptorProgressSnapshot> {
        fn visit<'a>(
            node: &'a DescriptorProgressSnapshot,
            out: &mut Vec<&'a DescriptorProgressSnapshot>,
        ) {
            out.push(node);
            for child in &node.children {
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            visit(root, &mut out);
        }
        out
    }

    /// Number of nodes marked done and total number of nodes.
    pub fn counts(&self) -> (usize, usize) {
        let nodes = self.nodes();
        (nodes.iter().filter(|n| n.done).count(), nodes.len())
    }
}
