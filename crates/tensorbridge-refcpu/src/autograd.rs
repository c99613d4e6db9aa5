//! Reverse-mode automatic differentiation over shared tensor nodes.
//!
//! # Architecture
//!
//! ```text
//! handle ──Box──► TensorRef = Arc<TensorNode>
//!                      │ grad_fn
//!                      ▼
//!                 GradNode { op: Box<dyn GradFn>, inputs: Vec<TensorRef> }
//! ```
//!
//! Each result node keeps its inputs alive, so the graph survives for as
//! long as any tensor built from it. `backward` walks the nodes reachable
//! from the root in topological order (petgraph) and adds the resulting
//! gradients into each leaf's `grad`. Gradients accumulate across calls
//! until `zero_grad` clears them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::dense::Dense;
use crate::status::{NativeError, NativeResult};

/// Shared reference to a tensor node. Native tensor handles box one of these.
pub type TensorRef = Arc<TensorNode>;

/// Backward function of one operation.
pub trait GradFn: Debug + Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &'static str;

    /// Given the gradient of the output, return one gradient per input.
    fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>>;
}

/// Operation that produced a node, with the nodes it consumed.
#[derive(Debug)]
pub struct GradNode {
    op: Box<dyn GradFn>,
    inputs: Vec<TensorRef>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A tensor value plus its autograd state.
#[derive(Debug)]
pub struct TensorNode {
    id: u64,
    value: Mutex<Dense>,
    grad: Mutex<Option<TensorRef>>,
    requires_grad: AtomicBool,
    grad_fn: Option<GradNode>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TensorNode {
    /// A leaf that does not require gradients.
    pub fn leaf(value: Dense) -> TensorRef {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            value: Mutex::new(value),
            grad: Mutex::new(None),
            requires_grad: AtomicBool::new(false),
            grad_fn: None,
        })
    }

    /// A leaf that requires gradients, e.g. a module parameter.
    pub fn parameter(value: Dense) -> TensorRef {
        let node = Self::leaf(value);
        node.requires_grad.store(true, Ordering::Relaxed);
        node
    }

    /// Result of an operation. Tracked only if some input requires gradients.
    pub fn from_op(value: Dense, op: Box<dyn GradFn>, inputs: Vec<TensorRef>) -> TensorRef {
        if !inputs.iter().any(|t| t.requires_grad()) {
            return Self::leaf(value);
        }
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            value: Mutex::new(value),
            grad: Mutex::new(None),
            requires_grad: AtomicBool::new(true),
            grad_fn: Some(GradNode { op, inputs }),
        })
    }

    /// Locked access to the value.
    pub fn value(&self) -> MutexGuard<'_, Dense> {
        lock(&self.value)
    }

    /// Copy of the value; never holds the lock past the call.
    pub fn snapshot(&self) -> Dense {
        self.value().clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.value().shape().to_vec()
    }

    pub fn is_leaf(&self) -> bool {
        self.grad_fn.is_none()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad.load(Ordering::Relaxed)
    }

    /// Only leaves may stop requiring gradients.
    pub fn set_requires_grad(&self, flag: bool) -> NativeResult<()> {
        if !flag && !self.is_leaf() {
            return Err(NativeError::InvalidArgument(
                "only leaf tensors can stop requiring gradients".to_string(),
            ));
        }
        self.requires_grad.store(flag, Ordering::Relaxed);
        Ok(())
    }

    /// Accumulated gradient, shared with this node.
    pub fn grad(&self) -> Option<TensorRef> {
        lock(&self.grad).clone()
    }

    /// Add `grad` into the stored gradient.
    pub fn accumulate_grad(&self, grad: Dense) -> NativeResult<()> {
        let mut slot = lock(&self.grad);
        match slot.as_ref() {
            Some(existing) => existing.value().add_assign(&grad),
            None => {
                *slot = Some(TensorNode::leaf(grad));
                Ok(())
            }
        }
    }

    /// Drop the stored gradient.
    pub fn zero_grad(&self) {
        *lock(&self.grad) = None;
    }
}

/// Reverse-mode differentiation from `root`.
///
/// `root` must hold a single element and require gradients.
pub fn backward(root: &TensorRef) -> NativeResult<()> {
    let shape = root.shape();
    if root.value().len() != 1 {
        return Err(NativeError::Autograd(format!(
            "grad can be implicitly created only for scalar outputs, got shape {shape:?}"
        )));
    }
    if !root.requires_grad() {
        return Err(NativeError::Autograd(
            "tensor does not require grad and has no grad_fn".to_string(),
        ));
    }

    // Edges point from a result to its inputs, so toposort yields results first.
    let mut graph: DiGraph<TensorRef, ()> = DiGraph::new();
    let mut index: HashMap<u64, NodeIndex> = HashMap::new();
    let root_idx = graph.add_node(Arc::clone(root));
    index.insert(root.id, root_idx);

    let mut stack = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        let Some(grad_fn) = &node.grad_fn else {
            continue;
        };
        let from = index[&node.id];
        for input in grad_fn.inputs.iter().filter(|t| t.requires_grad()) {
            let to = match index.entry(input.id) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let idx = graph.add_node(Arc::clone(input));
                    stack.push(Arc::clone(input));
                    *e.insert(idx)
                }
            };
            graph.update_edge(from, to, ());
        }
    }

    let order = toposort(&graph, None)
        .map_err(|_| NativeError::Autograd("autograd graph contains a cycle".to_string()))?;
    log::trace!("backward over {} nodes", order.len());

    let mut pending: HashMap<NodeIndex, Dense> = HashMap::new();
    pending.insert(root_idx, Dense::full(&shape, 1.0));

    for idx in order {
        let Some(grad_output) = pending.remove(&idx) else {
            continue;
        };
        let node = &graph[idx];
        let Some(grad_fn) = &node.grad_fn else {
            node.accumulate_grad(grad_output)?;
            continue;
        };

        let input_grads = grad_fn.op.backward(&grad_output)?;
        if input_grads.len() != grad_fn.inputs.len() {
            return Err(NativeError::Autograd(format!(
                "{} returned {} gradients for {} inputs",
                grad_fn.op.name(),
                input_grads.len(),
                grad_fn.inputs.len()
            )));
        }
        for (input, grad) in grad_fn.inputs.iter().zip(input_grads) {
            let Some(&input_idx) = index.get(&input.id) else {
                continue;
            };
            match pending.entry(input_idx) {
                Entry::Occupied(mut e) => e.get_mut().add_assign(&grad)?,
                Entry::Vacant(e) => {
                    e.insert(grad);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Passes the gradient through to every input, scaled.
    #[derive(Debug)]
    struct ScaleBackward {
        scale: f64,
        inputs: usize,
    }

    impl GradFn for ScaleBackward {
        fn name(&self) -> &'static str {
            "ScaleBackward"
        }

        fn backward(&self, grad_output: &Dense) -> NativeResult<Vec<Dense>> {
            Ok((0..self.inputs)
                .map(|_| grad_output.map(|g| g * self.scale))
                .collect())
        }
    }

    fn scale(input: &TensorRef, scale: f64) -> TensorRef {
        let value = input.snapshot().map(|x| x * scale);
        TensorNode::from_op(
            value,
            Box::new(ScaleBackward { scale, inputs: 1 }),
            vec![Arc::clone(input)],
        )
    }

    #[test]
    fn test_untracked_inputs_give_leaf() {
        let a = TensorNode::leaf(Dense::scalar(1.0));
        let b = scale(&a, 2.0);
        assert!(b.is_leaf());
        assert!(!b.requires_grad());
    }

    #[test]
    fn test_backward_chain() {
        let leaf = TensorNode::parameter(Dense::scalar(1.0));
        let y = scale(&scale(&leaf, 2.0), 3.0);
        assert!(!y.is_leaf());

        backward(&y).unwrap();
        let grad = leaf.grad().unwrap();
        assert_eq!(grad.snapshot().data(), &[6.0]);
    }

    #[test]
    fn test_backward_diamond_accumulates_paths() {
        let leaf = TensorNode::parameter(Dense::scalar(1.0));
        let y = TensorNode::from_op(
            Dense::scalar(2.0),
            Box::new(ScaleBackward { scale: 1.0, inputs: 2 }),
            vec![scale(&leaf, 2.0), scale(&leaf, 5.0)],
        );
        backward(&y).unwrap();
        assert_eq!(leaf.grad().unwrap().snapshot().data(), &[7.0]);
    }

    #[test]
    fn test_gradients_accumulate_across_calls() {
        let leaf = TensorNode::parameter(Dense::scalar(1.0));
        let y = scale(&leaf, 4.0);
        backward(&y).unwrap();
        backward(&y).unwrap();
        assert_eq!(leaf.grad().unwrap().snapshot().data(), &[8.0]);

        leaf.zero_grad();
        assert!(leaf.grad().is_none());
    }

    #[test]
    fn test_backward_non_scalar_error() {
        let leaf = TensorNode::parameter(Dense::full(&[3], 1.0));
        let y = scale(&leaf, 2.0);
        assert!(matches!(backward(&y), Err(NativeError::Autograd(_))));
    }

    #[test]
    fn test_backward_without_grad_error() {
        let t = TensorNode::leaf(Dense::scalar(1.0));
        assert!(matches!(backward(&t), Err(NativeError::Autograd(_))));
    }

    #[test]
    fn test_non_leaf_cannot_stop_tracking() {
        let leaf = TensorNode::parameter(Dense::scalar(1.0));
        let y = scale(&leaf, 2.0);
        assert!(y.set_requires_grad(false).is_err());
        assert!(leaf.set_requires_grad(false).is_ok());
    }
}
