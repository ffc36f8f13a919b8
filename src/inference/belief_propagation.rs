use log::{debug, trace};

use crate::algebra::Factor;
use crate::inference::CliqueTree;
use crate::model::Model;
use crate::types::{Error, Evidence, FxIndexMap, FxIndexSet, Result, Scope, VarName};

type DirectedMessages = FxIndexMap<(String, String), Factor>;

/// Runs the two-pass message schedule over `tree` and returns, for each
/// cluster, its belief `product(psi(c), all incoming messages)`.
///
/// A single-cluster tree (the whole model collapsed into one cluster during
/// merging) skips both passes: its belief is ψ itself.
pub fn propagate(tree: &CliqueTree) -> Result<FxIndexMap<String, Factor>> {
    let mut messages: DirectedMessages = FxIndexMap::default();
    let mut ordering: Vec<String> = Vec::new();
    let mut remaining: FxIndexMap<String, FxIndexSet<String>> = tree.edges().clone();

    // Upward / collect pass: leaf-peel until one cluster (the root) remains.
    loop {
        let leaves: Vec<String> = remaining
            .iter()
            .filter(|(_, n)| n.len() == 1)
            .map(|(c, _)| c.clone())
            .collect();
        if leaves.is_empty() {
            break;
        }

        let batch = if leaves.len() == remaining.len() && remaining.len() > 1 {
            // All remaining clusters are leaves (two-cluster tree): send from
            // all but one so exactly one direction is taken this round.
            leaves[..leaves.len() - 1].to_vec()
        } else {
            leaves
        };

        for c in batch {
            let n = remaining[&c].iter().next().cloned().expect("leaf has one neighbor");
            let msg = send_message(tree, &messages, &c, &n, Direction::Upward)?;
            trace!("upward message {c} -> {n}, sepset size {}", msg.scope().len());
            messages.insert((c.clone(), n.clone()), msg);
            ordering.push(c.clone());

            if let Some(set) = remaining.get_mut(&n) {
                set.shift_remove(&c);
            }
            remaining.shift_remove(&c);
        }
    }

    if remaining.len() > 1 {
        return Err(Error::NonTreeClusterGraph(
            "upward pass did not converge to a single root".into(),
        ));
    }
    if let Some(root) = remaining.keys().next() {
        ordering.push(root.clone());
    }

    debug!("belief propagation processed {} clusters", ordering.len());

    // Downward / distribute pass: walk the collect order in reverse, root first.
    for c in ordering.iter().rev() {
        let neighbors: Vec<String> = tree.edges().get(c).map(|s| s.iter().cloned().collect()).unwrap_or_default();
        for n in neighbors {
            if messages.contains_key(&(c.clone(), n.clone())) {
                continue;
            }
            let msg = send_message(tree, &messages, c, &n, Direction::Downward)?;
            trace!("downward message {c} -> {n}, sepset size {}", msg.scope().len());
            messages.insert((c.clone(), n.clone()), msg);
        }
    }

    let mut beliefs = FxIndexMap::default();
    for (name, cluster) in tree.clusters() {
        let incoming: Vec<Factor> = tree
            .edges()
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|n| messages.get(&(n.clone(), name.clone())).cloned())
            .collect();

        let mut factors = vec![cluster.psi().clone()];
        factors.extend(incoming);
        beliefs.insert(name.clone(), Factor::multiply_product_list(&factors)?);
    }
    Ok(beliefs)
}

enum Direction {
    Upward,
    Downward,
}

/// Computes the message `c -> n`.
///
/// ψ(c) is always cloned before use, and every message folded in is cloned
/// from the store rather than taken by reference-and-mutate: no multiplication
/// here is ever allowed to observe, let alone corrupt, a factor still held
/// elsewhere (ψ(c) itself, or a message another edge will read later).
fn send_message(
    tree: &CliqueTree,
    messages: &DirectedMessages,
    c: &str,
    n: &str,
    direction: Direction,
) -> Result<Factor> {
    let cluster = tree
        .clusters()
        .get(c)
        .ok_or_else(|| Error::NonTreeClusterGraph(format!("unknown cluster `{c}`")))?;
    let neighbor = tree
        .clusters()
        .get(n)
        .ok_or_else(|| Error::NonTreeClusterGraph(format!("unknown cluster `{n}`")))?;

    let incoming: Vec<Factor> = match direction {
        Direction::Upward => {
            // incoming = messages already received from other neighbors of c.
            let original_neighbors = tree.edges().get(c).cloned().unwrap_or_default();
            original_neighbors
                .iter()
                .filter(|on| on.as_str() != n)
                .filter_map(|on| messages.get(&(on.clone(), c.to_string())).cloned())
                .collect()
        }
        Direction::Downward => tree
            .edges()
            .get(c)
            .into_iter()
            .flatten()
            .filter(|on| on.as_str() != n)
            .filter_map(|on| messages.get(&(on.clone(), c.to_string())).cloned())
            .collect(),
    };

    let mut factors = vec![cluster.psi().clone()];
    factors.extend(incoming);
    let combined = Factor::multiply_product_list(&factors)?;

    let sum_vars: Scope = cluster
        .scope()
        .iter()
        .filter(|v| !neighbor.scope().contains(*v))
        .cloned()
        .collect();
    Ok(combined.sum_out(&sum_vars))
}

/// Computes every single-variable marginal by clique-tree belief propagation.
///
/// # Errors
///
/// Propagates any [`Error`] from evidence reduction, model construction, or
/// clique-tree building.
pub fn marginals(model: &Model, evidence: &Evidence) -> Result<FxIndexMap<VarName, Vec<f64>>> {
    let reduced = model.reduce_by_evidence(evidence)?;
    let reduced_model = crate::model::Model::new(reduced.into_iter().collect())?;
    let tree = CliqueTree::build(&reduced_model)?;
    let beliefs = propagate(&tree)?;

    let mut result = FxIndexMap::default();
    for var in reduced_model.variables() {
        let (cluster_name, cluster) = tree
            .clusters()
            .iter()
            .find(|(_, c)| c.scope().contains(var))
            .ok_or_else(|| Error::UnknownVariable(var.clone()))?;

        let belief = &beliefs[cluster_name];
        let sum_vars: Scope = cluster.scope().iter().filter(|v| *v != var).cloned().collect();
        let marginal = belief.sum_out(&sum_vars).renormalize()?;

        let mut states: Vec<(usize, f64)> = marginal
            .rows()
            .iter()
            .map(|r| (*r.assignment().get(var).expect("row keeps the query variable"), r.weight()))
            .collect();
        states.sort_by_key(|(state, _)| *state);
        result.insert(var.clone(), states.into_iter().map(|(_, w)| w).collect());
    }
    Ok(result)
}
