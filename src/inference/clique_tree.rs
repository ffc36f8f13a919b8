use log::debug;

use crate::algebra::Factor;
use crate::model::Model;
use crate::types::{Error, FactorName, FxIndexMap, FxIndexSet, Result, Scope};

/// A node of the clique tree: a set of factor names and their combined scope.
#[derive(Clone, Debug)]
pub struct Cluster {
    name: String,
    members: Vec<FactorName>,
    scope: Scope,
    psi: Factor,
}

impl Cluster {
    /// The cluster's own name (`C<k>`, possibly absorbed into another and gone).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The names of the factors assigned to this cluster.
    #[inline]
    pub fn members(&self) -> &[FactorName] {
        &self.members
    }

    /// The union of the scopes of this cluster's members.
    #[inline]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// ψ: the product of this cluster's member factors.
    #[inline]
    pub const fn psi(&self) -> &Factor {
        &self.psi
    }
}

/// The clique tree: a set of clusters and the undirected edges between them.
#[derive(Clone, Debug)]
pub struct CliqueTree {
    clusters: FxIndexMap<String, Cluster>,
    edges: FxIndexMap<String, FxIndexSet<String>>,
}

impl CliqueTree {
    /// The surviving clusters, keyed by name.
    #[inline]
    pub const fn clusters(&self) -> &FxIndexMap<String, Cluster> {
        &self.clusters
    }

    /// The undirected adjacency of the tree: `edges[c]` is the set of `c`'s neighbors.
    #[inline]
    pub const fn edges(&self) -> &FxIndexMap<String, FxIndexSet<String>> {
        &self.edges
    }

    /// Builds a clique tree from `model` via the elimination trace + subset-merge algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonTreeClusterGraph`] if, after merging, the
    /// surviving cluster graph is not a tree — an invariant violation that
    /// well-formed input should never trigger.
    pub fn build(model: &Model) -> Result<Self> {
        let trace = EliminationTrace::run(model);
        let (mut clusters, mut edges) = trace.into_clusters_and_edges();
        merge_subset_clusters(&mut clusters, &mut edges);

        let mut materialized = FxIndexMap::default();
        for (name, raw) in clusters {
            let member_factors: Vec<Factor> = raw
                .members
                .iter()
                .filter_map(|m| model.factors().get(m).cloned())
                .collect();
            let psi = if member_factors.is_empty() {
                continue;
            } else {
                Factor::multiply_product_list(&member_factors)?
            };
            materialized.insert(
                name.clone(),
                Cluster {
                    name,
                    members: raw.members,
                    scope: raw.scope,
                    psi,
                },
            );
        }

        let tree = Self {
            clusters: materialized,
            edges,
        };
        tree.check_is_tree()?;
        Ok(tree)
    }

    fn check_is_tree(&self) -> Result<()> {
        let n = self.clusters.len();
        let edge_count: usize = self.edges.values().map(FxIndexSet::len).sum::<usize>() / 2;
        if n == 0 {
            return Ok(());
        }
        if edge_count != n - 1 {
            return Err(Error::NonTreeClusterGraph(format!(
                "expected {} edges for {n} clusters, found {edge_count}",
                n - 1
            )));
        }

        // Connectivity check via breadth-first traversal from any cluster.
        let start = self.clusters.keys().next().cloned().unwrap();
        let mut seen = FxIndexSet::default();
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            if !seen.insert(c.clone()) {
                continue;
            }
            if let Some(neighbors) = self.edges.get(&c) {
                for n in neighbors {
                    if !seen.contains(n) {
                        stack.push(n.clone());
                    }
                }
            }
        }
        if seen.len() != n {
            return Err(Error::NonTreeClusterGraph(format!(
                "cluster graph is disconnected: reached {} of {n} clusters",
                seen.len()
            )));
        }
        Ok(())
    }
}

struct RawCluster {
    members: Vec<FactorName>,
    scope: Scope,
}

/// Mirrors variable elimination's greedy order without computing any products:
/// each elimination step produces one cluster and links it to the clusters
/// whose τ it consumed.
struct EliminationTrace {
    clusters: FxIndexMap<String, RawCluster>,
    edges: FxIndexMap<String, FxIndexSet<String>>,
}

impl EliminationTrace {
    fn run(model: &Model) -> Self {
        let mut reverse_scopes = model.reverse_scopes().clone();
        let mut scopes = model.scopes().clone();
        let mut baggage = model.baggage().clone();

        let mut clusters: FxIndexMap<String, RawCluster> = FxIndexMap::default();
        let mut edges: FxIndexMap<String, FxIndexSet<String>> = FxIndexMap::default();
        let mut tau_to_cluster: FxIndexMap<FactorName, String> = FxIndexMap::default();

        let mut counter = 0usize;
        while !baggage.is_empty() {
            let v = baggage
                .iter()
                .min_by_key(|(_, bag)| bag.len())
                .map(|(var, _)| var.clone())
                .expect("baggage is non-empty");
            debug!("clique-tree trace: eliminating `{v}`");

            let pertinent: Vec<FactorName> = reverse_scopes
                .get(&v)
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default();

            let cluster_name = format!("C{counter}");
            let tau_name = format!("T{counter}");

            let members: Vec<FactorName> = pertinent
                .iter()
                .filter(|f| !tau_to_cluster.contains_key(*f))
                .cloned()
                .collect();

            let mut tau_scope = Scope::default();
            for f in &pertinent {
                if let Some(s) = scopes.get(f) {
                    tau_scope.extend(s.iter().cloned());
                }
            }
            for f in &pertinent {
                if let Some(owner) = tau_to_cluster.get(f) {
                    edges.entry(cluster_name.clone()).or_default().insert(owner.clone());
                    edges.entry(owner.clone()).or_default().insert(cluster_name.clone());
                }
            }
            tau_scope.shift_remove(&v);

            // The cluster's own scope is the union of its *member factors'*
            // scopes — distinct from tau_scope, which is the separator
            // handed onward to whichever cluster consumes this τ next.
            let mut cluster_scope = Scope::default();
            for m in &members {
                if let Some(s) = scopes.get(m) {
                    cluster_scope.extend(s.iter().cloned());
                }
            }

            clusters.insert(
                cluster_name.clone(),
                RawCluster {
                    members,
                    scope: cluster_scope,
                },
            );
            tau_to_cluster.insert(tau_name.clone(), cluster_name.clone());
            scopes.insert(tau_name.clone(), tau_scope.clone());

            for u in tau_scope.iter() {
                let rs = reverse_scopes.entry(u.clone()).or_default();
                for name in &pertinent {
                    rs.shift_remove(name);
                }
                rs.insert(tau_name.clone());

                if let Some(bag) = baggage.get_mut(u) {
                    bag.extend(tau_scope.iter().cloned());
                    bag.shift_remove(&v);
                }
            }
            baggage.shift_remove(&v);
            counter += 1;
        }

        Self { clusters, edges }
    }

    fn into_clusters_and_edges(self) -> (FxIndexMap<String, RawCluster>, FxIndexMap<String, FxIndexSet<String>>) {
        (self.clusters, self.edges)
    }
}

/// Absorbs every cluster whose scope is a subset of a neighbor's scope into
/// that neighbor, rerouting edges and dropping the absorbed cluster.
fn merge_subset_clusters(
    clusters: &mut FxIndexMap<String, RawCluster>,
    edges: &mut FxIndexMap<String, FxIndexSet<String>>,
) {
    let names: Vec<String> = clusters.keys().cloned().collect();
    for c1 in names {
        if !clusters.contains_key(&c1) {
            continue;
        }
        let neighbors: Vec<String> = edges.get(&c1).map(|s| s.iter().cloned().collect()).unwrap_or_default();

        let absorbing = neighbors.iter().find(|c2| {
            *c2 != &c1
                && clusters.contains_key(*c2)
                && clusters[&c1].scope.iter().all(|v| clusters[*c2].scope.contains(v))
        });
        let Some(c2) = absorbing.cloned() else {
            continue;
        };

        debug!("merging cluster `{c1}` into `{c2}`");
        let absorbed = clusters.shift_remove(&c1).unwrap();
        let target = clusters.get_mut(&c2).unwrap();
        target.members.extend(absorbed.members);
        target.scope.extend(absorbed.scope.into_iter());

        for other in &neighbors {
            if other == &c2 {
                continue;
            }
            if let Some(set) = edges.get_mut(other) {
                set.shift_remove(&c1);
                set.insert(c2.clone());
            }
            edges.entry(c2.clone()).or_default().insert(other.clone());
        }
        if let Some(set) = edges.get_mut(&c2) {
            set.shift_remove(&c1);
        }
        edges.shift_remove(&c1);
    }
}
