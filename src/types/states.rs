use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};

/// A type alias for a hash map with a fast hash function, preserving insertion order.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;
/// A type alias for a hash set with a fast hash function, preserving insertion order.
pub type FxIndexSet<T> = IndexSet<T, FxBuildHasher>;

/// The name of a random variable.
pub type VarName = String;
/// The name of a factor.
pub type FactorName = String;

/// A set of variable names — the scope of a factor, cluster, or message.
pub type Scope = FxIndexSet<VarName>;
/// A mapping from variable name to the integer state assigned to it.
///
/// Both [`Assignment`] and [`Evidence`] use this alias: evidence is simply an
/// assignment over a subset of the model's variables.
pub type Assignment = FxIndexMap<VarName, usize>;
/// Point observations fixing specific variables to specific states.
pub type Evidence = Assignment;
