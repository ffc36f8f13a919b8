use log::debug;

use crate::algebra::Factor;
use crate::types::{Error, Evidence, FactorName, FxIndexMap, FxIndexSet, Result, Scope, VarName};

/// A named, validated collection of factors, indexed for elimination.
///
/// Built once and treated as read-only from then on: every query clones the
/// indices it needs into its own working copy rather than mutating `self`.
#[derive(Clone, Debug)]
pub struct Model {
    factors: FxIndexMap<FactorName, Factor>,
    scopes: FxIndexMap<FactorName, Scope>,
    reverse_scopes: FxIndexMap<VarName, FxIndexSet<FactorName>>,
    baggage: FxIndexMap<VarName, Scope>,
}

impl Model {
    /// Builds a model from a sequence of named factors.
    ///
    /// Variable and factor-name insertion order follows first appearance in
    /// `factors` (and, within a factor, first appearance in its rows), so
    /// that the greedy elimination heuristic's tie-break is a deterministic
    /// function of this order.
    ///
    /// # Errors
    ///
    /// Bubbles up any [`Error::MalformedFactor`] implied by an invalid
    /// factor; a factor with zero rows cannot occur here since
    /// [`Factor::new`]/[`Factor::with_name`] already reject it before a
    /// `Model` is ever assembled.
    pub fn new(factors: Vec<(FactorName, Factor)>) -> Result<Self> {
        let mut scopes = FxIndexMap::default();
        let mut reverse_scopes: FxIndexMap<VarName, FxIndexSet<FactorName>> = FxIndexMap::default();

        for (name, factor) in &factors {
            scopes.insert(name.clone(), factor.scope().clone());
            for var in factor.scope() {
                reverse_scopes
                    .entry(var.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }

        let mut baggage: FxIndexMap<VarName, Scope> = FxIndexMap::default();
        for (var, owners) in &reverse_scopes {
            let mut bag = Scope::default();
            for owner in owners {
                bag.extend(scopes[owner].iter().cloned());
            }
            baggage.insert(var.clone(), bag);
        }

        debug!(
            "built model with {} factors over {} variables",
            factors.len(),
            baggage.len()
        );

        Ok(Self {
            factors: factors.into_iter().collect(),
            scopes,
            reverse_scopes,
            baggage,
        })
    }

    /// The model's factors, keyed by name.
    #[inline]
    pub const fn factors(&self) -> &FxIndexMap<FactorName, Factor> {
        &self.factors
    }

    /// `scopes[name]`: the scope of each factor.
    #[inline]
    pub const fn scopes(&self) -> &FxIndexMap<FactorName, Scope> {
        &self.scopes
    }

    /// `reverse_scopes[v]`: the set of factor names whose scope contains `v`.
    #[inline]
    pub const fn reverse_scopes(&self) -> &FxIndexMap<VarName, FxIndexSet<FactorName>> {
        &self.reverse_scopes
    }

    /// `baggage[v]`: the union of scopes of every factor mentioning `v`.
    #[inline]
    pub const fn baggage(&self) -> &FxIndexMap<VarName, Scope> {
        &self.baggage
    }

    /// All variables known to this model, in first-seen order.
    pub fn variables(&self) -> impl Iterator<Item = &VarName> {
        self.baggage.keys()
    }

    /// Whether `var` is known to this model.
    pub fn has_variable(&self, var: &str) -> bool {
        self.baggage.contains_key(var)
    }

    /// Applies `evidence` to every factor, returning a fresh working copy of
    /// the factor store. The original model is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownVariable`] if an evidence variable is not
    /// known to the model, and [`Error::IncompatibleEvidence`] if reducing a
    /// factor by the evidence eliminates every one of its rows.
    pub fn reduce_by_evidence(&self, evidence: &Evidence) -> Result<FxIndexMap<FactorName, Factor>> {
        for var in evidence.keys() {
            if !self.has_variable(var) {
                return Err(Error::UnknownVariable(var.clone()));
            }
        }

        let mut reduced = FxIndexMap::default();
        for (name, factor) in &self.factors {
            let factor = if evidence.is_empty() {
                factor.clone()
            } else {
                factor.reduce_by_evidence(evidence)
            };
            if factor.is_empty() {
                return Err(Error::IncompatibleEvidence(name.clone()));
            }
            reduced.insert(name.clone(), factor);
        }
        Ok(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::FactorRow;

    fn row(pairs: &[(&str, usize)], weight: f64) -> FactorRow {
        let assignment = pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect();
        FactorRow::new(assignment, weight)
    }

    fn chain_model() -> Model {
        let a = Factor::with_name(
            "A",
            vec![row(&[("A", 0)], 0.6), row(&[("A", 1)], 0.4)],
        )
        .unwrap();
        let b_given_a = Factor::with_name(
            "B",
            vec![
                row(&[("A", 0), ("B", 0)], 0.9),
                row(&[("A", 0), ("B", 1)], 0.1),
                row(&[("A", 1), ("B", 0)], 0.2),
                row(&[("A", 1), ("B", 1)], 0.8),
            ],
        )
        .unwrap();

        Model::new(vec![("A".into(), a), ("B".into(), b_given_a)]).unwrap()
    }

    #[test]
    fn baggage_is_union_of_owning_scopes() {
        let model = chain_model();
        let baggage_a = model.baggage().get("A").unwrap();
        assert_eq!(baggage_a.len(), 2);
        assert!(baggage_a.contains("A"));
        assert!(baggage_a.contains("B"));
    }

    #[test]
    fn reduce_by_evidence_rejects_unknown_variable() {
        let model = chain_model();
        let evidence: Evidence = [("Z".to_string(), 0usize)].into_iter().collect();
        assert!(matches!(
            model.reduce_by_evidence(&evidence),
            Err(Error::UnknownVariable(_))
        ));
    }

    #[test]
    fn reduce_by_evidence_detects_incompatibility() {
        let model = chain_model();
        // A never takes state 2 in any factor, so factor "A" is wiped out.
        let evidence: Evidence = [("A".to_string(), 2usize)].into_iter().collect();
        assert!(matches!(
            model.reduce_by_evidence(&evidence),
            Err(Error::IncompatibleEvidence(_))
        ));
    }
}
