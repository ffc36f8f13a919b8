use itertools::Itertools;

use crate::types::{Assignment, Error, Evidence, Result, Scope, VarName, EPSILON};

/// One row of a [`Factor`]: an assignment over the factor's scope paired with a weight.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorRow {
    assignment: Assignment,
    weight: f64,
}

impl FactorRow {
    /// Creates a new factor row.
    ///
    /// # Arguments
    ///
    /// * `assignment` - The row's assignment over the factor's scope.
    /// * `weight` - The (non-negative) weight associated with the assignment.
    ///
    #[inline]
    pub fn new(assignment: Assignment, weight: f64) -> Self {
        Self { assignment, weight }
    }

    /// The assignment of this row.
    #[inline]
    pub const fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// The weight of this row.
    #[inline]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// A canonical, order-independent key for this row's assignment.
    ///
    /// Two rows over the same scope collide under this key iff they agree on
    /// every variable, regardless of the insertion order of their maps.
    fn canonical_key(&self) -> Vec<(&str, usize)> {
        self.assignment
            .iter()
            .map(|(k, &v)| (k.as_str(), v))
            .sorted()
            .collect()
    }
}

/// The name a factor is known by, used in error messages only — the algebra
/// itself never branches on it. Intermediate factors produced by
/// [`Factor::product`]/[`Factor::sum_out`] are anonymous until an engine
/// names them (e.g. `T3`).
#[derive(Clone, Debug, Default)]
enum FactorOrigin {
    Named(String),
    #[default]
    Anonymous,
}

impl std::fmt::Display for FactorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Anonymous => write!(f, "<anonymous>"),
        }
    }
}

/// A non-negative potential over a scope of variables, represented as a sparse
/// sequence of rows. Rows absent from the sequence are implicitly zero.
#[derive(Clone, Debug)]
pub struct Factor {
    name: FactorOrigin,
    scope: Scope,
    rows: Vec<FactorRow>,
}

impl Factor {
    /// Creates a new anonymous factor from a sequence of rows.
    ///
    /// # Arguments
    ///
    /// * `rows` - The rows of the factor. Must be non-empty, every row must
    ///   share the same key set (the scope), and no two rows may share the
    ///   same assignment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFactor`] if `rows` is empty, if any two rows
    /// disagree on their key set, or if two rows share the same assignment.
    ///
    pub fn new(rows: Vec<FactorRow>) -> Result<Self> {
        Self::named(FactorOrigin::Anonymous, rows)
    }

    /// Creates a new factor known by `name`, used only in the error messages
    /// raised while validating it.
    pub fn with_name(name: impl Into<String>, rows: Vec<FactorRow>) -> Result<Self> {
        Self::named(FactorOrigin::Named(name.into()), rows)
    }

    fn named(name: FactorOrigin, rows: Vec<FactorRow>) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| Error::MalformedFactor(name.to_string(), "factor has no rows".into()))?;
        let scope: Scope = first.assignment.keys().cloned().collect();

        for row in &rows {
            let row_scope: Scope = row.assignment.keys().cloned().collect();
            if row_scope != scope {
                return Err(Error::MalformedFactor(
                    name.to_string(),
                    "rows do not share a common scope".into(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.canonical_key()) {
                return Err(Error::MalformedFactor(
                    name.to_string(),
                    "two rows share the same assignment".into(),
                ));
            }
        }

        Ok(Self { name, scope, rows })
    }

    /// The scope of this factor: the set of variables it is defined over.
    #[inline]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The rows of this factor. Rows absent here have implicit weight zero.
    #[inline]
    pub fn rows(&self) -> &[FactorRow] {
        &self.rows
    }

    /// Natural join: multiplies this factor with `other`, matching on their
    /// shared variables.
    ///
    /// For every pair of rows that agree on every variable in
    /// `scope(self) ∩ scope(other)`, emits one row whose assignment is the
    /// union of the two and whose weight is the product of the two weights.
    /// The scope of the result is `scope(self) ∪ scope(other)`.
    pub fn product(&self, other: &Self) -> Self {
        let shared: Scope = self.scope.intersection(&other.scope).cloned().collect();

        let mut rows = Vec::with_capacity(self.rows.len() * other.rows.len());
        for r1 in &self.rows {
            for r2 in &other.rows {
                if shared
                    .iter()
                    .all(|v| r1.assignment.get(v) == r2.assignment.get(v))
                {
                    let mut assignment = r1.assignment.clone();
                    for (var, &state) in &r2.assignment {
                        assignment.entry(var.clone()).or_insert(state);
                    }
                    rows.push(FactorRow::new(assignment, r1.weight * r2.weight));
                }
            }
        }

        // A product of two valid factors can never be empty nor contain
        // duplicate rows, so this cannot fail.
        Self::new(rows).expect("product of two valid factors is always valid")
    }

    /// Sums out a set of variables, marginalizing them away.
    ///
    /// Each row's assignment is projected onto `scope(self) \ vars`; rows
    /// that collide on the projection have their weights added together.
    /// If `vars` covers the whole scope, the result is a single row with an
    /// empty assignment holding the total mass.
    ///
    /// The source factor is left untouched: this method only ever reads `self`.
    pub fn sum_out(&self, vars: &Scope) -> Self {
        let new_scope: Scope = self
            .scope
            .iter()
            .filter(|v| !vars.contains(*v))
            .cloned()
            .collect();

        let mut grouped: Vec<(Vec<(VarName, usize)>, FactorRow)> = Vec::new();
        for row in &self.rows {
            let projected: Assignment = row
                .assignment
                .iter()
                .filter(|(v, _)| !vars.contains(*v))
                .map(|(v, &s)| (v.clone(), s))
                .collect();
            let key: Vec<(VarName, usize)> =
                projected.iter().map(|(v, &s)| (v.clone(), s)).sorted().collect();

            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => existing.weight += row.weight,
                None => grouped.push((key, FactorRow::new(projected, row.weight))),
            }
        }

        if new_scope.is_empty() {
            // Every variable was summed out: collapse to the total mass.
            let total: f64 = grouped.iter().map(|(_, r)| r.weight).sum();
            return Self {
                name: FactorOrigin::Anonymous,
                scope: Scope::default(),
                rows: vec![FactorRow::new(Assignment::default(), total)],
            };
        }

        Self {
            name: FactorOrigin::Anonymous,
            scope: new_scope,
            rows: grouped.into_iter().map(|(_, r)| r).collect(),
        }
    }

    /// Reduces this factor to be consistent with `evidence`.
    ///
    /// Drops every row that disagrees with `evidence` on a variable present
    /// in both the row and the evidence. Rows that do not mention any
    /// evidence variable are kept unchanged. The scope is never altered:
    /// evidence variables remain present in the surviving rows.
    pub fn reduce_by_evidence(&self, evidence: &Evidence) -> Self {
        let rows = self
            .rows
            .iter()
            .filter(|row| {
                evidence
                    .iter()
                    .all(|(var, &state)| row.assignment.get(var).is_none_or(|&s| s == state))
            })
            .cloned()
            .collect();

        Self {
            name: self.name.clone(),
            scope: self.scope.clone(),
            rows,
        }
    }

    /// Divides every weight by the partition function (the sum of all weights).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateFactor`] if the partition function is
    /// (numerically) zero.
    pub fn renormalize(&self) -> Result<Self> {
        let partition: f64 = self.rows.iter().map(FactorRow::weight).sum();
        if partition.abs() < EPSILON {
            return Err(Error::DegenerateFactor);
        }

        let rows = self
            .rows
            .iter()
            .map(|row| FactorRow::new(row.assignment.clone(), row.weight / partition))
            .collect();

        Ok(Self {
            name: self.name.clone(),
            scope: self.scope.clone(),
            rows,
        })
    }

    /// Left-folds [`Factor::product`] over a non-empty slice of factors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFactor`] if `factors` is empty.
    pub fn multiply_product_list(factors: &[Self]) -> Result<Self> {
        let mut iter = factors.iter();
        let first = iter.next().ok_or_else(|| {
            Error::MalformedFactor(
                "<product>".into(),
                "cannot multiply an empty list of factors".into(),
            )
        })?;

        Ok(iter.fold(first.clone(), |acc, f| acc.product(f)))
    }

    /// Number of rows explicitly stored in this factor.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether this factor holds no rows. Never true for a validly
    /// constructed factor, but useful for defensive checks elsewhere.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn row(pairs: &[(&str, usize)], weight: f64) -> FactorRow {
        let assignment = pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect();
        FactorRow::new(assignment, weight)
    }

    fn sorted_rows(f: &Factor) -> Vec<(Vec<(String, usize)>, f64)> {
        f.rows()
            .iter()
            .map(|r| {
                let mut kv: Vec<_> = r.assignment().iter().map(|(k, &v)| (k.clone(), v)).collect();
                kv.sort();
                (kv, r.weight())
            })
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect()
    }

    #[test]
    fn rejects_empty_factor() {
        assert!(Factor::new(vec![]).is_err());
    }

    #[test]
    fn rejects_inconsistent_scope() {
        let rows = vec![row(&[("A", 0)], 0.5), row(&[("A", 1), ("B", 0)], 0.5)];
        assert!(Factor::new(rows).is_err());
    }

    #[test]
    fn rejects_duplicate_rows() {
        let rows = vec![row(&[("A", 0)], 0.5), row(&[("A", 0)], 0.6)];
        assert!(Factor::new(rows).is_err());
    }

    #[test]
    fn product_is_commutative_up_to_row_order() {
        let a = Factor::new(vec![row(&[("A", 0)], 0.6), row(&[("A", 1)], 0.4)]).unwrap();
        let b = Factor::new(vec![
            row(&[("A", 0), ("B", 0)], 0.9),
            row(&[("A", 0), ("B", 1)], 0.1),
            row(&[("A", 1), ("B", 0)], 0.2),
            row(&[("A", 1), ("B", 1)], 0.8),
        ])
        .unwrap();

        let ab = a.product(&b);
        let ba = b.product(&a);
        assert_eq!(sorted_rows(&ab), sorted_rows(&ba));
        assert_eq!(
            ab.scope(),
            &Scope::from_iter(["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn sum_out_composition() {
        let f = Factor::new(vec![
            row(&[("A", 0), ("B", 0), ("C", 0)], 1.0),
            row(&[("A", 0), ("B", 0), ("C", 1)], 2.0),
            row(&[("A", 1), ("B", 0), ("C", 0)], 3.0),
            row(&[("A", 1), ("B", 1), ("C", 1)], 4.0),
        ])
        .unwrap();

        let x: Scope = Scope::from_iter(["A".to_string()]);
        let y: Scope = Scope::from_iter(["C".to_string()]);
        let xy: Scope = Scope::from_iter(["A".to_string(), "C".to_string()]);

        let step = f.sum_out(&x).sum_out(&y);
        let direct = f.sum_out(&xy);
        assert_eq!(sorted_rows(&step), sorted_rows(&direct));
    }

    #[test]
    fn sum_out_never_synthesizes_zero_rows() {
        let f = Factor::new(vec![row(&[("A", 0), ("B", 0)], 1.0)]).unwrap();
        let summed = f.sum_out(&Scope::from_iter(["B".to_string()]));
        // Only the one observed state of A survives; nothing is invented for A=1.
        assert_eq!(summed.rows().len(), 1);
    }

    #[test]
    fn reduce_by_evidence_is_idempotent() {
        let f = Factor::new(vec![
            row(&[("A", 0), ("B", 0)], 0.9),
            row(&[("A", 0), ("B", 1)], 0.1),
            row(&[("A", 1), ("B", 0)], 0.2),
            row(&[("A", 1), ("B", 1)], 0.8),
        ])
        .unwrap();
        let evidence: Evidence = [("A".to_string(), 1usize)].into_iter().collect();

        let once = f.reduce_by_evidence(&evidence);
        let twice = once.reduce_by_evidence(&evidence);
        assert_eq!(sorted_rows(&once), sorted_rows(&twice));
        assert_eq!(once.rows().len(), 2);
    }

    #[test]
    fn renormalize_divides_by_partition() {
        let f = Factor::new(vec![row(&[("A", 0)], 2.0), row(&[("A", 1)], 2.0)]).unwrap();
        let g = f.renormalize().unwrap();
        let sum: f64 = g.rows().iter().map(FactorRow::weight).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn renormalize_rejects_zero_mass() {
        let f = Factor::new(vec![row(&[("A", 0)], 0.0), row(&[("A", 1)], 0.0)]).unwrap();
        assert!(matches!(f.renormalize(), Err(Error::DegenerateFactor)));
    }

    #[test]
    fn multiply_product_list_folds_left_to_right() {
        let a = Factor::new(vec![row(&[("A", 0)], 1.0), row(&[("A", 1)], 2.0)]).unwrap();
        let b = Factor::new(vec![row(&[("A", 0)], 3.0), row(&[("A", 1)], 4.0)]).unwrap();
        let c = Factor::new(vec![row(&[("A", 0)], 5.0), row(&[("A", 1)], 6.0)]).unwrap();

        let got = Factor::multiply_product_list(&[a, b, c]).unwrap();
        let mut weights: Vec<f64> = got.rows().iter().map(FactorRow::weight).collect();
        weights.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(weights, vec![15.0, 48.0]);
    }

    #[test]
    fn multiply_product_list_rejects_empty() {
        assert!(Factor::multiply_product_list(&[]).is_err());
    }
}
