use log::debug;

use crate::algebra::Factor;
use crate::model::Model;
use crate::types::{Error, Evidence, FactorName, Result, Scope};

/// Computes the marginal of `query_var` by greedy-order variable elimination.
///
/// # Errors
///
/// - [`Error::UnknownVariable`] if `query_var` (or an evidence variable) is
///   not found in any factor's scope.
/// - [`Error::IncompatibleEvidence`] if `evidence` eliminates every row of
///   some factor.
/// - [`Error::DegenerateFactor`] if the final renormalization divisor is
///   (numerically) zero.
pub fn marginal(model: &Model, query_var: &str, evidence: &Evidence) -> Result<Factor> {
    let mut factors = model.reduce_by_evidence(evidence)?;
    let mut reverse_scopes = model.reverse_scopes().clone();
    let mut baggage = model.baggage().clone();

    if !baggage.contains_key(query_var) {
        return Err(Error::UnknownVariable(query_var.to_string()));
    }
    baggage.shift_remove(query_var);

    let mut counter = 0usize;
    loop {
        if baggage.is_empty() {
            break;
        }
        let is_last = baggage.len() == 1;

        let v = baggage
            .iter()
            .min_by_key(|(_, bag)| bag.len())
            .map(|(var, _)| var.clone())
            .expect("baggage is non-empty");
        debug!("eliminating variable `{v}` (baggage size {})", baggage[&v].len());

        let pertinent: Vec<FactorName> = reverse_scopes
            .get(&v)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();

        let product_list: Vec<Factor> = pertinent
            .iter()
            .filter_map(|name| factors.shift_remove(name))
            .collect();
        let combined = Factor::multiply_product_list(&product_list)?;
        let tau = combined.sum_out(&Scope::from_iter([v.clone()]));

        if is_last {
            let leftover: Vec<FactorName> = reverse_scopes
                .get(query_var)
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default();

            let mut closing_list = vec![tau];
            for name in leftover {
                if let Some(f) = factors.shift_remove(&name) {
                    closing_list.push(f);
                }
            }
            let result = Factor::multiply_product_list(&closing_list)?;
            return result.renormalize();
        }

        let t_name: FactorName = format!("T{counter}");
        counter += 1;

        for u in tau.scope().iter() {
            let rs = reverse_scopes.entry(u.clone()).or_default();
            for name in &pertinent {
                rs.shift_remove(name);
            }
            rs.insert(t_name.clone());

            if let Some(bag) = baggage.get_mut(u) {
                bag.extend(tau.scope().iter().cloned());
                bag.shift_remove(&v);
            }
        }
        baggage.shift_remove(&v);
        factors.insert(t_name, tau);
    }

    // baggage was empty to begin with: query_var had no neighbors at all.
    // Fall back to whatever singleton potential(s) mention it directly.
    let leftover: Vec<FactorName> = reverse_scopes
        .get(query_var)
        .map(|names| names.iter().cloned().collect())
        .unwrap_or_default();
    let closing_list: Vec<Factor> = leftover
        .into_iter()
        .filter_map(|name| factors.shift_remove(&name))
        .collect();
    let result = Factor::multiply_product_list(&closing_list)?;
    result.renormalize()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::algebra::FactorRow;

    fn row(pairs: &[(&str, usize)], weight: f64) -> FactorRow {
        let assignment = pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect();
        FactorRow::new(assignment, weight)
    }

    fn chain_model() -> Model {
        let a = Factor::with_name("A", vec![row(&[("A", 0)], 0.6), row(&[("A", 1)], 0.4)]).unwrap();
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

    // Evidence reduction drops rows that disagree with the evidence (§4.A),
    // so a queried state can be legitimately absent from the result; that is
    // weight 0, not a bug, and must not panic.
    fn weight_of(f: &Factor, var: &str, state: usize) -> f64 {
        f.rows()
            .iter()
            .find(|r| r.assignment().get(var) == Some(&state))
            .map_or(0.0, FactorRow::weight)
    }

    #[test]
    fn s1_two_variable_chain_no_evidence() {
        let model = chain_model();
        let evidence = Evidence::default();

        let pa = marginal(&model, "A", &evidence).unwrap();
        assert_abs_diff_eq!(weight_of(&pa, "A", 0), 0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(weight_of(&pa, "A", 1), 0.4, epsilon = 1e-9);

        let pb = marginal(&model, "B", &evidence).unwrap();
        assert_abs_diff_eq!(weight_of(&pb, "B", 0), 0.62, epsilon = 1e-9);
        assert_abs_diff_eq!(weight_of(&pb, "B", 1), 0.38, epsilon = 1e-9);
    }

    #[test]
    fn s2_chain_with_evidence() {
        let model = chain_model();
        let evidence: Evidence = [("A".to_string(), 1usize)].into_iter().collect();

        let pa = marginal(&model, "A", &evidence).unwrap();
        assert_abs_diff_eq!(weight_of(&pa, "A", 0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(weight_of(&pa, "A", 1), 1.0, epsilon = 1e-9);

        let pb = marginal(&model, "B", &evidence).unwrap();
        assert_abs_diff_eq!(weight_of(&pb, "B", 0), 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(weight_of(&pb, "B", 1), 0.8, epsilon = 1e-9);
    }

    #[test]
    fn unknown_query_variable_is_rejected() {
        let model = chain_model();
        let evidence = Evidence::default();
        assert!(matches!(
            marginal(&model, "Z", &evidence),
            Err(Error::UnknownVariable(_))
        ));
    }

    #[test]
    fn s4_degenerate_evidence_fails() {
        let model = chain_model();
        let evidence: Evidence = [("A".to_string(), 7usize)].into_iter().collect();
        assert!(marginal(&model, "B", &evidence).is_err());
    }

    #[test]
    fn marginal_is_normalized() {
        let model = chain_model();
        let pb = marginal(&model, "B", &Evidence::default()).unwrap();
        let sum: f64 = pb.rows().iter().map(FactorRow::weight).sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
    }
}
