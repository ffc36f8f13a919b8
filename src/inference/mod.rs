mod variable_elimination;
pub use variable_elimination::*;

mod clique_tree;
pub use clique_tree::*;

mod belief_propagation;
pub use belief_propagation::*;
