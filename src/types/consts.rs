/// Tolerance used when deciding whether a partition function is numerically zero.
pub const EPSILON: f64 = 1e-9;
