mod factor;
pub use factor::*;
