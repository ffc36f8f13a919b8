mod consts;
pub use consts::*;

mod error;
pub use error::*;

mod states;
pub use states::*;
