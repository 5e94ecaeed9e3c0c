pub mod drug;
pub mod enums;

pub use drug::*;
pub use enums::*;
