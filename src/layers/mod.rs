mod conv3x3;
mod ops;

pub use conv3x3::*;
pub use ops::*;
