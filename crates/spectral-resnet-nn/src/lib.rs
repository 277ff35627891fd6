pub mod layers;
pub mod conv;
pub mod norm;
pub mod sequential;

pub use layers::*;
pub use conv::*;
pub use norm::*;
pub use sequential::*;
