pub mod bootstrap;
pub mod catalog;
pub mod location;
pub mod registration;

pub use bootstrap::*;
pub use catalog::*;
pub use location::*;
pub use registration::*;
