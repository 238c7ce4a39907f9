pub mod catalog;
pub mod host;
pub mod location;
pub mod property;

pub use catalog::*;
pub use host::*;
pub use location::*;
pub use property::*;

pub type Id = String;
