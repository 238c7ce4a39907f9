pub mod ntlm;

pub use ntlm::*;
