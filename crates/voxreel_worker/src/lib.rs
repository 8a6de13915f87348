pub mod error;
pub mod protocol;
pub mod supervisor;
pub mod worker;
