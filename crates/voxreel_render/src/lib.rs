pub mod backdrop;
pub mod cover;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod probe;
pub mod text;
