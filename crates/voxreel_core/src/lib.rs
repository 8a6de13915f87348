pub mod error;
pub mod report;
pub mod resegment;
pub mod settings;
pub mod srt;
pub mod timing;
pub mod types;
