pub mod binary;
pub mod buffer;
pub mod colors;
pub mod config;
pub mod errors;
pub mod matcher;
pub mod printer;
pub mod queue;
pub mod scanner;
pub mod walk;
pub mod worker;

// Re-export commonly used types
pub use binary::BinaryMode;
pub use colors::ColorSpecs;
pub use config::{Config, DeviceAction, DirectoryAction, ListMode};
pub use errors::{GrepError, Result};
pub use matcher::{Matcher, MatcherKind, PatternSet};
