pub mod process;

pub use process::{AnalyzerProcess, ProcessExit};
