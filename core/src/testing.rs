pub mod candidate;
pub mod case_runner;
pub mod orchestrator;
pub mod pool;
pub mod reference;
pub mod result;
pub mod testcase;

pub use candidate::*;
pub use case_runner::*;
pub use orchestrator::*;
pub use pool::*;
pub use reference::*;
pub use result::*;
pub use testcase::*;
