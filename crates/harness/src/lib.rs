mod catalog;
mod workbench;

pub use catalog::{MockCatalog, WriteCounts};
pub use workbench::{ManualQueue, TestWorkbench};
