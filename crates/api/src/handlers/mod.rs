pub mod runs;
pub mod workflows;
