//! Query functions grouped by table: `workflows`, `workflow_runs` and the
//! invoice line tables written by storage steps.

pub mod invoice_rows;
pub mod runs;
pub mod workflows;
