/// Migration Stages Module
///
/// One module per stage, run in this order by the pipeline:
/// - Extract: read pending rows from the source table
/// - Transform: add the enrichment columns
/// - Backup: snapshot the destination table
/// - Reconcile: delete destination rows superseded by the batch
/// - Load: append the batch to the destination table
/// - Mark: flip the sentinel on the source rows
///
/// Every stage except Transform takes its connection as a parameter and
/// attaches its stage and table to any failure.
pub mod backup;
pub mod extract;
pub mod load;
pub mod mark;
pub mod reconcile;
pub mod transform;
