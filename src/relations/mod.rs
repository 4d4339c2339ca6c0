//! Relations whose data has to outlive the event that delivered it. Each handler takes the event payload,
//! checks that the data was provisioned for this application, and replaces its namespace in the
//! `StateStore`. Handlers return whether the stored data changed, so that callers only reconcile when
//! something is actually different.
pub mod mongodb;
pub mod pg;
