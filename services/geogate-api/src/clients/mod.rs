//! HTTP implementations of the collaborator traits

pub mod acl;
pub mod catalog;
pub mod ledger;

pub use acl::HttpAccessList;
pub use catalog::HttpCatalog;
pub use ledger::{HttpUsageLedger, UsageTotals};
