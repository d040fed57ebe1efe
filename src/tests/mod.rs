//! Pipeline scenario tests
//!
//! Drive `CustodyTxBuilder` through the in-memory collaborators and inspect
//! the decoded transactions it hands off.

mod fixtures;
