//! Submission ledger
//!
//! Every job description handed to the scheduler is stored with its script, batch name, cluster
//! id and number of queued jobs, so that earlier submissions can be listed and traced back to
//! their files after the terminal session is gone.

pub mod record;
pub mod load;
