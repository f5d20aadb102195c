//! Reputation lookup against the VirusTotal IP endpoint.
//!
//! [`VirusTotalClient`] issues one HTTP GET per IP, normalizes the response
//! into a [`ReputationRecord`], and handles retries and rate limiting. The
//! [`ReputationLookup`] trait is the seam the scan coordinator depends on,
//! so tests can substitute a scripted lookup.

mod client;
mod types;

pub use client::{QueryError, ReputationLookup, VirusTotalClient};
pub use types::{NumberOrNa, ReputationRecord};
