//! Test helpers for Fundflow.
//!
//! Provides seeding helpers for users and accounts in the memory store and
//! conservation checks over it.

mod helpers;

pub use helpers::{assert_total_balance, inr, seed_account, seed_user, Ledger};

use anyhow::Result;
