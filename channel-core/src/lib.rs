// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Domain core for the StreamChannel sequencer.
//!
//! Holds the channel/voucher data model, the admissibility rules a voucher
//! must pass before it is admitted, and the EIP-712 typed-data construction
//! shared with the on-chain contract. Everything here is pure: no I/O, no
//! clocks (callers pass `now`), no ambient state.

pub mod channel;
pub mod crypto;
pub mod voucher;

pub use channel::{ChannelState, RecipientBalance};
pub use voucher::{Allocation, VoucherError, VoucherSubmission};
