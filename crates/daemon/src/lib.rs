// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskd-daemon: process lifecycle, unix-socket listener, metrics HTTP.

pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod metrics_http;
pub mod protocol;

pub use lifecycle::{Daemon, LifecycleError};
pub use protocol::{ErrorCode, ProtocolError, Request, Response};
