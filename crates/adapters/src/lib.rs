// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskd-adapters: process, crontab, and resource plumbing.

pub mod agent;
pub mod crontab;
pub mod resource;
pub mod subprocess;

pub use agent::{AgentCli, AgentError, AgentEvent, AgentHandle, AgentInvocation, ProcessAgentCli};
pub use crontab::{CrontabError, CrontabManager, CrontabSource, SystemCrontab};
pub use resource::ResourceStatus;

#[cfg(any(test, feature = "test-support"))]
pub use agent::{FakeAgentCli, FakeRun};
#[cfg(any(test, feature = "test-support"))]
pub use crontab::FakeCrontab;
