//! Integration flows.

pub mod bot_flow;
pub mod slack_flow;
