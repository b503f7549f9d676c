//! # Zha Test Suite
//!
//! Cross-crate flows run over the in-memory transport, so no network is
//! needed.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── slack_flow.rs   # dispatcher ⇄ supervisor
//!     └── bot_flow.rs     # bot runtime end to end
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p zha-tests
//! cargo test -p zha-tests integration::bot_flow
//! ```

pub mod integration;
