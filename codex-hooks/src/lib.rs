//! # Hook engine
//!
//! Pattern-matched pre/post/error hooks around tool invocations.
//!
//! ## Architecture
//!
//! - [`matcher`]: wildcard/exact/regex matching between a matcher string and
//!   a tool name, with a compiled-pattern cache.
//! - [`registry`]: ordered per-event tables of script and callback hooks,
//!   built on top of the shared pattern matcher.
//! - [`script_runner`] / [`callback_runner`]: execute a single hook (a shell
//!   command, or an in-process function) against a deadline.
//! - [`aggregator`]: pure function combining `n` hook results into one, by
//!   fixed precedence (deny > ask > block > allow).
//! - [`manager`]: the process-wide singleton tying the above together
//!   behind one `trigger` entry point.
//! - [`wrapper`]: wraps any async tool body in the pre/post/error hook
//!   lifecycle.
//! - [`api`]: convenience registration functions for the common
//!   pre/post/error hook shapes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_hooks::manager;
//! use codex_protocol::hooks::HookEventName;
//!
//! manager::register_callback(
//!     HookEventName::PreToolUse,
//!     "FileWrite",
//!     std::sync::Arc::new(|ctx| {
//!         codex_hooks::decision::HookResult::deny("writes are disabled")
//!     }),
//!     30,
//! ).await?;
//!
//! let result = manager::trigger_hook(
//!     HookEventName::PreToolUse,
//!     "FileWrite",
//!     serde_json::json!({"path": "/etc/passwd"}),
//!     None,
//! ).await;
//! ```

pub mod aggregator;
pub mod api;
pub mod callback_runner;
pub mod config;
pub mod decision;
pub mod error;
pub mod manager;
pub mod matcher;
pub mod registry;
pub mod script_runner;
pub mod wrapper;

pub use decision::HookResult;
pub use manager::HookManager;
pub use registry::CallbackHook;
pub use registry::HookRegistry;
pub use registry::NativeHookFn;
pub use registry::ScriptHook;
