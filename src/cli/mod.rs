//! # CLI Module
//!
//! Command-line entry point for the `parley` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Run the server with one of the built-in handlers:
//!
//! ```bash
//! parley serve --addr 0.0.0.0:8080 --workers 8 --handler echo
//! parley serve --config parley.toml --handler static --root ./public
//! ```
//!
//! Settings are layered: defaults, then `--config FILE`, then `PARLEY_*`
//! environment variables, then flags. SIGINT or SIGTERM stops the listener;
//! in-flight requests finish before the process exits.
//!
//! ### `check-config`
//!
//! Validate a configuration file without binding a socket:
//!
//! ```bash
//! parley check-config --config parley.toml
//! ```

mod commands;


pub use commands::{
    builtin_modules, load_config, run, run_cli, Cli, Commands, HandlerKind, ServeArgs,
};
