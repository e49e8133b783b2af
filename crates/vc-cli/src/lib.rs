//! kubevirt-console: Serial console access for KubeVirt VMIs
//!
//! Provides the `kubevirt-console` CLI: the terminal bridge behind the
//! `console` command and the glue that starts the web console.

pub mod commands;
pub mod output;
pub mod terminal;
