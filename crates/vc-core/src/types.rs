//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the virtual machine instance whose serial console is opened
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsoleTarget {
    /// Namespace the VMI lives in
    pub namespace: String,
    /// VMI name
    pub name: String,
}

impl ConsoleTarget {
    /// Create a new console target
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConsoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How the web server selects console targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Any VMI may be requested through query parameters
    Shared,
    /// A single VMI is fixed server-side
    Dedicated,
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Shared => write!(f, "shared"),
            ServerMode::Dedicated => write!(f, "dedicated"),
        }
    }
}
