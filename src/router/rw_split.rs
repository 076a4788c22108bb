use crate::connector::{StatementClassifier, StatementKind};
use crate::host::HostRequirement;

use tracing::debug;

/// Read-write routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// The write node (writes, locking reads, open transactions)
    Write,
    /// One of the read nodes
    Read,
}

/// Routing pin from `targetServerType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetServerType {
    /// Route by statement content
    #[default]
    Auto,
    Master,
    Secondary,
}

impl From<HostRequirement> for TargetServerType {
    fn from(requirement: HostRequirement) -> Self {
        match requirement {
            HostRequirement::Master => TargetServerType::Master,
            HostRequirement::Secondary => TargetServerType::Secondary,
            HostRequirement::Any | HostRequirement::PreferSecondary => TargetServerType::Auto,
        }
    }
}

/// Read-write splitter
pub struct RwSplitter;

impl RwSplitter {
    /// Determine routing target for one statement
    ///
    /// Inside a transaction (`auto_commit == false`) everything stays on the
    /// write node. A pin is honored next. Otherwise only a pure read without a
    /// row-lock clause goes to a read node; classification failures go to the
    /// write node.
    pub fn route(
        classifier: &dyn StatementClassifier,
        sql: &str,
        auto_commit: bool,
        pin: TargetServerType,
    ) -> RouteTarget {
        if !auto_commit {
            return RouteTarget::Write;
        }

        match pin {
            TargetServerType::Master => return RouteTarget::Write,
            TargetServerType::Secondary => return RouteTarget::Read,
            TargetServerType::Auto => {}
        }

        let kind = match classifier.classify(sql) {
            Ok(kind) => kind,
            Err(e) => {
                debug!(error = %e, "Classification failed, routing to write node");
                return RouteTarget::Write;
            }
        };
        if kind == StatementKind::WriteRequired {
            return RouteTarget::Write;
        }

        match classifier.has_lock_clause(sql) {
            Ok(false) => RouteTarget::Read,
            Ok(true) => RouteTarget::Write,
            Err(e) => {
                debug!(error = %e, "Lock clause check failed, routing to write node");
                RouteTarget::Write
            }
        }
    }

    /// Check if a statement may be served by a read node
    pub fn can_use_read_node(
        classifier: &dyn StatementClassifier,
        sql: &str,
        auto_commit: bool,
    ) -> bool {
        Self::route(classifier, sql, auto_commit, TargetServerType::Auto) == RouteTarget::Read
    }
}
