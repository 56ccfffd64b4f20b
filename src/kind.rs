//! Context kinds and the sharing policy between parent and child sessions

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{ContextError, Result};

/// How much state a context shares with its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Share-nothing: an own copy of all mutable state, including a
    /// duplicate of the parent's primitive-dispatch metadata. Safe for
    /// concurrent evaluation with the parent; any number of siblings. The
    /// initial context is always of this kind.
    Exclusive,

    /// Live references into the parent's namespace state; writes made by
    /// the child are visible to the parent. At most one live child of this
    /// kind per parent, and not safe to run concurrently with the parent's
    /// own evaluation.
    SharedWrite,

    /// A shallow structural snapshot of the parent's namespace taken at
    /// creation time; later changes in either direction do not propagate.
    /// Safe for concurrent evaluation with the parent; any number allowed.
    SharedReadCopy,
}

impl ContextKind {
    /// Does this kind require a parent context?
    pub fn requires_parent(self) -> bool {
        !matches!(self, ContextKind::Exclusive)
    }
}

/// Validate the requested parent/child relationship.
///
/// Runs at creation time, before any state module is built, so a rejected
/// relationship never leaves a half-constructed context in the registry.
/// The shared-write child slot is re-checked and reserved under the
/// parent's lock during creation; the check here exists to fail fast.
pub fn validate_relationship(kind: ContextKind, parent: Option<&Context>) -> Result<()> {
    match (kind, parent) {
        (ContextKind::Exclusive, _) => Ok(()),
        (ContextKind::SharedWrite, None) | (ContextKind::SharedReadCopy, None) => {
            Err(ContextError::ParentRequired { kind })
        }
        (ContextKind::SharedWrite, Some(parent)) => {
            // A shared-write child mutates its parent's namespace; stacking
            // one under another shared-write context would let two children
            // race on the grandparent's state.
            if parent.kind() == ContextKind::SharedWrite {
                return Err(ContextError::InvalidParentKind {
                    kind,
                    parent_kind: parent.kind(),
                });
            }
            if parent.shared_child().is_some() {
                return Err(ContextError::SharedWriteChildExists);
            }
            Ok(())
        }
        (ContextKind::SharedReadCopy, Some(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_needs_no_parent() {
        assert!(!ContextKind::Exclusive.requires_parent());
        assert!(validate_relationship(ContextKind::Exclusive, None).is_ok());
    }

    #[test]
    fn shared_kinds_need_a_parent() {
        assert_eq!(
            validate_relationship(ContextKind::SharedWrite, None),
            Err(ContextError::ParentRequired {
                kind: ContextKind::SharedWrite
            })
        );
        assert_eq!(
            validate_relationship(ContextKind::SharedReadCopy, None),
            Err(ContextError::ParentRequired {
                kind: ContextKind::SharedReadCopy
            })
        );
    }
}
