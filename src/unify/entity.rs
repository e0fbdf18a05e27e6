use crate::store::records::{assign_canonical_id, canonical_id, create_entity};
use crate::store::{EntityKind, Ident};
use rusqlite::Connection;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnifyError {
    /// Records already assigned to different canonical entities were found linked.
    /// Never resolved automatically.
    #[error("conflicting {kind} ids {ids:?} among {members:?}")]
    Conflict {
        kind: EntityKind,
        ids: Vec<i64>,
        members: Vec<Ident>,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for UnifyError {
    fn from(e: rusqlite::Error) -> Self {
        UnifyError::Store(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifyOutcome {
    /// `None` when no member of the component has a row.
    pub entity_id: Option<i64>,
    pub created: bool,
    /// Records that gained a canonical id.
    pub assigned: usize,
}

/// Gives every present member of `members` the same canonical id.
///
/// Run this inside a transaction: a conflict returns early and must roll back.
pub fn unify(
    conn: &Connection,
    kind: EntityKind,
    members: &BTreeSet<Ident>,
) -> Result<UnifyOutcome, UnifyError> {
    let mut present = Vec::new();
    let mut ids = BTreeSet::new();
    for member in members {
        match canonical_id(conn, member)? {
            None => continue,
            Some(id) => {
                present.push(member);
                ids.extend(id);
            }
        }
    }

    if ids.len() > 1 {
        return Err(UnifyError::Conflict {
            kind,
            ids: ids.into_iter().collect(),
            members: members.iter().cloned().collect(),
        });
    }
    if present.is_empty() {
        return Ok(UnifyOutcome {
            entity_id: None,
            created: false,
            assigned: 0,
        });
    }

    let (entity_id, created) = match ids.first() {
        Some(id) => (*id, false),
        None => (create_entity(conn, kind)?, true),
    };

    let mut assigned = 0;
    for member in present {
        if assign_canonical_id(conn, member, entity_id)? {
            assigned += 1;
        }
    }

    Ok(UnifyOutcome {
        entity_id: Some(entity_id),
        created,
        assigned,
    })
}
