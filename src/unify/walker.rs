//! Link-graph traversal producing the connected component of a record.

use crate::store::links::{links_from, origins_of};
use crate::store::{EntityKind, Ident, LinkKind, Namespace};
use anyhow::Result;
use rusqlite::Connection;
use std::collections::BTreeSet;

/// Which namespaces and shared link kinds take part in unifying one entity kind.
#[derive(Debug, Clone)]
pub struct UnifyScope {
    pub kind: EntityKind,
    pub namespaces: Vec<Namespace>,
    /// Weak kinds: values shared by records of different catalogs (a social handle)
    /// that bridge otherwise unlinked components.
    pub shared: &'static [LinkKind],
}

impl UnifyScope {
    pub fn for_kind(kind: EntityKind) -> Self {
        let shared: &'static [LinkKind] = match kind {
            EntityKind::Artist => &[LinkKind::TwUser, LinkKind::PiCreator],
            EntityKind::Album | EntityKind::Track => &[],
        };
        Self {
            kind,
            namespaces: Namespace::for_entity(kind),
            shared,
        }
    }

    pub fn contains(&self, ns: Namespace) -> bool {
        self.namespaces.contains(&ns)
    }
}

/// Every record reachable from `start` through strong links, bridged through shared
/// weak values until no new value shows up.
///
/// Link targets without a row are part of the component; the caller decides what to
/// do with them.
pub fn component(conn: &Connection, scope: &UnifyScope, start: &Ident) -> Result<BTreeSet<Ident>> {
    let mut visited: BTreeSet<Ident> = BTreeSet::new();
    let mut bucket: BTreeSet<(LinkKind, String)> = BTreeSet::new();
    let mut pending: Vec<(LinkKind, String)> = Vec::new();
    let mut stack = vec![start.clone()];

    loop {
        while let Some(ident) = stack.pop() {
            if !visited.insert(ident.clone()) {
                continue;
            }

            for link in links_from(conn, &ident)? {
                if scope.shared.contains(&link.kind) {
                    let value = (link.kind, link.data);
                    if bucket.insert(value.clone()) {
                        pending.push(value);
                    }
                    continue;
                }
                if let Some(target) = link.kind.target_ident(&link.data) {
                    if scope.contains(target.namespace()) && !visited.contains(&target) {
                        stack.push(target);
                    }
                }
            }

            for origin in origins_of(conn, ident.namespace().link_kind(), ident.id())? {
                if scope.contains(origin.namespace()) && !visited.contains(&origin) {
                    stack.push(origin);
                }
            }
        }

        if pending.is_empty() {
            break;
        }
        for (kind, data) in pending.drain(..) {
            for origin in origins_of(conn, kind, &data)? {
                if scope.contains(origin.namespace()) && !visited.contains(&origin) {
                    stack.push(origin);
                }
            }
        }
    }

    Ok(visited)
}
