use super::children;
use super::entity::{unify, UnifyError};
use super::walker::{component, UnifyScope};
use crate::metrics;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::store::records::unassigned;
use crate::store::{EntityKind, Ident};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Assigns canonical ids to unassigned records of one entity kind, then reconciles
/// the children of every assigned entity.
pub struct UnifyTask {
    name: String,
    scope: UnifyScope,
}

impl UnifyTask {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            name: format!("{}.unify", kind),
            scope: UnifyScope::for_kind(kind),
        }
    }
}

#[async_trait]
impl PipelineTask for UnifyTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let kind = self.scope.kind;
        let seeds: Vec<Ident> = ctx.store.with_conn(|conn| {
            let mut seeds = Vec::new();
            for ns in &self.scope.namespaces {
                seeds.extend(unassigned(conn, *ns)?);
            }
            Ok(seeds)
        })?;
        debug!("{}: {} unassigned records", self.name, seeds.len());

        let mut covered: BTreeSet<Ident> = BTreeSet::new();
        let mut mutated = false;
        for seed in seeds {
            if covered.contains(&seed) {
                continue;
            }
            let members = ctx
                .store
                .with_conn(|conn| component(conn, &self.scope, &seed))?;

            let outcome = ctx
                .store
                .with_transaction(|tx| unify(tx, kind, &members))
                .map_err(|e| {
                    if let UnifyError::Conflict { ids, .. } = &e {
                        error!("{}: component of {} spans {} ids {:?}", self.name, seed, kind, ids);
                    }
                    e
                })?;

            if outcome.created {
                metrics::record_entity_created(kind.table());
                if let Some(id) = outcome.entity_id {
                    info!("Created {} {} from {} records", kind, id, outcome.assigned);
                }
            }
            mutated |= outcome.assigned > 0;
            covered.extend(members);
        }

        let reconciled = ctx
            .store
            .with_transaction(|tx| children::reconcile(tx, kind))?;

        Ok(mutated || reconciled)
    }
}
