use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::store::links::link_targets;
use crate::store::records::{insert_stub, referenced_idents};
use crate::store::Ident;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub const EXTRAPOLATE_TASK: &str = "all.extrapolate.from_links";

/// Creates stub records for every ident that links or record metadata point at.
/// Stubs are picked up by the metadata fetchers on the next pass.
pub struct ExtrapolateTask;

#[async_trait]
impl PipelineTask for ExtrapolateTask {
    fn name(&self) -> &str {
        EXTRAPOLATE_TASK
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let targets: BTreeSet<Ident> = ctx.store.with_conn(|conn| {
            let mut targets = referenced_idents(conn)?;
            targets.extend(link_targets(conn)?);
            Ok(targets)
        })?;

        // ledger lookups take the connection lock themselves
        let mut eligible = Vec::with_capacity(targets.len());
        for ident in targets {
            if ctx.ledger.suppressed(&ident.to_string(), EXTRAPOLATE_TASK)? {
                debug!("Not recreating {}", ident);
                continue;
            }
            eligible.push(ident);
        }

        let created = ctx.store.with_transaction(|tx| -> anyhow::Result<usize> {
            let mut created = 0;
            for ident in &eligible {
                if insert_stub(tx, ident)? {
                    created += 1;
                }
            }
            Ok(created)
        })?;
        if created > 0 {
            info!("{}: {} new stubs", EXTRAPOLATE_TASK, created);
        }
        Ok(created > 0)
    }
}
