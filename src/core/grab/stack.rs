//! Stacks and their instances.

use std::path::Path;

use anyhow::Result;
use futures::{StreamExt, stream};
use tracing::{info, warn};

use super::{GrabContext, Tally};
use crate::core::layout::*;
use crate::core::model::{StackDescriptor, StackInstance};
use crate::core::sidecar::{StackInstanceRecord, StackRecord};
use crate::core::transport::{ApiCall, Endpoint, fetch_items};

const STACK_ENDPOINTS: [Endpoint; 4] = [
    Endpoint::GetAllStackInstances,
    Endpoint::GetStackSourceCode,
    Endpoint::GetStackLessVars,
    Endpoint::GetStackLess,
];

pub async fn grab_stacks(ctx: &GrabContext<'_>) -> Result<Tally> {
    if !STACK_ENDPOINTS.iter().all(|e| ctx.transport.supports(*e)) {
        warn!("server cannot serve stacks");
        return Ok(Tally::default());
    }

    let stacks =
        fetch_items::<StackDescriptor>(ctx.transport, Endpoint::GetAllStackInstances, ApiCall::new())
            .await?;
    ctx.root().make_tracked_dir(Path::new(STACKS_DIR))?;

    let mut tally = Tally::default();
    for stack in &stacks {
        tally += Tally::entity(&stack.display_name, grab_stack(ctx, stack).await);
    }
    Ok(tally)
}

async fn grab_stack(ctx: &GrabContext<'_>, stack: &StackDescriptor) -> Result<Tally> {
    info!(stack = %stack.display_name, "grabbing stack");
    let dir = Path::new(STACKS_DIR).join(sanitize_name(&stack.display_name));
    ctx.root().make_tracked_dir(&dir.join(INSTANCES_DIR))?;
    ctx.sidecar.write(
        &dir,
        &StackRecord {
            repository_id: stack.repository_id.clone(),
            stack_type: stack.stack_type.clone(),
            version: stack.version,
            display_name: stack.display_name.clone(),
            ..Default::default()
        },
    )?;

    let instances_dir = dir.join(INSTANCES_DIR);
    Ok(stream::iter(&stack.instances)
        .map(|instance| {
            let instances_dir = &instances_dir;
            async move {
                let result = grab_stack_instance(ctx, instances_dir, instance).await;
                Tally::entity(&instance.display_name, result)
            }
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum())
}

async fn grab_stack_instance(
    ctx: &GrabContext<'_>,
    instances_dir: &Path,
    instance: &StackInstance,
) -> Result<Tally> {
    let dir = instances_dir.join(sanitize_name(&instance.display_name));
    ctx.root().make_tracked_dir(&dir)?;
    ctx.sidecar.write(
        &dir,
        &StackInstanceRecord {
            repository_id: instance.key().to_string(),
            display_name: instance.display_name.clone(),
            ..Default::default()
        },
    )?;

    let mut tally = Tally::default();
    for (endpoint, file) in [
        (Endpoint::GetStackSourceCode, STACK_TEMPLATE),
        (Endpoint::GetStackLessVars, STACK_VARIABLES_LESS),
        (Endpoint::GetStackLess, STACK_LESS),
    ] {
        let call = ApiCall::new().param(instance.key());
        let step = ctx
            .copy_field(endpoint, call, "source", &dir.join(file), str::to_string)
            .await;
        tally.absorb(file, step);
    }
    Ok(tally)
}
