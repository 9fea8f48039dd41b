//! Global elements and the elements that belong to widgets.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use futures::{StreamExt, stream};
use tracing::{debug, info, warn};

use super::{GrabContext, Tally, WidgetDirs};
use crate::core::layout::{ELEMENTS_DIR, ELEMENT_JAVASCRIPT, ELEMENT_TEMPLATE, SOURCE_BUILT_IN, sanitize_name};
use crate::core::model::{Element, WidgetDetail, WidgetInstance};
use crate::core::sidecar::ElementRecord;
use crate::core::transport::{ApiCall, Endpoint, fetch_items};

/// Write `code.<field>` of the response to `rel`, if there is any.
async fn copy_code(
    ctx: &GrabContext<'_>,
    endpoint: Endpoint,
    call: ApiCall,
    field: &str,
    rel: &Path,
) -> Result<usize> {
    let resp = ctx.fetch(endpoint, call).await?;
    let code = resp
        .data
        .get("code")
        .and_then(|c| c.get(field))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    match code {
        Some(code) => {
            ctx.write_with_etag(rel, code, resp.etag.as_deref())?;
            Ok(1)
        }
        None => Ok(0),
    }
}

pub async fn grab_elements(ctx: &GrabContext<'_>, dirs: &WidgetDirs) -> Result<Tally> {
    if ![Endpoint::GetFragmentTemplate, Endpoint::GetFragmentJavaScript]
        .into_iter()
        .all(|e| ctx.transport.supports(e))
    {
        warn!("server cannot serve elements");
        return Ok(Tally::default());
    }
    ctx.root().make_tracked_dir(Path::new(ELEMENTS_DIR))?;

    let mut tally = Tally::default();
    let mut global_tags = HashSet::new();
    if ctx.transport.supports(Endpoint::GetElements) {
        let (globals, t) = grab_global_elements(ctx).await?;
        global_tags = globals;
        tally += t;
    } else {
        warn!("server cannot serve global elements");
    }

    tally += grab_widget_elements(ctx, dirs, &global_tags).await?;
    Ok(tally)
}

/// Returns the tags seen, so widget fragments can leave them alone.
async fn grab_global_elements(ctx: &GrabContext<'_>) -> Result<(HashSet<String>, Tally)> {
    let listed = fetch_items::<Element>(
        ctx.transport,
        Endpoint::GetElements,
        ApiCall::new().query("?globals=true"),
    )
    .await?;

    let mut tags = HashSet::new();
    let elements: Vec<Element> = listed
        .into_iter()
        .filter(Element::is_grabbable)
        .filter(|e| tags.insert(e.tag.clone()))
        .collect();

    let tally = stream::iter(&elements)
        .map(|element| async move {
            Tally::entity(&element.tag, grab_global_element(ctx, element).await)
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum();
    Ok((tags, tally))
}

async fn grab_global_element(ctx: &GrabContext<'_>, element: &Element) -> Result<Tally> {
    info!(element = %element.dir_name(), "grabbing global element");
    let dir = Path::new(ELEMENTS_DIR).join(sanitize_name(element.dir_name()));
    ctx.root().make_tracked_dir(&dir)?;
    ctx.sidecar.write(&dir, &ElementRecord { tag: element.tag.clone(), ..Default::default() })?;

    let tag = || ApiCall::new().param(&element.tag);
    let mut tally = Tally::default();

    // Built-in elements expose no JavaScript
    if element.source != Some(SOURCE_BUILT_IN) {
        let step = copy_code(
            ctx,
            Endpoint::GetGlobalElementJavaScript,
            tag(),
            "javascript",
            &dir.join(ELEMENT_JAVASCRIPT),
        )
        .await;
        tally.absorb(ELEMENT_JAVASCRIPT, step);
    }
    let step = copy_code(
        ctx,
        Endpoint::GetGlobalElementTemplate,
        tag(),
        "template",
        &dir.join(ELEMENT_TEMPLATE),
    )
    .await;
    tally.absorb(ELEMENT_TEMPLATE, step);
    Ok(tally)
}

/// Elements of every editable widget, one instance per descriptor.
async fn grab_widget_elements(
    ctx: &GrabContext<'_>,
    dirs: &WidgetDirs,
    global_tags: &HashSet<String>,
) -> Result<Tally> {
    let listed =
        fetch_items::<WidgetInstance>(ctx.transport, Endpoint::ListWidgets, ApiCall::new()).await?;

    let mut seen = HashSet::new();
    let mut tally = Tally::default();
    for instance in listed {
        let descriptor = &instance.descriptor;
        if !descriptor.editable_widget || !seen.insert(descriptor.repository_id.clone()) {
            continue;
        }
        let result = grab_elements_of(ctx, dirs, global_tags, &instance).await;
        tally += Tally::entity(&descriptor.display_name, result);
    }
    Ok(tally)
}

async fn grab_elements_of(
    ctx: &GrabContext<'_>,
    dirs: &WidgetDirs,
    global_tags: &HashSet<String>,
    instance: &WidgetInstance,
) -> Result<Tally> {
    let descriptor = &instance.descriptor;
    let Some(widget_dir) =
        dirs.for_version(&descriptor.widget_type, descriptor.version, descriptor.is_latest())
    else {
        return Ok(Tally::default());
    };

    let detail: WidgetDetail = ctx
        .fetch(Endpoint::GetWidget, ApiCall::new().param(&instance.repository_id))
        .await?
        .parse(Endpoint::GetWidget)?;
    let elements: Vec<&Element> = detail
        .fragments
        .iter()
        .filter(|f| f.is_grabbable() && !global_tags.contains(&f.tag))
        .collect();
    if elements.is_empty() {
        return Ok(Tally::default());
    }

    let base = widget_dir.join(ELEMENTS_DIR);
    Ok(stream::iter(elements)
        .map(|element| {
            let base = base.clone();
            async move {
                let result = grab_widget_element(ctx, instance, element, &base).await;
                Tally::entity(&element.tag, result)
            }
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum())
}

async fn grab_widget_element(
    ctx: &GrabContext<'_>,
    instance: &WidgetInstance,
    element: &Element,
    base: &Path,
) -> Result<Tally> {
    let descriptor = &instance.descriptor;
    let dir = base.join(sanitize_name(element.dir_name()));

    let on_disk = ctx
        .sidecar
        .read_record::<ElementRecord>(&dir)?
        .and_then(|r| r.version);
    if on_disk.is_some_and(|v| v > descriptor.version) {
        debug!(element = %element.tag, "element on disk belongs to a newer widget version");
        return Ok(Tally::skipped());
    }

    info!(element = %element.dir_name(), widget = %descriptor.display_name, "grabbing element");
    ctx.root().make_tracked_dir(&dir)?;

    let code = || {
        ApiCall::new()
            .param(&descriptor.repository_id)
            .param(&element.tag)
    };
    let mut tally = Tally::default();
    let step = copy_code(
        ctx,
        Endpoint::GetFragmentTemplate,
        code(),
        "template",
        &dir.join(ELEMENT_TEMPLATE),
    )
    .await;
    tally.absorb(ELEMENT_TEMPLATE, step);

    if descriptor.js_editable {
        let step = copy_code(
            ctx,
            Endpoint::GetFragmentJavaScript,
            code(),
            "javascript",
            &dir.join(ELEMENT_JAVASCRIPT),
        )
        .await;
        tally.absorb(ELEMENT_JAVASCRIPT, step);
    }

    ctx.sidecar.write(
        &dir,
        &ElementRecord {
            tag: element.tag.clone(),
            widget_id: Some(descriptor.repository_id.clone()),
            version: Some(descriptor.version),
            ..Default::default()
        },
    )?;
    Ok(tally)
}
