//! Remote snapshot: the destination's entities, indexed by natural key.
//!
//! Fetched once per invocation, before the first put. Lookups are in-memory;
//! a miss logs a warning and returns `None`, which callers read as "does not
//! exist on the destination".

use anyhow::Result;
use futures::{StreamExt, TryStreamExt, stream};
use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

use crate::core::model::{
    Element, StackDescriptor, StackInstance, Theme, WidgetDescriptor, WidgetDetail, WidgetInstance,
};
use crate::core::run::RunConfig;
use crate::core::transport::{ApiCall, Endpoint, Transport, fetch_items};

#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    themes: IndexMap<String, Theme>,
    descriptors: Vec<WidgetDescriptor>,
    /// Keyed by (display name, owning descriptor version)
    instances: IndexMap<(String, i64), WidgetInstance>,
    global_elements: IndexMap<String, Element>,
    stack_instances: IndexMap<String, StackInstance>,
    widget_details: Vec<WidgetDetail>,
}

impl RemoteSnapshot {
    /// Fetch and index everything the run will need. Independent reads run
    /// concurrently; the expensive ones only in transfer mode.
    #[instrument(skip_all, fields(transfer = run.transfer_mode))]
    pub async fn initialize(transport: &dyn Transport, run: &RunConfig) -> Result<Self> {
        let transfer = run.transfer_mode;

        let themes = fetch_items::<Theme>(
            transport,
            Endpoint::GetThemes,
            ApiCall::new().query("?type=custom"),
        );
        let instances = fetch_instances(transport);
        let descriptors =
            fetch_items::<WidgetDescriptor>(transport, Endpoint::GetAllWidgetDescriptors, ApiCall::new());
        let elements = async {
            if transfer && transport.supports(Endpoint::GetElements) {
                fetch_items::<Element>(
                    transport,
                    Endpoint::GetElements,
                    ApiCall::new().query("?globals=true"),
                )
                .await
            } else {
                Ok(Vec::new())
            }
        };
        let stacks = async {
            if transfer && transport.supports(Endpoint::GetAllStackInstances) {
                fetch_items::<StackDescriptor>(transport, Endpoint::GetAllStackInstances, ApiCall::new())
                    .await
            } else {
                Ok(Vec::new())
            }
        };

        let (themes, instances, descriptors, elements, stacks) =
            futures::try_join!(themes, instances, descriptors, elements, stacks)?;

        let mut snapshot = Self::default();
        themes.into_iter().for_each(|t| snapshot.insert_theme(t));
        descriptors.into_iter().for_each(|d| snapshot.insert_descriptor(d));
        elements.into_iter().for_each(|e| snapshot.insert_global_element(e));
        stacks
            .into_iter()
            .flat_map(|s| s.instances)
            .for_each(|i| snapshot.insert_stack_instance(i));

        // Element matching needs the fragments of every editable widget
        if transfer {
            let details: Vec<WidgetDetail> = stream::iter(
                instances
                    .iter()
                    .filter(|i| i.descriptor.editable_widget)
                    .map(|i| i.repository_id.clone()),
            )
            .map(|id| async move {
                let resp = transport
                    .call(Endpoint::GetWidget, ApiCall::new().param(id))
                    .await?;
                resp.parse::<WidgetDetail>(Endpoint::GetWidget)
            })
            .buffer_unordered(run.concurrency)
            .try_collect()
            .await?;
            details.into_iter().for_each(|d| snapshot.insert_widget_detail(d));
        }

        instances.into_iter().for_each(|i| snapshot.insert_instance(i));

        debug!(
            themes = snapshot.themes.len(),
            descriptors = snapshot.descriptors.len(),
            instances = snapshot.instances.len(),
            global_elements = snapshot.global_elements.len(),
            stack_instances = snapshot.stack_instances.len(),
            widget_details = snapshot.widget_details.len(),
            "remote snapshot ready"
        );
        Ok(snapshot)
    }

    /// Re-fetch the widget instance index (after creating an instance).
    pub async fn refresh_widget_instances(&mut self, transport: &dyn Transport) -> Result<()> {
        let instances = fetch_instances(transport).await?;
        self.instances.clear();
        instances.into_iter().for_each(|i| self.insert_instance(i));
        Ok(())
    }

    /// Re-fetch the widget descriptors (after installing a widget).
    pub async fn refresh_descriptors(&mut self, transport: &dyn Transport) -> Result<()> {
        self.descriptors =
            fetch_items::<WidgetDescriptor>(transport, Endpoint::GetAllWidgetDescriptors, ApiCall::new())
                .await?;
        Ok(())
    }

    pub fn insert_theme(&mut self, theme: Theme) {
        self.themes.insert(theme.name.clone(), theme);
    }

    pub fn insert_descriptor(&mut self, descriptor: WidgetDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn insert_instance(&mut self, instance: WidgetInstance) {
        let key = (instance.display_name.clone(), instance.descriptor.version);
        self.instances.insert(key, instance);
    }

    pub fn insert_global_element(&mut self, element: Element) {
        self.global_elements.insert(element.tag.clone(), element);
    }

    pub fn insert_stack_instance(&mut self, instance: StackInstance) {
        self.stack_instances.insert(instance.display_name.clone(), instance);
    }

    pub fn insert_widget_detail(&mut self, detail: WidgetDetail) {
        self.widget_details.push(detail);
    }

    /// Quiet existence check used before planning.
    pub fn has_theme(&self, display_name: &str) -> bool {
        self.themes.contains_key(display_name)
    }

    /// Quiet existence check used before planning.
    pub fn has_descriptor(&self, display_name: &str, version: i64) -> bool {
        self.find_descriptor(display_name, version).is_some()
    }

    pub fn has_instance(&self, display_name: &str, version: i64) -> bool {
        self.instances
            .contains_key(&(display_name.to_string(), version))
    }

    pub fn match_theme(&self, display_name: &str) -> Option<&Theme> {
        let found = self.themes.get(display_name);
        if found.is_none() {
            warn!(theme = display_name, "no matching theme found on the destination");
        }
        found
    }

    pub fn match_descriptor(&self, display_name: &str, version: i64) -> Option<&WidgetDescriptor> {
        let found = self.find_descriptor(display_name, version);
        if found.is_none() {
            warn!(widget = display_name, version, "no matching widget found on the destination");
        }
        found
    }

    /// Highest version of the widget called `display_name`.
    pub fn latest_descriptor(&self, display_name: &str) -> Option<&WidgetDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.display_name == display_name)
            .max_by_key(|d| d.version)
    }

    /// `version` is the owning descriptor's version, not the instance's.
    pub fn match_instance(&self, display_name: &str, version: i64) -> Option<&WidgetInstance> {
        let found = self
            .instances
            .get(&(display_name.to_string(), version));
        if found.is_none() {
            warn!(
                instance = display_name,
                version, "no matching widget instance found on the destination"
            );
        }
        found
    }

    pub fn match_stack_instance(&self, display_name: &str) -> Option<&StackInstance> {
        let found = self.stack_instances.get(display_name);
        if found.is_none() {
            warn!(stack = display_name, "no matching stack instance found on the destination");
        }
        found
    }

    pub fn match_global_element(&self, tag: &str) -> Option<&Element> {
        let found = self.global_elements.get(tag);
        if found.is_none() {
            warn!(tag, "no matching global element found on the destination");
        }
        found
    }

    /// Element under a widget: the widget detail must match on (version,
    /// display name) and list an element with `tag`.
    pub fn match_widget_element(
        &self,
        widget_display_name: &str,
        version: i64,
        tag: &str,
    ) -> Option<(&WidgetDescriptor, &Element)> {
        let found = self
            .widget_details
            .iter()
            .filter(|d| {
                d.descriptor.version == version && d.descriptor.display_name == widget_display_name
            })
            .find_map(|d| {
                d.fragments
                    .iter()
                    .find(|f| f.tag == tag)
                    .map(|f| (&d.descriptor, f))
            });
        if found.is_none() {
            warn!(
                widget = widget_display_name,
                version, tag, "no matching widget element found on the destination"
            );
        }
        found
    }

    fn find_descriptor(&self, display_name: &str, version: i64) -> Option<&WidgetDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.version == version && d.display_name == display_name)
    }
}

async fn fetch_instances(transport: &dyn Transport) -> Result<Vec<WidgetInstance>> {
    fetch_items::<WidgetInstance>(transport, Endpoint::ListWidgets, ApiCall::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, version: i64, repo: &str) -> WidgetDescriptor {
        WidgetDescriptor {
            repository_id: repo.into(),
            display_name: name.into(),
            version,
            ..Default::default()
        }
    }

    #[test]
    fn theme_match_by_display_name() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_theme(Theme { repository_id: "111".into(), name: "Red Theme".into() });

        assert_eq!(snap.match_theme("Red Theme").map(|t| t.repository_id.as_str()), Some("111"));
        assert!(snap.match_theme("Green Theme").is_none());
        assert!(snap.match_theme("red theme").is_none());
    }

    #[test]
    fn descriptor_match_needs_version() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_descriptor(descriptor("Cart Summary", 1, "cs1"));
        snap.insert_descriptor(descriptor("Cart Summary", 2, "cs2"));

        assert_eq!(
            snap.match_descriptor("Cart Summary", 2).map(|d| d.repository_id.as_str()),
            Some("cs2")
        );
        assert!(snap.match_descriptor("Cart Summary", 3).is_none());
    }

    #[test]
    fn latest_descriptor_takes_highest_version() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_descriptor(descriptor("Cart Summary", 2, "cs2"));
        snap.insert_descriptor(descriptor("Cart Summary", 1, "cs1"));
        snap.insert_descriptor(descriptor("Other", 5, "o5"));

        assert_eq!(
            snap.latest_descriptor("Cart Summary").map(|d| d.repository_id.as_str()),
            Some("cs2")
        );
        assert!(snap.latest_descriptor("Missing").is_none());
    }

    #[test]
    fn instance_keyed_by_descriptor_version() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_instance(WidgetInstance {
            repository_id: "i1".into(),
            display_name: "Cart A".into(),
            version: Some(9),
            descriptor: descriptor("Cart Summary", 2, "cs2"),
            ..Default::default()
        });

        assert!(snap.match_instance("Cart A", 2).is_some());
        assert!(snap.match_instance("Cart A", 9).is_none());
    }

    #[test]
    fn widget_element_two_step_match() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_widget_detail(WidgetDetail {
            descriptor: descriptor("Header", 1, "hdr1"),
            fragments: vec![Element { tag: "logo".into(), ..Default::default() }],
            ..Default::default()
        });

        let (desc, el) = snap
            .match_widget_element("Header", 1, "logo")
            .expect("match");
        assert_eq!(desc.repository_id, "hdr1");
        assert_eq!(el.tag, "logo");

        assert!(snap.match_widget_element("Header", 2, "logo").is_none());
        assert!(snap.match_widget_element("Header", 1, "menu").is_none());
    }

    #[test]
    fn stack_and_global_element_lookups() {
        let mut snap = RemoteSnapshot::default();
        snap.insert_stack_instance(StackInstance {
            repository_id: "st1".into(),
            display_name: "Home Tabs".into(),
            ..Default::default()
        });
        snap.insert_global_element(Element { tag: "company-logo".into(), ..Default::default() });

        assert!(snap.match_stack_instance("Home Tabs").is_some());
        assert!(snap.match_stack_instance("Other").is_none());
        assert!(snap.match_global_element("company-logo").is_some());
    }
}
