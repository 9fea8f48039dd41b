//! Identity resolution.
//!
//! Every put handler needs the destination's id for the entity it writes.
//! In normal mode that id comes straight from the sidecar record. In
//! transfer mode the sidecar belongs to another installation, so only its
//! natural keys (display name, version, tag) are read and translated through
//! the [`RemoteSnapshot`]. Handlers never need to know which happened.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::core::asset::AssetType;
use crate::core::sidecar::{
    ElementRecord, SidecarRecord, SidecarStore, StackInstanceRecord, ThemeRecord, Tracked,
    WidgetInstanceRecord, WidgetRecord,
};
use crate::core::snapshot::RemoteSnapshot;

/// Outcome of a lookup that is allowed to miss.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
}

impl<T> Resolution<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(t) => Some(t),
            Self::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolution<U> {
        match self {
            Self::Found(t) => Resolution::Found(f(t)),
            Self::NotFound => Resolution::NotFound,
        }
    }
}

impl<T> From<Option<T>> for Resolution<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::NotFound, Self::Found)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThemeIdentity {
    pub repository_id: String,
    pub display_name: String,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WidgetIdentity {
    pub repository_id: String,
    pub widget_type: String,
    pub display_name: String,
    pub version: i64,
    pub source: Option<i64>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceIdentity {
    pub repository_id: String,
    pub descriptor_repository_id: String,
    pub display_name: String,
    pub version: i64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementIdentity {
    pub tag: String,
    /// Owning widget descriptor, absent for global elements
    pub widget_id: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackInstanceIdentity {
    pub repository_id: String,
    pub display_name: String,
    pub etag: Option<String>,
}

/// Destination identity of an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Theme(ThemeIdentity),
    Widget(WidgetIdentity),
    WidgetInstance { widget: WidgetIdentity, instance: InstanceIdentity },
    Element(ElementIdentity),
    StackInstance(StackInstanceIdentity),
    /// Storefront-wide assets addressed by path alone
    Unscoped { etag: Option<String> },
}

/// Borrowed view over the two identity sources.
#[derive(Clone, Copy)]
pub struct IdentityResolver<'a> {
    transfer_mode: bool,
    sidecar: &'a SidecarStore,
    snapshot: &'a RemoteSnapshot,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(transfer_mode: bool, sidecar: &'a SidecarStore, snapshot: &'a RemoteSnapshot) -> Self {
        Self { transfer_mode, sidecar, snapshot }
    }

    /// Identity for `rel` classified as `asset`.
    pub fn resolve(&self, rel: &Path, asset: AssetType) -> Result<Resolution<Identity>> {
        use AssetType::*;
        Ok(match asset {
            Theme | ThemeVariables | ThemeStyles | ThemeAdditionalStyles => {
                self.theme(rel)?.map(Identity::Theme)
            }
            Widget | WidgetMetadataJson | WidgetBaseTemplate | WidgetBaseLess
            | WidgetBaseSnippets | WidgetConfigJson | WidgetConfigSnippets | WidgetJavascript
            | WidgetModuleJavascript => self.widget(rel)?.map(Identity::Widget),
            WidgetInstance | WidgetInstanceMetadataJson | WidgetInstanceTemplate
            | WebContentTemplate | WidgetInstanceLess | WidgetInstanceSnippets => {
                let Resolution::Found(widget) = self.widget(rel)? else {
                    return Ok(Resolution::NotFound);
                };
                self.instance(rel)?
                    .map(|instance| Identity::WidgetInstance { widget, instance })
            }
            GlobalElementTemplate | GlobalElementJavascript => {
                self.element(rel, true)?.map(Identity::Element)
            }
            ElementTemplate | ElementJavascript => self.element(rel, false)?.map(Identity::Element),
            StackInstanceTemplate | StackInstanceVariablesLess | StackInstanceLess => {
                self.stack_instance(rel)?.map(Identity::StackInstance)
            }
            GlobalSnippets | ApplicationJavascript => {
                Resolution::Found(Identity::Unscoped { etag: self.file_etag(rel)? })
            }
        })
    }

    /// Etag of a path, never carried across installations.
    pub fn file_etag(&self, rel: &Path) -> Result<Option<String>> {
        if self.transfer_mode {
            Ok(None)
        } else {
            self.sidecar.etags().read(rel)
        }
    }

    pub fn theme(&self, rel: &Path) -> Result<Resolution<ThemeIdentity>> {
        let Some(Tracked { record, etag }) = self.local::<ThemeRecord>(rel)? else {
            return Ok(Resolution::NotFound);
        };

        if !self.transfer_mode {
            return Ok(Resolution::Found(ThemeIdentity {
                repository_id: record.repository_id,
                display_name: record.display_name,
                etag,
            }));
        }

        Ok(self
            .snapshot
            .match_theme(&record.display_name)
            .map(|t| ThemeIdentity {
                repository_id: t.repository_id.clone(),
                display_name: t.name.clone(),
                etag: None,
            })
            .into())
    }

    pub fn widget(&self, rel: &Path) -> Result<Resolution<WidgetIdentity>> {
        let Some(Tracked { record, etag }) = self.local::<WidgetRecord>(rel)? else {
            return Ok(Resolution::NotFound);
        };

        if !self.transfer_mode {
            return Ok(Resolution::Found(WidgetIdentity {
                repository_id: record.repository_id,
                widget_type: record.widget_type,
                display_name: record.display_name,
                version: record.version,
                source: record.source,
                etag,
            }));
        }

        Ok(self
            .snapshot
            .match_descriptor(&record.display_name, record.version)
            .map(|d| WidgetIdentity {
                repository_id: d.repository_id.clone(),
                widget_type: d.widget_type.clone(),
                display_name: d.display_name.clone(),
                version: d.version,
                source: Some(d.source),
                etag: None,
            })
            .into())
    }

    pub fn instance(&self, rel: &Path) -> Result<Resolution<InstanceIdentity>> {
        let Some(Tracked { record, etag }) = self.local::<WidgetInstanceRecord>(rel)? else {
            return Ok(Resolution::NotFound);
        };

        if !self.transfer_mode {
            return Ok(Resolution::Found(InstanceIdentity {
                repository_id: record.repository_id,
                descriptor_repository_id: record.descriptor_repository_id,
                display_name: record.display_name,
                version: record.version,
                etag,
            }));
        }

        Ok(self
            .snapshot
            .match_instance(&record.display_name, record.version)
            .map(|i| InstanceIdentity {
                repository_id: i.repository_id.clone(),
                descriptor_repository_id: i.descriptor.repository_id.clone(),
                display_name: i.display_name.clone(),
                version: i.descriptor.version,
                etag: None,
            })
            .into())
    }

    pub fn element(&self, rel: &Path, global: bool) -> Result<Resolution<ElementIdentity>> {
        let Some(Tracked { record, etag }) = self.local::<ElementRecord>(rel)? else {
            return Ok(Resolution::NotFound);
        };

        if !self.transfer_mode {
            return Ok(Resolution::Found(ElementIdentity {
                tag: record.tag,
                widget_id: if global { None } else { record.widget_id },
                etag,
            }));
        }

        if global {
            return Ok(self
                .snapshot
                .match_global_element(&record.tag)
                .map(|e| ElementIdentity { tag: e.tag.clone(), widget_id: None, etag: None })
                .into());
        }

        // Widget-scoped: natural keys of the owning widget select the detail entry
        let Some(widget) = self.sidecar.read_record::<WidgetRecord>(rel)? else {
            warn!(path = %rel.display(), "no widget metadata for element");
            return Ok(Resolution::NotFound);
        };
        Ok(self
            .snapshot
            .match_widget_element(&widget.display_name, widget.version, &record.tag)
            .map(|(descriptor, e)| ElementIdentity {
                tag: e.tag.clone(),
                widget_id: Some(descriptor.repository_id.clone()),
                etag: None,
            })
            .into())
    }

    pub fn stack_instance(&self, rel: &Path) -> Result<Resolution<StackInstanceIdentity>> {
        let Some(Tracked { record, etag }) = self.local::<StackInstanceRecord>(rel)? else {
            return Ok(Resolution::NotFound);
        };

        if !self.transfer_mode {
            return Ok(Resolution::Found(StackInstanceIdentity {
                repository_id: record.repository_id,
                display_name: record.display_name,
                etag,
            }));
        }

        Ok(self
            .snapshot
            .match_stack_instance(&record.display_name)
            .map(|s| StackInstanceIdentity {
                repository_id: s.key().to_string(),
                display_name: s.display_name.clone(),
                etag: None,
            })
            .into())
    }

    /// Local sidecar record; a miss is logged once here.
    fn local<R: SidecarRecord>(&self, rel: &Path) -> Result<Option<Tracked<R>>> {
        let tracked = self.sidecar.read::<R>(rel)?;
        if tracked.is_none() {
            warn!(
                path = %rel.display(),
                sidecar = R::KIND.file_name(),
                "no local metadata; cannot tell which remote entity this is"
            );
        }
        Ok(tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Theme, WidgetDescriptor};
    use crate::infra::io::ContentRoot;
    use tempfile::TempDir;

    fn red_theme_fixture() -> Result<(TempDir, SidecarStore, RemoteSnapshot)> {
        let tmp = TempDir::new()?;
        let store = SidecarStore::new(ContentRoot::new(tmp.path()));
        let mut snapshot = RemoteSnapshot::default();
        snapshot.insert_theme(Theme { repository_id: "111".into(), name: "Red Theme".into() });
        Ok((tmp, store, snapshot))
    }

    fn write_theme(store: &SidecarStore, dir: &str, name: &str) -> Result<()> {
        store.write(
            Path::new(dir),
            &ThemeRecord {
                repository_id: "source-only-id".into(),
                display_name: name.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn transfer_mode_theme_matches_by_name() -> Result<()> {
        let (_tmp, store, snapshot) = red_theme_fixture()?;
        write_theme(&store, "theme/Red Theme", "Red Theme")?;
        write_theme(&store, "theme/Green Theme", "Green Theme")?;
        let resolver = IdentityResolver::new(true, &store, &snapshot);

        let red = resolver.theme(Path::new("theme/Red Theme/styles.less"))?;
        assert_eq!(red.found().map(|t| t.repository_id), Some("111".to_string()));

        let green = resolver.theme(Path::new("theme/Green Theme/styles.less"))?;
        assert_eq!(green, Resolution::NotFound);
        Ok(())
    }

    #[test]
    fn normal_mode_trusts_sidecar_and_etag() -> Result<()> {
        let (_tmp, store, snapshot) = red_theme_fixture()?;
        write_theme(&store, "theme/Red Theme", "Red Theme")?;
        store.etags().write(Path::new("theme/Red Theme/styles.less"), "tok")?;
        let resolver = IdentityResolver::new(false, &store, &snapshot);

        let red = resolver
            .theme(Path::new("theme/Red Theme/styles.less"))?
            .found()
            .expect("theme");
        assert_eq!(red.repository_id, "source-only-id");
        assert_eq!(red.etag.as_deref(), Some("tok"));
        Ok(())
    }

    #[test]
    fn transfer_mode_widget_by_name_and_version() -> Result<()> {
        let (_tmp, store, mut snapshot) = red_theme_fixture()?;
        snapshot.insert_descriptor(WidgetDescriptor {
            repository_id: "csRepo1".into(),
            display_name: "Cart Summary".into(),
            version: 1,
            ..Default::default()
        });
        store.write(
            Path::new("widget/Cart Summary"),
            &WidgetRecord {
                repository_id: "elsewhere".into(),
                display_name: "Cart Summary".into(),
                version: 1,
                ..Default::default()
            },
        )?;
        let resolver = IdentityResolver::new(true, &store, &snapshot);

        let id = resolver.resolve(
            Path::new("widget/Cart Summary/js/x.js"),
            AssetType::WidgetJavascript,
        )?;
        match id {
            Resolution::Found(Identity::Widget(w)) => {
                assert_eq!(w.repository_id, "csRepo1");
                assert_eq!(w.etag, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_sidecar_is_not_found() -> Result<()> {
        let (_tmp, store, snapshot) = red_theme_fixture()?;
        let resolver = IdentityResolver::new(false, &store, &snapshot);
        let res = resolver.resolve(
            Path::new("stack/Tabs/instances/Home/stack.less"),
            AssetType::StackInstanceLess,
        )?;
        assert_eq!(res, Resolution::NotFound);
        Ok(())
    }

    #[test]
    fn unscoped_assets_always_resolve() -> Result<()> {
        let (_tmp, store, snapshot) = red_theme_fixture()?;
        store.etags().write(Path::new("global/app.js"), "e1")?;

        let normal = IdentityResolver::new(false, &store, &snapshot)
            .resolve(Path::new("global/app.js"), AssetType::ApplicationJavascript)?;
        assert_eq!(normal, Resolution::Found(Identity::Unscoped { etag: Some("e1".into()) }));

        let transfer = IdentityResolver::new(true, &store, &snapshot)
            .resolve(Path::new("global/app.js"), AssetType::ApplicationJavascript)?;
        assert_eq!(transfer, Resolution::Found(Identity::Unscoped { etag: None }));
        Ok(())
    }
}
