//! Remote entity shapes, as far as syncing needs them.
//!
//! Fields the tool does not use are ignored on input. Everything is
//! defaulted so older servers that omit a field still deserialize.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "items": [...] }` collection envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Items<T> {
    pub items: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Theme {
    pub repository_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetDescriptor {
    pub repository_id: String,
    pub id: String,
    pub widget_type: String,
    pub version: i64,
    pub display_name: String,
    pub editable_widget: bool,
    pub js_editable: bool,
    pub source: i64,
    pub global: bool,
    pub i18nresources: Option<String>,
    pub configurable: bool,
    pub javascript: Option<String>,
    /// Main script name on servers that report it as the entry point
    pub entrypoint: Option<String>,
    pub javascript_extension: Option<String>,
    /// Absent on servers that do not version widgets
    pub is_latest_version: Option<bool>,
}

impl WidgetDescriptor {
    pub fn is_latest(&self) -> bool {
        self.is_latest_version.unwrap_or(true)
    }

    /// Main script name, whichever field the server filled in
    pub fn main_script(&self) -> Option<&str> {
        self.entrypoint
            .as_deref()
            .or(self.javascript.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetInstance {
    pub repository_id: String,
    pub id: String,
    pub display_name: String,
    /// The instance's own version; falls back to the descriptor's
    pub version: Option<i64>,
    pub descriptor: WidgetDescriptor,
}

impl WidgetInstance {
    pub fn effective_version(&self) -> i64 {
        self.version.unwrap_or(self.descriptor.version)
    }
}

/// Widget descriptor with its instances, as `getAllWidgetInstances` returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetWithInstances {
    #[serde(flatten)]
    pub descriptor: WidgetDescriptor,
    pub instances: Vec<WidgetInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Element {
    pub tag: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: Option<i64>,
    pub repository_id: String,
}

impl Element {
    /// Element kinds that carry their own template/JS
    pub fn is_grabbable(&self) -> bool {
        !matches!(self.kind.as_str(), "panel" | "instance" | "subFragment")
    }

    /// Directory name for the element
    pub fn dir_name(&self) -> &str {
        if self.title.is_empty() { &self.tag } else { &self.title }
    }
}

/// Full widget detail (`getWidget`): the instance, its descriptor, fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetDetail {
    pub repository_id: String,
    pub display_name: String,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub descriptor: WidgetDescriptor,
    pub fragments: Vec<Element>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackDescriptor {
    pub repository_id: String,
    pub stack_type: String,
    pub version: Option<i64>,
    pub display_name: String,
    pub instances: Vec<StackInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackInstance {
    pub repository_id: String,
    pub id: String,
    pub display_name: String,
}

impl StackInstance {
    pub fn key(&self) -> &str {
        if self.repository_id.is_empty() { &self.id } else { &self.repository_id }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Locale {
    pub name: String,
    pub repository_id: Option<String>,
}

/// `listLocales` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocaleList {
    pub items: Vec<Locale>,
    pub default_locale: Option<Locale>,
}

/// JavaScript file listing for a widget descriptor
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsFileList {
    pub js_files: Vec<JsFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JsFile {
    pub name: String,
    pub url: String,
    /// `"true"` (or `true`) marks a module extension file
    pub extension: Option<Value>,
}

impl JsFile {
    pub fn is_module(&self) -> bool {
        match &self.extension {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

/// `{"resources": {...}, "custom": {...}}` locale payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocaleResources {
    pub resources: serde_json::Map<String, Value>,
    pub custom: serde_json::Map<String, Value>,
}

impl LocaleResources {
    /// Resources with custom overrides applied.
    pub fn effective(mut self) -> serde_json::Map<String, Value> {
        self.resources.extend(self.custom);
        self.resources
    }
}

/// Application-level JavaScript listing entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplicationJs {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_resources_override() -> anyhow::Result<()> {
        let res: LocaleResources = serde_json::from_str(
            r#"{"resources":{"a":"1","b":"2"},"custom":{"b":"two"}}"#,
        )?;
        let merged = res.effective();
        assert_eq!(merged["a"], "1");
        assert_eq!(merged["b"], "two");
        Ok(())
    }

    #[test]
    fn instance_version_falls_back_to_descriptor() -> anyhow::Result<()> {
        let inst: WidgetInstance = serde_json::from_str(
            r#"{"repositoryId":"i1","displayName":"A","descriptor":{"version":4}}"#,
        )?;
        assert_eq!(inst.effective_version(), 4);
        assert!(inst.descriptor.is_latest());
        Ok(())
    }

    #[test]
    fn js_module_flag_accepts_string_or_bool() -> anyhow::Result<()> {
        let list: JsFileList = serde_json::from_str(
            r#"{"jsFiles":[
                {"name":"a.js","url":"/a","extension":"true"},
                {"name":"b.js","url":"/b","extension":true},
                {"name":"c.js","url":"/c","extension":"false"},
                {"name":"d.js","url":"/d"}
            ]}"#,
        )?;
        let modules: Vec<_> = list
            .js_files
            .iter()
            .filter(|f| f.is_module())
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(modules, ["a.js", "b.js"]);
        Ok(())
    }

    #[test]
    fn element_kinds() {
        let el = |kind: &str| Element { kind: kind.into(), ..Default::default() };
        assert!(el("fragment").is_grabbable());
        assert!(!el("panel").is_grabbable());
        assert!(!el("subFragment").is_grabbable());
    }
}
