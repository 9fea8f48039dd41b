//! Semantic asset types.
//!
//! Declaration order is the upload order: parents (themes, widgets,
//! instances) sort before the files that depend on them. The derived `Ord`
//! is the per-type ordinal used by the putter.

use serde::Serialize;

use crate::core::sidecar::MetadataKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    /// Whole theme directory (`theme/<name>`)
    Theme,
    ThemeVariables,
    ThemeStyles,
    ThemeAdditionalStyles,

    /// Whole widget directory (`widget/<name>`)
    Widget,
    WidgetMetadataJson,
    WidgetBaseTemplate,
    WidgetBaseLess,
    WidgetBaseSnippets,
    WidgetConfigJson,
    WidgetConfigSnippets,
    WidgetJavascript,
    WidgetModuleJavascript,

    /// Whole widget instance directory (`widget/<name>/instances/<name>`)
    WidgetInstance,
    WidgetInstanceMetadataJson,
    WidgetInstanceTemplate,
    WebContentTemplate,
    WidgetInstanceLess,
    WidgetInstanceSnippets,

    GlobalElementTemplate,
    GlobalElementJavascript,
    ElementTemplate,
    ElementJavascript,

    StackInstanceTemplate,
    StackInstanceVariablesLess,
    StackInstanceLess,

    GlobalSnippets,
    ApplicationJavascript,
}

impl AssetType {
    /// Position in the upload order.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// True for assets that stand for a whole directory.
    pub fn is_directory(self) -> bool {
        matches!(self, Self::Theme | Self::Widget | Self::WidgetInstance)
    }

    /// Sidecar record that carries this asset's own identity, if any.
    pub fn metadata_kind(self) -> Option<MetadataKind> {
        use AssetType::*;
        match self {
            Theme | ThemeVariables | ThemeStyles | ThemeAdditionalStyles => {
                Some(MetadataKind::Theme)
            }
            Widget | WidgetMetadataJson | WidgetBaseTemplate | WidgetBaseLess
            | WidgetBaseSnippets | WidgetConfigJson | WidgetConfigSnippets | WidgetJavascript
            | WidgetModuleJavascript => Some(MetadataKind::Widget),
            WidgetInstance | WidgetInstanceMetadataJson | WidgetInstanceTemplate
            | WebContentTemplate | WidgetInstanceLess | WidgetInstanceSnippets => {
                Some(MetadataKind::WidgetInstance)
            }
            GlobalElementTemplate | GlobalElementJavascript | ElementTemplate
            | ElementJavascript => Some(MetadataKind::Element),
            StackInstanceTemplate | StackInstanceVariablesLess | StackInstanceLess => {
                Some(MetadataKind::StackInstance)
            }
            GlobalSnippets | ApplicationJavascript => None,
        }
    }

    /// Human label used in logs and the put summary.
    pub fn label(self) -> &'static str {
        use AssetType::*;
        match self {
            Theme => "theme",
            ThemeVariables => "theme variables",
            ThemeStyles => "theme styles",
            ThemeAdditionalStyles => "theme additional styles",
            Widget => "widget",
            WidgetMetadataJson => "widget metadata",
            WidgetBaseTemplate => "widget base template",
            WidgetBaseLess => "widget base less",
            WidgetBaseSnippets => "widget base snippets",
            WidgetConfigJson => "widget config metadata",
            WidgetConfigSnippets => "widget config snippets",
            WidgetJavascript => "widget javascript",
            WidgetModuleJavascript => "widget module javascript",
            WidgetInstance => "widget instance",
            WidgetInstanceMetadataJson => "widget instance metadata",
            WidgetInstanceTemplate => "widget instance template",
            WebContentTemplate => "web content template",
            WidgetInstanceLess => "widget instance less",
            WidgetInstanceSnippets => "widget instance snippets",
            GlobalElementTemplate => "global element template",
            GlobalElementJavascript => "global element javascript",
            ElementTemplate => "element template",
            ElementJavascript => "element javascript",
            StackInstanceTemplate => "stack instance template",
            StackInstanceVariablesLess => "stack instance variables",
            StackInstanceLess => "stack instance less",
            GlobalSnippets => "text snippets",
            ApplicationJavascript => "application javascript",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_sort_before_children() {
        assert!(AssetType::Theme < AssetType::ThemeVariables);
        assert!(AssetType::Widget < AssetType::WidgetJavascript);
        assert!(AssetType::WidgetBaseTemplate < AssetType::WidgetInstance);
        assert!(AssetType::WidgetInstance < AssetType::WidgetInstanceTemplate);
        assert!(AssetType::WidgetConfigJson < AssetType::WidgetConfigSnippets);
        assert!(AssetType::StackInstanceTemplate < AssetType::StackInstanceLess);
        assert!(AssetType::ThemeAdditionalStyles < AssetType::Widget);
    }

    #[test]
    fn directory_types() {
        assert!(AssetType::Theme.is_directory());
        assert!(AssetType::WidgetInstance.is_directory());
        assert!(!AssetType::WidgetInstanceLess.is_directory());
        assert_eq!(AssetType::GlobalSnippets.metadata_kind(), None);
    }
}
