//! Path → asset type classification.
//!
//! Classification looks only at path shape relative to the content root:
//! segment names, file suffixes and whether the entry is a directory. It
//! never touches the filesystem, so the same input always yields the same
//! answer regardless of walk order.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::asset::AssetType;
use crate::core::layout::*;

/// Locale resource files are named `ns.<widget>.json`
static NAMESPACE_FILE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^ns\.[\w.\-]+\.json$").ok());

fn is_namespace_file(name: &str) -> bool {
    NAMESPACE_FILE
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Classify a root-relative path. Returns `None` for anything that is not
/// a syncable asset (the caller skips it with a warning).
pub fn classify(rel: &Path, is_dir: bool) -> Option<AssetType> {
    let segs = segments(rel)?;
    let (first, rest) = segs.split_first()?;

    match *first {
        GLOBAL_DIR => classify_global(rest, is_dir),
        WIDGETS_DIR => classify_widget(rest, is_dir),
        ELEMENTS_DIR => match rest {
            [_, name] if !is_dir => element_file(name, true),
            _ => None,
        },
        THEMES_DIR => classify_theme(rest, is_dir),
        STACKS_DIR => match rest {
            [_, INSTANCES_DIR, _, name] if !is_dir => stack_file(name),
            _ => None,
        },
        SNIPPETS_DIR => match rest {
            [_, SNIPPETS_JSON] if !is_dir => Some(AssetType::GlobalSnippets),
            _ => None,
        },
        _ => None,
    }
}

/// Normal components as UTF-8; `None` for anything else (`..`, roots, non-UTF-8)
fn segments(rel: &Path) -> Option<Vec<&str>> {
    rel.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect()
}

fn classify_global(rest: &[&str], is_dir: bool) -> Option<AssetType> {
    match rest.last() {
        Some(name) if !is_dir && name.ends_with(".js") => Some(AssetType::ApplicationJavascript),
        _ => None,
    }
}

fn classify_theme(rest: &[&str], is_dir: bool) -> Option<AssetType> {
    match rest {
        [_] if is_dir => Some(AssetType::Theme),
        [_, name] if !is_dir => match *name {
            THEME_VARIABLES => Some(AssetType::ThemeVariables),
            THEME_STYLES => Some(AssetType::ThemeStyles),
            THEME_ADDITIONAL_STYLES => Some(AssetType::ThemeAdditionalStyles),
            _ => None,
        },
        _ => None,
    }
}

fn classify_widget(rest: &[&str], is_dir: bool) -> Option<AssetType> {
    match rest {
        [_] if is_dir => Some(AssetType::Widget),
        // Older descriptor versions only carry instances and elements
        [_, VERSION_DIR, _, tail @ ..] => classify_widget_scoped(tail, is_dir),
        [_, tail @ ..] => {
            classify_widget_base(tail, is_dir).or_else(|| classify_widget_scoped(tail, is_dir))
        }
        _ => None,
    }
}

/// Files owned by the widget descriptor itself
fn classify_widget_base(tail: &[&str], is_dir: bool) -> Option<AssetType> {
    if is_dir {
        return None;
    }

    match tail {
        [WIDGET_TEMPLATE] => Some(AssetType::WidgetBaseTemplate),
        [WIDGET_LESS] => Some(AssetType::WidgetBaseLess),
        [WIDGET_METADATA_JSON] => Some(AssetType::WidgetMetadataJson),
        [LOCALES_DIR, _, name] if is_namespace_file(name) => Some(AssetType::WidgetBaseSnippets),
        [CONFIG_DIR, CONFIG_METADATA_JSON] => Some(AssetType::WidgetConfigJson),
        [CONFIG_DIR, LOCALES_DIR, name] if name.ends_with(".json") => {
            Some(AssetType::WidgetConfigSnippets)
        }
        [JS_DIR, name] if name.ends_with(".js") => Some(AssetType::WidgetJavascript),
        [MODULE_DIR, JS_DIR, name] if name.ends_with(".js") => {
            Some(AssetType::WidgetModuleJavascript)
        }
        _ => None,
    }
}

/// Instances and elements, which may also live under `version/<n>/`
fn classify_widget_scoped(tail: &[&str], is_dir: bool) -> Option<AssetType> {
    match tail {
        [INSTANCES_DIR, _] if is_dir => Some(AssetType::WidgetInstance),
        [INSTANCES_DIR, _, name] if !is_dir => match *name {
            WIDGET_TEMPLATE => Some(AssetType::WidgetInstanceTemplate),
            WEB_CONTENT_TEMPLATE => Some(AssetType::WebContentTemplate),
            WIDGET_LESS => Some(AssetType::WidgetInstanceLess),
            WIDGET_INSTANCE_METADATA_JSON => Some(AssetType::WidgetInstanceMetadataJson),
            _ => None,
        },
        [INSTANCES_DIR, _, LOCALES_DIR, _, name] if !is_dir && is_namespace_file(name) => {
            Some(AssetType::WidgetInstanceSnippets)
        }
        [ELEMENTS_DIR, _, name] if !is_dir => element_file(name, false),
        _ => None,
    }
}

fn element_file(name: &str, global: bool) -> Option<AssetType> {
    match (name, global) {
        (ELEMENT_TEMPLATE, true) => Some(AssetType::GlobalElementTemplate),
        (ELEMENT_JAVASCRIPT, true) => Some(AssetType::GlobalElementJavascript),
        (ELEMENT_TEMPLATE, false) => Some(AssetType::ElementTemplate),
        (ELEMENT_JAVASCRIPT, false) => Some(AssetType::ElementJavascript),
        _ => None,
    }
}

fn stack_file(name: &str) -> Option<AssetType> {
    match name {
        STACK_TEMPLATE => Some(AssetType::StackInstanceTemplate),
        STACK_VARIABLES_LESS => Some(AssetType::StackInstanceVariablesLess),
        STACK_LESS => Some(AssetType::StackInstanceLess),
        _ => None,
    }
}
