//! On-disk layout of a grabbed content tree.
//!
//! Content lives under a handful of top-level directories. Everything the
//! tool needs for bookkeeping (sidecar records and etags) mirrors that tree
//! under [`TRACKING_DIR`], so it never mixes with user-editable files.

/// Bookkeeping directory at the content root
pub const TRACKING_DIR: &str = ".ccc";

/// Suffix appended to a content path to find its etag in the tracking tree
pub const ETAG_SUFFIX: &str = ".etag";

// Top-level content directories
pub const GLOBAL_DIR: &str = "global";
pub const WIDGETS_DIR: &str = "widget";
pub const ELEMENTS_DIR: &str = "element";
pub const STACKS_DIR: &str = "stack";
pub const THEMES_DIR: &str = "theme";
pub const SNIPPETS_DIR: &str = "snippets";

/// Every directory a clean grab removes (tracking tree included)
pub const CLEANABLE_DIRS: [&str; 7] = [
    TRACKING_DIR,
    GLOBAL_DIR,
    WIDGETS_DIR,
    ELEMENTS_DIR,
    STACKS_DIR,
    THEMES_DIR,
    SNIPPETS_DIR,
];

// Nested directory names
pub const INSTANCES_DIR: &str = "instances";
pub const VERSION_DIR: &str = "version";
pub const LOCALES_DIR: &str = "locales";
pub const CONFIG_DIR: &str = "config";
pub const JS_DIR: &str = "js";
pub const MODULE_DIR: &str = "module";

// Widget content
pub const WIDGET_TEMPLATE: &str = "display.template";
pub const WIDGET_LESS: &str = "widget.less";
pub const WEB_CONTENT_TEMPLATE: &str = "content.template";
pub const WIDGET_METADATA_JSON: &str = "widgetMetadata.json";
pub const WIDGET_INSTANCE_METADATA_JSON: &str = "widgetInstanceMetadata.json";
pub const CONFIG_METADATA_JSON: &str = "configMetadata.json";

// Element content
pub const ELEMENT_TEMPLATE: &str = "element.template";
pub const ELEMENT_JAVASCRIPT: &str = "element.js";

// Theme content
pub const THEME_STYLES: &str = "styles.less";
pub const THEME_ADDITIONAL_STYLES: &str = "additionalStyles.less";
pub const THEME_VARIABLES: &str = "variables.less";

// Stack instance content
pub const STACK_TEMPLATE: &str = "stack.template";
pub const STACK_LESS: &str = "stack.less";
pub const STACK_VARIABLES_LESS: &str = "stack-variables.less";

/// Per-locale text snippets under `snippets/<locale>/`
pub const SNIPPETS_JSON: &str = "snippets.json";

/// Resource namespace used for storefront-wide text snippets
pub const COMMON_NAMESPACE: &str = "ns.common";

/// Stable stand-in for `#<descriptorId>-<instanceId>` in instance LESS
pub const LESS_INSTANCE_TOKEN: &str = "#WIDGET_ID-WIDGET_INSTANCE_ID";

/// Widget source tiers as reported by the server
pub const SOURCE_BUILT_IN: i64 = 100;
pub const SOURCE_USER: i64 = 101;

/// Widget type of instances whose body is edited as web content
pub const WEB_CONTENT_WIDGET_TYPE: &str = "webContent";

/// Replace characters that cannot appear in a file name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string();
    if cleaned.chars().all(|c| c == '.') {
        return "_".repeat(cleaned.len().max(1));
    }
    cleaned
}

/// A server-supplied file name that stays inside the directory it is
/// joined onto.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains(['/', '\\'])
}
