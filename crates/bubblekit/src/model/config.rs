//! Bubble config storage and merge rules.
//!
//! Config lives as a JSON object. Patches replace top-level keys wholesale,
//! except `colors`, which merges two levels deep: each color group
//! (`bubble`, `header`, …) is shallow-merged leaf by leaf so that a later
//! patch touching `colors.bubble.text` leaves `colors.bubble.bg` intact.
//!
//! [`apply_patch`] returns the *effective* patch: only the keys (and color
//! leaves) whose stored value actually changed. An empty effective patch
//! means no `config` frame should be emitted.

use serde_json::{Map, Value};

use crate::error::Error;

/// Keys a user-supplied patch may never carry at the top level. Colors are
/// patched through the nested tree, not replaced wholesale.
const FORBIDDEN_KEYS: [&str; 3] = ["id", "config", "colors"];

/// The flat-parameter sentinel meaning "leave this key alone".
const AUTO: &str = "auto";

fn reject_forbidden(key: &str) -> Result<(), Error> {
    if FORBIDDEN_KEYS.contains(&key) {
        return Err(Error::invalid_config(format!(
            "config patch may not set reserved key `{key}`"
        )));
    }
    Ok(())
}

/// Merge `patch` into `current` and return the effective patch.
///
/// Top-level keys other than `colors` replace. Under `colors`, groups
/// present on both sides as objects are shallow-merged with the patch
/// winning per leaf; anything else replaces the group.
pub(crate) fn apply_patch(
    current: &mut Map<String, Value>,
    patch: &Map<String, Value>,
) -> Map<String, Value> {
    let mut effective = Map::new();
    for (key, incoming) in patch {
        if key == "colors" {
            if let Some(changed) = merge_colors(current, incoming) {
                effective.insert(key.clone(), changed);
            }
        } else if current.get(key) != Some(incoming) {
            current.insert(key.clone(), incoming.clone());
            effective.insert(key.clone(), incoming.clone());
        }
    }
    effective
}

fn merge_colors(current: &mut Map<String, Value>, incoming: &Value) -> Option<Value> {
    let Value::Object(incoming) = incoming else {
        // Not a color tree; replace wholesale if it differs.
        if current.get("colors") == Some(incoming) {
            return None;
        }
        current.insert("colors".to_string(), incoming.clone());
        return Some(incoming.clone());
    };

    if !current.get("colors").is_some_and(Value::is_object) {
        current.insert("colors".to_string(), Value::Object(Map::new()));
    }
    let Some(Value::Object(colors)) = current.get_mut("colors") else {
        return None;
    };

    let mut changed = Map::new();
    for (group, incoming_group) in incoming {
        let mergeable =
            matches!(colors.get(group), Some(Value::Object(_))) && incoming_group.is_object();
        if mergeable {
            let Some(Value::Object(existing)) = colors.get_mut(group) else {
                continue;
            };
            let Value::Object(patch_group) = incoming_group else {
                continue;
            };
            let mut group_changed = Map::new();
            for (leaf, value) in patch_group {
                if existing.get(leaf) != Some(value) {
                    existing.insert(leaf.clone(), value.clone());
                    group_changed.insert(leaf.clone(), value.clone());
                }
            }
            if !group_changed.is_empty() {
                changed.insert(group.clone(), Value::Object(group_changed));
            }
        } else if colors.get(group) != Some(incoming_group) {
            colors.insert(group.clone(), incoming_group.clone());
            changed.insert(group.clone(), incoming_group.clone());
        }
    }
    (!changed.is_empty()).then_some(Value::Object(changed))
}

/// Builder translating the flat parameter surface into a nested patch.
///
/// Color knobs group under `colors.bubble.*` / `colors.header.*`; the
/// `"auto"` sentinel omits the key entirely. `extra` entries land at the
/// top level after the reserved-key check, which runs in
/// [`ConfigPatch::into_patch`].
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    top: Map<String, Value>,
    bubble_colors: Map<String, Value>,
    header_colors: Map<String, Value>,
    extra: Map<String, Value>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the bubble role; travels in the emitted patch.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.top.insert("role".to_string(), role.into().into());
        self
    }

    /// Change the bubble type; travels in the emitted patch.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.top.insert("type".to_string(), kind.into().into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.top.insert("name".to_string(), name.into().into());
        self
    }

    /// Hide the display name.
    pub fn clear_name(mut self) -> Self {
        self.top.insert("name".to_string(), Value::Null);
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.top.insert("icon".to_string(), icon.into().into());
        self
    }

    pub fn clear_icon(mut self) -> Self {
        self.top.insert("icon".to_string(), Value::Null);
        self
    }

    pub fn collapsible(mut self, collapsible: bool) -> Self {
        self.top
            .insert("collapsible".to_string(), collapsible.into());
        self
    }

    pub fn collapsible_by_default(mut self, collapsed: bool) -> Self {
        self.top
            .insert("collapsible_by_default".to_string(), collapsed.into());
        self
    }

    pub fn collapsible_title(mut self, title: impl Into<String>) -> Self {
        self.top
            .insert("collapsible_title".to_string(), title.into().into());
        self
    }

    pub fn collapsible_max_height(mut self, max_height: impl Into<Value>) -> Self {
        self.top
            .insert("collapsible_max_height".to_string(), max_height.into());
        self
    }

    pub fn bubble_bg(self, color: impl Into<String>) -> Self {
        self.bubble_color("bg", color)
    }

    pub fn bubble_text(self, color: impl Into<String>) -> Self {
        self.bubble_color("text", color)
    }

    pub fn bubble_border(self, color: impl Into<String>) -> Self {
        self.bubble_color("border", color)
    }

    pub fn header_bg(self, color: impl Into<String>) -> Self {
        self.header_color("bg", color)
    }

    pub fn header_text(self, color: impl Into<String>) -> Self {
        self.header_color("text", color)
    }

    pub fn header_border(self, color: impl Into<String>) -> Self {
        self.header_color("border", color)
    }

    pub fn header_icon_bg(self, color: impl Into<String>) -> Self {
        self.header_color("iconBg", color)
    }

    pub fn header_icon_text(self, color: impl Into<String>) -> Self {
        self.header_color("iconText", color)
    }

    /// Arbitrary forwarded fields, validated against the reserved keys when
    /// the patch is built.
    pub fn extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra.extend(extra);
        self
    }

    fn bubble_color(mut self, leaf: &str, color: impl Into<String>) -> Self {
        let color = color.into();
        if color != AUTO {
            self.bubble_colors.insert(leaf.to_string(), color.into());
        }
        self
    }

    fn header_color(mut self, leaf: &str, color: impl Into<String>) -> Self {
        let color = color.into();
        if color != AUTO {
            self.header_colors.insert(leaf.to_string(), color.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty()
            && self.bubble_colors.is_empty()
            && self.header_colors.is_empty()
            && self.extra.is_empty()
    }

    /// Build the nested patch map, rejecting reserved keys in `extra`.
    pub(crate) fn into_patch(self) -> Result<Map<String, Value>, Error> {
        let mut patch = self.top;
        for (key, value) in self.extra {
            reject_forbidden(&key)?;
            patch.insert(key, value);
        }
        let mut colors = Map::new();
        if !self.bubble_colors.is_empty() {
            colors.insert("bubble".to_string(), Value::Object(self.bubble_colors));
        }
        if !self.header_colors.is_empty() {
            colors.insert("header".to_string(), Value::Object(self.header_colors));
        }
        if !colors.is_empty() {
            patch.insert("colors".to_string(), Value::Object(colors));
        }
        Ok(patch)
    }
}
