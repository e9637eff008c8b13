use std::sync::Arc;

use plnr_value::Value;

pub type PropertyMap = ahash::AHashMap<Arc<str>, Value>;

/// Element properties: an immutable template plus a stack of live overlays.
///
/// Writes go to the innermost overlay while the element is active and to the template otherwise.
/// Each `activate` pushes an overlay and each `deactivate` drops one, so nested activations from
/// overlapping scopes unwind cleanly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    base: PropertyMap,
    layers: Vec<PropertyMap>,
}

impl Properties {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(key))
            .or_else(|| self.base.get(key))
    }

    pub fn set(&mut self, key: impl Into<Arc<str>>, value: impl Into<Value>) {
        let target = match self.layers.last_mut() {
            Some(top) => top,
            None => &mut self.base,
        };
        target.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The effective view (template overlaid by every live layer).
    pub fn snapshot(&self) -> PropertyMap {
        let mut out = self.base.clone();
        for layer in &self.layers {
            for (k, v) in layer {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Copies every property from `from` whose key is missing or blank here.
    pub fn merge_missing(&mut self, from: &PropertyMap) {
        for (k, v) in from {
            if self.get(k).is_none_or(Value::is_blank) {
                self.set(k.clone(), v.clone());
            }
        }
    }

    pub fn activate(&mut self) {
        self.layers.push(PropertyMap::default());
    }

    /// Drops the innermost overlay. Returns `false` when the properties were not active.
    pub fn deactivate(&mut self) -> bool {
        self.layers.pop().is_some()
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_active(&self) -> bool {
        !self.layers.is_empty()
    }
}

/// Named, enableable plan node data. Behaviour lives elsewhere; this is the part each thread
/// clones and mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: Arc<str>,
    enabled: bool,
    props: Properties,
}

impl Element {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            props: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.props.set(key, value);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    pub fn property_i64(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(Value::as_i64)
    }

    pub fn set_property(&mut self, key: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.props.set(key, value);
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.props
    }

    pub fn activate(&mut self) {
        self.props.activate();
    }

    pub fn deactivate(&mut self) -> bool {
        self.props.deactivate()
    }

    pub fn is_active(&self) -> bool {
        self.props.is_active()
    }
}

impl From<&str> for Element {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Element {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Element {
        Element::new("http")
            .with_property("host", "example.org")
            .with_property("port", 8080i64)
    }

    #[test]
    fn activate_then_deactivate_is_a_round_trip() {
        let mut el = template();
        let before = el.clone();

        el.activate();
        el.deactivate();
        assert_eq!(el, before);

        el.activate();
        el.set_property("host", "override.local");
        el.set_property("path", "/login");
        assert_eq!(
            el.property("host").and_then(Value::as_str),
            Some("override.local")
        );
        el.deactivate();
        assert_eq!(el, before);
        assert!(el.property("path").is_none());
    }

    #[test]
    fn nested_activations_unwind_in_order() {
        let mut el = template();

        el.activate();
        el.set_property("host", "outer");
        el.activate();
        el.set_property("host", "inner");
        assert_eq!(el.properties().depth(), 2);
        assert_eq!(el.property("host").and_then(Value::as_str), Some("inner"));

        assert!(el.deactivate());
        assert_eq!(el.property("host").and_then(Value::as_str), Some("outer"));

        assert!(el.deactivate());
        assert_eq!(
            el.property("host").and_then(Value::as_str),
            Some("example.org")
        );
        assert!(!el.deactivate());
        assert!(!el.is_active());
    }

    #[test]
    fn inactive_writes_change_the_template() {
        let mut el = template();
        el.set_property("port", 9090i64);
        el.activate();
        el.deactivate();
        assert_eq!(el.property_i64("port"), Some(9090));
    }

    #[test]
    fn merge_missing_fills_only_blank_keys() {
        let mut el = Element::new("s")
            .with_property("host", "")
            .with_property("path", "/mine");
        let config = Element::new("defaults")
            .with_property("host", "defaults.local")
            .with_property("path", "/theirs")
            .with_property("scheme", "https");

        el.activate();
        el.properties_mut()
            .merge_missing(&config.properties().snapshot());
        assert_eq!(
            el.property("host").and_then(Value::as_str),
            Some("defaults.local")
        );
        assert_eq!(el.property("path").and_then(Value::as_str), Some("/mine"));
        assert_eq!(el.property("scheme").and_then(Value::as_str), Some("https"));

        el.deactivate();
        assert_eq!(el.property("host").and_then(Value::as_str), Some(""));
        assert!(el.property("scheme").is_none());
    }

    #[test]
    fn snapshot_reflects_overlays() {
        let mut el = template();
        el.activate();
        el.set_property("port", 1i64);
        let snap = el.properties().snapshot();
        assert_eq!(snap.get("port"), Some(&Value::I64(1)));
        assert_eq!(snap.get("host"), Some(&Value::from("example.org")));
    }
}
