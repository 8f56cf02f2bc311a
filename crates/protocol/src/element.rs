//! Decoded wire elements.

/// A fully-closed element decoded from the stanza stream.
///
/// Namespaces are resolved at decode time from the in-scope `xmlns`
/// declarations; `ns` holds the resolved namespace string and `local` the
/// bare element name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub ns: String,
    pub local: String,
    /// Attributes with namespace prefixes stripped, in document order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Concatenated, entity-decoded character data.
    pub text: String,
}

impl Element {
    /// Returns `true` if the element has the given namespace and local name.
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    /// Returns the value of the named attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Finds the first descendant with the given namespace and local name,
    /// depth first.
    pub fn find(&self, ns: &str, local: &str) -> Option<&Element> {
        for child in &self.children {
            if child.is(ns, local) {
                return Some(child);
            }
            if let Some(found) = child.find(ns, local) {
                return Some(found);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element {
            ns: "jc".into(),
            local: "iq".into(),
            attrs: vec![("t".into(), "result".into()), ("i".into(), "ab-1".into())],
            children: vec![Element {
                ns: "todus:purl".into(),
                local: "query".into(),
                attrs: vec![("put".into(), "u".into())],
                children: vec![],
                text: String::new(),
            }],
            text: String::new(),
        }
    }

    #[test]
    fn attr_lookup() {
        let el = sample();
        assert_eq!(el.attr("t"), Some("result"));
        assert_eq!(el.attr("missing"), None);
    }

    #[test]
    fn find_descends_into_children() {
        let el = sample();
        let q = el.find("todus:purl", "query").unwrap();
        assert_eq!(q.attr("put"), Some("u"));
        assert!(el.find("todus:purl", "nope").is_none());
    }

    #[test]
    fn name_check() {
        let el = sample();
        assert!(el.is("jc", "iq"));
        assert!(!el.is("x1", "iq"));
    }
}
