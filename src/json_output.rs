use serde_json::{Map, Value};

use crate::err::Result;
use crate::model::{BinXmlNode, XmlAttribute, XmlElement};

/// Serialise a record tree as structured JSON.
///
/// Each element is classified from its content: empty elements become
/// `null`, text-only elements become (typed) scalars, and elements with
/// children become objects carrying `#attributes`/`#text` keys. The
/// `EventData`/`UserData` containers flatten their `<Data Name="K">V</Data>`
/// children into `"K": V` properties.
pub(crate) fn render_record(nodes: &[BinXmlNode], indent: bool) -> Result<String> {
    let mut root = Map::new();

    for node in nodes {
        match node {
            BinXmlNode::Element(element) => {
                let key = unique_key(&root, &element.name.name);
                root.insert(key, element_to_json(element));
            }
            BinXmlNode::Comment(text) => {
                root.insert("#comment".to_string(), Value::String(text.trim().to_string()));
            }
            other => {
                if let Some(text) = piece_text(other) {
                    append_text(&mut root, &text);
                }
            }
        }
    }

    let value = Value::Object(root);
    let out = if indent {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    Ok(out)
}

/// `xmlns` declarations are structural noise in JSON output.
fn is_useful_attribute(attr: &XmlAttribute) -> bool {
    let name = attr.name.name.as_str();
    name != "xmlns" && !name.starts_with("xmlns:")
}

fn attribute_to_json(attr: &XmlAttribute) -> Value {
    // A single typed piece keeps its type; anything stitched renders as text.
    if let [BinXmlNode::Value(value)] = attr.value.as_slice() {
        return value.to_json();
    }

    let mut out = String::new();
    for piece in &attr.value {
        if let Some(text) = piece_text(piece) {
            out.push_str(&text);
        }
    }
    Value::String(out)
}

/// The character-data rendering of a non-element node, `None` for nodes
/// that contribute no text.
fn piece_text(node: &BinXmlNode) -> Option<String> {
    match node {
        BinXmlNode::Value(value) => Some(value.render_to_text().into_owned()),
        BinXmlNode::CharRef(code) => Some(
            char::from_u32(u32::from(*code))
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string(),
        ),
        BinXmlNode::EntityRef(name) => Some(expand_entity(name)),
        BinXmlNode::CData(text) => Some(text.clone()),
        BinXmlNode::Element(_) | BinXmlNode::PI { .. } | BinXmlNode::Comment(_) => None,
    }
}

fn expand_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        other => format!("&{other};"),
    }
}

/// The scalar value of a text-only element: a lone typed substitution keeps
/// its type, otherwise the concatenated text.
fn text_only_scalar(children: &[BinXmlNode]) -> Value {
    let text_nodes: Vec<&BinXmlNode> = children
        .iter()
        .filter(|c| !matches!(c, BinXmlNode::Comment(_) | BinXmlNode::PI { .. }))
        .collect();

    if let [BinXmlNode::Value(value)] = text_nodes.as_slice() {
        return value.to_json();
    }

    let mut out = String::new();
    for node in text_nodes {
        if let Some(text) = piece_text(node) {
            out.push_str(&text);
        }
    }
    Value::String(out)
}

fn has_text_content(children: &[BinXmlNode]) -> bool {
    children.iter().any(|c| {
        matches!(
            c,
            BinXmlNode::Value(_)
                | BinXmlNode::CharRef(_)
                | BinXmlNode::EntityRef(_)
                | BinXmlNode::CData(_)
        )
    })
}

fn unique_key(map: &Map<String, Value>, base: &str) -> String {
    if !map.contains_key(base) {
        return base.to_string();
    }
    // Second occurrence is `base_1`, third `base_2`, …
    let mut n = 1_usize;
    loop {
        let candidate = format!("{base}_{n}");
        if !map.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn append_text(map: &mut Map<String, Value>, text: &str) {
    if text.is_empty() {
        return;
    }
    match map.get_mut("#text") {
        Some(Value::String(existing)) => existing.push_str(text),
        Some(other) => {
            let mut s = match &*other {
                Value::Null => String::new(),
                v => v.to_string(),
            };
            s.push_str(text);
            *other = Value::String(s);
        }
        None => {
            map.insert("#text".to_string(), Value::String(text.to_string()));
        }
    }
}

fn element_to_json(element: &XmlElement) -> Value {
    let useful_attrs: Vec<&XmlAttribute> = element
        .attributes
        .iter()
        .filter(|a| is_useful_attribute(a))
        .collect();

    let child_elements: Vec<&XmlElement> = element
        .children
        .iter()
        .filter_map(|c| match c {
            BinXmlNode::Element(el) => Some(el),
            _ => None,
        })
        .collect();

    // Decoder placeholders (missing templates, nested parse failures) must
    // survive at any depth; an element holding one is never empty.
    let has_comments = element
        .children
        .iter()
        .any(|c| matches!(c, BinXmlNode::Comment(_)));

    // (a) nothing at all -> null
    if useful_attrs.is_empty()
        && child_elements.is_empty()
        && !has_comments
        && !has_text_content(&element.children)
    {
        return Value::Null;
    }

    // (b) text only, no useful attributes -> scalar
    if useful_attrs.is_empty() && child_elements.is_empty() && !has_comments {
        return text_only_scalar(&element.children);
    }

    // (c) object
    let mut map = Map::new();

    if !useful_attrs.is_empty() {
        let mut attrs = Map::new();
        for attr in &useful_attrs {
            let key = unique_key(&attrs, &attr.name.name);
            attrs.insert(key, attribute_to_json(attr));
        }
        map.insert("#attributes".to_string(), Value::Object(attrs));
    }

    let flatten_data = element.name.name == "EventData" || element.name.name == "UserData";

    for child in &element.children {
        match child {
            BinXmlNode::Element(el) => {
                if flatten_data && el.name.name == "Data" {
                    if let Some(data_name) = data_name_attribute(el) {
                        let key = unique_key(&map, &data_name);
                        map.insert(key, data_element_value(el));
                        continue;
                    }
                }
                let key = unique_key(&map, &el.name.name);
                map.insert(key, element_to_json(el));
            }
            BinXmlNode::Comment(text) => {
                let key = unique_key(&map, "#comment");
                map.insert(key, Value::String(text.trim().to_string()));
            }
            other => {
                if let Some(text) = piece_text(other) {
                    append_text(&mut map, &text);
                }
            }
        }
    }

    // Child elements present but none survived (all empty names, say).
    if map.is_empty() {
        return Value::Null;
    }

    Value::Object(map)
}

fn data_name_attribute(element: &XmlElement) -> Option<String> {
    element
        .attributes
        .iter()
        .find(|a| a.name.name == "Name")
        .map(|a| match attribute_to_json(a) {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
}

/// The flattened value of `<Data Name="K">…</Data>`.
fn data_element_value(element: &XmlElement) -> Value {
    let structured = element
        .children
        .iter()
        .any(|c| matches!(c, BinXmlNode::Element(_) | BinXmlNode::Comment(_)));

    if structured {
        // Unusual, but keep the structure (and any placeholder comments)
        // rather than lose it.
        return element_to_json(element);
    }
    if !has_text_content(&element.children) {
        return Value::Null;
    }
    text_only_scalar(&element.children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::name::NameEntry;
    use crate::binxml::value::BinXmlValue;
    use serde_json::json;
    use std::rc::Rc;

    fn name(s: &str) -> Rc<NameEntry> {
        Rc::new(NameEntry {
            name: s.to_string(),
            hash: 0,
            entry_len: 0,
        })
    }

    fn text_el(tag: &str, value: BinXmlValue) -> XmlElement {
        let mut el = XmlElement::new(name(tag));
        el.children.push(BinXmlNode::Value(value));
        el
    }

    fn parse(nodes: &[BinXmlNode]) -> Value {
        serde_json::from_str(&render_record(nodes, false).unwrap()).unwrap()
    }

    #[test]
    fn empty_element_is_null() {
        let el = XmlElement::new(name("Correlation"));
        let value = parse(&[BinXmlNode::Element(el)]);
        assert_eq!(value, json!({ "Correlation": null }));
    }

    #[test]
    fn text_only_element_keeps_substitution_type() {
        let el = text_el("EventID", BinXmlValue::UInt16Type(4624));
        let value = parse(&[BinXmlNode::Element(el)]);
        assert_eq!(value, json!({ "EventID": 4624 }));
    }

    #[test]
    fn null_substitution_text_element_is_null() {
        let el = text_el("Opcode", BinXmlValue::NullType);
        let value = parse(&[BinXmlNode::Element(el)]);
        assert_eq!(value, json!({ "Opcode": null }));
    }

    #[test]
    fn attributes_and_children_build_an_object() {
        let mut provider = XmlElement::new(name("Provider"));
        provider.attributes.push(crate::model::XmlAttribute {
            name: name("Name"),
            value: vec![BinXmlNode::Value(BinXmlValue::StringType(
                "Security".to_string(),
            ))],
        });
        provider.self_closing = true;

        let mut system = XmlElement::new(name("System"));
        system.children.push(BinXmlNode::Element(provider));
        system
            .children
            .push(BinXmlNode::Element(text_el("Computer", BinXmlValue::StringType("dc01".into()))));

        let value = parse(&[BinXmlNode::Element(system)]);
        assert_eq!(
            value,
            json!({
                "System": {
                    "Provider": { "#attributes": { "Name": "Security" } },
                    "Computer": "dc01"
                }
            })
        );
    }

    #[test]
    fn xmlns_attributes_are_not_useful() {
        let mut event = XmlElement::new(name("Event"));
        event.attributes.push(crate::model::XmlAttribute {
            name: name("xmlns"),
            value: vec![BinXmlNode::Value(BinXmlValue::StringType(
                "http://schemas.microsoft.com/win/2004/08/events/event".to_string(),
            ))],
        });

        let value = parse(&[BinXmlNode::Element(event)]);
        assert_eq!(value, json!({ "Event": null }));
    }

    #[test]
    fn duplicate_children_are_suffixed_from_the_second() {
        let mut parent = XmlElement::new(name("Execution"));
        for text in ["a", "b", "c"] {
            parent.children.push(BinXmlNode::Element(text_el(
                "Thread",
                BinXmlValue::StringType(text.to_string()),
            )));
        }

        let value = parse(&[BinXmlNode::Element(parent)]);
        assert_eq!(
            value,
            json!({
                "Execution": { "Thread": "a", "Thread_1": "b", "Thread_2": "c" }
            })
        );
    }

    #[test]
    fn eventdata_flattens_named_data() {
        let mut data1 = text_el("Data", BinXmlValue::StringType("alice".into()));
        data1.attributes.push(crate::model::XmlAttribute {
            name: name("Name"),
            value: vec![BinXmlNode::Value(BinXmlValue::StringType(
                "TargetUserName".into(),
            ))],
        });

        let mut data2 = text_el("Data", BinXmlValue::UInt32Type(42));
        data2.attributes.push(crate::model::XmlAttribute {
            name: name("Name"),
            value: vec![BinXmlNode::Value(BinXmlValue::StringType("LogonType".into()))],
        });

        let anonymous = text_el("Data", BinXmlValue::StringType("loose".into()));

        let mut event_data = XmlElement::new(name("EventData"));
        event_data.children.push(BinXmlNode::Element(data1));
        event_data.children.push(BinXmlNode::Element(data2));
        event_data.children.push(BinXmlNode::Element(anonymous));

        let value = parse(&[BinXmlNode::Element(event_data)]);
        assert_eq!(
            value,
            json!({
                "EventData": {
                    "TargetUserName": "alice",
                    "LogonType": 42,
                    "Data": "loose"
                }
            })
        );
    }

    #[test]
    fn mixed_content_uses_hash_text() {
        let mut el = XmlElement::new(name("Message"));
        el.children.push(BinXmlNode::Value(BinXmlValue::StringType(
            "before ".to_string(),
        )));
        el.children
            .push(BinXmlNode::Element(text_el("b", BinXmlValue::StringType("x".into()))));

        let value = parse(&[BinXmlNode::Element(el)]);
        assert_eq!(
            value,
            json!({ "Message": { "#text": "before ", "b": "x" } })
        );
    }

    #[test]
    fn comment_placeholder_round_trips() {
        let value = parse(&[BinXmlNode::Comment(" record 9: missing template ".into())]);
        assert_eq!(value, json!({ "#comment": "record 9: missing template" }));
    }

    #[test]
    fn nested_comment_placeholder_survives_as_property() {
        let mut event_data = XmlElement::new(name("EventData"));
        event_data.children.push(BinXmlNode::Comment(
            " record 9: missing template definition ".into(),
        ));

        let mut event = XmlElement::new(name("Event"));
        event.children.push(BinXmlNode::Element(event_data));

        let value = parse(&[BinXmlNode::Element(event)]);
        assert_eq!(
            value,
            json!({
                "Event": {
                    "EventData": {
                        "#comment": "record 9: missing template definition"
                    }
                }
            })
        );
    }

    #[test]
    fn comment_beside_data_children_is_kept() {
        let mut data = text_el("Data", BinXmlValue::StringType("v".into()));
        data.attributes.push(crate::model::XmlAttribute {
            name: name("Name"),
            value: vec![BinXmlNode::Value(BinXmlValue::StringType("K".into()))],
        });

        let mut event_data = XmlElement::new(name("EventData"));
        event_data.children.push(BinXmlNode::Element(data));
        event_data
            .children
            .push(BinXmlNode::Comment(" record 9: missing template definition ".into()));

        let value = parse(&[BinXmlNode::Element(event_data)]);
        assert_eq!(
            value,
            json!({
                "EventData": {
                    "K": "v",
                    "#comment": "record 9: missing template definition"
                }
            })
        );
    }

    #[test]
    fn array_substitution_becomes_json_array() {
        let el = text_el(
            "Strings",
            BinXmlValue::ArrayType(vec![
                BinXmlValue::StringType("a".into()),
                BinXmlValue::StringType("b".into()),
            ]),
        );
        let value = parse(&[BinXmlNode::Element(el)]);
        assert_eq!(value, json!({ "Strings": ["a", "b"] }));
    }
}
