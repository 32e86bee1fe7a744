use std::borrow::Cow;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::err::Result;
use crate::model::{BinXmlNode, XmlElement};
use crate::utils::escape::escape_xml;

/// Serialise a record tree as canonical XML, optionally indented.
///
/// Escaping is done up front with the same function the compiled-template
/// path uses, and the pre-escaped bytes are handed to `quick-xml` verbatim,
/// so a record renders identically whichever path produced it.
pub(crate) fn render_record(nodes: &[BinXmlNode], indent: bool) -> Result<String> {
    let mut writer = if indent {
        Writer::new_with_indent(Vec::new(), b' ', 2)
    } else {
        Writer::new(Vec::new())
    };

    for node in nodes {
        write_node(&mut writer, node)?;
    }

    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|e| crate::format_err!("non-utf8 xml output: {e}"))
}

/// Compact rendering of a node list, used for embedded BinXml values on the
/// compiled-template path.
pub(crate) fn render_fragment(nodes: &[BinXmlNode]) -> Result<String> {
    render_record(nodes, false)
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &BinXmlNode) -> Result<()> {
    match node {
        BinXmlNode::Element(element) => write_element(writer, element),
        BinXmlNode::Value(value) => {
            let text = escape_xml(&value.render_to_text()).into_owned();
            writer.write_event(Event::Text(BytesText::from_escaped(text)))?;
            Ok(())
        }
        BinXmlNode::CharRef(code) => {
            writer.write_event(Event::Text(BytesText::from_escaped(format!("&#{code};"))))?;
            Ok(())
        }
        BinXmlNode::EntityRef(name) => {
            writer.write_event(Event::Text(BytesText::from_escaped(format!("&{name};"))))?;
            Ok(())
        }
        BinXmlNode::CData(text) => {
            writer.write_event(Event::CData(BytesCData::new(text.as_str())))?;
            Ok(())
        }
        BinXmlNode::PI { target, data } => {
            let content = if data.is_empty() {
                Cow::Borrowed(target.as_str())
            } else {
                Cow::Owned(format!("{target} {data}"))
            };
            writer.write_event(Event::PI(BytesPI::new(content.as_ref())))?;
            Ok(())
        }
        BinXmlNode::Comment(text) => {
            // "--" would make the comment ill-formed.
            let safe = text.replace("--", "- -");
            writer.write_event(Event::Comment(BytesText::from_escaped(safe)))?;
            Ok(())
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> Result<()> {
    let name = element.name.name.as_str();
    let mut start = BytesStart::new(name);

    for attr in &element.attributes {
        let value = attribute_value_text(&attr.value);
        // The byte-pair `From` stores the value verbatim; it is already
        // escaped above.
        start.push_attribute(Attribute::from((attr.name.name.as_bytes(), value.as_bytes())));
    }

    if element.self_closing {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        write_node(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Flatten attribute value pieces into pre-escaped text.
fn attribute_value_text(pieces: &[BinXmlNode]) -> String {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            BinXmlNode::Value(value) => out.push_str(&escape_xml(&value.render_to_text())),
            BinXmlNode::CharRef(code) => {
                out.push_str("&#");
                out.push_str(&code.to_string());
                out.push(';');
            }
            BinXmlNode::EntityRef(name) => {
                out.push('&');
                out.push_str(name);
                out.push(';');
            }
            BinXmlNode::CData(text) => out.push_str(&escape_xml(text)),
            // No structural content inside attribute values.
            BinXmlNode::Element(_) | BinXmlNode::PI { .. } | BinXmlNode::Comment(_) => {}
        }
    }
    out
}
