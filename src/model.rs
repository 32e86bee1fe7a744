use std::rc::Rc;

use crate::binxml::name::NameEntry;
use crate::binxml::value::BinXmlValue;

/// One node of a decoded record tree.
///
/// The tree is what the JSON encoder classifies and what the XML writer
/// serialises when the compiled-template fast path is not applicable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BinXmlNode {
    Element(XmlElement),
    /// Text content, typed (substitutions keep their value kind so JSON can
    /// emit real scalars).
    Value(BinXmlValue),
    /// Numeric character reference, e.g. `&#13;`.
    CharRef(u16),
    /// Named entity reference, e.g. `&amp;`.
    EntityRef(String),
    CData(String),
    PI { target: String, data: String },
    /// Decoder-generated placeholder (missing template, nested parse
    /// failure). Serialised as an XML comment.
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlAttribute {
    pub name: Rc<NameEntry>,
    /// Attribute values are pieced together from inline text,
    /// substitutions, and references; kept apart until output time.
    pub value: Vec<BinXmlNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlElement {
    pub name: Rc<NameEntry>,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<BinXmlNode>,
    /// `<Tag/>` vs `<Tag></Tag>`; preserved so both render paths agree.
    pub self_closing: bool,
}

impl XmlElement {
    pub(crate) fn new(name: Rc<NameEntry>) -> Self {
        XmlElement {
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }
    }
}
