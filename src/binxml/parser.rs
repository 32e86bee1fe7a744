use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, trace};

use crate::binxml::name::{read_name_ref, NameEntry};
use crate::binxml::tokens::BinXmlToken;
use crate::binxml::value::{BinXmlValue, ARRAY_FLAG};
use crate::compiled_template::{
    compile_template, CompileOutcome, CompiledTemplate, CompiledTemplateCache,
};
use crate::diagnostics::Diagnostics;
use crate::err::{EvtxError, Result};
use crate::model::{BinXmlNode, XmlAttribute, XmlElement};
use crate::settings::ParserSettings;
use crate::string_cache::StringCache;
use crate::template_catalogue::{TemplateCatalogue, TemplateDescriptor};
use crate::utils::cursor::SliceCursor;
use crate::utils::escape::escape_xml;
use crate::xml_output;

/// Everything a record parse needs from its chunk. The caches are owned by
/// the chunk task; only the compiled-template cache is shared wider.
pub(crate) struct ParserContext<'a, 'c> {
    pub data: &'a [u8],
    pub chunk_index: u32,
    pub record_id: u64,
    pub string_cache: &'c mut StringCache,
    pub catalogue: &'c mut TemplateCatalogue,
    pub diagnostics: &'c mut Diagnostics,
    pub settings: &'c ParserSettings,
    pub compiled_cache: &'c CompiledTemplateCache,
}

/// A decoded record payload: either a node tree, or (when the record is a
/// single instance of a compiled template in XML mode) the final XML text.
#[derive(Debug)]
pub(crate) enum RecordData {
    Nodes(Vec<BinXmlNode>),
    Xml(String),
}

/// One substitution descriptor with the chunk-relative offset of its bytes.
#[derive(Debug, Clone, Copy)]
struct SubSlot {
    offset: usize,
    size: u16,
    type_byte: u8,
}

impl SubSlot {
    /// Null-type or zero-size slots render to nothing (optional) or empty.
    fn is_null_like(&self) -> bool {
        self.size == 0 || self.type_byte & !ARRAY_FLAG == 0
    }
}

/// The substitution values of one template instance. Values are decoded on
/// first use and memoised for the lifetime of the instance, so a slot
/// referenced from several places (or from a compiled part and a nested
/// body) is rendered once.
pub(crate) struct SubstitutionArray {
    slots: Vec<SubSlot>,
    cache: RefCell<Vec<Option<BinXmlValue>>>,
}

impl SubstitutionArray {
    fn new(slots: Vec<SubSlot>) -> Self {
        let cache = RefCell::new(vec![None; slots.len()]);
        SubstitutionArray { slots, cache }
    }
}

/// Decode one record payload.
///
/// `payload_offset`/`payload_len` address the BinXml inside the chunk.
/// `allow_compiled_xml` turns on the parts+slots fast path (XML output,
/// no indentation).
pub(crate) fn parse_record_payload(
    ctx: &mut ParserContext<'_, '_>,
    payload_offset: usize,
    payload_len: usize,
    allow_compiled_xml: bool,
) -> Result<RecordData> {
    let cursor = SliceCursor::with_pos(ctx.data, payload_offset)?;
    let mut parser = BinXmlParser {
        ctx,
        cursor,
        end: payload_offset + payload_len,
        depth: 0,
    };
    parser.parse_document(allow_compiled_xml)
}

struct BinXmlParser<'p, 'a, 'c> {
    ctx: &'p mut ParserContext<'a, 'c>,
    cursor: SliceCursor<'a>,
    /// Exclusive upper bound of the current token stream.
    end: usize,
    depth: usize,
}

impl<'p, 'a, 'c> BinXmlParser<'p, 'a, 'c> {
    fn at_end(&self) -> bool {
        self.cursor.pos() >= self.end
    }

    /// Peek the opcode at the cursor, `None` at stream end.
    fn peek_token(&self) -> Option<u8> {
        if self.at_end() {
            None
        } else {
            self.cursor.peek_u8()
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.ctx.settings.get_max_depth() {
            return Err(EvtxError::DepthLimitExceeded {
                limit: self.ctx.settings.get_max_depth(),
                offset: self.cursor.pos() as u64,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn empty_name(&self) -> Rc<NameEntry> {
        Rc::new(NameEntry {
            name: String::new(),
            hash: 0,
            entry_len: 0,
        })
    }

    /// Resolve a name reference; malformed entries yield an empty name and
    /// a diagnostic instead of failing the record.
    fn read_name(&mut self) -> Result<Rc<NameEntry>> {
        match read_name_ref(&mut self.cursor, self.ctx.string_cache) {
            Ok(name) => Ok(name),
            Err(EvtxError::MalformedName { offset }) => {
                self.ctx.diagnostics.warn_chunk(
                    self.ctx.chunk_index,
                    format!(
                        "record {}: malformed name entry at offset {offset}",
                        self.ctx.record_id
                    ),
                );
                Ok(self.empty_name())
            }
            Err(e) => Err(e),
        }
    }

    /// Document entry state: an optional fragment header, then either a
    /// template instance or a root element.
    fn parse_document(&mut self, allow_compiled_xml: bool) -> Result<RecordData> {
        if self.peek_token() == Some(0x0F) {
            self.cursor.advance(4, "fragment header")?;
        } else {
            self.ctx.diagnostics.warn_chunk(
                self.ctx.chunk_index,
                format!(
                    "record {}: payload does not begin with a fragment header",
                    self.ctx.record_id
                ),
            );
        }

        let Some(byte) = self.peek_token() else {
            return Ok(RecordData::Nodes(Vec::new()));
        };

        match BinXmlToken::from_u8(byte) {
            Some(BinXmlToken::TemplateInstance) => {
                self.cursor.advance(1, "token")?;
                let (desc, subs) = self.read_template_instance()?;

                let Some(desc) = desc else {
                    return Ok(RecordData::Nodes(vec![missing_template_placeholder(
                        self.ctx.record_id,
                    )]));
                };

                if allow_compiled_xml {
                    if let Some(template) = self.compiled_for(&desc)? {
                        let xml = self.render_compiled(&template, &subs)?;
                        return Ok(RecordData::Xml(xml));
                    }
                }

                let nodes = self.render_instance_nodes(&desc, &subs)?;
                Ok(RecordData::Nodes(nodes))
            }
            Some(BinXmlToken::OpenStartElement { has_attributes }) => {
                self.cursor.advance(1, "token")?;
                let element = self.parse_element(has_attributes, None)?;
                Ok(RecordData::Nodes(vec![BinXmlNode::Element(element)]))
            }
            _ => Err(EvtxError::UnknownToken {
                value: byte,
                offset: self.cursor.pos() as u64,
            }),
        }
    }

    /// Look up (or compile) the parts+slots form of a template.
    fn compiled_for(&mut self, desc: &TemplateDescriptor) -> Result<Option<Arc<CompiledTemplate>>> {
        let outcome = match self.ctx.compiled_cache.get(&desc.guid) {
            Some(outcome) => outcome,
            None => {
                trace!("compiling template {}", desc.guid);
                let fresh = compile_template(
                    self.ctx.data,
                    desc.body_offset,
                    desc.body_size,
                    self.ctx.string_cache,
                    self.ctx.settings.get_ansi_codec(),
                )?;
                // First write wins; on a race we use whatever won.
                self.ctx.compiled_cache.insert(desc.guid, fresh)
            }
        };

        Ok(match outcome {
            CompileOutcome::Compiled(template) => Some(template),
            CompileOutcome::NotCompilable => None,
        })
    }

    /// Parse a template instance body (opcode already consumed): reserved
    /// bytes, definition reference (inline or back-reference), then the
    /// substitution descriptor array and the value bytes.
    ///
    /// Returns `None` for the descriptor when the referenced definition is
    /// unavailable; the value section is consumed either way so the outer
    /// stream stays aligned.
    fn read_template_instance(
        &mut self,
    ) -> Result<(Option<TemplateDescriptor>, SubstitutionArray)> {
        // One reserved byte, four reserved bytes; semantics unknown.
        self.cursor.advance(5, "template instance header")?;
        let def_offset = self.cursor.u32("template definition offset")?;

        self.ctx.diagnostics.template_references += 1;

        let desc = if def_offset as usize == self.cursor.pos() {
            // Inline definition: ingest it, then step over it.
            let desc = self.ctx.catalogue.insert_at(
                self.ctx.data,
                def_offset,
                self.ctx.diagnostics,
            )?;
            self.cursor.set_pos(
                desc.body_offset + desc.body_size as usize,
                "template definition body",
            )?;
            Some(desc)
        } else {
            match self.ctx.catalogue.get(def_offset) {
                Some(found) => Some(found.clone()),
                None => {
                    // Not in the pointer table; legitimate for templates
                    // nested in embedded documents. Try reading it in place.
                    match self.ctx.catalogue.insert_at(
                        self.ctx.data,
                        def_offset,
                        self.ctx.diagnostics,
                    ) {
                        Ok(desc) => Some(desc),
                        Err(_) => {
                            self.ctx.diagnostics.missing_template(
                                self.ctx.record_id,
                                def_offset,
                                None,
                            );
                            None
                        }
                    }
                }
            }
        };

        let value_count = self.cursor.u32("substitution count")? as usize;
        let mut sizes = Vec::with_capacity(value_count.min(1024));
        for _ in 0..value_count {
            let size = self.cursor.u16("substitution size")?;
            let type_byte = self.cursor.u8("substitution type")?;
            let _padding = self.cursor.u8("substitution padding")?;
            sizes.push((size, type_byte));
        }

        let mut slots = Vec::with_capacity(sizes.len());
        let mut offset = self.cursor.pos();
        for (size, type_byte) in sizes {
            slots.push(SubSlot {
                offset,
                size,
                type_byte,
            });
            offset += size as usize;
        }
        self.cursor.set_pos(offset, "substitution values")?;

        debug!(
            "record {}: template instance def_offset={def_offset} values={}",
            self.ctx.record_id,
            slots.len()
        );

        Ok((desc, SubstitutionArray::new(slots)))
    }

    /// Interpret a template body against its substitutions, producing
    /// nodes. This is the fallback for non-compilable bodies and the only
    /// path in JSON mode.
    fn render_instance_nodes(
        &mut self,
        desc: &TemplateDescriptor,
        subs: &SubstitutionArray,
    ) -> Result<Vec<BinXmlNode>> {
        self.enter()?;
        let saved_cursor = self.cursor;
        let saved_end = self.end;

        self.cursor = SliceCursor::with_pos(self.ctx.data, desc.body_offset)?;
        self.end = desc.body_offset + desc.body_size as usize;
        let result = self.parse_fragment_contents(Some(subs));

        self.cursor = saved_cursor;
        self.end = saved_end;
        self.leave();
        result
    }

    /// Content items at fragment level, until EOF or end of stream range.
    fn parse_fragment_contents(
        &mut self,
        subs: Option<&SubstitutionArray>,
    ) -> Result<Vec<BinXmlNode>> {
        let mut nodes = Vec::new();
        loop {
            let Some(byte) = self.peek_token() else {
                break;
            };
            if byte == 0x00 {
                self.cursor.advance(1, "token")?;
                break;
            }
            if !self.content_item(&mut nodes, subs, byte)? {
                break;
            }
        }
        Ok(nodes)
    }

    /// Dispatch one content token into `nodes`. Returns false when the
    /// stream signalled end-of-content.
    fn content_item(
        &mut self,
        nodes: &mut Vec<BinXmlNode>,
        subs: Option<&SubstitutionArray>,
        byte: u8,
    ) -> Result<bool> {
        let Some(token) = BinXmlToken::from_u8(byte) else {
            // Unknown opcode: advance one byte and keep going.
            self.cursor.advance(1, "token")?;
            self.ctx.diagnostics.warn_chunk(
                self.ctx.chunk_index,
                format!(
                    "record {}: unknown binxml token {byte:#04x} at offset {}",
                    self.ctx.record_id,
                    self.cursor.pos() - 1
                ),
            );
            return Ok(true);
        };

        match token {
            BinXmlToken::EndOfStream => {
                self.cursor.advance(1, "token")?;
                return Ok(false);
            }
            BinXmlToken::OpenStartElement { has_attributes } => {
                self.cursor.advance(1, "token")?;
                let element = self.parse_element(has_attributes, subs)?;
                nodes.push(BinXmlNode::Element(element));
            }
            BinXmlToken::Value => {
                self.cursor.advance(1, "token")?;
                let type_byte = self.cursor.u8("value type")?;
                let value = BinXmlValue::read_inline(
                    &mut self.cursor,
                    type_byte,
                    self.ctx.settings.get_ansi_codec(),
                )?;
                nodes.push(BinXmlNode::Value(value));
            }
            BinXmlToken::CharRef => {
                self.cursor.advance(1, "token")?;
                let code = self.cursor.u16("char ref")?;
                nodes.push(BinXmlNode::CharRef(code));
            }
            BinXmlToken::EntityRef => {
                self.cursor.advance(1, "token")?;
                let name = self.read_name()?;
                nodes.push(BinXmlNode::EntityRef(name.name.clone()));
            }
            BinXmlToken::CDataSection => {
                self.cursor.advance(1, "token")?;
                let num_chars = self.cursor.u16("cdata length")? as usize;
                let raw = self.cursor.take_bytes(num_chars * 2, "cdata")?;
                nodes.push(BinXmlNode::CData(crate::utils::utf16::decode_utf16le(raw)));
            }
            BinXmlToken::PITarget => {
                self.cursor.advance(1, "token")?;
                let target = self.read_name()?;
                let data = if self.peek_token() == Some(0x0B) {
                    self.cursor.advance(1, "token")?;
                    let num_chars = self.cursor.u16("pi data length")? as usize;
                    let raw = self.cursor.take_bytes(num_chars * 2, "pi data")?;
                    crate::utils::utf16::decode_utf16le(raw)
                } else {
                    String::new()
                };
                nodes.push(BinXmlNode::PI {
                    target: target.name.clone(),
                    data,
                });
            }
            BinXmlToken::PIData => {
                // Stray PI data without a target; skip its payload.
                self.cursor.advance(1, "token")?;
                let num_chars = self.cursor.u16("pi data length")? as usize;
                self.cursor.advance(num_chars * 2, "pi data")?;
            }
            BinXmlToken::NormalSubstitution | BinXmlToken::OptionalSubstitution => {
                self.cursor.advance(1, "token")?;
                let optional = token == BinXmlToken::OptionalSubstitution;
                let sub_id = self.cursor.u16("substitution id")?;
                let _declared_type = self.cursor.u8("substitution type")?;
                if let Some(value) = self.resolve_substitution(subs, sub_id, optional)? {
                    match value {
                        // Embedded documents splice structurally.
                        BinXmlValue::BinXmlType(inner) => nodes.extend(inner),
                        other => nodes.push(BinXmlNode::Value(other)),
                    }
                }
            }
            BinXmlToken::TemplateInstance => {
                self.cursor.advance(1, "token")?;
                let (desc, inner_subs) = self.read_template_instance()?;
                match desc {
                    Some(desc) => {
                        let inner = self.render_instance_nodes(&desc, &inner_subs)?;
                        nodes.extend(inner);
                    }
                    None => nodes.push(missing_template_placeholder(self.ctx.record_id)),
                }
            }
            BinXmlToken::FragmentHeader => {
                self.cursor.advance(4, "fragment header")?;
            }
            BinXmlToken::EndElement => {
                self.cursor.advance(1, "token")?;
                return Ok(false);
            }
            BinXmlToken::Attribute
            | BinXmlToken::CloseStartElement
            | BinXmlToken::CloseEmptyElement => {
                // Structurally misplaced; note and move on.
                self.cursor.advance(1, "token")?;
                self.ctx.diagnostics.warn_chunk(
                    self.ctx.chunk_index,
                    format!(
                        "record {}: misplaced structural token {byte:#04x}",
                        self.ctx.record_id
                    ),
                );
            }
        }
        Ok(true)
    }

    fn parse_element(
        &mut self,
        has_attributes: bool,
        subs: Option<&SubstitutionArray>,
    ) -> Result<XmlElement> {
        self.enter()?;
        let result = self.parse_element_inner(has_attributes, subs);
        self.leave();
        result
    }

    fn parse_element_inner(
        &mut self,
        has_attributes: bool,
        subs: Option<&SubstitutionArray>,
    ) -> Result<XmlElement> {
        let _dependency_id = self.cursor.u16("element dependency id")?;
        let _data_size = self.cursor.u32("element data size")?;
        let name = self.read_name()?;
        let mut element = XmlElement::new(name);

        if has_attributes {
            let _attr_list_size = self.cursor.u32("attribute list size")?;
        }

        let mut next = self.require_token()?;
        while next == 0x06 || next == 0x46 {
            self.cursor.advance(1, "token")?;
            let attr_name = self.read_name()?;
            let (value, structural) = self.parse_attribute_value(subs)?;
            element.attributes.push(XmlAttribute {
                name: attr_name,
                value,
            });
            next = structural;
        }

        match BinXmlToken::from_u8(next) {
            Some(BinXmlToken::CloseEmptyElement) => {
                self.cursor.advance(1, "token")?;
                element.self_closing = true;
            }
            Some(BinXmlToken::CloseStartElement) => {
                self.cursor.advance(1, "token")?;
                loop {
                    let Some(byte) = self.peek_token() else {
                        break;
                    };
                    if !self.content_item(&mut element.children, subs, byte)? {
                        break;
                    }
                }
            }
            _ => {
                return Err(EvtxError::UnknownToken {
                    value: next,
                    offset: self.cursor.pos() as u64,
                })
            }
        }

        Ok(element)
    }

    fn require_token(&mut self) -> Result<u8> {
        self.peek_token().ok_or(EvtxError::Truncated {
            what: "binxml token",
            offset: self.cursor.pos() as u64,
            need: 1,
            have: 0,
        })
    }

    /// Attribute value pieces until a structural token, which is returned
    /// unconsumed.
    fn parse_attribute_value(
        &mut self,
        subs: Option<&SubstitutionArray>,
    ) -> Result<(Vec<BinXmlNode>, u8)> {
        let mut pieces = Vec::new();
        loop {
            let byte = self.require_token()?;
            match BinXmlToken::from_u8(byte) {
                Some(BinXmlToken::Value) => {
                    self.cursor.advance(1, "token")?;
                    let type_byte = self.cursor.u8("value type")?;
                    let value = BinXmlValue::read_inline(
                        &mut self.cursor,
                        type_byte,
                        self.ctx.settings.get_ansi_codec(),
                    )?;
                    pieces.push(BinXmlNode::Value(value));
                }
                Some(BinXmlToken::CharRef) => {
                    self.cursor.advance(1, "token")?;
                    pieces.push(BinXmlNode::CharRef(self.cursor.u16("char ref")?));
                }
                Some(BinXmlToken::EntityRef) => {
                    self.cursor.advance(1, "token")?;
                    let name = self.read_name()?;
                    pieces.push(BinXmlNode::EntityRef(name.name.clone()));
                }
                Some(BinXmlToken::NormalSubstitution)
                | Some(BinXmlToken::OptionalSubstitution) => {
                    self.cursor.advance(1, "token")?;
                    let optional =
                        BinXmlToken::from_u8(byte) == Some(BinXmlToken::OptionalSubstitution);
                    let sub_id = self.cursor.u16("substitution id")?;
                    let _declared_type = self.cursor.u8("substitution type")?;
                    if let Some(value) = self.resolve_substitution(subs, sub_id, optional)? {
                        pieces.push(BinXmlNode::Value(value));
                    }
                }
                _ => return Ok((pieces, byte)),
            }
        }
    }

    /// Evaluate a substitution against the current instance's values.
    ///
    /// `None` means the slot contributes nothing (optional null/empty, or
    /// no substitution context at all). Normal substitutions of null/empty
    /// slots yield an explicit null value, which renders empty.
    fn resolve_substitution(
        &mut self,
        subs: Option<&SubstitutionArray>,
        sub_id: u16,
        optional: bool,
    ) -> Result<Option<BinXmlValue>> {
        let Some(subs) = subs else {
            self.ctx.diagnostics.warn_chunk(
                self.ctx.chunk_index,
                format!(
                    "record {}: substitution {sub_id} outside any template instance",
                    self.ctx.record_id
                ),
            );
            return Ok(None);
        };

        let Some(slot) = subs.slots.get(sub_id as usize).copied() else {
            self.ctx.diagnostics.warn_chunk(
                self.ctx.chunk_index,
                format!(
                    "record {}: substitution {sub_id} out of range ({} values)",
                    self.ctx.record_id,
                    subs.slots.len()
                ),
            );
            return Ok(None);
        };

        if slot.is_null_like() {
            return Ok(if optional {
                None
            } else {
                Some(BinXmlValue::NullType)
            });
        }

        if let Some(cached) = subs.cache.borrow()[sub_id as usize].clone() {
            return Ok(Some(cached));
        }

        let value = if slot.type_byte == 0x21 {
            // An embedded document; parse it in place.
            let nodes = self.parse_nested_fragment(slot.offset, slot.size as usize)?;
            BinXmlValue::BinXmlType(nodes)
        } else {
            BinXmlValue::decode_slot(
                self.ctx.data,
                slot.offset,
                slot.size,
                slot.type_byte,
                self.ctx.settings.get_ansi_codec(),
            )?
        };

        subs.cache.borrow_mut()[sub_id as usize] = Some(value.clone());
        Ok(Some(value))
    }

    /// Parse an embedded BinXml document (substitution kind 0x21).
    fn parse_nested_fragment(&mut self, offset: usize, len: usize) -> Result<Vec<BinXmlNode>> {
        self.enter()?;
        let saved_cursor = self.cursor;
        let saved_end = self.end;

        self.cursor = SliceCursor::with_pos(self.ctx.data, offset)?;
        self.end = offset + len;

        let result = (|| {
            if self.peek_token() == Some(0x0F) {
                self.cursor.advance(4, "fragment header")?;
            }
            self.parse_fragment_contents(None)
        })();

        self.cursor = saved_cursor;
        self.end = saved_end;
        self.leave();
        result
    }

    /// Render a compiled template against this instance's values.
    fn render_compiled(
        &mut self,
        template: &CompiledTemplate,
        subs: &SubstitutionArray,
    ) -> Result<String> {
        let mut out = String::with_capacity(
            template.parts.iter().map(String::len).sum::<usize>() + 64 * template.slots.len(),
        );
        out.push_str(&template.parts[0]);

        for (i, slot) in template.slots.iter().enumerate() {
            let resolved =
                self.resolve_substitution(Some(subs), slot.substitution_id, slot.optional)?;
            if let Some(value) = resolved {
                match value {
                    BinXmlValue::BinXmlType(nodes) => {
                        out.push_str(&xml_output::render_fragment(&nodes)?);
                    }
                    other => out.push_str(&escape_xml(&other.render_to_text())),
                }
            }
            out.push_str(&template.parts[i + 1]);
        }

        Ok(out)
    }
}

fn missing_template_placeholder(record_id: u64) -> BinXmlNode {
    BinXmlNode::Comment(format!(
        " record {record_id}: missing template definition "
    ))
}
