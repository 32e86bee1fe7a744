use std::sync::{Arc, Mutex};

use encoding::EncodingRef;
use hashbrown::HashMap;

use crate::binxml::name::read_name_ref;
use crate::binxml::tokens::BinXmlToken;
use crate::binxml::value::BinXmlValue;
use crate::err::Result;
use crate::guid::Guid;
use crate::string_cache::StringCache;
use crate::utils::cursor::SliceCursor;
use crate::utils::escape::escape_xml;

/// A substitution slot between two literal parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompiledSlot {
    pub substitution_id: u16,
    pub optional: bool,
}

/// A template body pre-baked for XML rendering: literal output strings
/// interleaved with substitution slots.
///
/// Invariant: `parts.len() == slots.len() + 1`. Rendering alternates
/// `parts[0], slots[0], parts[1], …, parts[n]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledTemplate {
    pub parts: Vec<String>,
    pub slots: Vec<CompiledSlot>,
}

/// Result of a compilation attempt. Bodies containing constructs that
/// resolve against runtime state (nested template instances, inner fragment
/// headers) or unrecognised opcodes cannot be pre-baked; the bail is
/// memoised too so the body is only ever walked once per GUID.
#[derive(Debug, Clone)]
pub(crate) enum CompileOutcome {
    Compiled(Arc<CompiledTemplate>),
    NotCompilable,
}

/// Process-wide compiled-template cache, keyed by template GUID.
///
/// Shared across chunks (and worker threads): offsets are chunk-local but
/// template bodies are content-addressed by their GUID, so equal keys imply
/// equal compilation results. Concurrent inserts keep the first value.
#[derive(Debug, Default)]
pub(crate) struct CompiledTemplateCache {
    inner: Mutex<HashMap<Guid, CompileOutcome, ahash::RandomState>>,
}

impl CompiledTemplateCache {
    pub(crate) fn get(&self, guid: &Guid) -> Option<CompileOutcome> {
        self.inner
            .lock()
            .expect("compiled template cache poisoned")
            .get(guid)
            .cloned()
    }

    /// First write wins; a racing loser's value is discarded (both are
    /// equal, the body being content-addressed by GUID).
    pub(crate) fn insert(&self, guid: Guid, outcome: CompileOutcome) -> CompileOutcome {
        let mut map = self
            .inner
            .lock()
            .expect("compiled template cache poisoned");
        map.entry(guid).or_insert(outcome).clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("compiled template cache poisoned")
            .len()
    }
}

/// One step of the compile walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    End,
    Unknown,
    Token(BinXmlToken),
}

struct Compiler<'a, 'c> {
    cursor: SliceCursor<'a>,
    end: usize,
    string_cache: &'c mut StringCache,
    ansi_codec: EncodingRef,
    parts: Vec<String>,
    slots: Vec<CompiledSlot>,
    /// Open element names, for close tags.
    stack: Vec<String>,
    seen_fragment_header: bool,
}

/// Walk a template body and pre-bake it into parts and slots.
///
/// The walk mirrors the interpreter's state machine but emits literal XML
/// text into a growing last part instead of building nodes. Names are
/// resolved (and cached) against this chunk; the result is
/// chunk-independent because equal GUIDs imply equal name strings.
pub(crate) fn compile_template(
    data: &[u8],
    body_offset: usize,
    body_size: u32,
    string_cache: &mut StringCache,
    ansi_codec: EncodingRef,
) -> Result<CompileOutcome> {
    let cursor = SliceCursor::with_pos(data, body_offset)?;
    let mut compiler = Compiler {
        cursor,
        end: body_offset + body_size as usize,
        string_cache,
        ansi_codec,
        parts: vec![String::new()],
        slots: Vec::new(),
        stack: Vec::new(),
        seen_fragment_header: false,
    };

    match compiler.run() {
        Ok(true) => Ok(CompileOutcome::Compiled(Arc::new(CompiledTemplate {
            parts: compiler.parts,
            slots: compiler.slots,
        }))),
        // A body the walker cannot make sense of is interpreted directly
        // instead; the interpreter owns the diagnostics for it.
        Ok(false) | Err(_) => Ok(CompileOutcome::NotCompilable),
    }
}

impl<'a, 'c> Compiler<'a, 'c> {
    fn out(&mut self) -> &mut String {
        self.parts.last_mut().expect("parts is never empty")
    }

    fn push_slot(&mut self, substitution_id: u16, optional: bool) {
        self.slots.push(CompiledSlot {
            substitution_id,
            optional,
        });
        self.parts.push(String::new());
    }

    fn at_end(&self) -> bool {
        self.cursor.pos() >= self.end
    }

    fn next_token(&mut self) -> Result<Walk> {
        if self.at_end() {
            return Ok(Walk::End);
        }
        let byte = self.cursor.u8("binxml token")?;
        Ok(match BinXmlToken::from_u8(byte) {
            Some(token) => Walk::Token(token),
            None => Walk::Unknown,
        })
    }

    /// Returns `Ok(true)` when the body compiled, `Ok(false)` on bail.
    fn run(&mut self) -> Result<bool> {
        loop {
            let token = match self.next_token()? {
                // Ran off the body without an EOF token; tolerated.
                Walk::End => return Ok(self.stack.is_empty()),
                Walk::Unknown => return Ok(false),
                Walk::Token(token) => token,
            };

            match token {
                BinXmlToken::EndOfStream => return Ok(self.stack.is_empty()),
                BinXmlToken::FragmentHeader => {
                    // The leading fragment header is part of every body; a
                    // second one resolves against runtime state.
                    if self.seen_fragment_header {
                        return Ok(false);
                    }
                    self.seen_fragment_header = true;
                    self.cursor.advance(3, "fragment header")?;
                }
                BinXmlToken::OpenStartElement { has_attributes } => {
                    if !self.open_element(has_attributes)? {
                        return Ok(false);
                    }
                }
                BinXmlToken::EndElement => {
                    let Some(name) = self.stack.pop() else {
                        return Ok(false);
                    };
                    let out = self.out();
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                }
                BinXmlToken::Value => {
                    if !self.inline_value_text()? {
                        return Ok(false);
                    }
                }
                BinXmlToken::CharRef => {
                    let code = self.cursor.u16("char ref")?;
                    let out = self.out();
                    out.push_str("&#");
                    out.push_str(&code.to_string());
                    out.push(';');
                }
                BinXmlToken::EntityRef => {
                    let name = read_name_ref(&mut self.cursor, self.string_cache)?;
                    let out = self.out();
                    out.push('&');
                    out.push_str(&name.name);
                    out.push(';');
                }
                BinXmlToken::CDataSection => {
                    let num_chars = self.cursor.u16("cdata length")? as usize;
                    let raw = self.cursor.take_bytes(num_chars * 2, "cdata")?;
                    let text = crate::utils::utf16::decode_utf16le(raw);
                    let out = self.out();
                    out.push_str("<![CDATA[");
                    out.push_str(&text);
                    out.push_str("]]>");
                }
                BinXmlToken::PITarget => {
                    let name = read_name_ref(&mut self.cursor, self.string_cache)?;
                    let data = match self.next_token()? {
                        Walk::Token(BinXmlToken::PIData) => {
                            let num_chars = self.cursor.u16("pi data length")? as usize;
                            let raw = self.cursor.take_bytes(num_chars * 2, "pi data")?;
                            crate::utils::utf16::decode_utf16le(raw)
                        }
                        _ => return Ok(false),
                    };
                    let out = self.out();
                    out.push_str("<?");
                    out.push_str(&name.name);
                    if !data.is_empty() {
                        out.push(' ');
                        out.push_str(&data);
                    }
                    out.push_str("?>");
                }
                BinXmlToken::NormalSubstitution | BinXmlToken::OptionalSubstitution => {
                    let substitution_id = self.cursor.u16("substitution id")?;
                    let _value_type = self.cursor.u8("substitution type")?;
                    self.push_slot(
                        substitution_id,
                        token == BinXmlToken::OptionalSubstitution,
                    );
                }
                // These resolve against runtime state; bail and let the
                // interpreter render such instances directly.
                BinXmlToken::TemplateInstance
                | BinXmlToken::PIData
                | BinXmlToken::Attribute
                | BinXmlToken::CloseStartElement
                | BinXmlToken::CloseEmptyElement => return Ok(false),
            }
        }
    }

    fn inline_value_text(&mut self) -> Result<bool> {
        let type_byte = self.cursor.u8("value type")?;
        let Ok(value) = BinXmlValue::read_inline(&mut self.cursor, type_byte, self.ansi_codec)
        else {
            return Ok(false);
        };
        let text = escape_xml(&value.render_to_text()).into_owned();
        self.out().push_str(&text);
        Ok(true)
    }

    fn open_element(&mut self, has_attributes: bool) -> Result<bool> {
        let _dependency_id = self.cursor.u16("element dependency id")?;
        let _data_size = self.cursor.u32("element data size")?;
        let name = read_name_ref(&mut self.cursor, self.string_cache)?;

        {
            let tag = name.name.clone();
            let out = self.out();
            out.push('<');
            out.push_str(&tag);
        }

        let mut next = if has_attributes {
            let _attr_list_size = self.cursor.u32("attribute list size")?;
            self.next_token()?
        } else {
            self.next_token()?
        };

        while next == Walk::Token(BinXmlToken::Attribute) {
            let attr_name = read_name_ref(&mut self.cursor, self.string_cache)?;
            {
                let out = self.out();
                out.push(' ');
                out.push_str(&attr_name.name);
                out.push_str("=\"");
            }
            next = self.attribute_value()?;
            self.out().push('"');
        }

        match next {
            Walk::Token(BinXmlToken::CloseStartElement) => {
                self.out().push('>');
                self.stack.push(name.name.clone());
                Ok(true)
            }
            Walk::Token(BinXmlToken::CloseEmptyElement) => {
                self.out().push_str("/>");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Bake attribute value pieces until a structural token, which is
    /// returned for the caller to dispatch on.
    fn attribute_value(&mut self) -> Result<Walk> {
        loop {
            let token = self.next_token()?;
            match token {
                Walk::Token(BinXmlToken::Value) => {
                    let type_byte = self.cursor.u8("value type")?;
                    let value =
                        BinXmlValue::read_inline(&mut self.cursor, type_byte, self.ansi_codec)?;
                    let text = escape_xml(&value.render_to_text()).into_owned();
                    self.out().push_str(&text);
                }
                Walk::Token(BinXmlToken::CharRef) => {
                    let code = self.cursor.u16("char ref")?;
                    let out = self.out();
                    out.push_str("&#");
                    out.push_str(&code.to_string());
                    out.push(';');
                }
                Walk::Token(BinXmlToken::EntityRef) => {
                    let name = read_name_ref(&mut self.cursor, self.string_cache)?;
                    let out = self.out();
                    out.push('&');
                    out.push_str(&name.name);
                    out.push(';');
                }
                Walk::Token(BinXmlToken::NormalSubstitution)
                | Walk::Token(BinXmlToken::OptionalSubstitution) => {
                    let substitution_id = self.cursor.u16("substitution id")?;
                    let _value_type = self.cursor.u8("substitution type")?;
                    self.push_slot(
                        substitution_id,
                        token == Walk::Token(BinXmlToken::OptionalSubstitution),
                    );
                }
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEC: EncodingRef = encoding::all::ISO_8859_1;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn name_entry(name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut out = Vec::new();
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.extend_from_slice(&0_u16.to_le_bytes());
        out.extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in &units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&0_u16.to_le_bytes());
        out
    }

    /// `<Event><EventID>{sub 0}</EventID></Event>` with inline names.
    fn sample_body(base: usize) -> Vec<u8> {
        let mut body = vec![0x0F, 0x01, 0x01, 0x00];

        // <Event>
        body.push(0x01);
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.extend_from_slice(&0_u32.to_le_bytes());
        let name_at = (base + body.len() + 4) as u32;
        body.extend_from_slice(&name_at.to_le_bytes());
        body.extend_from_slice(&name_entry("Event"));
        body.push(0x02);

        // <EventID>
        body.push(0x01);
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.extend_from_slice(&0_u32.to_le_bytes());
        let name_at = (base + body.len() + 4) as u32;
        body.extend_from_slice(&name_at.to_le_bytes());
        body.extend_from_slice(&name_entry("EventID"));
        body.push(0x02);

        // optional substitution 0
        body.push(0x0E);
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.push(0x08);

        body.push(0x04); // </EventID>
        body.push(0x04); // </Event>
        body.push(0x00); // EOF
        body
    }

    #[test]
    fn compiles_parts_and_slots() {
        let base = 512_usize;
        let mut data = vec![0_u8; base];
        let body = sample_body(base);
        data.extend_from_slice(&body);

        let mut cache = StringCache::default();
        let outcome =
            compile_template(&data, base, body.len() as u32, &mut cache, CODEC).unwrap();

        let CompileOutcome::Compiled(tpl) = outcome else {
            panic!("expected a compiled template");
        };
        assert_eq!(tpl.parts.len(), tpl.slots.len() + 1);
        assert_eq!(tpl.parts[0], "<Event><EventID>");
        assert_eq!(tpl.parts[1], "</EventID></Event>");
        assert_eq!(
            tpl.slots[0],
            CompiledSlot {
                substitution_id: 0,
                optional: true
            }
        );
    }

    #[test]
    fn nested_template_instance_bails() {
        let base = 512_usize;
        let mut data = vec![0_u8; base];
        // Fragment header then a TemplateInstance opcode.
        let body = vec![0x0F, 0x01, 0x01, 0x00, 0x0C];
        data.extend_from_slice(&body);

        let mut cache = StringCache::default();
        let outcome =
            compile_template(&data, base, body.len() as u32, &mut cache, CODEC).unwrap();
        assert!(matches!(outcome, CompileOutcome::NotCompilable));
    }

    #[test]
    fn inner_fragment_header_bails() {
        let base = 512_usize;
        let mut data = vec![0_u8; base];
        let body = vec![0x0F, 0x01, 0x01, 0x00, 0x0F, 0x01, 0x01, 0x00];
        data.extend_from_slice(&body);

        let mut cache = StringCache::default();
        let outcome =
            compile_template(&data, base, body.len() as u32, &mut cache, CODEC).unwrap();
        assert!(matches!(outcome, CompileOutcome::NotCompilable));
    }

    #[test]
    fn inline_text_is_escaped_at_compile_time() {
        let base = 512_usize;
        let mut data = vec![0_u8; base];
        let mut body = vec![0x0F, 0x01, 0x01, 0x00];

        body.push(0x01);
        body.extend_from_slice(&0_u16.to_le_bytes());
        body.extend_from_slice(&0_u32.to_le_bytes());
        let name_at = (base + body.len() + 4) as u32;
        body.extend_from_slice(&name_at.to_le_bytes());
        body.extend_from_slice(&name_entry("Data"));
        body.push(0x02);

        // Value token: string "a<b"
        body.push(0x05);
        body.push(0x01);
        let text = utf16("a<b");
        body.extend_from_slice(&(3_u16).to_le_bytes());
        body.extend_from_slice(&text);

        body.push(0x04);
        body.push(0x00);
        data.extend_from_slice(&body);

        let mut cache = StringCache::default();
        let outcome =
            compile_template(&data, base, body.len() as u32, &mut cache, CODEC).unwrap();
        let CompileOutcome::Compiled(tpl) = outcome else {
            panic!("expected a compiled template");
        };
        assert_eq!(tpl.parts[0], "<Data>a&lt;b</Data>");
    }

    #[test]
    fn cache_first_write_wins() {
        let cache = CompiledTemplateCache::default();
        let guid = Guid::new(1, 2, 3, [0; 8]);

        let first = Arc::new(CompiledTemplate {
            parts: vec!["<A>".into(), "</A>".into()],
            slots: vec![CompiledSlot {
                substitution_id: 0,
                optional: false,
            }],
        });

        let won = cache.insert(guid, CompileOutcome::Compiled(Arc::clone(&first)));
        let CompileOutcome::Compiled(tpl) = won else {
            panic!()
        };
        assert!(Arc::ptr_eq(&tpl, &first));

        // A racing second insert is discarded.
        let lost = cache.insert(guid, CompileOutcome::NotCompilable);
        assert!(matches!(lost, CompileOutcome::Compiled(_)));
        assert_eq!(cache.len(), 1);
    }
}
