//! In-memory EVTX builders for integration tests.
//!
//! Real sample files cannot express the exact corner cases the decoder has
//! to honour, so the tests assemble files byte by byte: a 4096-byte file
//! header, 64 KiB chunks with proper checksums, framed records, inline
//! name entries, and template definitions/instances.

#![allow(dead_code)]

use std::sync::Once;

use crc32fast::Hasher;

static LOGGER_INIT: Once = Once::new();

/// Tests run concurrently; initialize logging exactly once.
pub fn ensure_env_logger_initialized() {
    LOGGER_INIT.call_once(env_logger::init);
}

pub const CHUNK_SIZE: usize = 65536;
pub const CHUNK_HEADER_SIZE: usize = 512;
pub const RECORD_HEADER_SIZE: usize = 24;

/// 2021-01-01T00:00:00.0000000Z
pub const FILETIME_2021: u64 = 132_514_560_000_000_000;

pub fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// A chunk-local name table entry (next, hash, count, chars, NUL).
pub fn name_entry(name: &str) -> Vec<u8> {
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

/// Builds one BinXml token stream at a known chunk-relative base offset.
pub struct PayloadBuilder {
    base: usize,
    pub bytes: Vec<u8>,
}

impl PayloadBuilder {
    pub fn at(base: usize) -> Self {
        PayloadBuilder {
            base,
            bytes: Vec::new(),
        }
    }

    /// Current chunk-relative position.
    pub fn pos(&self) -> usize {
        self.base + self.bytes.len()
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn fragment_header(&mut self) -> &mut Self {
        self.raw(&[0x0F, 0x01, 0x01, 0x00])
    }

    pub fn eof(&mut self) -> &mut Self {
        self.raw(&[0x00])
    }

    /// OpenStartElement with an inline name entry. Pass `has_attributes`
    /// when attribute tokens follow; the attribute list size word is
    /// emitted (its value is not interpreted by readers).
    pub fn open_element(&mut self, name: &str, has_attributes: bool) -> &mut Self {
        self.bytes
            .push(if has_attributes { 0x41 } else { 0x01 });
        self.bytes.extend_from_slice(&0_u16.to_le_bytes()); // dependency id
        self.bytes.extend_from_slice(&0_u32.to_le_bytes()); // data size
        let name_offset = (self.pos() + 4) as u32;
        self.bytes.extend_from_slice(&name_offset.to_le_bytes());
        let entry = name_entry(name);
        self.bytes.extend_from_slice(&entry);
        if has_attributes {
            self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        }
        self
    }

    /// OpenStartElement referencing an existing name entry by offset.
    pub fn open_element_at(&mut self, name_offset: u32, has_attributes: bool) -> &mut Self {
        self.bytes
            .push(if has_attributes { 0x41 } else { 0x01 });
        self.bytes.extend_from_slice(&0_u16.to_le_bytes());
        self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        self.bytes.extend_from_slice(&name_offset.to_le_bytes());
        if has_attributes {
            self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        }
        self
    }

    pub fn attribute(&mut self, name: &str) -> &mut Self {
        self.bytes.push(0x06);
        let name_offset = (self.pos() + 4) as u32;
        self.bytes.extend_from_slice(&name_offset.to_le_bytes());
        let entry = name_entry(name);
        self.bytes.extend_from_slice(&entry);
        self
    }

    pub fn close_start(&mut self) -> &mut Self {
        self.raw(&[0x02])
    }

    pub fn close_empty(&mut self) -> &mut Self {
        self.raw(&[0x03])
    }

    pub fn end_element(&mut self) -> &mut Self {
        self.raw(&[0x04])
    }

    /// Inline UTF-16LE text (a `Value` token of string type).
    pub fn value_text(&mut self, text: &str) -> &mut Self {
        self.bytes.push(0x05);
        self.bytes.push(0x01);
        let units: Vec<u16> = text.encode_utf16().collect();
        self.bytes
            .extend_from_slice(&(units.len() as u16).to_le_bytes());
        for unit in &units {
            self.bytes.extend_from_slice(&unit.to_le_bytes());
        }
        self
    }

    pub fn char_ref(&mut self, code: u16) -> &mut Self {
        self.bytes.push(0x08);
        self.bytes.extend_from_slice(&code.to_le_bytes());
        self
    }

    pub fn normal_sub(&mut self, id: u16, value_type: u8) -> &mut Self {
        self.bytes.push(0x0D);
        self.bytes.extend_from_slice(&id.to_le_bytes());
        self.bytes.push(value_type);
        self
    }

    pub fn optional_sub(&mut self, id: u16, value_type: u8) -> &mut Self {
        self.bytes.push(0x0E);
        self.bytes.extend_from_slice(&id.to_le_bytes());
        self.bytes.push(value_type);
        self
    }

    /// A template instance with an inline definition. Returns the
    /// definition offset (usable for back-references from later records).
    ///
    /// `values` are `(type, bytes)` substitution pairs.
    pub fn template_instance_inline(
        &mut self,
        guid: [u8; 16],
        build_body: impl FnOnce(&mut PayloadBuilder),
        values: &[(u8, Vec<u8>)],
    ) -> u32 {
        self.bytes.push(0x0C);
        self.bytes.push(0x00); // reserved
        self.bytes.extend_from_slice(&0_u32.to_le_bytes()); // reserved
        let def_offset = (self.pos() + 4) as u32;
        self.bytes.extend_from_slice(&def_offset.to_le_bytes());

        // Definition: next offset, guid, body size, body.
        self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        self.bytes.extend_from_slice(&guid);

        // The body begins after the 4-byte size field.
        let mut body = PayloadBuilder::at(self.pos() + 4);
        build_body(&mut body);
        self.bytes
            .extend_from_slice(&(body.bytes.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&body.bytes);

        self.substitution_values(values);
        def_offset
    }

    /// Like [`PayloadBuilder::template_instance_inline`], but the value
    /// bytes are built against their final chunk-relative offset, needed
    /// for embedded-BinXml values whose inline names encode positions.
    ///
    /// `build_values` receives the chunk-relative offset of the first value
    /// byte and returns one byte vector per entry of `value_types`.
    pub fn template_instance_inline_with_values(
        &mut self,
        guid: [u8; 16],
        build_body: impl FnOnce(&mut PayloadBuilder),
        value_types: &[u8],
        build_values: impl FnOnce(usize) -> Vec<Vec<u8>>,
    ) -> u32 {
        self.bytes.push(0x0C);
        self.bytes.push(0x00);
        self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        let def_offset = (self.pos() + 4) as u32;
        self.bytes.extend_from_slice(&def_offset.to_le_bytes());

        self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        self.bytes.extend_from_slice(&guid);
        let mut body = PayloadBuilder::at(self.pos() + 4);
        build_body(&mut body);
        self.bytes
            .extend_from_slice(&(body.bytes.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(&body.bytes);

        let values_base = self.pos() + 4 + 4 * value_types.len();
        let values = build_values(values_base);
        assert_eq!(values.len(), value_types.len());

        self.bytes
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for (value_type, bytes) in value_types.iter().zip(&values) {
            self.bytes
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.bytes.push(*value_type);
            self.bytes.push(0x00);
        }
        for bytes in &values {
            self.bytes.extend_from_slice(bytes);
        }
        def_offset
    }

    /// A template instance back-referencing an existing definition.
    pub fn template_instance_ref(&mut self, def_offset: u32, values: &[(u8, Vec<u8>)]) {
        self.bytes.push(0x0C);
        self.bytes.push(0x00);
        self.bytes.extend_from_slice(&0_u32.to_le_bytes());
        self.bytes.extend_from_slice(&def_offset.to_le_bytes());
        self.substitution_values(values);
    }

    fn substitution_values(&mut self, values: &[(u8, Vec<u8>)]) {
        self.bytes
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for (value_type, bytes) in values {
            self.bytes
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.bytes.push(*value_type);
            self.bytes.push(0x00);
        }
        for (_, bytes) in values {
            self.bytes.extend_from_slice(bytes);
        }
    }
}

/// Accumulates framed records (and auxiliary out-of-band data) for one chunk.
pub struct ChunkBuilder {
    records: Vec<u8>,
    aux: Vec<u8>,
    first_record_id: Option<u64>,
    last_record_id: u64,
    last_record_offset: u32,
    common_string_offsets: [u32; 64],
    template_table_offsets: [u32; 32],
    flags: u32,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        ChunkBuilder {
            records: Vec::new(),
            aux: Vec::new(),
            first_record_id: None,
            last_record_id: 0,
            last_record_offset: 0,
            common_string_offsets: [0; 64],
            template_table_offsets: [0; 32],
            flags: 0,
        }
    }

    /// Chunk-relative offset where the next record's payload will begin.
    pub fn next_payload_offset(&self) -> usize {
        CHUNK_HEADER_SIZE + self.records.len() + RECORD_HEADER_SIZE
    }

    pub fn add_record(&mut self, record_id: u64, written_filetime: u64, payload: &[u8]) {
        let size = (RECORD_HEADER_SIZE + payload.len() + 4) as u32;
        self.last_record_offset = (CHUNK_HEADER_SIZE + self.records.len()) as u32;

        self.records.extend_from_slice(&[0x2A, 0x2A, 0x00, 0x00]);
        self.records.extend_from_slice(&size.to_le_bytes());
        self.records.extend_from_slice(&record_id.to_le_bytes());
        self.records
            .extend_from_slice(&written_filetime.to_le_bytes());
        self.records.extend_from_slice(payload);
        self.records.extend_from_slice(&size.to_le_bytes());

        self.first_record_id.get_or_insert(record_id);
        self.last_record_id = record_id;
    }

    /// Append raw bytes to the record area (for corrupt-frame tests).
    pub fn add_record_raw(&mut self, bytes: &[u8]) {
        self.records.extend_from_slice(bytes);
    }

    /// Convenience: frame a payload built against the correct base offset.
    pub fn add_record_with(
        &mut self,
        record_id: u64,
        written_filetime: u64,
        build: impl FnOnce(&mut PayloadBuilder),
    ) {
        let mut payload = PayloadBuilder::at(self.next_payload_offset());
        build(&mut payload);
        self.add_record(record_id, written_filetime, &payload.bytes);
    }

    /// Place out-of-band data (name entries, template definitions) past the
    /// free-space offset, returning its chunk-relative offset. Must be
    /// called after all records have been added.
    pub fn add_aux(&mut self, bytes: &[u8]) -> u32 {
        let offset = CHUNK_HEADER_SIZE + self.records.len() + self.aux.len();
        self.aux.extend_from_slice(bytes);
        offset as u32
    }

    pub fn aux_template_definition(
        &mut self,
        guid: [u8; 16],
        build_body: impl FnOnce(&mut PayloadBuilder),
    ) -> u32 {
        let def_offset = (CHUNK_HEADER_SIZE + self.records.len() + self.aux.len()) as u32;
        let mut body = PayloadBuilder::at(def_offset as usize + 24);
        build_body(&mut body);

        let mut def = Vec::new();
        def.extend_from_slice(&0_u32.to_le_bytes());
        def.extend_from_slice(&guid);
        def.extend_from_slice(&(body.bytes.len() as u32).to_le_bytes());
        def.extend_from_slice(&body.bytes);
        self.add_aux(&def)
    }

    pub fn set_common_string(&mut self, slot: usize, offset: u32) {
        self.common_string_offsets[slot] = offset;
    }

    pub fn set_template_ptr(&mut self, bucket: usize, offset: u32) {
        self.template_table_offsets[bucket] = offset;
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// Override record ids in the header (for expected-count edge cases).
    pub fn with_record_ids(mut self, first: u64, last: u64) -> Self {
        self.first_record_id = Some(first);
        self.last_record_id = last;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut chunk = vec![0_u8; CHUNK_SIZE];

        let free_space_offset = (CHUNK_HEADER_SIZE + self.records.len()) as u32;
        let first_id = self.first_record_id.unwrap_or(1);

        chunk[..8].copy_from_slice(b"ElfChnk\x00");
        chunk[8..16].copy_from_slice(&1_u64.to_le_bytes()); // first record number
        chunk[16..24].copy_from_slice(&self.last_record_id.max(1).to_le_bytes());
        chunk[24..32].copy_from_slice(&first_id.to_le_bytes());
        chunk[32..40].copy_from_slice(&self.last_record_id.max(first_id).to_le_bytes());
        chunk[40..44].copy_from_slice(&128_u32.to_le_bytes());
        chunk[44..48].copy_from_slice(&self.last_record_offset.to_le_bytes());
        chunk[48..52].copy_from_slice(&free_space_offset.to_le_bytes());
        chunk[120..124].copy_from_slice(&self.flags.to_le_bytes());

        for (i, offset) in self.common_string_offsets.iter().enumerate() {
            let at = 128 + i * 4;
            chunk[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        }
        for (i, offset) in self.template_table_offsets.iter().enumerate() {
            let at = 384 + i * 4;
            chunk[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        }

        let records_at = CHUNK_HEADER_SIZE;
        chunk[records_at..records_at + self.records.len()].copy_from_slice(&self.records);
        let aux_at = records_at + self.records.len();
        chunk[aux_at..aux_at + self.aux.len()].copy_from_slice(&self.aux);

        // Records checksum over [512, free_space_offset).
        let mut hasher = Hasher::new();
        hasher.update(&chunk[CHUNK_HEADER_SIZE..free_space_offset as usize]);
        let records_crc = hasher.finalize();
        chunk[52..56].copy_from_slice(&records_crc.to_le_bytes());

        // Header checksum over [0, 120) and [128, 512).
        let mut hasher = Hasher::new();
        hasher.update(&chunk[..120]);
        hasher.update(&chunk[128..512]);
        let header_crc = hasher.finalize();
        chunk[124..128].copy_from_slice(&header_crc.to_le_bytes());

        chunk
    }
}

/// Assembles chunks behind a valid 4096-byte file header.
pub struct EvtxFileBuilder {
    chunks: Vec<Vec<u8>>,
    next_record_id: u64,
}

impl EvtxFileBuilder {
    pub fn new() -> Self {
        EvtxFileBuilder {
            chunks: Vec::new(),
            next_record_id: 1,
        }
    }

    pub fn add_chunk(&mut self, chunk: &ChunkBuilder) -> &mut Self {
        self.next_record_id = self.next_record_id.max(chunk.last_record_id + 1);
        self.chunks.push(chunk.build());
        self
    }

    pub fn add_chunk_raw(&mut self, chunk: Vec<u8>) -> &mut Self {
        assert_eq!(chunk.len(), CHUNK_SIZE);
        self.chunks.push(chunk);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = vec![0_u8; 4096];
        header[..8].copy_from_slice(b"ElfFile\x00");
        header[8..16].copy_from_slice(&0_u64.to_le_bytes());
        header[16..24].copy_from_slice(&(self.chunks.len().saturating_sub(1) as u64).to_le_bytes());
        header[24..32].copy_from_slice(&self.next_record_id.to_le_bytes());
        header[32..36].copy_from_slice(&128_u32.to_le_bytes());
        header[36..38].copy_from_slice(&1_u16.to_le_bytes());
        header[38..40].copy_from_slice(&3_u16.to_le_bytes());
        header[40..42].copy_from_slice(&4096_u16.to_le_bytes());
        header[42..44].copy_from_slice(&(self.chunks.len() as u16).to_le_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&header[..120]);
        let crc = hasher.finalize();
        header[120..124].copy_from_slice(&crc.to_le_bytes());

        let mut file = header;
        for chunk in &self.chunks {
            file.extend_from_slice(chunk);
        }
        file
    }
}
