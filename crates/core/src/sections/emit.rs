use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use super::Sections;
use crate::diag::{Fatal, Reporter, WarningKind};
use crate::expr::Expression;
use crate::fstack::FileStack;
use crate::options::Options;
use crate::section::{Patch, PatchKind};
use crate::symbol::{SymbolKind, Symbols};

/// Warn when a value does not fit `bits` bits, under either signedness.
fn check_n_bit(value: i32, bits: u32, context: &str, diag: &mut Reporter) -> bool {
    let value = value as i64;
    if value < -(1i64 << bits) || value >= 1i64 << bits {
        diag.warning(
            WarningKind::Truncation,
            format!("{context} must be {bits}-bit"),
        );
        return false;
    }
    true
}

impl Sections {
    fn grow(&mut self, growth: u32, diag: &mut Reporter) -> Result<(), Fatal> {
        if growth > 0 && self.cur_offset > u32::MAX - growth {
            return Err(diag.fatal("Section size would overflow internal counter"));
        }
        self.cur_offset += growth;

        let out_offset = self.output_offset();
        if let Some(id) = self.current {
            if out_offset > self.sections[id].size {
                self.sections[id].size = out_offset;
            }
        }
        if let Some(id) = self.load_section {
            if self.cur_offset > self.sections[id].size {
                self.sections[id].size = self.cur_offset;
            }
        }
        Ok(())
    }

    /// Store one byte at the output offset (if the section has a buffer and
    /// the cursor is still inside it) and advance.
    fn write_byte(&mut self, byte: u8, diag: &mut Reporter) -> Result<(), Fatal> {
        let index = self.output_offset() as usize;
        if let Some(id) = self.current {
            let sect = &mut self.sections[id];
            if index < sect.data.len() {
                sect.data[index] = byte;
            }
        }
        self.grow(1, diag)
    }

    fn write_word(&mut self, value: u16, diag: &mut Reporter) -> Result<(), Fatal> {
        self.write_byte(value as u8, diag)?;
        self.write_byte((value >> 8) as u8, diag)
    }

    fn write_long(&mut self, value: u32, diag: &mut Reporter) -> Result<(), Fatal> {
        self.write_byte(value as u8, diag)?;
        self.write_byte((value >> 8) as u8, diag)?;
        self.write_byte((value >> 16) as u8, diag)?;
        self.write_byte((value >> 24) as u8, diag)
    }

    /// Record a relocation in the emitting (parent) section, pointing at the
    /// placeholder bytes about to be written.
    fn add_patch(&mut self, kind: PatchKind, expr: Expression, pc_shift: u32, diag: &Reporter) {
        let offset = self.output_offset();
        let location = diag.location();
        if let Some(id) = self.current {
            self.sections[id].patches.push(Patch {
                kind,
                expr,
                offset,
                pc_shift,
                location,
            });
        }
    }

    pub fn const_byte(&mut self, byte: u8, diag: &mut Reporter) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        self.write_byte(byte, diag)
    }

    pub fn byte_string(&mut self, units: &[i32], diag: &mut Reporter) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        for &unit in units {
            if !check_n_bit(unit, 8, "All character units", diag) {
                break;
            }
        }
        for &unit in units {
            self.write_byte(unit as u8, diag)?;
        }
        Ok(())
    }

    pub fn word_string(&mut self, units: &[i32], diag: &mut Reporter) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        for &unit in units {
            if !check_n_bit(unit, 16, "All character units", diag) {
                break;
            }
        }
        for &unit in units {
            self.write_word(unit as u16, diag)?;
        }
        Ok(())
    }

    pub fn long_string(&mut self, units: &[i32], diag: &mut Reporter) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        for &unit in units {
            self.write_long(unit as u32, diag)?;
        }
        Ok(())
    }

    /// Reserve `skip` bytes: plain growth in sections without data, padding
    /// bytes in ROM sections. `ds` tells whether this came from an explicit
    /// `DS` (as opposed to a data directive left without arguments).
    pub fn skip(
        &mut self,
        skip: u32,
        ds: bool,
        options: &Options,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_section(diag) {
            return Ok(());
        }

        let has_data = self
            .current
            .is_some_and(|id| self.sections[id].has_data());
        if !has_data {
            self.grow(skip, diag)
        } else {
            if !ds {
                diag.warning(
                    WarningKind::EmptyDataDirective,
                    format!(
                        "{} directive without data in ROM",
                        match skip {
                            4 => "DL",
                            2 => "DW",
                            _ => "DB",
                        }
                    ),
                );
            }
            for _ in 0..skip {
                self.write_byte(options.pad_byte, diag)?;
            }
            Ok(())
        }
    }

    pub fn rel_byte(
        &mut self,
        expr: Expression,
        pc_shift: u32,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        if !expr.is_known() {
            self.add_patch(PatchKind::Byte, expr, pc_shift, diag);
            self.write_byte(0, diag)
        } else {
            let value = expr.value();
            check_n_bit(value, 8, "Expression", diag);
            self.write_byte(value as u8, diag)
        }
    }

    /// Emit `n` bytes cycling through `exprs`, patching the unknown ones.
    pub fn rel_bytes(
        &mut self,
        n: u32,
        exprs: &[Expression],
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) || exprs.is_empty() {
            return Ok(());
        }
        for i in 0..n {
            let expr = &exprs[i as usize % exprs.len()];
            if !expr.is_known() {
                self.add_patch(PatchKind::Byte, expr.clone(), i, diag);
                self.write_byte(0, diag)?;
            } else {
                self.write_byte(expr.value() as u8, diag)?;
            }
        }
        Ok(())
    }

    pub fn rel_word(
        &mut self,
        expr: Expression,
        pc_shift: u32,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        if !expr.is_known() {
            self.add_patch(PatchKind::Word, expr, pc_shift, diag);
            self.write_word(0, diag)
        } else {
            let value = expr.value();
            check_n_bit(value, 16, "Expression", diag);
            self.write_word(value as u16, diag)
        }
    }

    pub fn rel_long(
        &mut self,
        expr: Expression,
        pc_shift: u32,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        if !expr.is_known() {
            self.add_patch(PatchKind::Long, expr, pc_shift, diag);
            self.write_long(0, diag)
        } else {
            self.write_long(expr.value() as u32, diag)
        }
    }

    /// Emit a `jr`-style signed displacement. When the target's distance
    /// from the current PC is known it is range-checked and written
    /// directly; otherwise it becomes a patch.
    pub fn pc_rel_byte(
        &mut self,
        expr: Expression,
        pc_shift: u32,
        symbols: &Symbols,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }

        if !expr.is_diff_constant(symbols, self.symbol_section_id()) {
            self.add_patch(PatchKind::Jr, expr, pc_shift, diag);
            return self.write_byte(0, diag);
        }

        // The displacement is relative to the byte *after* the operand.
        let offset: i32 = if expr.is_pc() {
            // PC as operand to `jr` is lower than the reference PC by 2.
            -2
        } else {
            let target = expr
                .symbol_of()
                .and_then(|name| symbols.get(name))
                .map(|sym| match sym.kind {
                    SymbolKind::Label { offset, .. } => offset as i32,
                    _ => 0,
                })
                .unwrap_or(0);
            target - (self.cur_offset as i32 + 1)
        };

        if !(-128..=127).contains(&offset) {
            diag.error(format!(
                "JR target must be between -128 and 127 bytes away, not {offset}; use JP instead"
            ));
            self.write_byte(0, diag)
        } else {
            self.write_byte(offset as u8, diag)
        }
    }

    /// Stream a binary file into the current section, starting at
    /// `start_pos` and running to EOF.
    pub fn binary_file(
        &mut self,
        name: &str,
        start_pos: u32,
        fstack: &FileStack,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }

        let Some(mut reader) = open_binary(name, fstack, diag) else {
            return Ok(());
        };

        if !seek_to_start(&mut reader, name, start_pos, None, diag) {
            return Ok(());
        }

        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(count) => {
                    for &byte in &buf[..count] {
                        self.write_byte(byte, diag)?;
                    }
                }
                Err(err) => {
                    diag.error(format!("Error reading INCBIN file '{name}': {err}"));
                    break;
                }
            }
        }
        Ok(())
    }

    /// Stream `length` bytes of a binary file, checking the requested range
    /// against the file's size.
    pub fn binary_file_slice(
        &mut self,
        name: &str,
        start_pos: u32,
        length: u32,
        fstack: &FileStack,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        if !self.require_code_section(diag) {
            return Ok(());
        }
        if length == 0 {
            return Ok(());
        }

        let Some(mut reader) = open_binary(name, fstack, diag) else {
            return Ok(());
        };

        if !seek_to_start(&mut reader, name, start_pos, Some(length), diag) {
            return Ok(());
        }

        let mut remaining = length;
        let mut buf = [0u8; 4096];
        while remaining > 0 {
            let want = (remaining as usize).min(buf.len());
            match reader.read(&mut buf[..want]) {
                Ok(0) => {
                    diag.error(format!(
                        "Premature end of INCBIN file '{name}' ({remaining} bytes left to read)"
                    ));
                    break;
                }
                Ok(count) => {
                    for &byte in &buf[..count] {
                        self.write_byte(byte, diag)?;
                    }
                    remaining -= count as u32;
                }
                Err(err) => {
                    diag.error(format!("Error reading INCBIN file '{name}': {err}"));
                    break;
                }
            }
        }
        Ok(())
    }

    /// How many padding bytes are needed before `(address) % (1 << align)
    /// == offset` holds. Fixed sections count as maximally aligned.
    pub fn align_bytes(&self, align: u8, offset: u16) -> u32 {
        let Some(sect) = self.symbol_section() else {
            return 0;
        };

        let cur_align = match sect.org {
            Some(_) => 16,
            None => sect.align,
        };
        if cur_align == 0 {
            // An unaligned section can start anywhere, so no amount of
            // padding gets us a guarantee.
            return 0;
        }

        let pc_value = match sect.org {
            Some(org) => org,
            None => sect.align_ofs,
        };
        let delta = (offset as u32)
            .wrapping_sub(self.cur_offset)
            .wrapping_sub(pc_value as u32) as u16;
        delta as u32 % (1u32 << align.min(cur_align))
    }

    /// Require `(pc) % (1 << align) == offset` at the current cursor,
    /// tightening the section's constraints when possible.
    pub fn align_pc(&mut self, align: u8, offset: u16, diag: &mut Reporter) {
        if !self.require_section(diag) {
            return;
        }
        let Some(id) = self.symbol_section_id() else {
            return;
        };

        let align_size = 1u32 << align;
        let cur_offset = self.cur_offset;
        let sect = &mut self.sections[id];

        if let Some(org) = sect.org {
            let actual = (org as u32 + cur_offset) % align_size;
            if actual != offset as u32 {
                diag.error(format!(
                    "Section is misaligned (at PC = ${:04x}, expected ALIGN[{}, {}], \
                     got ALIGN[{}, {}])",
                    org as u32 + cur_offset,
                    align,
                    offset,
                    align,
                    actual
                ));
            }
        } else {
            let actual = (sect.align_ofs as u32 + cur_offset) % align_size;
            let sect_align_size = 1u32 << sect.align;
            if sect.align != 0 && actual % sect_align_size != offset as u32 % sect_align_size {
                diag.error(format!(
                    "Section is misaligned (${cur_offset:04x} bytes into the section, \
                     expected ALIGN[{align}, {offset}], got ALIGN[{align}, {actual}])"
                ));
            } else if align >= 16 {
                // An alignment this large pins the address; this also keeps
                // every stored alignment below 16.
                sect.align = 0;
                sect.org = Some((offset as u32).wrapping_sub(cur_offset) as u16);
            } else if align > sect.align {
                sect.align = align;
                sect.align_ofs = ((offset as u32).wrapping_sub(cur_offset) % align_size) as u16;
            }
        }
    }
}

fn open_binary(name: &str, fstack: &FileStack, diag: &mut Reporter) -> Option<BufReader<File>> {
    let Some(path) = fstack.find_file(name) else {
        diag.error(format!("Unable to open INCBIN file '{name}'"));
        return None;
    };
    match File::open(&path) {
        Ok(file) => Some(BufReader::new(file)),
        Err(err) => {
            diag.error(format!("Error opening INCBIN file '{name}': {err}"));
            None
        }
    }
}

/// Position the reader at `start_pos`, validating the requested range when
/// the file size is known. Returns false if reading should not proceed.
fn seek_to_start(
    reader: &mut BufReader<File>,
    name: &str,
    start_pos: u32,
    length: Option<u32>,
    diag: &mut Reporter,
) -> bool {
    match reader.seek(SeekFrom::End(0)) {
        Ok(file_size) => {
            if u64::from(start_pos) > file_size {
                diag.error(format!(
                    "Specified start position is greater than length of file '{name}'"
                ));
                return false;
            }
            if let Some(length) = length {
                if u64::from(start_pos) + u64::from(length) > file_size {
                    diag.error(format!(
                        "Specified range in INCBIN file '{name}' is out of bounds \
                         ({start_pos} + {length} > {file_size})"
                    ));
                    return false;
                }
            }
            if let Err(err) = reader.seek(SeekFrom::Start(u64::from(start_pos))) {
                diag.error(format!("Error reading INCBIN file '{name}': {err}"));
                return false;
            }
            true
        }
        Err(err) => {
            diag.error(format!(
                "Error determining size of INCBIN file '{name}': {err}"
            ));
            false
        }
    }
}
