use anyhow::{Context, Result, anyhow, bail};

const MAGIC: &[u8; 4] = b"GBO\0";
const PAYLOAD_VERSION: u16 = 2;

/// RPN opcodes used to serialize patch expressions. Operands follow the
/// opcode byte; operators pop their arguments from the evaluation stack.
pub mod rpn {
    pub const NUMBER: u8 = 0x00;
    pub const SYMBOL: u8 = 0x01;
    pub const PC: u8 = 0x02;

    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const MOD: u8 = 0x14;
    pub const SHL: u8 = 0x15;
    pub const SHR: u8 = 0x16;
    pub const AND: u8 = 0x17;
    pub const OR: u8 = 0x18;
    pub const XOR: u8 = 0x19;
    pub const NEG: u8 = 0x1A;
    pub const CPL: u8 = 0x1B;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectFile {
    pub nodes: Vec<Node>,
    pub symbols: Vec<Symbol>,
    pub sections: Vec<Section>,
}

/// One source context: a file, or a REPT/FOR iteration. Parents always
/// precede their children in the node list.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub parent: Option<u32>,
    /// Line in the parent context where this one begins.
    pub line: u32,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    File { name: String },
    Rept { iters: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub node: u32,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub exported: bool,
    pub definition: SymbolDefinition,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolDefinition {
    Label { section: u32, offset: u32 },
    Constant { value: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Rom0,
    Romx,
    Vram,
    Sram,
    Wram0,
    Wramx,
    Oam,
    Hram,
}

impl SectionKind {
    pub fn has_data(self) -> bool {
        matches!(self, Self::Rom0 | Self::Romx)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rom0 => "ROM0",
            Self::Romx => "ROMX",
            Self::Vram => "VRAM",
            Self::Sram => "SRAM",
            Self::Wram0 => "WRAM0",
            Self::Wramx => "WRAMX",
            Self::Oam => "OAM",
            Self::Hram => "HRAM",
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Rom0 => 0,
            Self::Romx => 1,
            Self::Vram => 2,
            Self::Sram => 3,
            Self::Wram0 => 4,
            Self::Wramx => 5,
            Self::Oam => 6,
            Self::Hram => 7,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Rom0,
            1 => Self::Romx,
            2 => Self::Vram,
            3 => Self::Sram,
            4 => Self::Wram0,
            5 => Self::Wramx,
            6 => Self::Oam,
            7 => Self::Hram,
            other => bail!("invalid section kind code: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionModifier {
    Normal,
    Union,
    Fragment,
}

impl SectionModifier {
    fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Union => 1,
            Self::Fragment => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Normal,
            1 => Self::Union,
            2 => Self::Fragment,
            other => bail!("invalid section modifier code: {other}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    Byte,
    Word,
    Long,
    Jr,
}

impl PatchKind {
    pub fn width(self) -> u32 {
        match self {
            Self::Byte | Self::Jr => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Byte => 0,
            Self::Word => 1,
            Self::Long => 2,
            Self::Jr => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Byte,
            1 => Self::Word,
            2 => Self::Long,
            3 => Self::Jr,
            other => bail!("invalid patch kind code: {other}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub kind: PatchKind,
    /// Byte position of the placeholder inside the section's data.
    pub offset: u32,
    pub pc_shift: u32,
    pub rpn: Vec<u8>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub modifier: SectionModifier,
    pub size: u32,
    pub org: Option<u16>,
    pub bank: Option<u32>,
    pub align: u8,
    pub align_ofs: u16,
    /// Emitted bytes, trimmed to `size`; present iff the kind has data.
    pub data: Option<Vec<u8>>,
    pub patches: Vec<Patch>,
    pub location: Location,
}

pub fn write_object(path: &std::path::Path, object: &ObjectFile) -> Result<()> {
    let bytes = encode_object(object)?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write '{}'", path.display()))
}

pub fn read_object(path: &std::path::Path) -> Result<ObjectFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    decode_object(&bytes).with_context(|| format!("failed to decode '{}'", path.display()))
}

pub fn encode_object(object: &ObjectFile) -> Result<Vec<u8>> {
    validate_object(object)?;

    let mut enc = Enc::default();
    enc.raw(MAGIC);
    enc.le(PAYLOAD_VERSION.to_le_bytes());
    enc.le((object.nodes.len() as u32).to_le_bytes());
    enc.le((object.symbols.len() as u32).to_le_bytes());
    enc.le((object.sections.len() as u32).to_le_bytes());

    for node in &object.nodes {
        enc.flag(node.parent.is_some());
        if let Some(parent) = node.parent {
            enc.le(parent.to_le_bytes());
        }
        enc.le(node.line.to_le_bytes());
        match &node.kind {
            NodeKind::File { name } => {
                enc.byte(0);
                enc.text(name)?;
            }
            NodeKind::Rept { iters } => {
                enc.byte(1);
                enc.le((iters.len() as u32).to_le_bytes());
                for &iter in iters {
                    enc.le(iter.to_le_bytes());
                }
            }
        }
    }

    for symbol in &object.symbols {
        enc.text(&symbol.name)?;
        enc.flag(symbol.exported);
        match &symbol.definition {
            SymbolDefinition::Label { section, offset } => {
                enc.byte(0);
                enc.le(section.to_le_bytes());
                enc.le(offset.to_le_bytes());
            }
            SymbolDefinition::Constant { value } => {
                enc.byte(1);
                enc.le(value.to_le_bytes());
            }
        }
        enc.location(symbol.location);
    }

    for section in &object.sections {
        enc.text(&section.name)?;
        enc.byte(section.kind.code());
        enc.byte(section.modifier.code());
        enc.le(section.size.to_le_bytes());
        enc.flag(section.org.is_some());
        if let Some(org) = section.org {
            enc.le(org.to_le_bytes());
        }
        enc.flag(section.bank.is_some());
        if let Some(bank) = section.bank {
            enc.le(bank.to_le_bytes());
        }
        enc.byte(section.align);
        enc.le(section.align_ofs.to_le_bytes());
        enc.flag(section.data.is_some());
        if let Some(data) = &section.data {
            enc.blob(data)?;
        }
        enc.le((section.patches.len() as u32).to_le_bytes());
        for patch in &section.patches {
            enc.byte(patch.kind.code());
            enc.le(patch.offset.to_le_bytes());
            enc.le(patch.pc_shift.to_le_bytes());
            enc.blob(&patch.rpn)?;
            enc.location(patch.location);
        }
        enc.location(section.location);
    }

    Ok(enc.buf)
}

pub fn decode_object(bytes: &[u8]) -> Result<ObjectFile> {
    let mut dec = Dec::new(bytes);
    if dec.take(MAGIC.len())? != MAGIC {
        bail!("invalid object magic");
    }
    let version = dec.word()?;
    if !(1..=PAYLOAD_VERSION).contains(&version) {
        bail!("unsupported object version: {version}");
    }

    let node_count = dec.dword()? as usize;
    let symbol_count = dec.dword()? as usize;
    let section_count = dec.dword()? as usize;

    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let parent = if dec.flag()? {
            Some(dec.dword()?)
        } else {
            None
        };
        let line = dec.dword()?;
        let kind = match dec.byte()? {
            0 => NodeKind::File { name: dec.text()? },
            1 => {
                let iter_count = dec.dword()? as usize;
                let mut iters = Vec::with_capacity(iter_count);
                for _ in 0..iter_count {
                    iters.push(dec.dword()?);
                }
                NodeKind::Rept { iters }
            }
            other => bail!("invalid node kind code: {other}"),
        };
        nodes.push(Node { parent, line, kind });
    }

    let mut symbols = Vec::with_capacity(symbol_count);
    for _ in 0..symbol_count {
        let name = dec.text()?;
        let exported = dec.flag()?;
        let definition = match dec.byte()? {
            0 => SymbolDefinition::Label {
                section: dec.dword()?,
                offset: dec.dword()?,
            },
            1 => SymbolDefinition::Constant { value: dec.int()? },
            other => bail!("invalid symbol definition code: {other}"),
        };
        symbols.push(Symbol {
            name,
            exported,
            definition,
            location: dec.location()?,
        });
    }

    let mut sections = Vec::with_capacity(section_count);
    for _ in 0..section_count {
        let name = dec.text()?;
        let kind = SectionKind::from_code(dec.byte()?)?;
        let modifier = SectionModifier::from_code(dec.byte()?)?;
        let size = dec.dword()?;
        let org = if dec.flag()? { Some(dec.word()?) } else { None };
        let bank = if dec.flag()? { Some(dec.dword()?) } else { None };
        let align = dec.byte()?;
        let align_ofs = dec.word()?;
        let data = if dec.flag()? { Some(dec.blob()?) } else { None };
        let patch_count = dec.dword()? as usize;
        let mut patches = Vec::with_capacity(patch_count);
        for _ in 0..patch_count {
            patches.push(Patch {
                kind: PatchKind::from_code(dec.byte()?)?,
                offset: dec.dword()?,
                pc_shift: dec.dword()?,
                rpn: dec.blob()?,
                location: dec.location()?,
            });
        }
        let location = dec.location()?;
        sections.push(Section {
            name,
            kind,
            modifier,
            size,
            org,
            bank,
            align,
            align_ofs,
            data,
            patches,
            location,
        });
    }

    if !dec.done() {
        bail!("object has trailing bytes");
    }

    let object = ObjectFile {
        nodes,
        symbols,
        sections,
    };
    validate_object(&object)?;
    Ok(object)
}

pub fn validate_object(object: &ObjectFile) -> Result<()> {
    for (index, node) in object.nodes.iter().enumerate() {
        if let Some(parent) = node.parent {
            if parent as usize >= index {
                bail!("node {index} references parent {parent} that does not precede it");
            }
        }
        if let NodeKind::Rept { iters } = &node.kind {
            if node.parent.is_none() {
                bail!("node {index} is a REPT context without a parent");
            }
            if iters.is_empty() {
                bail!("node {index} has no iteration counts");
            }
        }
    }

    let node_count = object.nodes.len() as u32;
    let check_location = |what: &str, location: Location| -> Result<()> {
        if location.node >= node_count {
            bail!("{what} references unknown source node {}", location.node);
        }
        Ok(())
    };

    for symbol in &object.symbols {
        check_location(&format!("symbol '{}'", symbol.name), symbol.location)?;
        if let SymbolDefinition::Label { section, offset } = symbol.definition {
            let Some(owner) = object.sections.get(section as usize) else {
                bail!(
                    "symbol '{}' references unknown section {section}",
                    symbol.name
                );
            };
            if offset > owner.size {
                bail!(
                    "symbol '{}' offset {:#X} is outside section '{}'",
                    symbol.name,
                    offset,
                    owner.name
                );
            }
        }
    }

    for section in &object.sections {
        check_location(&format!("section '{}'", section.name), section.location)?;

        if section.align >= 16 {
            bail!(
                "section '{}' has alignment exponent {} (must be below 16)",
                section.name,
                section.align
            );
        }
        if section.align > 0 && section.align_ofs as u32 >= 1u32 << section.align {
            bail!(
                "section '{}' alignment offset {} does not fit ALIGN[{}]",
                section.name,
                section.align_ofs,
                section.align
            );
        }

        match &section.data {
            Some(data) => {
                if !section.kind.has_data() {
                    bail!(
                        "section '{}' of kind {} must not carry data",
                        section.name,
                        section.kind.name()
                    );
                }
                if data.len() as u32 != section.size {
                    bail!(
                        "section '{}' data length {:#X} does not match size {:#X}",
                        section.name,
                        data.len(),
                        section.size
                    );
                }
            }
            None => {
                if section.kind.has_data() {
                    bail!(
                        "section '{}' of kind {} is missing its data",
                        section.name,
                        section.kind.name()
                    );
                }
            }
        }

        for patch in &section.patches {
            check_location(
                &format!("patch at {:#X} in section '{}'", patch.offset, section.name),
                patch.location,
            )?;
            let end = patch
                .offset
                .checked_add(patch.kind.width())
                .context("patch range overflow")?;
            if end > section.size {
                bail!(
                    "patch site {:#X}..{:#X} is outside section '{}'",
                    patch.offset,
                    end,
                    section.name
                );
            }
            validate_rpn(&patch.rpn).with_context(|| {
                format!(
                    "invalid patch expression at {:#X} in section '{}'",
                    patch.offset, section.name
                )
            })?;
        }
    }

    Ok(())
}

/// Check that an RPN stream is well-formed: every opcode known, operands
/// complete, and exactly one value left on the evaluation stack.
fn validate_rpn(bytes: &[u8]) -> Result<()> {
    let mut dec = Dec::new(bytes);
    let mut depth = 0usize;

    while !dec.done() {
        match dec.byte()? {
            rpn::NUMBER => {
                dec.int()?;
                depth += 1;
            }
            rpn::SYMBOL => {
                dec.text()?;
                depth += 1;
            }
            rpn::PC => depth += 1,
            rpn::NEG | rpn::CPL => {
                if depth < 1 {
                    bail!("unary operator on an empty stack");
                }
            }
            rpn::ADD | rpn::SUB | rpn::MUL | rpn::DIV | rpn::MOD | rpn::SHL | rpn::SHR
            | rpn::AND | rpn::OR | rpn::XOR => {
                if depth < 2 {
                    bail!("binary operator without two operands");
                }
                depth -= 1;
            }
            other => bail!("unknown rpn opcode {other:#04X}"),
        }
    }

    if depth != 1 {
        bail!("rpn stream leaves {depth} values on the stack");
    }
    Ok(())
}

/// Byte sink the encoder writes through. All multi-byte integers funnel
/// through [`le`](Self::le), so the format has exactly one endianness path.
#[derive(Default)]
struct Enc {
    buf: Vec<u8>,
}

impl Enc {
    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn flag(&mut self, set: bool) {
        self.buf.push(u8::from(set));
    }

    fn le<const N: usize>(&mut self, bytes: [u8; N]) {
        self.buf.extend_from_slice(&bytes);
    }

    /// Length-prefixed byte run.
    fn blob(&mut self, value: &[u8]) -> Result<()> {
        let len =
            u32::try_from(value.len()).context("chunk exceeds the 32-bit length prefix")?;
        self.le(len.to_le_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    fn text(&mut self, value: &str) -> Result<()> {
        self.blob(value.as_bytes())
    }

    fn location(&mut self, location: Location) {
        self.le(location.node.to_le_bytes());
        self.le(location.line.to_le_bytes());
    }
}

/// Bounds-checked cursor over an encoded object.
struct Dec<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Dec<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| anyhow!("object data ends early"))?;
        let chunk = &self.buf[self.at..end];
        self.at = end;
        Ok(chunk)
    }

    fn le<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into()?)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn flag(&mut self) -> Result<bool> {
        Ok(self.byte()? != 0)
    }

    fn word(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.le()?))
    }

    fn dword(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.le()?))
    }

    fn int(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.le()?))
    }

    fn blob(&mut self) -> Result<Vec<u8>> {
        let len = self.dword()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn text(&mut self) -> Result<String> {
        String::from_utf8(self.blob()?).map_err(|_| anyhow!("object string is not valid UTF-8"))
    }

    fn location(&mut self) -> Result<Location> {
        Ok(Location {
            node: self.dword()?,
            line: self.dword()?,
        })
    }

    fn done(&self) -> bool {
        self.at == self.buf.len()
    }
}
