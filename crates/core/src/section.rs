use std::fmt;

use crate::expr::Expression;
use crate::fstack::SourceLocation;

/// The Game Boy memory regions a section can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionKindInfo {
    pub name: &'static str,
    pub start: u16,
    pub max_size: u32,
    pub first_bank: u32,
    pub last_bank: u32,
    /// Whether sections of this kind carry an emitted byte buffer. Only ROM
    /// regions do; RAM kinds reserve space without contents.
    pub has_data: bool,
}

impl SectionKind {
    pub const ALL: [SectionKind; 8] = [
        Self::Rom0,
        Self::Romx,
        Self::Vram,
        Self::Sram,
        Self::Wram0,
        Self::Wramx,
        Self::Oam,
        Self::Hram,
    ];

    pub fn info(self) -> &'static SectionKindInfo {
        match self {
            Self::Rom0 => &SectionKindInfo {
                name: "ROM0",
                start: 0x0000,
                max_size: 0x4000,
                first_bank: 0,
                last_bank: 0,
                has_data: true,
            },
            Self::Romx => &SectionKindInfo {
                name: "ROMX",
                start: 0x4000,
                max_size: 0x4000,
                first_bank: 1,
                last_bank: 511,
                has_data: true,
            },
            Self::Vram => &SectionKindInfo {
                name: "VRAM",
                start: 0x8000,
                max_size: 0x2000,
                first_bank: 0,
                last_bank: 1,
                has_data: false,
            },
            Self::Sram => &SectionKindInfo {
                name: "SRAM",
                start: 0xA000,
                max_size: 0x2000,
                first_bank: 0,
                last_bank: 15,
                has_data: false,
            },
            Self::Wram0 => &SectionKindInfo {
                name: "WRAM0",
                start: 0xC000,
                max_size: 0x1000,
                first_bank: 0,
                last_bank: 0,
                has_data: false,
            },
            Self::Wramx => &SectionKindInfo {
                name: "WRAMX",
                start: 0xD000,
                max_size: 0x1000,
                first_bank: 1,
                last_bank: 7,
                has_data: false,
            },
            Self::Oam => &SectionKindInfo {
                name: "OAM",
                start: 0xFE00,
                max_size: 0xA0,
                first_bank: 0,
                last_bank: 0,
                has_data: false,
            },
            Self::Hram => &SectionKindInfo {
                name: "HRAM",
                start: 0xFF80,
                max_size: 0x7F,
                first_bank: 0,
                last_bank: 0,
                has_data: false,
            },
        }
    }

    pub fn has_data(self) -> bool {
        self.info().has_data
    }

    /// Last valid address of the region.
    pub fn end_addr(self) -> u16 {
        let info = self.info();
        info.start + (info.max_size - 1) as u16
    }

    pub fn bank_count(self) -> u32 {
        let info = self.info();
        info.last_bank - info.first_bank + 1
    }

    /// Whether a BANK attribute may be given for this kind.
    pub fn is_bankable(self) -> bool {
        matches!(self, Self::Romx | Self::Vram | Self::Sram | Self::Wramx)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionModifier {
    #[default]
    Normal,
    Union,
    Fragment,
}

impl fmt::Display for SectionModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "",
            Self::Union => "UNION",
            Self::Fragment => "FRAGMENT",
        })
    }
}

/// Constraints given in a SECTION/LOAD directive beyond the kind and org.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionAttrs {
    pub bank: Option<u32>,
    /// Power-of-two alignment exponent.
    pub align: u8,
    /// Required residue of the address modulo `1 << align`.
    pub align_ofs: u16,
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
}

/// A pending relocation: an emitted value that could not be computed yet.
#[derive(Debug, Clone)]
pub struct Patch {
    pub kind: PatchKind,
    pub expr: Expression,
    /// Byte position of the placeholder inside the owning section's data.
    pub offset: u32,
    /// Offset of the value relative to the instruction's PC, for link-time
    /// PC-relative evaluation.
    pub pc_shift: u32,
    pub location: SourceLocation,
}

/// A named, typed region of target memory being assembled.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub kind: SectionKind,
    pub modifier: SectionModifier,
    /// Highest output offset ever reached.
    pub size: u32,
    pub org: Option<u16>,
    pub bank: Option<u32>,
    pub align: u8,
    pub align_ofs: u16,
    /// Byte buffer, allocated to the kind's maximum size for has-data kinds
    /// and left empty otherwise.
    pub data: Vec<u8>,
    pub patches: Vec<Patch>,
    pub location: SourceLocation,
}

impl Section {
    pub fn has_data(&self) -> bool {
        self.kind.has_data()
    }
}
