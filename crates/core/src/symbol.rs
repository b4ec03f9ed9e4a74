use indexmap::IndexMap;

use crate::diag::Reporter;
use crate::fstack::SourceLocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// A label owned by a section, at a fixed offset within it.
    Label { section: usize, offset: u32 },
    /// An `EQU` constant; immutable once defined.
    Constant(i32),
    /// A mutable numeric symbol (the FOR iteration variable).
    Variable(i32),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub exported: bool,
    pub location: SourceLocation,
}

/// The scope labels are currently defined under: the last global label, and
/// the last local label within it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelScopes {
    pub global: Option<String>,
    pub local: Option<String>,
}

/// Symbol table. Iteration order is definition order, which the object file
/// preserves.
#[derive(Debug, Default)]
pub struct Symbols {
    symbols: IndexMap<String, Symbol>,
    scopes: LabelScopes,
    exports: IndexMap<String, SourceLocation>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn scopes(&self) -> LabelScopes {
        self.scopes.clone()
    }

    pub fn set_scopes(&mut self, scopes: LabelScopes) {
        self.scopes = scopes;
    }

    pub fn reset_scopes(&mut self) {
        self.scopes = LabelScopes::default();
    }

    /// Resolve a possibly-local name (`.loc`) against the current scope.
    pub fn expand(&self, name: &str) -> Option<String> {
        if let Some(local) = name.strip_prefix('.') {
            let global = self.scopes.global.as_deref()?;
            Some(format!("{global}.{local}"))
        } else {
            Some(name.to_string())
        }
    }

    /// Define a label at `offset` within `section`. Global labels open a new
    /// scope; local labels attach to the current one.
    pub fn define_label(
        &mut self,
        name: &str,
        exported: bool,
        section: usize,
        offset: u32,
        diag: &mut Reporter,
    ) {
        let full = if let Some(local) = name.strip_prefix('.') {
            let Some(global) = self.scopes.global.clone() else {
                diag.error(format!("Local label '{name}' defined outside a label scope"));
                return;
            };
            self.scopes.local = Some(format!("{global}.{local}"));
            format!("{global}.{local}")
        } else {
            self.scopes.global = Some(name.to_string());
            self.scopes.local = None;
            name.to_string()
        };

        self.insert(
            Symbol {
                name: full,
                kind: SymbolKind::Label { section, offset },
                exported,
                location: diag.location(),
            },
            diag,
        );
    }

    pub fn define_constant(&mut self, name: &str, value: i32, diag: &mut Reporter) {
        self.insert(
            Symbol {
                name: name.to_string(),
                kind: SymbolKind::Constant(value),
                exported: false,
                location: diag.location(),
            },
            diag,
        );
    }

    /// Create or overwrite a mutable variable. Fails (with an error) if the
    /// name is already taken by a label or constant.
    pub fn set_variable(&mut self, name: &str, value: i32, diag: &mut Reporter) -> bool {
        match self.symbols.get_mut(name) {
            Some(sym) => match &mut sym.kind {
                SymbolKind::Variable(current) => {
                    *current = value;
                    true
                }
                _ => {
                    diag.error(format!("'{name}' is already defined and not a variable"));
                    false
                }
            },
            None => {
                let location = diag.location();
                self.symbols.insert(
                    name.to_string(),
                    Symbol {
                        name: name.to_string(),
                        kind: SymbolKind::Variable(value),
                        exported: false,
                        location,
                    },
                );
                true
            }
        }
    }

    /// Record an EXPORT request; flags are applied when assembly finishes so
    /// forward references work.
    pub fn request_export(&mut self, name: &str, location: SourceLocation) {
        self.exports.entry(name.to_string()).or_insert(location);
    }

    /// Apply pending exports, reporting any that never got defined.
    pub fn finalize_exports(&mut self, diag: &mut Reporter) {
        let exports = std::mem::take(&mut self.exports);
        for (name, location) in exports {
            match self.symbols.get_mut(&name) {
                Some(sym) => sym.exported = true,
                None => diag.report(crate::diag::Diagnostic::error(
                    location,
                    format!("Exported symbol '{name}' was never defined"),
                )),
            }
        }
    }

    fn insert(&mut self, symbol: Symbol, diag: &mut Reporter) {
        if self.symbols.contains_key(&symbol.name) {
            diag.error(format!("'{}' already defined", symbol.name));
            return;
        }
        self.symbols.insert(symbol.name.clone(), symbol);
    }
}
