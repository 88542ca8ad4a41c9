use crate::value::SymbolId;
use rustc_hash::FxHashMap;

/// Interned symbol table. Each unique symbol name maps to a unique SymbolId,
/// so `(eq? 'foo 'foo)` holds and environment lookup compares ids, never
/// strings. One table per interpreter instance.
pub struct SymbolTable {
    name_to_id: FxHashMap<String, SymbolId>,
    id_to_name: Vec<String>,
    gensym_counter: u64,
}

/// Well-known symbol IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    // special forms
    pub const QUOTE: SymbolId = SymbolId(0);
    pub const QUASIQUOTE: SymbolId = SymbolId(1);
    pub const UNQUOTE: SymbolId = SymbolId(2);
    pub const UNQUOTE_SPLICING: SymbolId = SymbolId(3);
    pub const IF: SymbolId = SymbolId(4);
    pub const DEFINE: SymbolId = SymbolId(5);
    pub const DEFINE_STAR: SymbolId = SymbolId(6);
    pub const SET: SymbolId = SymbolId(7);
    pub const LAMBDA: SymbolId = SymbolId(8);
    pub const LAMBDA_STAR: SymbolId = SymbolId(9);
    pub const LET: SymbolId = SymbolId(10);
    pub const LET_STAR: SymbolId = SymbolId(11);
    pub const LETREC: SymbolId = SymbolId(12);
    pub const BEGIN: SymbolId = SymbolId(13);
    pub const AND: SymbolId = SymbolId(14);
    pub const OR: SymbolId = SymbolId(15);
    pub const COND: SymbolId = SymbolId(16);
    pub const WHEN: SymbolId = SymbolId(17);
    pub const UNLESS: SymbolId = SymbolId(18);
    pub const DEFINE_MACRO: SymbolId = SymbolId(19);
    pub const DEFINE_MACRO_STAR: SymbolId = SymbolId(20);
    pub const DELAY: SymbolId = SymbolId(21);
    pub const ELSE: SymbolId = SymbolId(22);

    // names the evaluator builds code with
    pub const LIST: SymbolId = SymbolId(23);
    pub const APPEND: SymbolId = SymbolId(24);
    pub const CONS: SymbolId = SymbolId(25);

    // condition tags
    pub const ERROR: SymbolId = SymbolId(26);
    pub const WRONG_TYPE_ARG: SymbolId = SymbolId(27);
    pub const OUT_OF_RANGE: SymbolId = SymbolId(28);
    pub const WRONG_NUMBER_OF_ARGS: SymbolId = SymbolId(29);
    pub const UNBOUND_VARIABLE: SymbolId = SymbolId(30);
    pub const DIVISION_BY_ZERO: SymbolId = SymbolId(31);
    pub const READ_ERROR: SymbolId = SymbolId(32);
    pub const IO_ERROR: SymbolId = SymbolId(33);
    pub const INTERNAL_ERROR: SymbolId = SymbolId(34);

    // markers
    pub const REST: SymbolId = SymbolId(35);
    pub const FALLBACK: SymbolId = SymbolId(36);
    pub const ARROW: SymbolId = SymbolId(37); // "=>" in cond clauses

    pub const SYNTAX_ERROR: SymbolId = SymbolId(38);
}

impl SymbolTable {
    /// Create a new symbol table with all well-known symbols pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = [
            "quote",
            "quasiquote",
            "unquote",
            "unquote-splicing",
            "if",
            "define",
            "define*",
            "set!",
            "lambda",
            "lambda*",
            "let",
            "let*",
            "letrec",
            "begin",
            "and",
            "or",
            "cond",
            "when",
            "unless",
            "define-macro",
            "define-macro*",
            "delay",
            "else",
            "list",
            "append",
            "cons",
            "error",
            "wrong-type-arg",
            "out-of-range",
            "wrong-number-of-args",
            "unbound-variable",
            "division-by-zero",
            "read-error",
            "io-error",
            "internal-error",
            "rest",
            "*fallback*",
            "=>",
            "syntax-error",
        ];

        let mut name_to_id = FxHashMap::default();
        let mut id_to_name = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let id = SymbolId(i as u32);
            name_to_id.insert(name.to_string(), id);
            id_to_name.push(name.to_string());
        }

        SymbolTable {
            name_to_id,
            id_to_name,
            gensym_counter: 0,
        }
    }

    /// Intern a symbol name. Returns the existing ID if already interned,
    /// or creates a new one.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up a symbol name by its ID.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize]
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    /// A fresh symbol ("{prefix}-N"). The name is interned like any other
    /// so identity comparison works, but the braces and counter keep it
    /// from colliding with anything the reader can produce.
    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        self.gensym_counter += 1;
        let name = format!("{{{}}}-{}", prefix, self.gensym_counter);
        self.intern(&name)
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.id_to_name.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut t = SymbolTable::new();
        let a = t.intern("hello");
        let b = t.intern("hello");
        assert_eq!(a, b);
        assert_eq!(t.name(a), "hello");
    }

    #[test]
    fn well_known_ids_line_up() {
        let t = SymbolTable::new();
        assert_eq!(t.lookup("quote"), Some(sym::QUOTE));
        assert_eq!(t.lookup("set!"), Some(sym::SET));
        assert_eq!(t.lookup("lambda*"), Some(sym::LAMBDA_STAR));
        assert_eq!(
            t.lookup("wrong-number-of-args"),
            Some(sym::WRONG_NUMBER_OF_ARGS)
        );
        assert_eq!(t.lookup("=>"), Some(sym::ARROW));
    }

    #[test]
    fn gensyms_are_fresh() {
        let mut t = SymbolTable::new();
        let a = t.gensym("tmp");
        let b = t.gensym("tmp");
        assert_ne!(a, b);
    }
}
