use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::Value;

/// S-expression reader: parses source text into heap values.
pub struct Reader<'a> {
    chars: Vec<char>,
    pos: usize,
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
}

/// Read every form in `src`.
pub fn read_all(heap: &mut Heap, symbols: &mut SymbolTable, src: &str) -> Result<Vec<Value>> {
    Reader::new(src, heap, symbols).read_to_end()
}

/// Read a single form; None on pure whitespace/comments.
pub fn read_one(heap: &mut Heap, symbols: &mut SymbolTable, src: &str) -> Result<Option<Value>> {
    Reader::new(src, heap, symbols).read()
}

impl<'a> Reader<'a> {
    pub fn new(input: &str, heap: &'a mut Heap, symbols: &'a mut SymbolTable) -> Self {
        Reader {
            chars: input.chars().collect(),
            pos: 0,
            heap,
            symbols,
        }
    }

    /// Read one expression. Returns None at EOF.
    pub fn read(&mut self) -> Result<Option<Value>> {
        self.skip_atmosphere()?;
        if self.at_end() {
            return Ok(None);
        }
        Ok(Some(self.read_expr()?))
    }

    pub fn read_to_end(&mut self) -> Result<Vec<Value>> {
        let mut forms = Vec::new();
        while let Some(form) = self.read()? {
            forms.push(form);
        }
        Ok(forms)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn fail(&self, msg: &str) -> Error {
        Error::Read(format!("{} (at offset {})", msg, self.pos))
    }

    /// Skip whitespace, `;` line comments, and nested `#| |#` blocks.
    fn skip_atmosphere(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.pos += 1;
                }
                Some(';') => {
                    while let Some(c) = self.next() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('#') if self.chars.get(self.pos + 1) == Some(&'|') => {
                    self.pos += 2;
                    let mut depth = 1;
                    while depth > 0 {
                        match self.next() {
                            Some('|') if self.peek() == Some('#') => {
                                self.pos += 1;
                                depth -= 1;
                            }
                            Some('#') if self.peek() == Some('|') => {
                                self.pos += 1;
                                depth += 1;
                            }
                            Some(_) => {}
                            None => return Err(self.fail("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_expr(&mut self) -> Result<Value> {
        self.skip_atmosphere()?;
        match self.peek() {
            None => Err(self.fail("unexpected end of input")),
            Some('(') => {
                self.pos += 1;
                self.read_list()
            }
            Some(')') => Err(self.fail("unexpected )")),
            Some('\'') => {
                self.pos += 1;
                self.read_prefixed(sym::QUOTE)
            }
            Some('`') => {
                self.pos += 1;
                self.read_prefixed(sym::QUASIQUOTE)
            }
            Some(',') => {
                self.pos += 1;
                if self.peek() == Some('@') {
                    self.pos += 1;
                    self.read_prefixed(sym::UNQUOTE_SPLICING)
                } else {
                    self.read_prefixed(sym::UNQUOTE)
                }
            }
            Some('"') => {
                self.pos += 1;
                self.read_string()
            }
            Some('#') => self.read_hash(),
            Some(_) => self.read_atom(),
        }
    }

    fn read_prefixed(&mut self, tag: crate::value::SymbolId) -> Result<Value> {
        let inner = self.read_expr()?;
        let tail = self.heap.cons(inner, Value::Nil);
        Ok(self.heap.cons(Value::Symbol(tag), tail))
    }

    fn read_list(&mut self) -> Result<Value> {
        let mut items: Vec<Value> = Vec::new();
        let mut tail = Value::Nil;
        loop {
            self.skip_atmosphere()?;
            match self.peek() {
                None => return Err(self.fail("unterminated list")),
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some('.') if self.is_lone_dot() => {
                    self.pos += 1;
                    tail = self.read_expr()?;
                    self.skip_atmosphere()?;
                    if self.next() != Some(')') {
                        return Err(self.fail("expected ) after dotted tail"));
                    }
                    break;
                }
                Some(_) => items.push(self.read_expr()?),
            }
        }
        let mut result = tail;
        for &item in items.iter().rev() {
            result = self.heap.cons(item, result);
        }
        Ok(result)
    }

    /// A '.' that stands alone, as opposed to starting "..." or "1.5".
    fn is_lone_dot(&self) -> bool {
        match self.chars.get(self.pos + 1) {
            None => true,
            Some(c) => c.is_whitespace() || *c == '(' || *c == ')' || *c == ';',
        }
    }

    fn read_string(&mut self) -> Result<Value> {
        let mut s = String::new();
        loop {
            match self.next() {
                None => return Err(self.fail("unterminated string")),
                Some('"') => break,
                Some('\\') => match self.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some('0') => s.push('\0'),
                    Some(c) => s.push(c),
                    None => return Err(self.fail("unterminated string escape")),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(self.heap.make_string(s))
    }

    fn read_hash(&mut self) -> Result<Value> {
        // self.peek() == '#'
        self.pos += 1;
        match self.peek() {
            Some('t') => {
                self.pos += 1;
                Ok(Value::Bool(true))
            }
            Some('f') => {
                self.pos += 1;
                Ok(Value::Bool(false))
            }
            Some('\\') => {
                self.pos += 1;
                self.read_char()
            }
            Some('(') => {
                self.pos += 1;
                let list = self.read_list()?;
                let items = self
                    .heap
                    .list_to_vec(list)
                    .ok_or_else(|| self.fail("bad vector literal"))?;
                Ok(self.heap.make_vector(items))
            }
            Some('<') => Err(self.fail("unreadable object")),
            _ => Err(self.fail("unknown # syntax")),
        }
    }

    fn read_char(&mut self) -> Result<Value> {
        let first = self.next().ok_or_else(|| self.fail("bad character literal"))?;
        // Named characters extend while the next char is alphabetic.
        let mut name = String::from(first);
        if first.is_alphabetic() {
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() {
                    name.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if name.chars().count() == 1 {
            return Ok(Value::Char(first));
        }
        match name.as_str() {
            "space" => Ok(Value::Char(' ')),
            "newline" | "linefeed" => Ok(Value::Char('\n')),
            "tab" => Ok(Value::Char('\t')),
            "return" => Ok(Value::Char('\r')),
            "null" | "nul" => Ok(Value::Char('\0')),
            "backspace" => Ok(Value::Char('\u{8}')),
            "delete" => Ok(Value::Char('\u{7f}')),
            _ => Err(self.fail("unknown character name")),
        }
    }

    fn read_atom(&mut self) -> Result<Value> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '(' || c == ')' || c == ';' || c == '"' {
                break;
            }
            self.pos += 1;
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        if token.is_empty() {
            return Err(self.fail("empty token"));
        }
        if let Some(v) = parse_number(&token) {
            return Ok(v);
        }
        if let Some(name) = token.strip_prefix(':') {
            if !name.is_empty() {
                return Ok(Value::Keyword(self.symbols.intern(name)));
            }
        }
        Ok(Value::Symbol(self.symbols.intern(&token)))
    }
}

/// Numeric literals: integers, n/d ratios, reals, and a+bi complex.
pub(crate) fn parse_number(token: &str) -> Option<Value> {
    if let Ok(n) = token.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if let Some((num, den)) = token.split_once('/') {
        let n = num.parse::<i64>().ok()?;
        let d = den.parse::<i64>().ok()?;
        if d == 0 {
            return None; // read as a symbol; division signals at eval
        }
        return Some(Value::ratio(n, d));
    }
    if let Some(body) = token.strip_suffix('i') {
        if let Some(v) = parse_complex(body) {
            return Some(v);
        }
    }
    // Reject tokens like "+", "-", "..." that f64 parsing would not,
    // and bare words that parse::<f64> rejects anyway.
    if token.parse::<f64>().is_ok() && token.chars().any(|c| c.is_ascii_digit()) {
        return token.parse::<f64>().ok().map(Value::Real);
    }
    None
}

/// `a+bi` / `a-bi` with a mandatory real part, e.g. `1+2i`, `0-1.5i`.
fn parse_complex(body: &str) -> Option<Value> {
    let split = body
        .char_indices()
        .skip(1)
        .find(|&(i, c)| (c == '+' || c == '-') && !matches!(body.as_bytes().get(i - 1), Some(b'e') | Some(b'E')))
        .map(|(i, _)| i)?;
    let re = body[..split].parse::<f64>().ok()?;
    let im_str = &body[split..];
    let im = if im_str == "+" {
        1.0
    } else if im_str == "-" {
        -1.0
    } else {
        im_str.parse::<f64>().ok()?
    };
    Some(Value::Complex(re, im))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Heap, SymbolTable) {
        (Heap::new(), SymbolTable::new())
    }

    #[test]
    fn reads_numbers() {
        let (mut h, mut st) = setup();
        assert_eq!(read_one(&mut h, &mut st, "42").unwrap(), Some(Value::Int(42)));
        assert_eq!(read_one(&mut h, &mut st, "-7").unwrap(), Some(Value::Int(-7)));
        assert_eq!(read_one(&mut h, &mut st, "3/6").unwrap(), Some(Value::Ratio(1, 2)));
        assert_eq!(read_one(&mut h, &mut st, "4/2").unwrap(), Some(Value::Int(2)));
        assert_eq!(read_one(&mut h, &mut st, "1.5").unwrap(), Some(Value::Real(1.5)));
        assert_eq!(
            read_one(&mut h, &mut st, "1+2i").unwrap(),
            Some(Value::Complex(1.0, 2.0))
        );
    }

    #[test]
    fn extreme_negative_denominator_falls_back_to_real() {
        let (mut h, mut st) = setup();
        let v = read_one(&mut h, &mut st, "1/-9223372036854775808")
            .unwrap()
            .unwrap();
        let Value::Real(r) = v else { panic!("expected a real, got {:?}", v) };
        assert!(r < 0.0);
        assert_eq!(
            read_one(&mut h, &mut st, "3/-6").unwrap(),
            Some(Value::Ratio(-1, 2))
        );
    }

    #[test]
    fn plus_and_minus_are_symbols() {
        let (mut h, mut st) = setup();
        let plus = st.intern("+");
        assert_eq!(read_one(&mut h, &mut st, "+").unwrap(), Some(Value::Symbol(plus)));
    }

    #[test]
    fn reads_dotted_pairs() {
        let (mut h, mut st) = setup();
        let v = read_one(&mut h, &mut st, "(1 . 2)").unwrap().unwrap();
        let Value::Pair(id) = v else { panic!("expected a pair") };
        assert_eq!(h.car(id), Value::Int(1));
        assert_eq!(h.cdr(id), Value::Int(2));
    }

    #[test]
    fn quote_sugar_expands() {
        let (mut h, mut st) = setup();
        let v = read_one(&mut h, &mut st, "'x").unwrap().unwrap();
        let Value::Pair(id) = v else { panic!("expected a pair") };
        assert_eq!(h.car(id), Value::Symbol(sym::QUOTE));
    }

    #[test]
    fn reads_keywords_and_characters() {
        let (mut h, mut st) = setup();
        let name = st.intern("name");
        assert_eq!(
            read_one(&mut h, &mut st, ":name").unwrap(),
            Some(Value::Keyword(name))
        );
        assert_eq!(
            read_one(&mut h, &mut st, "#\\space").unwrap(),
            Some(Value::Char(' '))
        );
        assert_eq!(read_one(&mut h, &mut st, "#\\a").unwrap(), Some(Value::Char('a')));
    }

    #[test]
    fn comments_are_atmosphere() {
        let (mut h, mut st) = setup();
        let v = read_one(&mut h, &mut st, "; line\n #| block #| nested |# |# 5").unwrap();
        assert_eq!(v, Some(Value::Int(5)));
    }

    #[test]
    fn vectors_and_strings() {
        let (mut h, mut st) = setup();
        let v = read_one(&mut h, &mut st, "#(1 2 3)").unwrap().unwrap();
        let Value::Vector(id) = v else { panic!("expected a vector") };
        assert_eq!(h.vector(id).len(), 3);
        let s = read_one(&mut h, &mut st, "\"a\\nb\"").unwrap().unwrap();
        let Value::Str(sid) = s else { panic!("expected a string") };
        assert_eq!(h.string(sid), "a\nb");
    }

    #[test]
    fn unterminated_list_is_an_error() {
        let (mut h, mut st) = setup();
        assert!(read_one(&mut h, &mut st, "(1 2").is_err());
    }
}
