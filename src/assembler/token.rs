//! Tokenizer: turns one line of source into a host-neutral token
//! stream. Statements are line-oriented, so the
//! tokenizer works one line at a time and the parser drives it line
//! by line rather than pre-tokenizing the whole file.

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// A single punctuation character: `:`, `,`, `+`, `-`, `%`.
    Punct(char),
    /// A `{ ... }` brace-delimited region, verbatim (it is handed to
    /// the macro evaluator, not tokenized further here).
    Brace(String),
    Newline,
}

/// Tokenize a single logical source line. Comments (`;` or `#` to end
/// of line) are stripped before this runs.
pub fn tokenize_line(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let bytes: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == ';' || c == '#' {
            break;
        }
        if c == '{' {
            let mut depth = 1;
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                if depth > 0 {
                    j += 1;
                }
            }
            let content: String = bytes[start..j.min(bytes.len())].iter().collect();
            tokens.push(Token::Brace(content));
            i = j + 1;
            continue;
        }
        if c == '"' {
            let mut j = i + 1;
            let mut s = String::new();
            while j < bytes.len() && bytes[j] != '"' {
                s.push(bytes[j]);
                j += 1;
            }
            tokens.push(Token::Str(s));
            i = j + 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            let mut j = i;
            let mut is_float = false;
            while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == '.') {
                if bytes[j] == '.' {
                    is_float = true;
                }
                j += 1;
            }
            let text: String = bytes[start..j].iter().collect();
            if is_float {
                tokens.push(Token::Float(text.parse().unwrap_or(0.0)));
            } else {
                tokens.push(Token::Int(text.parse().unwrap_or(0)));
            }
            i = j;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            let mut j = i;
            while j < bytes.len() && (bytes[j].is_alphanumeric() || bytes[j] == '_' || bytes[j] == '.') {
                j += 1;
            }
            let text: String = bytes[start..j].iter().collect();
            tokens.push(Token::Ident(text));
            i = j;
            continue;
        }
        match c {
            ':' | ',' | '+' | '-' | '%' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            _ => {
                i += 1; // skip anything unrecognized; the parser will
                        // surface a useful "unexpected token" error at
                        // the statement level since it sees the gap.
            }
        }
    }
    tokens.push(Token::Newline);
    tokens
}

/// Strip a `;` or `#` line comment (outside of any quoted string).
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (idx, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            ';' | '#' if !in_string => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// True if the trimmed line is a macro-block delimiter (`{{{` or
/// `}}}`, optionally with a trailing name on the opening one).
pub fn macro_delimiter(line: &str) -> Option<MacroDelimiter> {
    let trimmed = line.trim();
    if trimmed == "}}}" {
        return Some(MacroDelimiter::Close);
    }
    if let Some(rest) = trimmed.strip_prefix("{{{") {
        let mut name = rest.trim();
        if let Some(stripped) = name.strip_suffix("}}}") {
            name = stripped.trim();
        }
        return Some(MacroDelimiter::Open(name.to_string()));
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub enum MacroDelimiter {
    Open(String),
    Close,
}
