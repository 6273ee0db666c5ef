//! Reversible encoding of column values into path-component-safe names.
//!
//! Every directory level of an index tree is the string form of a column
//! value, which may contain characters no filesystem accepts. [`encode`]
//! maps an arbitrary string onto a name that is safe on POSIX and Windows
//! filesystems (case-insensitive ones included) and [`decode`] inverts it
//! exactly: `decode(&encode(s)) == Some(s)` for every input.
//!
//! The scheme:
//!
//! - the empty string becomes the sentinel `~`;
//! - reserved characters (path separators, control characters, quoting and
//!   wildcard characters, and this encoder's own meta-characters) become a
//!   two-character escape `=` + code, with a fixed invertible code alphabet;
//! - upper-case characters are prefixed with the no-op marker `'` so that
//!   case-insensitive filesystems cannot conflate them with their lower-case
//!   forms;
//! - space and `.` get the single-character shorthands `_` and `+`;
//! - a whole name matching a reserved Windows device name (`con`, `nul`,
//!   `lpt1`, ...) is suffixed with the no-op marker.

/// The escape character introducing a two-character escape.
const ESCAPE: char = '=';

/// The no-op marker: prefixes upper-case characters, suffixes reserved names.
const NOOP: char = '\'';

/// Whole-name sentinel for the empty string.
const EMPTY: &str = "~";

/// Shorthand for a space.
const SPACE: char = '_';

/// Shorthand for a dot.
const DOT: char = '+';

/// Code alphabet for the 32 C0 control characters, indexed by code point.
const CONTROL_CODES: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Windows device names that are invalid as file names, with or without an
/// extension.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Returns the escape code for a reserved character, if it has one.
fn escape_code(c: char) -> Option<char> {
    let code = match c {
        c if (c as u32) < 0x20 => CONTROL_CODES[c as usize] as char,
        '\u{7f}' => '^',
        '/' => 'z',
        '\\' => 'y',
        ':' => 'x',
        '*' => 'w',
        '?' => '!',
        '"' => '@',
        '<' => '(',
        '>' => ')',
        '|' => ';',
        '%' => '-',
        ESCAPE => '&',
        NOOP => '#',
        SPACE => '[',
        DOT => ']',
        '~' => '$',
        _ => return None,
    };
    Some(code)
}

/// Inverts [`escape_code`].
fn unescape_code(code: char) -> Option<char> {
    if let Some(pos) = CONTROL_CODES.iter().position(|&b| b as char == code) {
        return char::from_u32(pos as u32);
    }
    let c = match code {
        '^' => '\u{7f}',
        'z' => '/',
        'y' => '\\',
        'x' => ':',
        'w' => '*',
        '!' => '?',
        '@' => '"',
        '(' => '<',
        ')' => '>',
        ';' => '|',
        '-' => '%',
        '&' => ESCAPE,
        '#' => NOOP,
        '[' => SPACE,
        ']' => DOT,
        '$' => '~',
        _ => return None,
    };
    Some(c)
}

/// Encodes an arbitrary string into a filesystem-safe path component.
pub fn encode(value: &str) -> String {
    if value.is_empty() {
        return EMPTY.to_string();
    }
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if let Some(code) = escape_code(c) {
            out.push(ESCAPE);
            out.push(code);
        } else if c == ' ' {
            out.push(SPACE);
        } else if c == '.' {
            out.push(DOT);
        } else if c.is_uppercase() {
            out.push(NOOP);
            out.push(c);
        } else {
            out.push(c);
        }
    }
    if RESERVED_NAMES.contains(&out.as_str()) {
        out.push(NOOP);
    }
    out
}

/// Decodes a name produced by [`encode`].
///
/// Returns `None` if the name is not a valid encoding (dangling escape,
/// unknown escape code, or a character the encoder never emits).
pub fn decode(name: &str) -> Option<String> {
    if name == EMPTY {
        return Some(String::new());
    }
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => out.push(unescape_code(chars.next()?)?),
            // A trailing no-op marker is a reserved-name suffix; one followed
            // by a character marks that character (an upper-case original).
            NOOP => {
                if let Some(marked) = chars.next() {
                    out.push(marked);
                }
            }
            SPACE => out.push(' '),
            DOT => out.push('.'),
            '~' => return None,
            _ => out.push(c),
        }
    }
    Some(out)
}
