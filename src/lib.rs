//! A decoder for the image lists manga readers hide in LZ-compressed
//! P.A.C.K.E.R. scripts.
//!
//! The page script evaluates an unpacker against four literal arguments: a
//! template whose characters are symbols, the symbol base, the symbol count,
//! and the symbol table compressed with LZ-string and base64 encoded.
//!
//! ## Typical Structure
//! ```javascript
//! window["eval"](function(p,a,c,k,e,d){
//!   // Unpacking logic
//! }('template', base, count, 'compressed'['splic']('|'), 0, {}))
//! ```
//!
//! Decoding runs five stages: [`extract_args`], [`split_tokens`],
//! [`build_symbol_table`], [`substitute`] and [`extract_payload`].
//!
//! # Examples
//!
//! ```rust
//! let packed = r#"}('{"0":["1"]}',62,2,'JYWwhg5gpgzgPgegIwDoBWAHCQ=='['splic']('|'),0,{}))"#;
//!
//! let payload = packed_imgdata::decode(packed).unwrap();
//! assert_eq!(payload, serde_json::json!({ "images": ["/1.jpg"] }));
//! ```

use std::{borrow::Cow, collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace, warn};

pub use crate::{
    baser::Baser,
    error::{Error, Result},
    pages::ImageData,
};

mod baser;
mod error;
pub mod lzstring;
pub mod pages;

// The leading `.*` backtracks to the last invocation on the line.
static PACKED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*\}\(\s*'(.*)'\s*,\s*(\d+|\[\])\s*,\s*(\d+)\s*,\s*'([0-9A-Za-z+/=]*)'").unwrap()
});

/// How template characters are matched against the symbol table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubstitutionMode {
    /// Every template character is looked up on its own. Symbols longer
    /// than one character never match.
    #[default]
    SingleChar,
    /// A two-character symbol is tried first at each position, falling back
    /// to the single character.
    GreedyPairs,
}

/// Knobs for [`decode_with`] and [`unpack_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub mode: SubstitutionMode,
    /// Upper bound on the symbol count. `None` accepts any count.
    pub max_count: Option<usize>,
}

impl DecodeOptions {
    pub fn with_mode(mut self, mode: SubstitutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_count(mut self, limit: usize) -> Self {
        self.max_count = Some(limit);
        self
    }
}

/// The four literal arguments of a packer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedArgs<'a> {
    pub template: &'a str,
    pub base: usize,
    pub count: usize,
    /// LZ-string base64 text of the `|`-separated tokens.
    pub dictionary: &'a str,
}

/// Symbol to token bindings for one decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable(HashMap<String, String>);

impl SymbolTable {
    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.0.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, symbol: String, token: String) {
        self.0.insert(symbol, token);
    }
}

/// Detects whether the input string contains a packer invocation.
///
/// # Examples
///
/// ```rust
/// assert!(packed_imgdata::detect("}('0',10,1,'B5A='['splic']('|'),0,{}))"));
/// assert!(!packed_imgdata::detect("var x = 1;"));
/// assert!(!packed_imgdata::detect(""));
/// ```
#[inline]
pub fn detect(source: &str) -> bool {
    PACKED_REGEX.is_match(source)
}

/// Decodes the JSON payload hidden in a packed script.
///
/// `source` may be a whole page; text around the invocation is ignored.
///
/// # Errors
///
/// Returns an error if:
/// - No packer invocation is present ([`Error::MalformedInput`])
/// - The base is outside `2..=62` ([`Error::UnsupportedBase`])
/// - The rebuilt script has no parsable `{...}` span ([`Error::MalformedPayload`])
#[inline]
pub fn decode(source: &str) -> Result<Value> {
    decode_with(source, &DecodeOptions::default())
}

/// [`decode`] with explicit options.
///
/// # Errors
///
/// As [`decode`], plus [`Error::ResourceLimitExceeded`] when the symbol
/// count is over `options.max_count`.
pub fn decode_with(source: &str, options: &DecodeOptions) -> Result<Value> {
    let script = unpack_with(source, options)?;
    extract_payload(&script)
}

/// Decodes a packed script straight into page URLs rooted at `host`.
///
/// See [`ImageData::page_urls`] for how each URL is assembled.
pub fn decode_pages(source: &str, host: &str) -> Result<Vec<String>> {
    let payload = decode(source)?;
    ImageData::from_payload(&payload)?.page_urls(host)
}

/// Rebuilds the script text without parsing a payload out of it.
///
/// # Examples
///
/// ```rust
/// let packed = "}('0 2=1',10,3,'G4QwTgPhJA=='.split('|'),0,{}))";
/// assert_eq!(packed_imgdata::unpack(packed).unwrap(), "var a=1");
/// ```
#[inline]
pub fn unpack(source: &str) -> Result<String> {
    unpack_with(source, &DecodeOptions::default())
}

/// [`unpack`] with explicit options.
pub fn unpack_with(source: &str, options: &DecodeOptions) -> Result<String> {
    let args = extract_args(source)?;
    debug!(
        "packed args: base={} count={} template={} bytes",
        args.base,
        args.count,
        args.template.len()
    );

    if let Some(limit) = options.max_count
        && args.count > limit
    {
        return Err(Error::ResourceLimitExceeded {
            count: args.count,
            limit,
        });
    }

    let template = unescape_template(args.template);
    let tokens = split_tokens(args.dictionary);
    let table = build_symbol_table(&args, &tokens)?;
    Ok(substitute(&template, &table, options.mode))
}

/// Resolves the `\\` and `\'` escapes of a single-quoted script literal.
///
/// Any other backslash sequence is kept as written, so JSON escapes such as
/// `\"` or `\u6f2b` reach the payload parser untouched.
///
/// # Arguments
///
/// * `template` - The raw text captured between the template's quotes
///
/// # Returns
///
/// The template as the script engine would see it, borrowed when it holds
/// no escapes
fn unescape_template(template: &str) -> Cow<'_, str> {
    if !template.contains('\\') {
        return Cow::Borrowed(template);
    }

    let mut unescaped = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, chars.peek()) {
            ('\\', Some(&next @ ('\\' | '\''))) => {
                unescaped.push(next);
                chars.next();
            }
            _ => unescaped.push(ch),
        }
    }

    Cow::Owned(unescaped)
}

/// Extracts the packer arguments from the source code.
///
/// The match anchors on the last `}(` on the line that opens a well-formed
/// invocation and stops after the fourth argument, so whatever follows
/// (`.split('|')`, extra arguments, closing parentheses) is ignored. A base written as `[]` is
/// read as 62.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if the invocation is missing or its
/// base or count does not fit in a `usize`.
pub fn extract_args(source: &str) -> Result<PackedArgs<'_>> {
    let caps = PACKED_REGEX
        .captures(source)
        .ok_or(Error::MalformedInput("no packer invocation found"))?;

    let base = match &caps[2] {
        "[]" => 62,
        base => base
            .parse()
            .map_err(|_| Error::MalformedInput("invalid base"))?,
    };
    let count = caps[3]
        .parse()
        .map_err(|_| Error::MalformedInput("invalid count"))?;

    let (Some(template), Some(dictionary)) = (caps.get(1), caps.get(4)) else {
        return Err(Error::MalformedInput("no packer invocation found"));
    };

    Ok(PackedArgs {
        template: template.as_str(),
        base,
        count,
        dictionary: dictionary.as_str(),
    })
}

/// Decompresses the dictionary and splits it into tokens.
///
/// Corrupt or empty input yields no tokens rather than an error; every
/// symbol then maps to itself.
pub fn split_tokens(dictionary: &str) -> Vec<String> {
    let Some(units) = lzstring::decompress_from_base64(dictionary) else {
        warn!("symbol dictionary failed to decompress, substituting symbols as-is");
        return Vec::new();
    };
    if units.is_empty() {
        return Vec::new();
    }

    String::from_utf16_lossy(&units)
        .split('|')
        .map(String::from)
        .collect()
}

/// Binds `symbol(k)` to the k-th token for every `k` below the count.
///
/// Missing or empty tokens bind a symbol to itself. Bindings are written
/// from `count - 1` down to `0`, so on a collision the smaller index wins.
///
/// # Arguments
///
/// * `args` - Supplies the base and the symbol count
/// * `tokens` - Decompressed dictionary entries, possibly empty
///
/// # Errors
///
/// Returns [`Error::UnsupportedBase`] if the base is outside `2..=62`.
pub fn build_symbol_table(args: &PackedArgs<'_>, tokens: &[String]) -> Result<SymbolTable> {
    let baser = Baser::new(args.base)?;

    if !tokens.is_empty() && tokens.len() != args.count {
        warn!(
            "symbol count {} does not match {} dictionary tokens",
            args.count,
            tokens.len()
        );
    }

    let mut table = SymbolTable::default();
    for k in (0..args.count).rev() {
        let symbol = baser.encode(k);
        let token = match tokens.get(k) {
            Some(token) if !token.is_empty() => token.clone(),
            _ => symbol.clone(),
        };
        table.insert(symbol, token);
    }

    trace!("symbol table holds {} entries", table.len());
    Ok(table)
}

/// Replaces template characters with their bound tokens.
///
/// Characters with no binding are copied through unchanged.
///
/// # Arguments
///
/// * `template` - The unescaped template text
/// * `table` - Bindings from [`build_symbol_table`]
/// * `mode` - Whether two-character symbols are tried before single ones
///
/// # Returns
///
/// The reconstructed script
pub fn substitute(template: &str, table: &SymbolTable, mode: SubstitutionMode) -> String {
    let mut script = String::with_capacity(template.len() * 4);
    let mut buf = [0u8; 4];
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if mode == SubstitutionMode::GreedyPairs
            && let Some(&next) = chars.peek()
        {
            let pair: String = [ch, next].iter().collect();
            if let Some(token) = table.get(&pair) {
                script.push_str(token);
                chars.next();
                continue;
            }
        }

        let symbol: &str = ch.encode_utf8(&mut buf);
        script.push_str(table.get(symbol).unwrap_or(symbol));
    }

    script
}

/// Parses the span from the first `{` to the last `}` as JSON.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if there is no such span or it is
/// not valid JSON.
pub fn extract_payload(script: &str) -> Result<Value> {
    let span = match (script.find('{'), script.rfind('}')) {
        (Some(start), Some(end)) if start < end => &script[start..=end],
        _ => return Err(Error::MalformedPayload("no {...} span in script".into())),
    };
    trace!("payload span is {} bytes", span.len());

    serde_json::from_str(span).map_err(|err| Error::MalformedPayload(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const IMAGES_TEMPLATE: &str = r#"0.1({"2":["3://4.5/8.6","3://4.5/9.6"]}).7();"#;
    const IMAGES_DICT: &str =
        "MoWQEgPglgtg5gEQIYBcnRkuBTAzhACxRQAd9sAPJGEgG2wgGMB7GCAKxLghICdsAkgDsoKCAEYIAJiA";

    fn images_fixture() -> String {
        format!(
            r#"<script>window["\x65\x76\x61\x6c"](function(p,a,c,k,e,d){{e=function(c){{return c}};return p;}}('{}',62,10,'{}'['\x73\x70\x6c\x69\x63']('\x7c'),0,{{}}))</script>"#,
            IMAGES_TEMPLATE, IMAGES_DICT
        )
    }

    fn tokens(list: &str) -> Vec<String> {
        list.split('|').map(String::from).collect()
    }

    #[test]
    fn test_detect() {
        fn positive(input: &str) {
            assert!(detect(input), "Should detect a packer call in: {}", input);
        }

        fn negative(input: &str) {
            assert!(!detect(input), "Should NOT detect a packer call in: {}", input);
        }

        negative("");
        negative("var a = b");
        negative("}('0',10,1)");

        positive(&images_fixture());
        positive("}('0', 10, 1, 'B5A=')");
        positive("}('0',[],1,'B5A=')");
    }

    #[test]
    fn test_extract_args() {
        let source = images_fixture();
        let args = extract_args(&source).unwrap();
        assert_eq!(args.template, IMAGES_TEMPLATE);
        assert_eq!(args.base, 62);
        assert_eq!(args.count, 10);
        assert_eq!(args.dictionary, IMAGES_DICT);
    }

    #[test]
    fn test_extract_args_takes_last_invocation() {
        let source = r#"f}('{b}');g}('{"0":1}',10,1,'B5A=').split('|'),0,{}))"#;
        let args = extract_args(source).unwrap();
        assert_eq!(args.template, r#"{"0":1}"#);
        assert_eq!(args.count, 1);
        assert_eq!(decode(source).unwrap(), json!({ "x": 1 }));
    }

    #[test]
    fn test_unescape_template() {
        assert_eq!(unescape_template("plain"), Cow::Borrowed("plain"));
        assert_eq!(unescape_template(r"it\'s"), "it's");
        assert_eq!(unescape_template(r"a\\b"), r"a\b");
        assert_eq!(unescape_template(r#"\"q\"\u6f2b"#), r#"\"q\"\u6f2b"#);
        assert_eq!(unescape_template("end\\"), "end\\");
    }

    #[test]
    fn test_decode_escaped_quote() {
        let source = r#"}('{"a":"it\'s"}',10,0,'')"#;
        assert_eq!(decode(source).unwrap(), json!({ "a": "it's" }));
    }

    #[test]
    fn test_extract_args_bracket_base() {
        let args = extract_args("}('0 1',[],2,'IYHxGMg=').x()").unwrap();
        assert_eq!(args.base, 62);
        assert_eq!(args.count, 2);
    }

    #[test]
    fn test_extract_args_missing() {
        assert_eq!(
            extract_args("var a = 1;").unwrap_err(),
            Error::MalformedInput("no packer invocation found")
        );
        assert_eq!(
            extract_args("}('0',10,99999999999999999999999,'')").unwrap_err(),
            Error::MalformedInput("invalid count")
        );
    }

    #[test]
    fn test_split_tokens() {
        assert_eq!(split_tokens("BYUwNmD2A+DukCcwBMg="), tokens("hello|world"));
        assert_eq!(split_tokens("IYHxGMg="), tokens("a||c"));
        assert!(split_tokens("").is_empty());
        assert!(split_tokens("BYUwNmD2A+Du").is_empty());
    }

    #[test]
    fn test_symbol_table_golden() {
        let source = images_fixture();
        let args = extract_args(&source).unwrap();
        let table = build_symbol_table(&args, &split_tokens(args.dictionary)).unwrap();

        let expected: HashMap<String, String> = [
            ("0", "SMH"),
            ("1", "imgData"),
            ("2", "images"),
            ("3", "https"),
            ("4", "example"),
            ("5", "com"),
            ("6", "jpg"),
            ("7", "preInit"),
            ("8", "1"),
            ("9", "2"),
        ]
        .into_iter()
        .map(|(symbol, token)| (symbol.to_owned(), token.to_owned()))
        .collect();
        assert_eq!(table, SymbolTable(expected));
    }

    #[test]
    fn test_symbol_table_identity_fallback() {
        let args = PackedArgs {
            template: "",
            base: 10,
            count: 4,
            dictionary: "",
        };
        let table = build_symbol_table(&args, &tokens("x||z")).unwrap();
        assert_eq!(table.get("0"), Some("x"));
        assert_eq!(table.get("1"), Some("1"));
        assert_eq!(table.get("2"), Some("z"));
        assert_eq!(table.get("3"), Some("3"));
        assert_eq!(table.get("4"), None);
    }

    #[test]
    fn test_symbol_table_multichar_symbols() {
        let args = PackedArgs {
            template: "",
            base: 36,
            count: 38,
            dictionary: "",
        };
        let table = build_symbol_table(&args, &[]).unwrap();
        assert_eq!(table.len(), 38);
        assert_eq!(table.get("z"), Some("z"));
        assert_eq!(table.get("10"), Some("10"));
        assert_eq!(table.get("11"), Some("11"));
    }

    #[test]
    fn test_symbol_table_bad_base() {
        let args = PackedArgs {
            template: "",
            base: 63,
            count: 1,
            dictionary: "",
        };
        assert_eq!(
            build_symbol_table(&args, &[]).unwrap_err(),
            Error::UnsupportedBase(63)
        );
    }

    #[test]
    fn test_substitute_single_char() {
        let args = PackedArgs {
            template: "",
            base: 10,
            count: 12,
            dictionary: "",
        };
        let table = build_symbol_table(&args, &tokens("a|b|c|d|e|f|g|h|i|j|TEN|ELEVEN")).unwrap();
        assert_eq!(substitute("10 1;x", &table, SubstitutionMode::SingleChar), "ba b;x");
    }

    #[test]
    fn test_substitute_greedy_pairs() {
        let args = PackedArgs {
            template: "",
            base: 10,
            count: 12,
            dictionary: "",
        };
        let table = build_symbol_table(&args, &tokens("a|b|c|d|e|f|g|h|i|j|TEN|ELEVEN")).unwrap();
        assert_eq!(
            substitute("10 11 1", &table, SubstitutionMode::GreedyPairs),
            "TEN ELEVEN b"
        );
        assert_eq!(substitute("12", &table, SubstitutionMode::GreedyPairs), "bc");
    }

    #[test]
    fn test_substitute_empty_table() {
        let template = r#"{"0":"1"}"#;
        assert_eq!(
            substitute(template, &SymbolTable::default(), SubstitutionMode::SingleChar),
            template
        );
    }

    #[test]
    fn test_extract_payload() {
        assert_eq!(
            extract_payload(r#"SMH.imgData({"a":{"b":[1]}}).preInit();"#).unwrap(),
            json!({ "a": { "b": [1] } })
        );
        assert!(matches!(
            extract_payload("var a=1"),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            extract_payload("}{"),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            extract_payload("{x}"),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode() {
        let source = images_fixture();
        let expected = json!({
            "images": ["https://example.com/1.jpg", "https://example.com/2.jpg"]
        });
        assert_eq!(decode(&source).unwrap(), expected);
        assert_eq!(decode(&source).unwrap(), decode(&source).unwrap());
    }

    #[test]
    fn test_unpack() {
        assert_eq!(
            unpack(&images_fixture()).unwrap(),
            r#"SMH.imgData({"images":["https://example.com/1.jpg","https://example.com/2.jpg"]}).preInit();"#
        );
    }

    #[test]
    fn test_unpack_empty_dictionary() {
        let template = r#"{"0":1,"a":"2"}"#;
        let source = format!("}}('{}',10,3,''.split('|'),0,{{}}))", template);
        assert_eq!(unpack(&source).unwrap(), template);
        assert_eq!(decode(&source).unwrap(), json!({ "0": 1, "a": "2" }));

        let source = format!("}}('{}',10,0,'B5A=')", template);
        assert_eq!(unpack(&source).unwrap(), template);
    }

    #[test]
    fn test_decode_limit() {
        let options = DecodeOptions::default().with_max_count(5);
        assert_eq!(
            decode_with(&images_fixture(), &options).unwrap_err(),
            Error::ResourceLimitExceeded { count: 10, limit: 5 }
        );

        let options = DecodeOptions::default().with_max_count(10);
        assert!(decode_with(&images_fixture(), &options).is_ok());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode("var x = 1;").unwrap_err(),
            Error::MalformedInput("no packer invocation found")
        );
        assert!(matches!(
            decode("}('0 1',10,2,'G4QwTgPiQ===')"),
            Err(Error::MalformedPayload(_))
        ));
        assert_eq!(
            decode("}('0',1,1,'')").unwrap_err(),
            Error::UnsupportedBase(1)
        );
    }
}
