//! Character encoding resolution for fetched payloads.
//!
//! A byte-order mark wins. Otherwise a declared charset (HTTP header, then
//! the XML declaration or `<meta charset>` near the top of the document) is
//! honoured when it names a Unicode encoding. Undeclared bodies that are
//! valid UTF-8 are UTF-8. Everything else is decoded as GB18030, which is a
//! superset of GBK/GB2312 and maps every byte sequence without dropping
//! East-Asian text.

use encoding_rs::{Encoding, GB18030, UTF_16BE, UTF_16LE, UTF_8};
use std::borrow::Cow;
use tracing::{debug, warn};

/// How far into the body we look for an in-document charset declaration.
const SNIFF_LIMIT: usize = 1024;

/// Picks the encoding for `body` given the response's `Content-Type`.
pub fn resolve(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }

    let declared = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| sniff_declared(body));

    match declared {
        Some(encoding) if is_unicode(encoding) => encoding,
        Some(encoding) => {
            debug!(
                "Declared charset {} is not Unicode, decoding as {}",
                encoding.name(),
                GB18030.name()
            );
            GB18030
        }
        None if std::str::from_utf8(body).is_ok() => UTF_8,
        None => GB18030,
    }
}

/// Decodes `body`, returning the text and the encoding actually used.
pub fn decode(content_type: Option<&str>, body: &[u8]) -> (String, &'static Encoding) {
    let encoding = resolve(content_type, body);
    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        warn!(
            "Payload contained byte sequences invalid in {}; replaced",
            used.name()
        );
    }
    (text.into_owned(), used)
}

fn is_unicode(encoding: &'static Encoding) -> bool {
    encoding == UTF_8 || encoding == UTF_16LE || encoding == UTF_16BE
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Looks for `encoding="..."` in an XML declaration or `charset=...` in a
/// meta tag. In-document UTF-16 declarations are read as UTF-8, since a
/// document we could read the label from is ASCII-compatible.
fn sniff_declared(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(SNIFF_LIMIT)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    let label = if head.trim_start().starts_with("<?xml") {
        let decl_end = head.find("?>")?;
        attribute_value(&head[..decl_end], "encoding=")
    } else {
        attribute_value(&head, "charset=")
    }?;

    let encoding = Encoding::for_label(label.as_bytes())?;
    if encoding == UTF_16LE || encoding == UTF_16BE {
        Some(UTF_8)
    } else {
        Some(encoding)
    }
}

fn attribute_value<'a>(haystack: &'a str, key: &str) -> Option<&'a str> {
    let start = haystack.find(key)? + key.len();
    let rest = haystack[start..].trim_start_matches(|c: char| c == '"' || c == '\'' || c == ' ');
    let end = rest
        .find(|c: char| c == '"' || c == '\'' || c == ';' || c == '>' || c == '/' || c.is_whitespace())
        .unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then_some(value)
}

/// Replaces a leading XML declaration with a UTF-8 one, for handing already
/// decoded text to an XML parser that would otherwise trust the original
/// label.
pub fn rewrite_xml_declaration(text: &str) -> Cow<'_, str> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with("<?xml") {
        return Cow::Borrowed(text);
    }
    match trimmed.find("?>") {
        Some(end) => Cow::Owned(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}",
            &trimmed[end + 2..]
        )),
        None => Cow::Borrowed(text),
    }
}
