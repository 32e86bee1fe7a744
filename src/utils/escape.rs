use std::borrow::Cow;

/// Escape text for XML output.
///
/// Both render paths (compiled templates and the node-tree writer) go
/// through this one function, so a record serialises identically no matter
/// which path produced it. All five XML-special characters are escaped, in
/// element text and attribute values alike.
pub(crate) fn escape_xml(s: &str) -> Cow<'_, str> {
    let first = s.find(['&', '<', '>', '"', '\'']);
    let Some(first) = first else {
        return Cow::Borrowed(s);
    };

    let mut out = String::with_capacity(s.len() + 8);
    out.push_str(&s[..first]);
    for c in s[first..].chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}
