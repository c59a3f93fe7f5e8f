//! Markup reader for templates and mapper documents.
//!
//! Reads the XML subset mapper files use:
//!
//! ```text
//! <?xml version="1.0"?>                      declaration, skipped
//! <!DOCTYPE mapper ...>                      skipped
//! <!-- comment -->                           skipped
//! <select id="find">                         element with quoted attributes
//!   SELECT * FROM t <![CDATA[ WHERE a < 1 ]]>   text and CDATA, kept as text
//!   <include refid="cols"/>                  self-closing element
//! </select>
//! ```
//!
//! `&lt; &gt; &amp; &quot; &apos;` and numeric references are decoded in text
//! and attribute values.

use std::borrow::Cow;

use nom::{
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, multispace0, multispace1},
    error::{ErrorKind, ParseError},
    multi::many0,
    sequence::preceded,
    IResult,
};

use crate::error::{DynSqlError, DynSqlResult};

/// A node of a parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum XNode {
    Text(String),
    Element(Element),
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XNode>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: set an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder: append a text child.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XNode::Text(text.into()));
        self
    }

    /// Builder: append an element child.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(XNode::Element(child));
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, name: &'static str) -> DynSqlResult<&str> {
        self.attribute(name)
            .ok_or_else(|| DynSqlError::missing(&self.name, name))
    }

    pub fn bool_attribute(&self, name: &'static str, default: bool) -> DynSqlResult<bool> {
        match self.attribute(name) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(DynSqlError::invalid(&self.name, name, v)),
        }
    }

    pub fn u32_attribute(&self, name: &'static str) -> DynSqlResult<Option<u32>> {
        self.attribute(name)
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| DynSqlError::invalid(&self.name, name, v))
            })
            .transpose()
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XNode::Element(e) => Some(e),
            XNode::Text(_) => None,
        })
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[XNode], out: &mut String) {
    for node in nodes {
        match node {
            XNode::Text(t) => out.push_str(t),
            XNode::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// Parse a whole document and return its root element.
pub fn parse_document(source: &str) -> DynSqlResult<Element> {
    let rest = skip_misc(source)?;
    if !rest.starts_with('<') {
        return Err(DynSqlError::markup(offset(source, rest), "expected a root element"));
    }
    let (rest, root) = element(rest).map_err(|e| to_error(source, e))?;
    let rest = skip_misc(rest)?;
    if !rest.is_empty() {
        return Err(DynSqlError::markup(
            offset(source, rest),
            "unexpected content after the root element",
        ));
    }
    Ok(root)
}

/// Parse mixed content (text and elements) with no enclosing root.
pub fn parse_fragment(source: &str) -> DynSqlResult<Vec<XNode>> {
    let (rest, nodes) = content(source).map_err(|e| to_error(source, e))?;
    if !rest.is_empty() {
        return Err(DynSqlError::markup(offset(source, rest), "unexpected closing tag"));
    }
    Ok(nodes)
}

/// Decode predefined entities and numeric character references.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

// =============================================================================
// Parsing Combinators
// =============================================================================

#[derive(Debug)]
struct MarkupError<'a> {
    input: &'a str,
    message: Cow<'static, str>,
}

impl<'a> ParseError<&'a str> for MarkupError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        Self {
            input,
            message: format!("malformed markup ({kind:?})").into(),
        }
    }

    fn append(_: &'a str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, T> = IResult<&'a str, T, MarkupError<'a>>;

fn fail<'a>(input: &'a str, message: impl Into<Cow<'static, str>>) -> nom::Err<MarkupError<'a>> {
    nom::Err::Failure(MarkupError {
        input,
        message: message.into(),
    })
}

fn offset(source: &str, rest: &str) -> usize {
    source.len() - rest.len()
}

fn to_error(source: &str, err: nom::Err<MarkupError<'_>>) -> DynSqlError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            DynSqlError::markup(offset(source, e.input), e.message)
        }
        nom::Err::Incomplete(_) => DynSqlError::markup(source.len(), "unexpected end of input"),
    }
}

/// Skip whitespace, declarations, doctype and comments.
fn skip_misc(mut input: &str) -> DynSqlResult<&str> {
    loop {
        let trimmed = input.trim_start();
        let closer = if trimmed.starts_with("<?") {
            "?>"
        } else if trimmed.starts_with("<!--") {
            "-->"
        } else if trimmed.starts_with("<!") {
            ">"
        } else {
            return Ok(trimmed);
        };
        match trimmed.find(closer) {
            Some(end) => input = &trimmed[end + closer.len()..],
            None => {
                return Err(DynSqlError::markup(
                    trimmed.as_ptr() as usize - input.as_ptr() as usize,
                    format!("unterminated markup, expected '{closer}'"),
                ));
            }
        }
    }
}

fn name(input: &str) -> PResult<'_, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))(input)
}

fn quoted(input: &str) -> PResult<'_, Cow<'_, str>> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(nom::Err::Error(MarkupError::from_error_kind(input, ErrorKind::Char))),
    };
    let body = &input[1..];
    match body.find(quote) {
        Some(end) => Ok((&body[end + 1..], decode_entities(&body[..end]))),
        None => Err(fail(input, "unterminated attribute value")),
    }
}

fn attribute(input: &str) -> PResult<'_, (String, String)> {
    let (input, key) = name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = quoted(input)?;
    Ok((input, (key.to_string(), value.into_owned())))
}

fn element(input: &str) -> PResult<'_, Element> {
    let (input, _) = char('<')(input)?;
    let (input, tag_name) = name(input)?;
    let (input, attributes) = many0(preceded(multispace1, attribute))(input)?;
    let (input, _) = multispace0(input)?;

    if let Some(rest) = input.strip_prefix("/>") {
        return Ok((
            rest,
            Element {
                name: tag_name.to_string(),
                attributes,
                children: Vec::new(),
            },
        ));
    }

    let (input, _) = char('>')(input)?;
    let (input, children) = content(input)?;
    let Some(after) = input.strip_prefix("</") else {
        return Err(fail(input, format!("unclosed element <{tag_name}>")));
    };
    let (after, close) = name(after)?;
    if close != tag_name {
        return Err(fail(input, format!("expected </{tag_name}>, found </{close}>")));
    }
    let (after, _) = multispace0(after)?;
    let (after, _) = char('>')(after)?;

    Ok((
        after,
        Element {
            name: tag_name.to_string(),
            attributes,
            children,
        },
    ))
}

fn comment(input: &str) -> PResult<'_, ()> {
    let (input, _) = tag("<!--")(input)?;
    let (input, _) = take_until("-->")(input).map_err(|_: nom::Err<MarkupError>| fail(input, "unterminated comment"))?;
    let (input, _) = tag("-->")(input)?;
    Ok((input, ()))
}

fn push_text(nodes: &mut Vec<XNode>, text: &str) {
    if text.is_empty() {
        return;
    }
    match nodes.last_mut() {
        Some(XNode::Text(prev)) => prev.push_str(text),
        _ => nodes.push(XNode::Text(text.to_string())),
    }
}

/// Text, CDATA, comments and elements up to a closing tag or end of input.
fn content(mut input: &str) -> PResult<'_, Vec<XNode>> {
    let mut nodes = Vec::new();
    loop {
        if input.is_empty() || input.starts_with("</") {
            return Ok((input, nodes));
        }
        if input.starts_with("<!--") {
            let (rest, _) = comment(input)?;
            input = rest;
        } else if let Some(rest) = input.strip_prefix("<![CDATA[") {
            let Some(end) = rest.find("]]>") else {
                return Err(fail(input, "unterminated CDATA section"));
            };
            push_text(&mut nodes, &rest[..end]);
            input = &rest[end + 3..];
        } else if input.starts_with('<') {
            let (rest, el) = element(input)?;
            nodes.push(XNode::Element(el));
            input = rest;
        } else {
            let end = input.find('<').unwrap_or(input.len());
            push_text(&mut nodes, &decode_entities(&input[..end]));
            input = &input[end..];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let root = parse_document(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE mapper PUBLIC "-//x//DTD Mapper//EN" "mapper.dtd">
<mapper namespace="blog">
  <!-- lookups -->
  <select id="find" parameterType='map'>
    SELECT * FROM blog
    <where><if test="id != null">id = #{id}</if></where>
  </select>
</mapper>"#,
        )
        .unwrap();

        assert_eq!(root.name, "mapper");
        assert_eq!(root.attribute("namespace"), Some("blog"));
        let select = root.elements().next().unwrap();
        assert_eq!(select.attribute("parameterType"), Some("map"));
        let inner: Vec<&str> = select.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(inner, vec!["where"]);
    }

    #[test]
    fn test_cdata_and_entities() {
        let nodes = parse_fragment("a &lt; 1 <![CDATA[AND b < 2 && c]]> &#x41;").unwrap();
        assert_eq!(nodes, vec![XNode::Text("a < 1 AND b < 2 && c A".into())]);
    }

    #[test]
    fn test_entities_in_attributes() {
        let nodes = parse_fragment(r#"<if test="a &gt; 1 &amp;&amp; b">x</if>"#).unwrap();
        let XNode::Element(el) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(el.attribute("test"), Some("a > 1 && b"));
    }

    #[test]
    fn test_self_closing() {
        let nodes = parse_fragment(r#"<bind name="p" value="'%' + q"/>rest"#).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1], XNode::Text("rest".into()));
    }

    #[test]
    fn test_mismatched_close() {
        let err = parse_fragment("<if test=\"a\">x</where>").unwrap_err();
        assert!(err.to_string().contains("expected </if>, found </where>"));
    }

    #[test]
    fn test_unclosed_element() {
        let err = parse_document("<mapper><select id=\"a\">x</mapper>").unwrap_err();
        assert!(err.to_string().contains("expected </select>, found </mapper>"));

        let err = parse_document("<mapper>").unwrap_err();
        assert!(err.to_string().contains("unclosed element <mapper>"));
    }

    #[test]
    fn test_unknown_entity_kept() {
        assert_eq!(decode_entities("a &nbsp; b & c"), "a &nbsp; b & c");
    }

    #[test]
    fn test_bool_attribute() {
        let el = Element::new("select").attr("useCache", "TRUE").attr("flushCache", "maybe");
        assert!(el.bool_attribute("useCache", false).unwrap());
        assert!(el.bool_attribute("resultOrdered", false).is_ok_and(|v| !v));
        assert!(el.bool_attribute("flushCache", false).is_err());
    }
}
