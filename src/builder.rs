//! Template compiler: element tree to [`SqlNode`] tree.

use crate::error::{DynSqlError, DynSqlResult};
use crate::markup::{Element, XNode};
use crate::node::{ForEachNode, SqlNode, TrimNode};
use crate::token::SUBSTITUTION;

/// Element tags the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Trim,
    Where,
    Set,
    ForEach,
    If,
    Choose,
    When,
    Otherwise,
    Bind,
}

impl Directive {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "trim" => Directive::Trim,
            "where" => Directive::Where,
            "set" => Directive::Set,
            "foreach" => Directive::ForEach,
            "if" => Directive::If,
            "choose" => Directive::Choose,
            "when" => Directive::When,
            "otherwise" => Directive::Otherwise,
            "bind" => Directive::Bind,
            _ => return None,
        })
    }
}

/// Recursive-descent builder. One instance compiles one statement.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    is_dynamic: bool,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `script`'s children into one [`SqlNode::Mixed`] and report
    /// whether the result needs per-call evaluation.
    pub fn parse(mut self, script: &Element) -> DynSqlResult<(SqlNode, bool)> {
        let root = self.parse_children(script)?;
        Ok((root, self.is_dynamic))
    }

    fn parse_children(&mut self, element: &Element) -> DynSqlResult<SqlNode> {
        let mut contents = Vec::with_capacity(element.children.len());
        for child in &element.children {
            match child {
                XNode::Text(text) => {
                    if SUBSTITUTION.contains(text) {
                        self.is_dynamic = true;
                        contents.push(SqlNode::Text(text.clone()));
                    } else {
                        contents.push(SqlNode::StaticText(text.clone()));
                    }
                }
                XNode::Element(el) => {
                    let directive = Directive::from_tag(&el.name)
                        .ok_or_else(|| DynSqlError::UnknownDirective(el.name.clone()))?;
                    contents.push(self.handle(directive, el)?);
                    self.is_dynamic = true;
                }
            }
        }
        Ok(SqlNode::Mixed(contents))
    }

    fn handle(&mut self, directive: Directive, el: &Element) -> DynSqlResult<SqlNode> {
        Ok(match directive {
            Directive::Trim => {
                let contents = self.parse_children(el)?;
                SqlNode::Trim(TrimNode::new(
                    contents,
                    el.attribute("prefix").map(str::to_string),
                    el.attribute("prefixOverrides"),
                    el.attribute("suffix").map(str::to_string),
                    el.attribute("suffixOverrides"),
                ))
            }
            Directive::Where => SqlNode::Trim(TrimNode::where_clause(self.parse_children(el)?)),
            Directive::Set => SqlNode::Trim(TrimNode::set_clause(self.parse_children(el)?)),
            Directive::ForEach => {
                let attr = |name: &str| el.attribute(name).map(str::to_string);
                SqlNode::ForEach(ForEachNode {
                    collection: el.required("collection")?.to_string(),
                    item: attr("item"),
                    index: attr("index"),
                    open: attr("open"),
                    close: attr("close"),
                    separator: attr("separator"),
                    nullable: el.bool_attribute("nullable", false)?,
                    contents: Box::new(self.parse_children(el)?),
                })
            }
            Directive::If | Directive::When => SqlNode::If {
                test: el.required("test")?.to_string(),
                contents: Box::new(self.parse_children(el)?),
            },
            Directive::Otherwise => self.parse_children(el)?,
            Directive::Choose => self.parse_choose(el)?,
            Directive::Bind => SqlNode::VarDecl {
                name: el.required("name")?.to_string(),
                expression: el.required("value")?.to_string(),
            },
        })
    }

    fn parse_choose(&mut self, el: &Element) -> DynSqlResult<SqlNode> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        for child in el.elements() {
            match Directive::from_tag(&child.name) {
                Some(Directive::When | Directive::If) => {
                    let test = child.required("test")?.to_string();
                    branches.push((test, self.parse_children(child)?));
                }
                Some(Directive::Otherwise) => {
                    if otherwise.is_some() {
                        return Err(DynSqlError::MultipleDefaultBranches);
                    }
                    otherwise = Some(Box::new(self.parse_children(child)?));
                }
                Some(_) => {
                    tracing::warn!(element = %child.name, "ignoring non-branch element inside <choose>");
                }
                None => return Err(DynSqlError::UnknownDirective(child.name.clone())),
            }
        }
        Ok(SqlNode::Choose { branches, otherwise })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_fragment;

    fn compile(markup: &str) -> DynSqlResult<(SqlNode, bool)> {
        let script = Element {
            name: "select".into(),
            attributes: vec![],
            children: parse_fragment(markup)?,
        };
        ScriptBuilder::new().parse(&script)
    }

    #[test]
    fn test_static_text_stays_static() {
        let (root, dynamic) = compile("SELECT * FROM t WHERE id = #{id}").unwrap();
        assert!(!dynamic);
        assert_eq!(
            root,
            SqlNode::Mixed(vec![SqlNode::StaticText("SELECT * FROM t WHERE id = #{id}".into())])
        );
    }

    #[test]
    fn test_substitution_makes_dynamic() {
        let (root, dynamic) = compile("ORDER BY ${col}").unwrap();
        assert!(dynamic);
        assert_eq!(root, SqlNode::Mixed(vec![SqlNode::Text("ORDER BY ${col}".into())]));
    }

    #[test]
    fn test_escaped_substitution_is_static() {
        let (_, dynamic) = compile("SELECT '\\${literal}'").unwrap();
        assert!(!dynamic);
    }

    #[test]
    fn test_element_makes_dynamic() {
        let (root, dynamic) = compile(r#"SELECT 1 <if test="a">AND a</if>"#).unwrap();
        assert!(dynamic);
        let SqlNode::Mixed(children) = root else {
            panic!("expected sequence");
        };
        assert!(matches!(&children[1], SqlNode::If { test, .. } if test == "a"));
    }

    #[test]
    fn test_choose_partitions_branches() {
        let (root, _) = compile(
            r#"<choose><when test="a">A</when><when test="b">B</when><otherwise>C</otherwise></choose>"#,
        )
        .unwrap();
        let SqlNode::Mixed(children) = root else {
            panic!("expected sequence");
        };
        let SqlNode::Choose { branches, otherwise } = &children[0] else {
            panic!("expected choose");
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn test_two_otherwise_rejected() {
        let err = compile("<choose><otherwise>A</otherwise><otherwise>B</otherwise></choose>").unwrap_err();
        assert!(matches!(err, DynSqlError::MultipleDefaultBranches));
    }

    #[test]
    fn test_unknown_directive() {
        let err = compile("<where><loop/></where>").unwrap_err();
        assert!(matches!(err, DynSqlError::UnknownDirective(tag) if tag == "loop"));
    }

    #[test]
    fn test_missing_required_attributes() {
        let err = compile("<if>x</if>").unwrap_err();
        assert!(matches!(err, DynSqlError::MissingAttribute { attribute: "test", .. }));

        let err = compile(r#"<foreach item="x">x</foreach>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::MissingAttribute { attribute: "collection", .. }));

        let err = compile(r#"<bind name="x"/>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::MissingAttribute { attribute: "value", .. }));
    }

    #[test]
    fn test_trim_attributes() {
        let (root, _) = compile(r#"<trim prefix="(" suffix=")" suffixOverrides=",|;">a,</trim>"#).unwrap();
        let SqlNode::Mixed(children) = root else {
            panic!("expected sequence");
        };
        let SqlNode::Trim(trim) = &children[0] else {
            panic!("expected trim");
        };
        assert_eq!(trim.suffix_overrides, vec![",", ";"]);
        assert!(trim.prefix_overrides.is_empty());
    }
}
