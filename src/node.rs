//! Compiled template nodes.
//!
//! A statement body compiles once into a [`SqlNode`] tree. The tree is
//! immutable and shared; every call walks it against its own
//! [`DynamicContext`].

use std::convert::Infallible;

use serde_json::Value;

use crate::context::DynamicContext;
use crate::error::{DynSqlResult, ExpressionError, ExpressionFailure};
use crate::token::PLACEHOLDER;

/// Prefix of the synthetic names loops bind per iteration.
pub const ITEM_PREFIX: &str = "__frch_";

/// Leading connectives `<where>` strips.
pub const WHERE_PREFIX_OVERRIDES: [&str; 8] = [
    "AND ", "OR ", "AND\n", "OR\n", "AND\r", "OR\r", "AND\t", "OR\t",
];

#[derive(Debug, Clone, PartialEq)]
pub enum SqlNode {
    /// Text with no `${}` markers, appended verbatim.
    StaticText(String),
    /// Text with `${}` markers, substituted per call.
    Text(String),
    /// Children in declaration order.
    Mixed(Vec<SqlNode>),
    If {
        test: String,
        contents: Box<SqlNode>,
    },
    /// First true `when` wins, then `otherwise`.
    Choose {
        branches: Vec<(String, SqlNode)>,
        otherwise: Option<Box<SqlNode>>,
    },
    ForEach(ForEachNode),
    /// Also `<where>` and `<set>`.
    Trim(TrimNode),
    /// `<bind name value>`
    VarDecl { name: String, expression: String },
}

impl SqlNode {
    /// Evaluate against `ctx`, appending SQL and binding names.
    ///
    /// Returns whether the node produced output.
    pub fn apply(&self, ctx: &mut DynamicContext<'_>) -> DynSqlResult<bool> {
        match self {
            SqlNode::StaticText(text) => {
                ctx.append_sql(text);
                Ok(true)
            }
            SqlNode::Text(text) => {
                let rendered = ctx.substitute(text)?;
                ctx.append_sql(&rendered);
                Ok(true)
            }
            SqlNode::Mixed(children) => {
                let mut produced = false;
                for child in children {
                    produced |= child.apply(ctx)?;
                }
                Ok(produced)
            }
            SqlNode::If { test, contents } => {
                if !ctx.evaluate_boolean(test)? {
                    return Ok(false);
                }
                contents.apply(ctx)?;
                Ok(true)
            }
            SqlNode::Choose { branches, otherwise } => {
                for (test, contents) in branches {
                    if ctx.evaluate_boolean(test)? {
                        contents.apply(ctx)?;
                        return Ok(true);
                    }
                }
                match otherwise {
                    Some(contents) => {
                        contents.apply(ctx)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SqlNode::ForEach(node) => node.apply(ctx),
            SqlNode::Trim(node) => node.apply(ctx),
            SqlNode::VarDecl { name, expression } => {
                let value = ctx.evaluate_value(expression)?;
                ctx.bind(name.clone(), value);
                Ok(true)
            }
        }
    }
}

/// `<foreach>`
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachNode {
    pub collection: String,
    pub item: Option<String>,
    pub index: Option<String>,
    pub open: Option<String>,
    pub close: Option<String>,
    pub separator: Option<String>,
    /// A null collection iterates nothing instead of failing.
    pub nullable: bool,
    pub contents: Box<SqlNode>,
}

impl ForEachNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> DynSqlResult<bool> {
        let entries = match ctx.evaluate_iterable(&self.collection) {
            Ok(entries) => entries,
            Err(ExpressionError {
                reason: ExpressionFailure::NullCollection,
                ..
            }) if self.nullable => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if entries.is_empty() {
            return Ok(false);
        }

        let loop_names: Vec<&String> = [&self.index, &self.item].into_iter().flatten().collect();
        let saved: Vec<(String, Option<Value>)> = loop_names
            .iter()
            .map(|name| ((*name).clone(), ctx.binding(name).cloned()))
            .collect();

        let mut body = String::new();
        let mut first = true;
        for (key, value) in entries {
            let n = ctx.next_unique();
            if let Some(index) = &self.index {
                ctx.bind(itemize(index, n), key.clone());
                ctx.bind(index.clone(), key);
            }
            if let Some(item) = &self.item {
                ctx.bind(itemize(item, n), value.clone());
                ctx.bind(item.clone(), value);
            }

            let (_, text) = ctx.capture(|c| self.contents.apply(c))?;
            let text = self.rewrite_placeholders(&text, n);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if !first {
                if let Some(separator) = &self.separator {
                    body.push_str(separator);
                }
            }
            body.push_str(text);
            first = false;
        }

        for (name, prior) in saved {
            match prior {
                Some(value) => ctx.bind(name, value),
                None => {
                    ctx.unbind(&name);
                }
            }
        }

        let open = self.open.as_deref().unwrap_or("");
        let close = self.close.as_deref().unwrap_or("");
        ctx.append_sql(&format!("{open}{body}{close}"));
        Ok(true)
    }

    /// Point `#{item…}` / `#{index…}` at this iteration's synthetic names.
    fn rewrite_placeholders(&self, text: &str, n: usize) -> String {
        let rewritten = PLACEHOLDER.replace(text, |content| {
            let renamed = self
                .item
                .as_deref()
                .and_then(|item| rename_root(content, item, n))
                .or_else(|| self.index.as_deref().and_then(|index| rename_root(content, index, n)));
            Ok::<_, Infallible>(format!("#{{{}}}", renamed.as_deref().unwrap_or(content)))
        });
        match rewritten {
            Ok(text) => text,
            Err(never) => match never {},
        }
    }
}

/// Synthetic binding name for `name` in iteration `n`.
pub fn itemize(name: &str, n: usize) -> String {
    format!("{ITEM_PREFIX}{name}_{n}")
}

/// Replace a leading `name` in a marker body when it is the whole root
/// segment (`item`, `item.x`, `item[0]`, `item,jdbcType=…`).
fn rename_root(content: &str, name: &str, n: usize) -> Option<String> {
    let body = content.trim_start();
    let rest = body.strip_prefix(name)?;
    let boundary = rest
        .chars()
        .next()
        .is_none_or(|c| matches!(c, '.' | ',' | ':' | '[') || c.is_whitespace());
    boundary.then(|| format!("{}{rest}", itemize(name, n)))
}

/// `<trim>`, and the `<where>`/`<set>` presets.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimNode {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Upper-cased; matched case-insensitively, first match only.
    pub prefix_overrides: Vec<String>,
    pub suffix_overrides: Vec<String>,
    pub contents: Box<SqlNode>,
}

impl TrimNode {
    pub fn new(
        contents: SqlNode,
        prefix: Option<String>,
        prefix_overrides: Option<&str>,
        suffix: Option<String>,
        suffix_overrides: Option<&str>,
    ) -> Self {
        Self {
            prefix,
            suffix,
            prefix_overrides: prefix_overrides.map(parse_overrides).unwrap_or_default(),
            suffix_overrides: suffix_overrides.map(parse_overrides).unwrap_or_default(),
            contents: Box::new(contents),
        }
    }

    pub fn where_clause(contents: SqlNode) -> Self {
        Self {
            prefix: Some("WHERE".to_string()),
            suffix: None,
            prefix_overrides: WHERE_PREFIX_OVERRIDES.iter().map(|s| s.to_string()).collect(),
            suffix_overrides: Vec::new(),
            contents: Box::new(contents),
        }
    }

    pub fn set_clause(contents: SqlNode) -> Self {
        Self {
            prefix: Some("SET".to_string()),
            suffix: None,
            prefix_overrides: Vec::new(),
            suffix_overrides: vec![",".to_string()],
            contents: Box::new(contents),
        }
    }

    fn apply(&self, ctx: &mut DynamicContext<'_>) -> DynSqlResult<bool> {
        let (produced, body) = ctx.capture(|c| self.contents.apply(c))?;
        if let Some(sql) = self.trim(&body) {
            ctx.append_sql(&sql);
        }
        Ok(produced)
    }

    /// Strip overrides and wrap `body`. `None` when nothing is left.
    pub fn trim(&self, body: &str) -> Option<String> {
        let mut sql = body.trim();
        if sql.is_empty() {
            return None;
        }

        let upper = sql.to_ascii_uppercase();
        if let Some(found) = self.prefix_overrides.iter().find(|o| upper.starts_with(o.as_str())) {
            sql = sql[found.trim_end().len()..].trim_start();
        }
        let upper = sql.to_ascii_uppercase();
        if let Some(found) = self.suffix_overrides.iter().find(|o| upper.ends_with(o.as_str())) {
            sql = sql[..sql.len() - found.trim_start().len()].trim_end();
        }
        if sql.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(sql.len() + 16);
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(sql);
        if let Some(suffix) = &self.suffix {
            out.push(' ');
            out.push_str(suffix);
        }
        Some(out)
    }
}

/// Split a `A|B|C` override list. Whitespace inside entries is significant.
pub fn parse_overrides(list: &str) -> Vec<String> {
    list.split('|')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptEngine;
    use crate::error::DynSqlError;
    use serde_json::json;

    fn text(s: &str) -> SqlNode {
        SqlNode::StaticText(s.to_string())
    }

    fn when(test: &str, contents: SqlNode) -> SqlNode {
        SqlNode::If {
            test: test.to_string(),
            contents: Box::new(contents),
        }
    }

    fn render(node: &SqlNode, param: serde_json::Value) -> DynSqlResult<String> {
        let engine = ScriptEngine::default();
        let mut ctx = DynamicContext::new(&engine, &param, None);
        node.apply(&mut ctx)?;
        Ok(ctx.finish().0)
    }

    fn each(collection: &str, body: SqlNode) -> ForEachNode {
        ForEachNode {
            collection: collection.to_string(),
            item: Some("item".to_string()),
            index: Some("i".to_string()),
            open: Some("(".to_string()),
            close: Some(")".to_string()),
            separator: Some(",".to_string()),
            nullable: false,
            contents: Box::new(body),
        }
    }

    #[test]
    fn test_trim_strips_leading_override_only() {
        let node = TrimNode::new(text(""), Some("WHERE".into()), Some("AND "), None, None);
        assert_eq!(node.trim("AND a=1 AND b=2 ").as_deref(), Some("WHERE a=1 AND b=2"));
        assert_eq!(node.trim("  "), None);
    }

    #[test]
    fn test_trim_case_insensitive_first_match() {
        let node = TrimNode::new(text(""), Some("(".into()), Some("and |or "), Some(")".into()), Some(","));
        assert_eq!(node.trim("or x = 1,").as_deref(), Some("( x = 1 )"));
        assert_eq!(parse_overrides("AND |OR "), vec!["AND ", "OR "]);
    }

    #[test]
    fn test_where_preset() {
        let node = SqlNode::Trim(TrimNode::where_clause(SqlNode::Mixed(vec![
            when("a != null", text("AND a = #{a}")),
            when("b != null", text("OR\nb = #{b}")),
        ])));
        assert_eq!(render(&node, json!({"a": 1})).unwrap(), "WHERE a = #{a}");
        assert_eq!(render(&node, json!({"b": 2})).unwrap(), "WHERE b = #{b}");
        assert_eq!(render(&node, json!({})).unwrap(), "");
    }

    #[test]
    fn test_set_preset() {
        let node = SqlNode::Trim(TrimNode::set_clause(SqlNode::Mixed(vec![
            when("a != null", text("a = #{a},")),
            when("b != null", text("b = #{b},")),
        ])));
        assert_eq!(render(&node, json!({"a": 1, "b": 2})).unwrap(), "SET a = #{a}, b = #{b}");

        let node = SqlNode::Trim(TrimNode::set_clause(text(", a = #{a},")));
        assert_eq!(render(&node, json!({})).unwrap(), "SET , a = #{a}");
    }

    #[test]
    fn test_choose_first_true_branch() {
        let node = SqlNode::Choose {
            branches: vec![("false".into(), text("X")), ("true".into(), text("Y"))],
            otherwise: Some(Box::new(text("Z"))),
        };
        assert_eq!(render(&node, json!({})).unwrap(), "Y");

        let node = SqlNode::Choose {
            branches: vec![("false".into(), text("X"))],
            otherwise: None,
        };
        let engine = ScriptEngine::default();
        let param = json!({});
        let mut ctx = DynamicContext::new(&engine, &param, None);
        assert!(!node.apply(&mut ctx).unwrap());
        assert_eq!(ctx.sql(), "");
    }

    #[test]
    fn test_guard_with_missing_name_fails() {
        let node = SqlNode::Mixed(vec![text("SELECT 1"), when("ghost > 1", text("AND x"))]);
        let err = render(&node, json!(5)).unwrap_err();
        assert!(matches!(err, DynSqlError::Expression(_)));
    }

    #[test]
    fn test_foreach_output_shape() {
        let node = SqlNode::ForEach(each("ids", text("#{item}")));
        assert_eq!(
            render(&node, json!({"ids": [1, 2, 3]})).unwrap(),
            "(#{__frch_item_0},#{__frch_item_1},#{__frch_item_2})"
        );
    }

    #[test]
    fn test_foreach_empty_emits_nothing() {
        let node = SqlNode::ForEach(each("ids", text("#{item}")));
        let engine = ScriptEngine::default();
        let param = json!({"ids": []});
        let mut ctx = DynamicContext::new(&engine, &param, None);
        assert!(!node.apply(&mut ctx).unwrap());
        assert_eq!(ctx.sql(), "");
    }

    #[test]
    fn test_foreach_null_collection() {
        let mut node = each("ids", text("#{item}"));
        assert!(render(&SqlNode::ForEach(node.clone()), json!({"ids": null})).is_err());
        node.nullable = true;
        assert_eq!(render(&SqlNode::ForEach(node), json!({"ids": null})).unwrap(), "");
    }

    #[test]
    fn test_sibling_loops_get_distinct_names() {
        let node = SqlNode::Mixed(vec![
            SqlNode::ForEach(each("a", text("#{item}"))),
            SqlNode::ForEach(each("b", text("#{item.id}"))),
        ]);
        let engine = ScriptEngine::default();
        let param = json!({"a": [1, 2], "b": [{"id": 9}]});
        let mut ctx = DynamicContext::new(&engine, &param, None);
        node.apply(&mut ctx).unwrap();
        let (sql, bindings) = ctx.finish();
        assert_eq!(sql, "(#{__frch_item_0},#{__frch_item_1}) (#{__frch_item_2.id})");
        assert_eq!(bindings.get("__frch_item_2"), Some(&json!({"id": 9})));
        assert_eq!(bindings.get("__frch_i_1"), Some(&json!(1)));
        assert!(!bindings.contains_key("item"));
    }

    #[test]
    fn test_foreach_map_iterates_entries() {
        let node = SqlNode::ForEach(each("m", SqlNode::Text("${i} = #{item}".into())));
        assert_eq!(render(&node, json!({"m": {"a": 1}})).unwrap(), "(a = #{__frch_item_0})");
    }

    #[test]
    fn test_foreach_skips_empty_items() {
        let body = when("item > 1", text("#{item}"));
        let node = SqlNode::ForEach(each("ids", body));
        assert_eq!(render(&node, json!({"ids": [1, 2, 3]})).unwrap(), "(#{__frch_item_1},#{__frch_item_2})");
    }

    #[test]
    fn test_foreach_restores_outer_binding() {
        let node = SqlNode::Mixed(vec![
            SqlNode::VarDecl {
                name: "item".into(),
                expression: "'outer'".into(),
            },
            SqlNode::ForEach(each("ids", text("#{item}"))),
            SqlNode::Text("${item}".into()),
        ]);
        assert_eq!(render(&node, json!({"ids": [1]})).unwrap(), "(#{__frch_item_0}) outer");
    }

    #[test]
    fn test_rename_root_boundaries() {
        assert_eq!(rename_root("item", "item", 0).as_deref(), Some("__frch_item_0"));
        assert_eq!(
            rename_root(" item.name,jdbcType=VARCHAR", "item", 3).as_deref(),
            Some("__frch_item_3.name,jdbcType=VARCHAR")
        );
        assert_eq!(rename_root("items", "item", 0), None);
    }

    #[test]
    fn test_bind_then_substitute() {
        let node = SqlNode::Mixed(vec![
            SqlNode::VarDecl {
                name: "pattern".into(),
                expression: "'%' + name + '%'".into(),
            },
            SqlNode::Text("LIKE '${pattern}'".into()),
        ]);
        assert_eq!(render(&node, json!({"name": "ada"})).unwrap(), "LIKE '%ada%'");
    }
}
