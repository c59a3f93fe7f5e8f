//! Statement registration: include expansion, select-key wiring, metadata.
//!
//! Everything is compiled before anything is published, so a failing
//! statement never leaves its select-key behind.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::{DynSqlError, DynSqlResult};
use crate::keygen::KeyGenerator;
use crate::markup::{Element, XNode};
use crate::registry::ConfigurationBuilder;
use crate::statement::{parse_statement_type, split_names, CommandKind, MappedStatement, SELECT_KEY_SUFFIX};
use crate::token::SUBSTITUTION;

pub struct StatementRegistrar<'a> {
    builder: &'a mut ConfigurationBuilder,
    namespace: &'a str,
}

impl<'a> StatementRegistrar<'a> {
    pub fn new(builder: &'a mut ConfigurationBuilder, namespace: &'a str) -> Self {
        Self { builder, namespace }
    }

    /// Compile and publish a `<select|insert|update|delete>` element.
    ///
    /// Returns `None` when the statement is for an inactive dialect.
    pub fn register(&mut self, element: &Element) -> DynSqlResult<Option<Arc<MappedStatement>>> {
        let command = CommandKind::from_tag(&element.name)
            .ok_or_else(|| DynSqlError::UnknownDirective(element.name.clone()))?;
        let id = qualify_id(self.namespace, element.required("id")?, &element.name)?;
        let database_id = element.attribute("databaseId");
        if !self.builder.admits(&id, database_id)? {
            tracing::debug!(statement = %id, ?database_id, "skipping statement for inactive dialect");
            return Ok(None);
        }

        let mut body = element.clone();
        IncludeResolver {
            builder: &*self.builder,
            namespace: self.namespace,
        }
        .apply(&mut body)?;

        let parameter_type = element.attribute("parameterType");
        let select_key = self.parse_select_key(&id, database_id, &body, parameter_type)?;
        body.children
            .retain(|c| !matches!(c, XNode::Element(e) if e.name == "selectKey"));

        let source = self.builder.script_engine().compile(&body, parameter_type)?;
        let mut statement = MappedStatement::new(id, command, source);
        fill_metadata(&mut statement, element)?;

        statement.key_generator = match select_key {
            Some((key, execute_before)) => {
                if !self.builder.admits(&key.id, database_id)? {
                    return Ok(None);
                }
                match self.builder.add_statement(key)? {
                    Some(key) => KeyGenerator::SelectKey {
                        statement: key,
                        execute_before,
                    },
                    None => KeyGenerator::None,
                }
            }
            None if command == CommandKind::Insert
                && element.bool_attribute("useGeneratedKeys", self.builder.generated_keys_enabled())? =>
            {
                KeyGenerator::Generated
            }
            None => KeyGenerator::None,
        };

        self.builder.add_statement(statement)
    }

    /// Compile the `<selectKey>` child that applies to the active dialect.
    fn parse_select_key(
        &self,
        id: &str,
        database_id: Option<&str>,
        body: &Element,
        parameter_type: Option<&str>,
    ) -> DynSqlResult<Option<(MappedStatement, bool)>> {
        let active = self.builder.active_database_id();
        let candidates: Vec<&Element> = body.elements().filter(|e| e.name == "selectKey").collect();
        let chosen = candidates
            .iter()
            .find(|e| active.is_some() && e.attribute("databaseId") == active)
            .or_else(|| candidates.iter().find(|e| e.attribute("databaseId").is_none()));
        let Some(el) = chosen else {
            return Ok(None);
        };

        let execute_before = match el.attribute("order") {
            None => false,
            Some(order) if order.eq_ignore_ascii_case("BEFORE") => true,
            Some(order) if order.eq_ignore_ascii_case("AFTER") => false,
            Some(order) => return Err(DynSqlError::invalid("selectKey", "order", order)),
        };

        let source = self.builder.script_engine().compile(el, parameter_type)?;
        let mut key = MappedStatement::new(format!("{id}{SELECT_KEY_SUFFIX}"), CommandKind::Select, source);
        key.statement_type = parse_statement_type("selectKey", el.attribute("statementType"))?;
        key.database_id = database_id.map(str::to_string);
        key.parameter_type = parameter_type.map(str::to_string);
        key.result_type = el.attribute("resultType").map(str::to_string);
        key.key_properties = split_names(el.attribute("keyProperty"));
        key.key_columns = split_names(el.attribute("keyColumn"));
        key.use_cache = false;
        key.flush_cache = false;
        Ok(Some((key, execute_before)))
    }
}

fn fill_metadata(statement: &mut MappedStatement, element: &Element) -> DynSqlResult<()> {
    let text = |name: &str| element.attribute(name).map(str::to_string);
    let select = statement.command == CommandKind::Select;

    statement.database_id = text("databaseId");
    statement.parameter_type = text("parameterType");
    statement.result_type = text("resultType");
    statement.result_map = text("resultMap");
    statement.result_sets = text("resultSets");
    statement.fetch_size = element.u32_attribute("fetchSize")?;
    statement.timeout = element.u32_attribute("timeout")?;
    statement.statement_type = parse_statement_type(&element.name, element.attribute("statementType"))?;
    statement.flush_cache = element.bool_attribute("flushCache", !select)?;
    statement.use_cache = element.bool_attribute("useCache", select)?;
    statement.result_ordered = element.bool_attribute("resultOrdered", false)?;
    statement.key_properties = split_names(element.attribute("keyProperty"));
    statement.key_columns = split_names(element.attribute("keyColumn"));
    Ok(())
}

/// Qualify a declared id with its namespace. Dotted ids must already carry it.
pub(crate) fn qualify_id(namespace: &str, id: &str, element: &str) -> DynSqlResult<String> {
    if id
        .strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with('.'))
    {
        return Ok(id.to_string());
    }
    if id.contains('.') {
        return Err(DynSqlError::invalid(element, "id", id));
    }
    Ok(format!("{namespace}.{id}"))
}

/// A reference: dotted refids are taken as qualified, others are local.
fn qualify_reference(namespace: &str, refid: &str) -> String {
    if refid.contains('.') {
        refid.to_string()
    } else {
        format!("{namespace}.{refid}")
    }
}

/// Splices `<sql>` fragments in place of `<include>` elements.
struct IncludeResolver<'b> {
    builder: &'b ConfigurationBuilder,
    namespace: &'b str,
}

type Variables = HashMap<String, String>;

impl IncludeResolver<'_> {
    fn apply(&self, element: &mut Element) -> DynSqlResult<()> {
        let mut stack = Vec::new();
        let children = std::mem::take(&mut element.children);
        element.children = self.expand(children, &Variables::new(), &mut stack, false)?;
        Ok(())
    }

    fn expand(
        &self,
        nodes: Vec<XNode>,
        vars: &Variables,
        stack: &mut Vec<String>,
        in_fragment: bool,
    ) -> DynSqlResult<Vec<XNode>> {
        let mut out: Vec<XNode> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                XNode::Element(el) if el.name == "include" => {
                    for spliced in self.include(&el, vars, stack)? {
                        push_merged(&mut out, spliced);
                    }
                }
                XNode::Element(mut el) => {
                    if in_fragment {
                        for (_, value) in &mut el.attributes {
                            *value = substitute(value, vars);
                        }
                    }
                    let children = std::mem::take(&mut el.children);
                    el.children = self.expand(children, vars, stack, in_fragment)?;
                    out.push(XNode::Element(el));
                }
                XNode::Text(text) if in_fragment => push_merged(&mut out, XNode::Text(substitute(&text, vars))),
                text => push_merged(&mut out, text),
            }
        }
        Ok(out)
    }

    fn include(&self, el: &Element, vars: &Variables, stack: &mut Vec<String>) -> DynSqlResult<Vec<XNode>> {
        let refid = substitute(el.required("refid")?, vars);
        let qualified = qualify_reference(self.namespace, &refid);
        if stack.contains(&qualified) {
            return Err(DynSqlError::CircularInclude(qualified));
        }
        let fragment = self
            .builder
            .fragment(&qualified)
            .ok_or(DynSqlError::FragmentNotFound(refid))?;

        let mut scoped = vars.clone();
        for property in el.elements().filter(|e| e.name == "property") {
            let name = property.required("name")?;
            let value = substitute(property.required("value")?, vars);
            scoped.insert(name.to_string(), value);
        }

        stack.push(qualified);
        let expanded = self.expand(fragment.children.clone(), &scoped, stack, true);
        stack.pop();
        expanded
    }
}

/// Replace `${name}` with include properties; unknown names stay as written.
fn substitute(text: &str, vars: &Variables) -> String {
    if vars.is_empty() || !SUBSTITUTION.contains(text) {
        return text.to_string();
    }
    let replaced = SUBSTITUTION.replace(text, |name| {
        Ok::<_, Infallible>(
            vars.get(name.trim())
                .cloned()
                .unwrap_or_else(|| format!("${{{name}}}")),
        )
    });
    match replaced {
        Ok(text) => text,
        Err(never) => match never {},
    }
}

fn push_merged(out: &mut Vec<XNode>, node: XNode) {
    if let (XNode::Text(text), Some(XNode::Text(prev))) = (&node, out.last_mut()) {
        prev.push_str(text);
        return;
    }
    out.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_document;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn builder_with(fragments: &[(&str, &str)]) -> ConfigurationBuilder {
        let mut builder = ConfigurationBuilder::default();
        for (id, markup) in fragments {
            let el = parse_document(markup).unwrap();
            builder.add_fragment(id, None, el).unwrap();
        }
        builder
    }

    fn register(builder: &mut ConfigurationBuilder, markup: &str) -> DynSqlResult<Option<Arc<MappedStatement>>> {
        let el = parse_document(markup).unwrap();
        StatementRegistrar::new(builder, "ns").register(&el)
    }

    #[test]
    fn test_qualify_id() {
        assert_eq!(qualify_id("ns", "find", "select").unwrap(), "ns.find");
        assert_eq!(qualify_id("ns", "ns.find", "select").unwrap(), "ns.find");
        assert!(qualify_id("ns", "other.find", "select").is_err());
        assert_eq!(qualify_reference("ns", "cols"), "ns.cols");
        assert_eq!(qualify_reference("ns", "shared.cols"), "shared.cols");
    }

    #[test]
    fn test_include_with_properties() {
        let mut builder = builder_with(&[
            ("ns.cols", r#"<sql id="cols">${alias}.id, ${alias}.name</sql>"#),
            ("ns.from", r#"<sql id="from">FROM ${table} <include refid="cols"><property name="alias" value="x"/></include></sql>"#),
        ]);
        let ms = register(
            &mut builder,
            r#"<select id="find">SELECT <include refid="cols"><property name="alias" value="u"/></include> <include refid="from"><property name="table" value="users"/></include></select>"#,
        )
        .unwrap()
        .unwrap();
        assert!(!ms.source.is_dynamic());
        let bound = ms.bound_sql(&Value::Null, None).unwrap();
        assert_eq!(bound.sql, "SELECT u.id, u.name FROM users x.id, x.name");
    }

    #[test]
    fn test_include_splices_into_word() {
        let mut builder = builder_with(&[("ns.col", r#"<sql id="col">name</sql>"#)]);
        let ms = register(&mut builder, r#"<select id="f">SELECT t.<include refid="col"/> FROM t</select>"#)
            .unwrap()
            .unwrap();
        assert_eq!(ms.bound_sql(&Value::Null, None).unwrap().sql, "SELECT t.name FROM t");
    }

    #[test]
    fn test_unknown_name_left_for_runtime() {
        let mut builder = builder_with(&[("ns.order", r#"<sql id="order">ORDER BY ${col}</sql>"#)]);
        let ms = register(
            &mut builder,
            r#"<select id="f">SELECT 1 <include refid="order"><property name="other" value="x"/></include></select>"#,
        )
        .unwrap()
        .unwrap();
        assert!(ms.source.is_dynamic());
        let bound = ms.bound_sql(&json!({"col": "name"}), None).unwrap();
        assert_eq!(bound.sql, "SELECT 1 ORDER BY name");
    }

    #[test]
    fn test_missing_and_circular_fragments() {
        let mut builder = builder_with(&[
            ("ns.a", r#"<sql id="a">A <include refid="b"/></sql>"#),
            ("ns.b", r#"<sql id="b">B <include refid="a"/></sql>"#),
        ]);
        let err = register(&mut builder, r#"<select id="f"><include refid="nope"/></select>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::FragmentNotFound(r) if r == "nope"));

        let err = register(&mut builder, r#"<select id="g"><include refid="a"/></select>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::CircularInclude(r) if r == "ns.a"));
        assert!(builder.statement("ns.g").is_err());
    }

    #[test]
    fn test_select_key_is_registered_and_pruned() {
        let mut builder = ConfigurationBuilder::default();
        let ms = register(
            &mut builder,
            r#"<insert id="add" parameterType="map">
                 <selectKey keyProperty="id" order="BEFORE" resultType="long">SELECT nextval('seq')</selectKey>
                 INSERT INTO t (id, name) VALUES (#{id}, #{name})
               </insert>"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            ms.bound_sql(&json!({}), None).unwrap().sql,
            "INSERT INTO t (id, name) VALUES (?, ?)"
        );
        let KeyGenerator::SelectKey { statement, execute_before } = &ms.key_generator else {
            panic!("expected select key");
        };
        assert!(*execute_before);
        assert_eq!(statement.id, "ns.add!selectKey");
        assert_eq!(statement.key_properties, vec!["id"]);
        assert!(builder.statement("ns.add!selectKey").is_ok());
    }

    #[test]
    fn test_failed_compile_publishes_nothing() {
        let mut builder = ConfigurationBuilder::default();
        let err = register(
            &mut builder,
            r#"<insert id="add"><selectKey keyProperty="id">SELECT 1</selectKey>INSERT <loop/></insert>"#,
        )
        .unwrap_err();
        assert!(matches!(err, DynSqlError::UnknownDirective(_)));
        assert!(builder.statement("ns.add!selectKey").is_err());
        assert!(builder.statement("ns.add").is_err());
    }

    #[test]
    fn test_generated_keys_policy() {
        let mut builder = ConfigurationBuilder::default();
        let ms = register(&mut builder, r#"<insert id="a">INSERT</insert>"#).unwrap().unwrap();
        assert!(matches!(ms.key_generator, KeyGenerator::None));
        let ms = register(&mut builder, r#"<insert id="b" useGeneratedKeys="true" keyProperty="id">INSERT</insert>"#)
            .unwrap()
            .unwrap();
        assert!(matches!(ms.key_generator, KeyGenerator::Generated));
        let ms = register(&mut builder, r#"<update id="c" useGeneratedKeys="true">UPDATE</update>"#)
            .unwrap()
            .unwrap();
        assert!(matches!(ms.key_generator, KeyGenerator::None));

        let mut builder = ConfigurationBuilder::default().use_generated_keys(true);
        let ms = register(&mut builder, r#"<insert id="d">INSERT</insert>"#).unwrap().unwrap();
        assert!(matches!(ms.key_generator, KeyGenerator::Generated));
        let ms = register(&mut builder, r#"<insert id="e" useGeneratedKeys="false">INSERT</insert>"#)
            .unwrap()
            .unwrap();
        assert!(matches!(ms.key_generator, KeyGenerator::None));
    }

    #[test]
    fn test_metadata_defaults_and_overrides() {
        let mut builder = ConfigurationBuilder::default();
        let ms = register(
            &mut builder,
            r#"<select id="s" resultType="User" fetchSize="100" timeout="5" useCache="false" statementType="CALLABLE">SELECT 1</select>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(ms.id, "ns.s");
        assert_eq!(ms.result_type.as_deref(), Some("User"));
        assert_eq!(ms.fetch_size, Some(100));
        assert_eq!(ms.timeout, Some(5));
        assert!(!ms.use_cache);
        assert!(!ms.flush_cache);
        assert_eq!(ms.statement_type, crate::statement::StatementType::Callable);

        let err = register(&mut builder, r#"<select id="t" fetchSize="lots">SELECT 1</select>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::InvalidAttribute { attribute: "fetchSize", .. }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut builder = ConfigurationBuilder::default();
        register(&mut builder, r#"<select id="s">SELECT 1</select>"#).unwrap();
        let err = register(&mut builder, r#"<select id="s">SELECT 2</select>"#).unwrap_err();
        assert!(matches!(err, DynSqlError::DuplicateIdentifier(id) if id == "ns.s"));
    }
}
