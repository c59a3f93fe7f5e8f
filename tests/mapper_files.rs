use std::fs;

use dynsql::keygen::KeyRow;
use dynsql::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const BLOG: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<mapper namespace="blog">
  <sql id="cols">${alias}.id, ${alias}.title</sql>

  <select id="search" resultType="Blog">
    SELECT * FROM blog
    <where>
      <if test="title != null">AND title LIKE #{title}</if>
      <if test="author != null and author.id != null">AND author_id = #{author.id}</if>
    </where>
  </select>

  <select id="byIds">
    SELECT * FROM blog WHERE id IN
    <foreach collection="ids" item="id" open="(" separator="," close=")">#{id}</foreach>
  </select>

  <select id="ordered">
    SELECT * FROM blog ORDER BY
    <choose>
      <when test="sort == 'title'">title</when>
      <when test="sort == 'date'">created_at DESC</when>
      <otherwise>id</otherwise>
    </choose>
  </select>

  <select id="like">
    <bind name="pattern" value="'%' + title + '%'"/>
    SELECT * FROM blog WHERE title LIKE #{pattern}
  </select>

  <select id="aliased">
    SELECT <include refid="cols"><property name="alias" value="b"/></include> FROM blog b
  </select>

  <update id="update">
    UPDATE blog
    <set>
      <if test="title != null">title = #{title},</if>
      <if test="body != null">body = #{body},</if>
    </set>
    WHERE id = #{id}
  </update>

  <select id="page" databaseId="postgres">SELECT * FROM blog LIMIT #{limit} OFFSET #{offset}</select>
  <select id="page">SELECT * FROM blog LIMIT #{offset}, #{limit}</select>

  <insert id="insert">
    <selectKey keyProperty="id" order="BEFORE" resultType="long">SELECT nextval('blog_seq')</selectKey>
    INSERT INTO blog (id, title) VALUES (#{id}, #{title})
  </insert>

  <insert id="insertAll" useGeneratedKeys="true" keyProperty="id">
    INSERT INTO blog (title) VALUES
    <foreach collection="_parameter" item="b" separator=",">(#{b.title})</foreach>
  </insert>
</mapper>"#;

fn configuration(database_id: Option<&str>) -> std::sync::Arc<Configuration> {
    let mut settings = Settings::builder().shrink_whitespace(true).build();
    settings.database_id = database_id.map(str::to_string);
    if database_id == Some("postgres") {
        settings.placeholder = PlaceholderStyle::Dollar;
    }
    let mut builder = ConfigurationBuilder::from_settings(&settings);
    builder.load_mapper(BLOG, "blog.xml").expect("blog mapper loads");
    builder.build().expect("configuration builds")
}

fn values(config: &Configuration, bound: &BoundSql) -> Vec<Value> {
    bound.parameter_values(config.engine().accessor())
}

#[test]
fn test_where_drops_leading_connective() {
    let config = configuration(None);

    let bound = config
        .bound_sql("blog.search", &json!({"title": "%rust%", "author": {"id": 3}}))
        .unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog WHERE title LIKE ? AND author_id = ?");
    assert_eq!(values(&config, &bound), vec![json!("%rust%"), json!(3)]);

    let bound = config.bound_sql("blog.search", &json!({"author": {"id": 3}})).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog WHERE author_id = ?");
    assert_eq!(bound.parameter_mappings[0].property, "author.id");

    let bound = config.bound_sql("blog.search", &json!({})).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog");
    assert!(bound.parameter_mappings.is_empty());
}

#[test]
fn test_foreach_binds_each_item() {
    let config = configuration(None);
    let bound = config.bound_sql("byIds", &json!({"ids": [1, 2, 3]})).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog WHERE id IN (?,?,?)");
    assert_eq!(values(&config, &bound), vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_choose_first_true_branch() {
    let config = configuration(None);
    let sql = |sort: &str| config.bound_sql("blog.ordered", &json!({"sort": sort})).unwrap().sql;
    assert_eq!(sql("date"), "SELECT * FROM blog ORDER BY created_at DESC");
    assert_eq!(sql("title"), "SELECT * FROM blog ORDER BY title");
    assert_eq!(sql("rank"), "SELECT * FROM blog ORDER BY id");
}

#[test]
fn test_bind_feeds_placeholder() {
    let config = configuration(None);
    let bound = config.bound_sql("blog.like", &json!({"title": "rust"})).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog WHERE title LIKE ?");
    assert_eq!(bound.additional_parameter("pattern"), Some(&json!("%rust%")));
    assert_eq!(values(&config, &bound), vec![json!("%rust%")]);
}

#[test]
fn test_include_properties_are_substituted() {
    let config = configuration(None);
    let bound = config.bound_sql("blog.aliased", &Value::Null).unwrap();
    assert_eq!(bound.sql, "SELECT b.id, b.title FROM blog b");
}

#[test]
fn test_set_strips_trailing_comma() {
    let config = configuration(None);
    let bound = config
        .bound_sql("blog.update", &json!({"id": 9, "title": "New", "body": null}))
        .unwrap();
    assert_eq!(bound.sql, "UPDATE blog SET title = ? WHERE id = ?");
    assert_eq!(values(&config, &bound), vec![json!("New"), json!(9)]);
}

#[test]
fn test_dialect_variant_preferred() {
    let params = json!({"limit": 10, "offset": 20});

    let config = configuration(Some("postgres"));
    let bound = config.bound_sql("blog.page", &params).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog LIMIT $1 OFFSET $2");
    assert_eq!(values(&config, &bound), vec![json!(10), json!(20)]);

    let config = configuration(None);
    let bound = config.bound_sql("blog.page", &params).unwrap();
    assert_eq!(bound.sql, "SELECT * FROM blog LIMIT ?, ?");
    assert_eq!(values(&config, &bound), vec![json!(20), json!(10)]);
}

#[derive(Default)]
struct Sequence {
    next: i64,
    queries: Vec<String>,
}

impl KeyExecutor for Sequence {
    fn query(&mut self, _statement: &MappedStatement, bound: &BoundSql) -> DynSqlResult<Vec<KeyRow>> {
        self.queries.push(bound.sql.clone());
        self.next += 1;
        Ok(vec![vec![("nextval".to_string(), json!(self.next))]])
    }

    fn generated_keys(&mut self, _statement: &MappedStatement) -> DynSqlResult<Vec<KeyRow>> {
        Ok(vec![
            vec![("id".to_string(), json!(100))],
            vec![("id".to_string(), json!(101))],
        ])
    }
}

#[test]
fn test_select_key_runs_before_insert() {
    let config = configuration(None);
    let insert = config.statement("blog.insert").unwrap();
    assert_eq!(insert.key_generator.to_string(), "selectKey(before)");
    assert!(!config.statement_ids().contains(&"blog.insert!selectKey"));

    let mut executor = Sequence::default();
    let mut param = json!({"title": "Hello"});
    insert
        .key_generator
        .process_before(&mut executor, &insert, &mut param, config.engine().accessor())
        .unwrap();
    assert_eq!(executor.queries, vec!["SELECT nextval('blog_seq')".to_string()]);
    assert_eq!(param["id"], json!(1));

    let bound = insert.bound_sql(&param, config.database_id()).unwrap();
    assert_eq!(bound.sql, "INSERT INTO blog (id, title) VALUES (?, ?)");
    assert_eq!(values(&config, &bound), vec![json!(1), json!("Hello")]);
}

#[test]
fn test_generated_keys_fill_each_record() {
    let config = configuration(None);
    let insert = config.statement("insertAll").unwrap();
    assert_eq!(insert.command, CommandKind::Insert);

    let mut param = json!([{"title": "a"}, {"title": "b"}]);
    let bound = insert.bound_sql(&param, None).unwrap();
    assert_eq!(bound.sql, "INSERT INTO blog (title) VALUES (?),(?)");

    insert
        .key_generator
        .process_after(&mut Sequence::default(), &insert, &mut param, config.engine().accessor())
        .unwrap();
    assert_eq!(param, json!([{"title": "a", "id": 100}, {"title": "b", "id": 101}]));
}

#[test]
fn test_short_ids_across_namespaces() {
    let other = r#"<mapper namespace="archive"><select id="search">SELECT * FROM archive</select></mapper>"#;
    let mut builder = Configuration::builder();
    builder.load_mapper(BLOG, "blog.xml").unwrap();
    builder.load_mapper(other, "archive.xml").unwrap();
    let config = builder.build().unwrap();

    assert!(matches!(config.statement("search"), Err(DynSqlError::AmbiguousStatement(_))));
    assert!(config.has_statement("archive.search"));
    assert!(config.has_statement("byIds"));
    assert!(matches!(config.statement("missing"), Err(DynSqlError::StatementNotFound(_))));
}

#[test]
fn test_mapper_errors_surface() {
    let unknown = r#"<mapper namespace="bad"><select id="x">SELECT <iff test="a">1</iff></select></mapper>"#;
    let err = Configuration::builder().load_mapper(unknown, "bad.xml").unwrap_err();
    assert!(matches!(err, DynSqlError::UnknownDirective(_)));

    let duplicate = r#"<mapper namespace="dup">
  <select id="x">SELECT 1</select>
  <select id="x">SELECT 2</select>
</mapper>"#;
    let err = Configuration::builder().load_mapper(duplicate, "dup.xml").unwrap_err();
    assert!(matches!(err, DynSqlError::DuplicateIdentifier(_)));

    let broken = r#"<mapper namespace="broken"><select id="x">SELECT 1</mapper>"#;
    let err = Configuration::builder().load_mapper(broken, "broken.xml").unwrap_err();
    assert!(matches!(err, DynSqlError::Markup { .. }));
}

#[test]
fn test_configuration_from_settings_file() {
    let dir = std::env::temp_dir().join(format!("dynsql-it-{}", std::process::id()));
    fs::create_dir_all(dir.join("mappers")).unwrap();
    fs::write(dir.join("mappers/blog.xml"), BLOG).unwrap();
    fs::write(
        dir.join("dynsql.toml"),
        "database_id = \"postgres\"\nplaceholder = \"dollar\"\nshrink_whitespace = true\nmappers = [\"mappers/blog.xml\"]\n",
    )
    .unwrap();

    let settings = Settings::from_file(&dir.join("dynsql.toml")).unwrap();
    let config = Configuration::from_settings(&settings).unwrap();
    assert_eq!(config.database_id(), Some("postgres"));
    assert_eq!(
        config.bound_sql("page", &json!({"limit": 1, "offset": 0})).unwrap().sql,
        "SELECT * FROM blog LIMIT $1 OFFSET $2"
    );
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_frozen_configuration_shared_across_threads() {
    let config = configuration(None);
    let handles: Vec<_> = (1..=6usize)
        .map(|n| {
            let config = std::sync::Arc::clone(&config);
            std::thread::spawn(move || {
                let ids: Vec<usize> = (0..n).collect();
                let bound = config.bound_sql("blog.byIds", &json!({ "ids": ids })).unwrap();
                (n, bound.sql.matches('?').count(), values(&config, &bound))
            })
        })
        .collect();

    for handle in handles {
        let (n, placeholders, values) = handle.join().unwrap();
        assert_eq!(placeholders, n);
        assert_eq!(values, (0..n).map(|i| json!(i)).collect::<Vec<_>>());
    }
}
