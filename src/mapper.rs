//! Mapper document loader.
//!
//! ```xml
//! <mapper namespace="blog">
//!   <sql id="cols">id, title</sql>
//!   <select id="find">SELECT <include refid="cols"/> FROM blog WHERE id = #{id}</select>
//! </mapper>
//! ```

use crate::error::{DynSqlError, DynSqlResult};
use crate::markup::{self, Element};
use crate::registrar::{qualify_id, StatementRegistrar};
use crate::registry::ConfigurationBuilder;

/// A statement waiting on a fragment from a document not loaded yet.
#[derive(Debug, Clone)]
pub struct PendingStatement {
    pub resource: String,
    pub namespace: String,
    pub element: Element,
}

/// Elements that configure result mapping or caching, handled elsewhere.
const EXTERNAL_ELEMENTS: [&str; 4] = ["cache", "cache-ref", "resultMap", "parameterMap"];

/// Register every fragment and statement of a mapper document.
///
/// Returns the number of statements registered now. Statements that include
/// fragments from other documents are retried when the configuration is built.
pub(crate) fn load(builder: &mut ConfigurationBuilder, source: &str, resource: &str) -> DynSqlResult<usize> {
    let root = markup::parse_document(source)?;
    if root.name != "mapper" {
        return Err(DynSqlError::Config(format!(
            "{resource}: expected a <mapper> root element, found <{}>",
            root.name
        )));
    }
    let namespace = root.required("namespace")?;
    if namespace.trim().is_empty() {
        return Err(DynSqlError::invalid("mapper", "namespace", namespace));
    }

    // Fragments first, so statements can include ones declared below them.
    for fragment in root.elements().filter(|e| e.name == "sql") {
        let id = qualify_id(namespace, fragment.required("id")?, "sql")?;
        builder.add_fragment(&id, fragment.attribute("databaseId"), fragment.clone())?;
    }

    let mut registered = 0;
    for element in root.elements() {
        match element.name.as_str() {
            "sql" => {}
            "select" | "insert" | "update" | "delete" => {
                let outcome = StatementRegistrar::new(builder, namespace).register(element);
                match outcome {
                    Ok(Some(_)) => registered += 1,
                    Ok(None) => {}
                    Err(DynSqlError::FragmentNotFound(refid)) => {
                        tracing::debug!(resource, %refid, "deferring statement until its fragment is loaded");
                        builder.defer(PendingStatement {
                            resource: resource.to_string(),
                            namespace: namespace.to_string(),
                            element: element.clone(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            name if EXTERNAL_ELEMENTS.contains(&name) => {
                tracing::debug!(resource, element = name, "skipping result-mapping element");
            }
            name => {
                tracing::warn!(resource, element = name, "ignoring unknown mapper element");
            }
        }
    }

    tracing::info!(resource, namespace, statements = registered, "loaded mapper");
    Ok(registered)
}

/// Retry a deferred statement. Its fragments must exist by now.
pub(crate) fn register_pending(builder: &mut ConfigurationBuilder, pending: PendingStatement) -> DynSqlResult<()> {
    tracing::debug!(resource = %pending.resource, namespace = %pending.namespace, "registering deferred statement");
    StatementRegistrar::new(builder, &pending.namespace)
        .register(&pending.element)
        .map(|_| ())
}
