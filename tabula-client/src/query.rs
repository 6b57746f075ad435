//! Translation of a [`QuerySpec`] into a concrete remote request.

use tabula_core::{FetchRequest, QuerySpec, TabulaError, TabulaResult};

/// Builds the request that answers a query spec.
pub trait QueryBuilder: Send + Sync {
    fn build(&self, spec: &QuerySpec) -> TabulaResult<FetchRequest>;
}

/// Emits the bracketed SQL dialect of the datastore SQL endpoint:
/// `[SELECT a,b FROM resource][WHERE col = "value"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlQueryBuilder {
    /// Ask the service to return database column names.
    pub show_db_columns: bool,
}

impl Default for SqlQueryBuilder {
    fn default() -> Self {
        Self {
            show_db_columns: true,
        }
    }
}

impl SqlQueryBuilder {
    /// The unencoded SQL text for `spec`.
    ///
    /// The dialect has no escape for `"`, so a filter value containing one
    /// is rejected.
    pub fn statement(spec: &QuerySpec) -> TabulaResult<String> {
        let columns = if spec.columns.is_empty() {
            "*".to_string()
        } else {
            spec.columns.join(",")
        };
        let mut sql = format!("[SELECT {} FROM {}]", columns, spec.resource.id);
        if let Some(filter) = &spec.filter {
            if filter.value.contains('"') {
                return Err(TabulaError::validation(
                    filter.property.as_str(),
                    format!("value `{}` contains a double quote", filter.value),
                ));
            }
            sql.push_str(&format!(
                "[WHERE {} {} \"{}\"]",
                filter.property, filter.operator, filter.value
            ));
        }
        Ok(sql)
    }

    /// Endpoint for an arbitrary SQL statement.
    pub fn endpoint(statement: &str, show_db_columns: bool) -> String {
        let mut endpoint = format!("datastore/sql?query={}", urlencoding::encode(statement));
        if show_db_columns {
            endpoint.push_str("&show_db_columns=true");
        }
        endpoint
    }
}

impl QueryBuilder for SqlQueryBuilder {
    fn build(&self, spec: &QuerySpec) -> TabulaResult<FetchRequest> {
        let statement = Self::statement(spec)?;
        Ok(FetchRequest::get(Self::endpoint(&statement, self.show_db_columns)))
    }
}
