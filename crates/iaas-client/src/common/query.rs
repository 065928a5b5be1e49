//! Query utilities for the IaaS API
//!
//! Find calls carry their conditions as a JSON document in the query string.

use crate::common::HttpClient;
use crate::error::IaasError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

/// Fixed page size of every find call
pub const FIND_PAGE_SIZE: u32 = 100;

/// Conditions of a find call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    tags: Vec<String>,
    class: Option<&'static str>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match resources carrying every given tag
    pub fn tags(mut self, tags: &[String]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    /// Match appliances of the given class
    pub fn class(mut self, class: &'static str) -> Self {
        self.class = Some(class);
        self
    }

    /// Render the JSON condition document
    pub fn to_json(&self) -> Value {
        let mut filter = Map::new();
        if let Some(class) = self.class {
            filter.insert("Class".to_string(), Value::from(class));
        }
        if !self.tags.is_empty() {
            filter.insert("Tags.Name".to_string(), Value::from(self.tags.clone()));
        }
        let mut query = Map::new();
        query.insert("Count".to_string(), Value::from(FIND_PAGE_SIZE));
        if !filter.is_empty() {
            query.insert("Filter".to_string(), Value::Object(filter));
        }
        Value::Object(query)
    }

    /// Render the URL-encoded query string (without `?`)
    pub fn to_query_string(&self) -> String {
        urlencoding::encode(&self.to_json().to_string()).into_owned()
    }
}

/// Run a find call and decode the result list stored under `key`.
///
/// A missing or `null` list decodes as empty.
pub async fn find_resources<T: DeserializeOwned>(
    http: &HttpClient,
    endpoint: &str,
    key: &str,
    query: &FindQuery,
) -> Result<Vec<T>, IaasError> {
    let url = format!("/{}?{}", endpoint, query.to_query_string());
    let mut response = http.get(&url).await?;

    let list = match response.get_mut(key).map(Value::take) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value)?,
    };
    debug!("find /{} returned {} {}", endpoint, list.len(), key);
    Ok(list)
}
