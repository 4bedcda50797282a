use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};

use crate::api::operations::FieldTransform;
use crate::api::query::{
    FieldFilter, FilterOperator, LimitType, OrderDirection, QueryDefinition,
};
use crate::api::snapshot::{DocumentSnapshot, SnapshotMetadata};
use crate::error::{
    internal_error, invalid_argument, FirestoreError, FirestoreErrorCode, FirestoreResult,
};
use crate::model::{DatabaseId, DocumentKey, FieldPath};
use crate::value::{MapValue, ValueKind};

use super::connection::{Connection, ConnectionBuilder, RequestContext};
use super::serializer::JsonProtoSerializer;
use super::{Datastore, NoopTokenProvider, TokenProviderArc, WriteOperation};

/// Talks to Firestore over the REST v1 endpoints.
#[derive(Clone)]
pub struct HttpDatastore {
    connection: Connection,
    serializer: JsonProtoSerializer,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
}

#[derive(Clone)]
pub struct HttpDatastoreBuilder {
    database_id: DatabaseId,
    connection_builder: ConnectionBuilder,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
}

#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl RetrySettings {
    fn should_retry(&self, attempt: usize, error: &FirestoreError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        matches!(
            error.code,
            FirestoreErrorCode::Unavailable
                | FirestoreErrorCode::DeadlineExceeded
                | FirestoreErrorCode::ResourceExhausted
                | FirestoreErrorCode::Unauthenticated
        )
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let multiplier = self.multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(multiplier);
        delay.min(self.max_delay)
    }
}

impl HttpDatastoreBuilder {
    fn new(database_id: DatabaseId) -> Self {
        Self {
            connection_builder: Connection::builder(database_id.clone()),
            database_id,
            auth_provider: Arc::new(NoopTokenProvider),
            retry: RetrySettings::default(),
        }
    }

    pub fn with_auth_provider(mut self, provider: TokenProviderArc) -> Self {
        self.auth_provider = provider;
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.connection_builder = self.connection_builder.with_emulator_host(host);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> FirestoreResult<HttpDatastore> {
        let connection = self.connection_builder.build()?;
        Ok(HttpDatastore {
            connection,
            serializer: JsonProtoSerializer::new(self.database_id),
            auth_provider: self.auth_provider,
            retry: self.retry,
        })
    }
}

impl HttpDatastore {
    pub fn builder(database_id: DatabaseId) -> HttpDatastoreBuilder {
        HttpDatastoreBuilder::new(database_id)
    }

    /// Builds a datastore that talks to the REST endpoints with anonymous
    /// credentials.
    pub fn from_database_id(database_id: DatabaseId) -> FirestoreResult<Self> {
        Self::builder(database_id).build()
    }

    async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> FirestoreResult<T>
    where
        F: FnMut(&RequestContext) -> Fut,
        Fut: Future<Output = FirestoreResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            let context = self.build_request_context().await?;
            match operation(&context).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !self.retry.should_retry(attempt, &err) {
                        if attempt > 0 {
                            log::warn!("giving up after {} attempts: {err}", attempt + 1);
                        }
                        return Err(err);
                    }

                    if err.code == FirestoreErrorCode::Unauthenticated {
                        self.auth_provider.invalidate_token();
                    }

                    let delay = self.retry.backoff_delay(attempt);
                    log::debug!("retrying after {err} in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn build_request_context(&self) -> FirestoreResult<RequestContext> {
        let auth_token = self.auth_provider.get_token().await?;
        Ok(RequestContext {
            auth_token,
            request_timeout: Some(self.retry.request_timeout),
        })
    }

    fn encode_commit_body(&self, writes: &[WriteOperation]) -> JsonValue {
        let encoded: Vec<JsonValue> = writes
            .iter()
            .map(|write| self.encode_write(write))
            .collect();
        json!({ "writes": encoded })
    }

    fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        match write {
            WriteOperation::Set {
                key,
                data,
                mask,
                transforms,
            } => match mask {
                Some(mask) => self
                    .serializer
                    .encode_merge_write(key, data, mask, transforms),
                None => self.serializer.encode_set_write(key, data, transforms),
            },
            WriteOperation::Update {
                key,
                data,
                field_paths,
                transforms,
            } => self
                .serializer
                .encode_update_write(key, data, field_paths, transforms),
            WriteOperation::Delete { key } => self.serializer.encode_delete_write(key),
        }
    }

    fn parse_document_name(&self, name: &str) -> FirestoreResult<DocumentKey> {
        let prefix = format!("{}/documents/", self.serializer.database_name());
        if !name.starts_with(&prefix) {
            return Err(internal_error(format!(
                "Unexpected document name '{name}' returned by Firestore"
            )));
        }

        let relative = &name[prefix.len()..];
        DocumentKey::from_string(relative)
    }

    fn build_structured_query(&self, definition: &QueryDefinition) -> FirestoreResult<JsonValue> {
        let mut structured = serde_json::Map::new();

        structured.insert(
            "from".to_string(),
            json!([{ "collectionId": definition.collection_id() }]),
        );

        if !definition.filters().is_empty() {
            structured.insert("where".to_string(), self.encode_filters(definition.filters())?);
        }

        // limit_to_last is not a wire concept: run the query with flipped
        // directions and restore the order after decoding.
        let flip = definition.limit_type() == LimitType::Last;
        if !definition.order_by().is_empty() {
            let clauses: Vec<JsonValue> = definition
                .order_by()
                .iter()
                .map(|order| {
                    let direction = match (order.direction(), flip) {
                        (OrderDirection::Ascending, false) | (OrderDirection::Descending, true) => {
                            "ASCENDING"
                        }
                        _ => "DESCENDING",
                    };
                    json!({
                        "field": { "fieldPath": order.field().canonical_string() },
                        "direction": direction
                    })
                })
                .collect();
            structured.insert("orderBy".to_string(), JsonValue::Array(clauses));
        }

        if let Some(limit) = definition.limit() {
            structured.insert("limit".to_string(), json!(limit));
        }

        Ok(JsonValue::Object(structured))
    }

    fn encode_filters(&self, filters: &[FieldFilter]) -> FirestoreResult<JsonValue> {
        let mut encoded = Vec::with_capacity(filters.len());
        for filter in filters {
            encoded.push(self.encode_filter(filter)?);
        }
        if encoded.len() == 1 {
            return Ok(encoded.remove(0));
        }
        Ok(json!({
            "compositeFilter": {
                "op": "AND",
                "filters": encoded
            }
        }))
    }

    fn encode_filter(&self, filter: &FieldFilter) -> FirestoreResult<JsonValue> {
        let field = json!({ "fieldPath": filter.field().canonical_string() });

        // Null comparisons use unary filters on the wire.
        if matches!(filter.value().kind(), ValueKind::Null) {
            let op = match filter.operator() {
                FilterOperator::Equal => "IS_NULL",
                FilterOperator::NotEqual => "IS_NOT_NULL",
                _ => {
                    return Err(invalid_argument(
                        "Null values only support equality comparisons",
                    ))
                }
            };
            return Ok(json!({
                "unaryFilter": { "field": field, "op": op }
            }));
        }

        let op = match filter.operator() {
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        };

        Ok(json!({
            "fieldFilter": {
                "field": field,
                "op": op,
                "value": self.serializer.encode_value(filter.value())?
            }
        }))
    }
}

#[async_trait]
impl Datastore for HttpDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let doc_path = format!("documents/{}", key.path().canonical_string());
        let snapshot = self
            .execute_with_retry(|context| {
                let context = context.clone();
                let doc_path = doc_path.clone();
                async move {
                    self.connection
                        .invoke_json_optional(Method::GET, &doc_path, None, &context)
                        .await
                }
            })
            .await?;

        if let Some(json) = snapshot {
            let map_value = self.serializer.decode_document_fields(&json)?;
            Ok(DocumentSnapshot::new(
                key.clone(),
                Some(map_value),
                SnapshotMetadata::new(false, false),
            ))
        } else {
            Ok(DocumentSnapshot::new(
                key.clone(),
                None,
                SnapshotMetadata::new(false, false),
            ))
        }
    }

    async fn set_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        self.commit(vec![WriteOperation::Set {
            key: key.clone(),
            data,
            mask,
            transforms,
        }])
        .await
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        if field_paths.is_empty() && transforms.is_empty() {
            return Err(invalid_argument(
                "update_document requires at least one field path",
            ));
        }

        self.commit(vec![WriteOperation::Update {
            key: key.clone(),
            data,
            field_paths,
            transforms,
        }])
        .await
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.commit(vec![WriteOperation::Delete { key: key.clone() }])
            .await
    }

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let parent = query.parent_path();
        let request_path = if parent.is_empty() {
            "documents:runQuery".to_string()
        } else {
            format!("documents/{}:runQuery", parent.canonical_string())
        };

        let structured_query = self.build_structured_query(query)?;
        let body = json!({
            "structuredQuery": structured_query
        });

        let response = self
            .execute_with_retry(|context| {
                let context = context.clone();
                let request_path = request_path.clone();
                let body = body.clone();
                async move {
                    self.connection
                        .invoke_json(Method::POST, &request_path, Some(body), &context)
                        .await
                }
            })
            .await?;

        let results = response
            .as_array()
            .ok_or_else(|| internal_error("Firestore runQuery response must be an array"))?;

        let mut snapshots = Vec::new();
        for entry in results {
            let document = match entry.get("document") {
                Some(value) => value,
                None => continue,
            };

            let name = document
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    internal_error("Firestore runQuery document missing 'name' field")
                })?;
            let key = self.parse_document_name(name)?;

            let map_value = self.serializer.decode_document_fields(document)?;

            snapshots.push(DocumentSnapshot::new(
                key,
                Some(map_value),
                SnapshotMetadata::new(false, false),
            ));
        }

        if query.limit_type() == LimitType::Last {
            snapshots.reverse();
        }

        Ok(snapshots)
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let commit_body = self.encode_commit_body(&writes);
        self.execute_with_retry(|context| {
            let context = context.clone();
            let body = commit_body.clone();
            async move {
                self.connection
                    .invoke_json(Method::POST, "documents:commit", Some(body), &context)
                    .await
                    .map(|_| ())
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::database::Firestore;
    use crate::api::query::{FilterOperator, OrderDirection};
    use crate::value::FirestoreValue;

    fn datastore() -> HttpDatastore {
        HttpDatastore::from_database_id(DatabaseId::default_database("project")).unwrap()
    }

    fn sample_query() -> crate::api::query::Query {
        Firestore::new(DatabaseId::default_database("project"))
            .collection("cities")
            .unwrap()
            .query()
    }

    #[test]
    fn structured_query_encodes_filters_and_order() {
        let query = sample_query()
            .where_field(
                "state",
                FilterOperator::Equal,
                FirestoreValue::from_string("CA"),
            )
            .unwrap()
            .order_by("population", OrderDirection::Descending)
            .unwrap()
            .limit(2)
            .unwrap();

        let structured = datastore()
            .build_structured_query(query.definition())
            .unwrap();
        assert_eq!(
            structured["from"][0]["collectionId"],
            JsonValue::from("cities")
        );
        assert_eq!(
            structured["where"]["fieldFilter"]["op"],
            JsonValue::from("EQUAL")
        );
        assert_eq!(
            structured["orderBy"][0]["direction"],
            JsonValue::from("DESCENDING")
        );
        assert_eq!(structured["limit"], JsonValue::from(2));
    }

    #[test]
    fn limit_to_last_flips_directions() {
        let query = sample_query()
            .order_by("population", OrderDirection::Ascending)
            .unwrap()
            .limit_to_last(3)
            .unwrap();

        let structured = datastore()
            .build_structured_query(query.definition())
            .unwrap();
        assert_eq!(
            structured["orderBy"][0]["direction"],
            JsonValue::from("DESCENDING")
        );
    }

    #[test]
    fn null_equality_becomes_unary_filter() {
        let query = sample_query()
            .where_field("deleted_at", FilterOperator::Equal, FirestoreValue::null())
            .unwrap();

        let structured = datastore()
            .build_structured_query(query.definition())
            .unwrap();
        assert_eq!(
            structured["where"]["unaryFilter"]["op"],
            JsonValue::from("IS_NULL")
        );
    }

    #[test]
    fn multiple_filters_compose_with_and() {
        let query = sample_query()
            .where_field(
                "state",
                FilterOperator::Equal,
                FirestoreValue::from_string("CA"),
            )
            .unwrap()
            .where_field(
                "population",
                FilterOperator::GreaterThan,
                FirestoreValue::from_integer(100),
            )
            .unwrap();

        let structured = datastore()
            .build_structured_query(query.definition())
            .unwrap();
        assert_eq!(
            structured["where"]["compositeFilter"]["op"],
            JsonValue::from("AND")
        );
    }

    #[test]
    fn parses_document_names() {
        let key = datastore()
            .parse_document_name(
                "projects/project/databases/(default)/documents/cities/sf",
            )
            .unwrap();
        assert_eq!(key.path().canonical_string(), "cities/sf");

        let err = datastore()
            .parse_document_name("projects/other/databases/(default)/documents/cities/sf")
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
    }
}
