use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::operations::{
    set_value_at_field_path, value_for_field_path, FieldTransform, TransformOperation,
};
use crate::api::query::{
    FieldFilter, FilterOperator, LimitType, OrderBy, OrderDirection, QueryDefinition,
};
use crate::api::snapshot::{DocumentSnapshot, SnapshotMetadata};
use crate::error::{internal_error, not_found, FirestoreResult};
use crate::model::{DocumentKey, FieldPath, Timestamp};
use crate::value::{ArrayValue, FirestoreValue, MapValue, ValueKind};

use super::{Datastore, WriteOperation};

/// Stores documents in process memory. Used by tests and demos where no
/// network access is wanted.
#[derive(Clone, Default)]
pub struct InMemoryDatastore {
    documents: Arc<Mutex<BTreeMap<String, MapValue>>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_set(
        &self,
        key: DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        let mut store = self.documents.lock().unwrap();
        let canonical = key.path().canonical_string();
        let mut fields = match mask {
            Some(mask) => {
                let mut fields = store
                    .get(&canonical)
                    .map(|existing| existing.fields().clone())
                    .unwrap_or_default();
                for field in mask {
                    if let Some(value) = value_for_field_path(&data, &field) {
                        set_value_at_field_path(&mut fields, &field, value);
                    }
                }
                fields
            }
            None => data.into_fields(),
        };
        apply_transforms(&mut fields, &transforms)?;
        store.insert(canonical, MapValue::new(fields));
        Ok(())
    }

    fn apply_update(
        &self,
        key: DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        let mut store = self.documents.lock().unwrap();
        let canonical = key.path().canonical_string();
        let current = store
            .get(&canonical)
            .cloned()
            .ok_or_else(|| not_found(format!("Document {} does not exist", canonical)))?;

        let mut fields = current.into_fields();
        for path in &field_paths {
            let value = value_for_field_path(&data, path).ok_or_else(|| {
                internal_error(format!(
                    "Failed to resolve value for update path {}",
                    path.canonical_string()
                ))
            })?;
            set_value_at_field_path(&mut fields, path, value);
        }
        apply_transforms(&mut fields, &transforms)?;

        store.insert(canonical, MapValue::new(fields));
        Ok(())
    }

    fn apply_delete(&self, key: DocumentKey) {
        let mut store = self.documents.lock().unwrap();
        store.remove(&key.path().canonical_string());
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn get_document(&self, key: &DocumentKey) -> FirestoreResult<DocumentSnapshot> {
        let store = self.documents.lock().unwrap();
        let data = store.get(&key.path().canonical_string()).cloned();
        Ok(DocumentSnapshot::new(
            key.clone(),
            data,
            SnapshotMetadata::new(true, false),
        ))
    }

    async fn set_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        mask: Option<Vec<FieldPath>>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        self.apply_set(key.clone(), data, mask, transforms)
    }

    async fn update_document(
        &self,
        key: &DocumentKey,
        data: MapValue,
        field_paths: Vec<FieldPath>,
        transforms: Vec<FieldTransform>,
    ) -> FirestoreResult<()> {
        self.apply_update(key.clone(), data, field_paths, transforms)
    }

    async fn delete_document(&self, key: &DocumentKey) -> FirestoreResult<()> {
        self.apply_delete(key.clone());
        Ok(())
    }

    async fn run_query(&self, query: &QueryDefinition) -> FirestoreResult<Vec<DocumentSnapshot>> {
        let store = self.documents.lock().unwrap();
        let mut documents = Vec::new();

        for (path, data) in store.iter() {
            let key = DocumentKey::from_string(path)?;
            if !query.matches_collection(&key) {
                continue;
            }

            let snapshot =
                DocumentSnapshot::new(key, Some(data.clone()), SnapshotMetadata::new(true, false));

            if document_satisfies_filters(&snapshot, query.filters()) {
                documents.push(snapshot);
            }
        }

        documents.sort_by(|left, right| compare_snapshots(left, right, query.order_by()));

        if let Some(limit) = query.limit() {
            let limit = limit as usize;
            match query.limit_type() {
                LimitType::First => {
                    documents.truncate(limit);
                }
                LimitType::Last => {
                    if documents.len() > limit {
                        let start = documents.len() - limit;
                        documents.drain(0..start);
                    }
                }
            }
        }

        Ok(documents)
    }

    async fn commit(&self, writes: Vec<WriteOperation>) -> FirestoreResult<()> {
        for write in writes {
            match write {
                WriteOperation::Set {
                    key,
                    data,
                    mask,
                    transforms,
                } => {
                    self.apply_set(key, data, mask, transforms)?;
                }
                WriteOperation::Update {
                    key,
                    data,
                    field_paths,
                    transforms,
                } => {
                    self.apply_update(key, data, field_paths, transforms)?;
                }
                WriteOperation::Delete { key } => {
                    self.apply_delete(key);
                }
            }
        }
        Ok(())
    }
}

fn apply_transforms(
    fields: &mut BTreeMap<String, FirestoreValue>,
    transforms: &[FieldTransform],
) -> FirestoreResult<()> {
    for transform in transforms {
        let path = transform.field_path();
        let current = value_for_field_path(&MapValue::new(fields.clone()), path);
        let next = match transform.operation() {
            TransformOperation::ServerTimestamp => {
                FirestoreValue::from_timestamp(Timestamp::now())
            }
            TransformOperation::ArrayUnion(elements) => {
                let mut values = match current.as_ref().map(FirestoreValue::kind) {
                    Some(ValueKind::Array(array)) => array.values().to_vec(),
                    _ => Vec::new(),
                };
                for element in elements {
                    if !values.contains(element) {
                        values.push(element.clone());
                    }
                }
                FirestoreValue::from_array(values)
            }
            TransformOperation::ArrayRemove(elements) => {
                let values = match current.as_ref().map(FirestoreValue::kind) {
                    Some(ValueKind::Array(array)) => array
                        .values()
                        .iter()
                        .filter(|value| !elements.contains(value))
                        .cloned()
                        .collect(),
                    _ => Vec::new(),
                };
                FirestoreValue::from_array(values)
            }
            TransformOperation::NumericIncrement(operand) => {
                increment_value(current.as_ref(), operand)?
            }
        };
        set_value_at_field_path(fields, path, next);
    }
    Ok(())
}

fn increment_value(
    current: Option<&FirestoreValue>,
    operand: &FirestoreValue,
) -> FirestoreResult<FirestoreValue> {
    let base = match current.map(FirestoreValue::kind) {
        Some(ValueKind::Integer(value)) => NumericValue::Integer(*value),
        Some(ValueKind::Double(value)) => NumericValue::Double(*value),
        _ => NumericValue::Integer(0),
    };
    let delta = match operand.kind() {
        ValueKind::Integer(value) => NumericValue::Integer(*value),
        ValueKind::Double(value) => NumericValue::Double(*value),
        other => {
            return Err(internal_error(format!(
                "Non-numeric increment operand: {other:?}"
            )))
        }
    };
    Ok(match (base, delta) {
        (NumericValue::Integer(a), NumericValue::Integer(b)) => {
            FirestoreValue::from_integer(a.saturating_add(b))
        }
        (NumericValue::Integer(a), NumericValue::Double(b)) => {
            FirestoreValue::from_double(a as f64 + b)
        }
        (NumericValue::Double(a), NumericValue::Integer(b)) => {
            FirestoreValue::from_double(a + b as f64)
        }
        (NumericValue::Double(a), NumericValue::Double(b)) => FirestoreValue::from_double(a + b),
    })
}

enum NumericValue {
    Integer(i64),
    Double(f64),
}

fn document_satisfies_filters(snapshot: &DocumentSnapshot, filters: &[FieldFilter]) -> bool {
    filters
        .iter()
        .all(|filter| match get_field_value(snapshot, filter.field()) {
            Some(value) => evaluate_filter(filter, &value),
            None => match filter.operator() {
                FilterOperator::NotEqual => evaluate_filter(filter, &FirestoreValue::null()),
                _ => false,
            },
        })
}

fn evaluate_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    match filter.operator() {
        FilterOperator::Equal => value == filter.value(),
        FilterOperator::NotEqual => value != filter.value(),
        FilterOperator::LessThan => {
            compare_values(value, filter.value()) == Some(std::cmp::Ordering::Less)
        }
        FilterOperator::LessThanOrEqual => matches!(
            compare_values(value, filter.value()),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOperator::GreaterThan => {
            compare_values(value, filter.value()) == Some(std::cmp::Ordering::Greater)
        }
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_values(value, filter.value()),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array_contains(array, filter.value()),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), filter.value().kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => {
                array_contains_any(array, needles)
            }
            _ => false,
        },
        FilterOperator::In => match filter.value().kind() {
            ValueKind::Array(values) => values.values().iter().any(|needle| needle == value),
            _ => false,
        },
        FilterOperator::NotIn => match filter.value().kind() {
            ValueKind::Array(values) => {
                !matches!(value.kind(), ValueKind::Null)
                    && values.values().iter().all(|needle| needle != value)
            }
            _ => false,
        },
    }
}

fn get_field_value(snapshot: &DocumentSnapshot, field: &FieldPath) -> Option<FirestoreValue> {
    if field == &FieldPath::document_id() {
        return Some(FirestoreValue::from_string(
            snapshot.key().path().canonical_string(),
        ));
    }

    let map = snapshot.map_value()?;
    value_for_field_path(map, field)
}

fn compare_snapshots(
    left: &DocumentSnapshot,
    right: &DocumentSnapshot,
    order_by: &[OrderBy],
) -> std::cmp::Ordering {
    for order in order_by {
        let left_value = get_field_value(left, order.field()).unwrap_or_else(FirestoreValue::null);
        let right_value =
            get_field_value(right, order.field()).unwrap_or_else(FirestoreValue::null);

        let mut ordering =
            compare_values(&left_value, &right_value).unwrap_or(std::cmp::Ordering::Equal);
        if order.direction() == OrderDirection::Descending {
            ordering = ordering.reverse();
        }
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    // Key order as the final tiebreak, matching backend behaviour.
    left.key().cmp(right.key())
}

fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Option<std::cmp::Ordering> {
    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Some(std::cmp::Ordering::Equal),
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => Some(a.cmp(b)),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => Some(a.cmp(b)),
        (ValueKind::Double(a), ValueKind::Double(b)) => a.partial_cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => (*a as f64).partial_cmp(b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => Some(a.cmp(b)),
        (ValueKind::String(a), ValueKind::String(b)) => Some(a.cmp(b)),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn array_contains(array: &ArrayValue, needle: &FirestoreValue) -> bool {
    array.values().iter().any(|candidate| candidate == needle)
}

fn array_contains_any(array: &ArrayValue, needles: &ArrayValue) -> bool {
    needles
        .values()
        .iter()
        .any(|needle| array_contains(array, needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn in_memory_get_set() {
        let datastore = InMemoryDatastore::new();
        let key = DocumentKey::from_string("cities/sf").unwrap();
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), FirestoreValue::from_string("SF"));
        let map = MapValue::new(map);
        datastore
            .set_document(&key, map.clone(), None, Vec::new())
            .await
            .unwrap();
        let snapshot = datastore.get_document(&key).await.unwrap();
        assert!(snapshot.exists());
        assert_eq!(
            snapshot.data().unwrap().get("name"),
            Some(&FirestoreValue::from_string("SF"))
        );
    }

    #[tokio::test]
    async fn update_missing_document_fails() {
        let datastore = InMemoryDatastore::new();
        let key = DocumentKey::from_string("cities/nowhere").unwrap();
        let err = datastore
            .update_document(&key, MapValue::empty(), Vec::new(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
    }

    #[tokio::test]
    async fn array_union_appends_unique_elements() {
        let datastore = InMemoryDatastore::new();
        let key = DocumentKey::from_string("places/sf").unwrap();
        let mut map = BTreeMap::new();
        map.insert(
            "tags".to_string(),
            FirestoreValue::from_array(vec![FirestoreValue::from_string("coastal")]),
        );
        datastore
            .set_document(&key, MapValue::new(map), None, Vec::new())
            .await
            .unwrap();

        let transform = FieldTransform::new(
            FieldPath::from_dot_separated("tags").unwrap(),
            TransformOperation::ArrayUnion(vec![
                FirestoreValue::from_string("coastal"),
                FirestoreValue::from_string("tourism"),
            ]),
        );
        datastore
            .update_document(&key, MapValue::empty(), Vec::new(), vec![transform])
            .await
            .unwrap();

        let snapshot = datastore.get_document(&key).await.unwrap();
        let tags = snapshot.data().unwrap().get("tags").unwrap();
        match tags.kind() {
            ValueKind::Array(array) => assert_eq!(array.values().len(), 2),
            other => panic!("expected array, found {other:?}"),
        }
    }

    #[tokio::test]
    async fn numeric_increment_adds_to_existing() {
        let datastore = InMemoryDatastore::new();
        let key = DocumentKey::from_string("stats/global").unwrap();
        let mut map = BTreeMap::new();
        map.insert("counter".to_string(), FirestoreValue::from_integer(1));
        datastore
            .set_document(&key, MapValue::new(map), None, Vec::new())
            .await
            .unwrap();

        let transform = FieldTransform::new(
            FieldPath::from_dot_separated("counter").unwrap(),
            TransformOperation::NumericIncrement(FirestoreValue::from_integer(5)),
        );
        datastore
            .update_document(&key, MapValue::empty(), Vec::new(), vec![transform])
            .await
            .unwrap();

        let snapshot = datastore.get_document(&key).await.unwrap();
        assert_eq!(
            snapshot.data().unwrap().get("counter"),
            Some(&FirestoreValue::from_integer(6))
        );
    }
}
