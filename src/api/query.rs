use crate::api::database::Firestore;
use crate::error::{invalid_argument, FirestoreResult};
use crate::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::value::FirestoreValue;

/// Comparison operators available to `where_field` constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitType {
    First,
    Last,
}

/// A single field comparison attached to a query.
#[derive(Clone, Debug)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// The backend-facing description of a query.
#[derive(Clone, Debug)]
pub struct QueryDefinition {
    collection_path: ResourcePath,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
    limit_type: LimitType,
}

impl QueryDefinition {
    fn new(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
        }
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// Path of the document containing the queried collection; empty for
    /// top-level collections.
    pub fn parent_path(&self) -> ResourcePath {
        self.collection_path.without_last()
    }

    pub fn collection_id(&self) -> &str {
        self.collection_path
            .last_segment()
            .expect("Collection path always ends with an identifier")
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection_path
    }
}

/// A query targeting the documents of a single collection.
#[derive(Clone, Debug)]
pub struct Query {
    firestore: Firestore,
    definition: QueryDefinition,
}

impl Query {
    pub(crate) fn new(firestore: Firestore, collection_path: ResourcePath) -> FirestoreResult<Self> {
        if collection_path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Queries must reference a collection (odd number of path segments)",
            ));
        }
        Ok(Self {
            firestore,
            definition: QueryDefinition::new(collection_path),
        })
    }

    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Adds a field comparison to the query.
    pub fn where_field(
        mut self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        self.definition.filters.push(FieldFilter {
            field,
            operator,
            value,
        });
        Ok(self)
    }

    /// Appends an ordering clause.
    pub fn order_by(
        mut self,
        field: impl IntoFieldPath,
        direction: OrderDirection,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        self.definition.order_by.push(OrderBy { field, direction });
        Ok(self)
    }

    /// Caps the result set to the first `limit` documents.
    pub fn limit(mut self, limit: u32) -> FirestoreResult<Self> {
        if limit == 0 {
            return Err(invalid_argument("Query limit must be positive"));
        }
        self.definition.limit = Some(limit);
        self.definition.limit_type = LimitType::First;
        Ok(self)
    }

    /// Caps the result set to the last `limit` documents. Requires at least
    /// one ordering clause.
    pub fn limit_to_last(mut self, limit: u32) -> FirestoreResult<Self> {
        if limit == 0 {
            return Err(invalid_argument("Query limit must be positive"));
        }
        if self.definition.order_by.is_empty() {
            return Err(invalid_argument(
                "limit_to_last queries require at least one order_by clause",
            ));
        }
        self.definition.limit = Some(limit);
        self.definition.limit_type = LimitType::Last;
        Ok(self)
    }
}

/// An opaque, composable query clause.
///
/// Built with the free functions below and applied in order, so call sites
/// can collect clauses into a list before running the query.
#[derive(Clone, Debug)]
pub struct QueryConstraint {
    kind: QueryConstraintKind,
}

#[derive(Clone, Debug)]
enum QueryConstraintKind {
    Where {
        field: FieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    },
    OrderBy {
        field: FieldPath,
        direction: OrderDirection,
    },
    Limit(u32),
    LimitToLast(u32),
}

impl QueryConstraint {
    fn new(kind: QueryConstraintKind) -> Self {
        Self { kind }
    }

    pub(crate) fn apply(self, query: Query) -> FirestoreResult<Query> {
        match self.kind {
            QueryConstraintKind::Where {
                field,
                operator,
                value,
            } => query.where_field(field, operator, value),
            QueryConstraintKind::OrderBy { field, direction } => query.order_by(field, direction),
            QueryConstraintKind::Limit(limit) => query.limit(limit),
            QueryConstraintKind::LimitToLast(limit) => query.limit_to_last(limit),
        }
    }
}

/// Produces a field comparison constraint.
pub fn where_field(
    field: impl IntoFieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
) -> FirestoreResult<QueryConstraint> {
    Ok(QueryConstraint::new(QueryConstraintKind::Where {
        field: field.into_field_path()?,
        operator,
        value,
    }))
}

/// Produces an ordering constraint.
pub fn order_by(
    field: impl IntoFieldPath,
    direction: OrderDirection,
) -> FirestoreResult<QueryConstraint> {
    Ok(QueryConstraint::new(QueryConstraintKind::OrderBy {
        field: field.into_field_path()?,
        direction,
    }))
}

/// Produces a first-N limit constraint.
pub fn limit(limit: u32) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Limit(limit))
}

/// Produces a last-N limit constraint.
pub fn limit_to_last(limit: u32) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::LimitToLast(limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseId;

    fn sample_query() -> Query {
        let firestore = Firestore::new(DatabaseId::default_database("project"));
        firestore.collection("cities").unwrap().query()
    }

    #[test]
    fn builds_filtered_query() {
        let query = sample_query()
            .where_field(
                "state",
                FilterOperator::Equal,
                FirestoreValue::from_string("CA"),
            )
            .unwrap()
            .order_by("population", OrderDirection::Descending)
            .unwrap()
            .limit(10)
            .unwrap();

        let definition = query.definition();
        assert_eq!(definition.filters().len(), 1);
        assert_eq!(definition.order_by().len(), 1);
        assert_eq!(definition.limit(), Some(10));
        assert_eq!(definition.limit_type(), LimitType::First);
    }

    #[test]
    fn limit_to_last_requires_order() {
        let err = sample_query().limit_to_last(5).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = sample_query().limit(0).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn constraints_apply_in_order() {
        let constraints = vec![
            where_field(
                "state",
                FilterOperator::Equal,
                FirestoreValue::from_string("CA"),
            )
            .unwrap(),
            order_by("name", OrderDirection::Ascending).unwrap(),
            limit(3),
        ];
        let mut query = sample_query();
        for constraint in constraints {
            query = constraint.apply(query).unwrap();
        }
        assert_eq!(query.definition().limit(), Some(3));
        assert_eq!(query.definition().filters().len(), 1);
    }

    #[test]
    fn matches_only_direct_children() {
        let query = sample_query();
        let direct = DocumentKey::from_string("cities/sf").unwrap();
        let nested = DocumentKey::from_string("cities/sf/landmarks/tower").unwrap();
        assert!(query.definition().matches_collection(&direct));
        assert!(!query.definition().matches_collection(&nested));
    }
}
