//! Flush planning over the identity cache.
//!
//! A [`FlushPlan`] turns the cache's pending changes into one [`UpdateOp`]
//! per dirty entity: the changed columns only, guarded by the entity's
//! optimistic-concurrency predicates. An [`UpdateExecutor`] supplied by the
//! caller runs each operation. An update that matches no row means another
//! writer changed the row first; the flush stops with
//! [`CacheError::StaleEntity`] and leaves that entity dirty.

use crate::error::CacheError;
use crate::identity_cache::IdentityCache;
use crate::recorder::ChangeRecorder;
use entitycache_core::{Condition, Error, Value};
use std::sync::Arc;

/// One column assignment of an UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Table declaring the column.
    pub table: &'static str,
    /// Field name on the entity.
    pub field: &'static str,
    /// Column name.
    pub column: &'static str,
    /// New value.
    pub value: Value,
}

/// A guarded UPDATE for one entity.
#[derive(Debug, Clone)]
pub struct UpdateOp {
    /// Entity type name.
    pub entity: &'static str,
    /// Table of the most derived descriptor.
    pub table: &'static str,
    /// Identifier value.
    pub identifier: Value,
    /// Changed columns, in declaration order (ancestor tables first).
    pub assignments: Vec<Assignment>,
    /// WHERE conditions: identifier equality, then version equality.
    pub conditions: Vec<Arc<dyn Condition>>,
    /// Recorder to clear once the update succeeds.
    pub recorder: Arc<ChangeRecorder>,
}

impl UpdateOp {
    /// Build the operation for a recorder's current changes.
    pub fn from_recorder(recorder: &Arc<ChangeRecorder>) -> Self {
        let metadata = recorder.metadata();
        let assignments = recorder
            .changes()
            .into_iter()
            .map(|(field, value)| Assignment {
                table: metadata
                    .owner_of(field.name)
                    .map_or(metadata.table, |owner| owner.table),
                field: field.name,
                column: field.column_name,
                value,
            })
            .collect();

        Self {
            entity: recorder.entity(),
            table: recorder.table(),
            identifier: recorder.identifier().clone(),
            assignments,
            conditions: recorder.identifier_predicates().to_vec(),
            recorder: Arc::clone(recorder),
        }
    }

    /// Tables touched by this operation, in assignment order.
    pub fn tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<&'static str> = Vec::new();
        for assignment in &self.assignments {
            if !tables.contains(&assignment.table) {
                tables.push(assignment.table);
            }
        }
        tables
    }

    /// Assignments for columns declared by `table`.
    pub fn assignments_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Assignment> {
        self.assignments.iter().filter(move |a| a.table == table)
    }

    fn written(&self) -> Vec<(&'static str, &Value)> {
        self.assignments.iter().map(|a| (a.field, &a.value)).collect()
    }
}

/// Runs guarded UPDATEs on behalf of a flush.
pub trait UpdateExecutor {
    /// Execute `op`, returning the number of affected rows.
    fn execute_update(&mut self, op: &UpdateOp) -> Result<u64, Error>;
}

impl<F> UpdateExecutor for F
where
    F: FnMut(&UpdateOp) -> Result<u64, Error>,
{
    fn execute_update(&mut self, op: &UpdateOp) -> Result<u64, Error> {
        self(op)
    }
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of entities updated.
    pub updated: usize,
}

/// A plan for flushing the pending changes of one cache.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Update operations, ordered by entity name then identifier.
    pub updates: Vec<UpdateOp>,
}

impl FlushPlan {
    /// Create an empty flush plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the pending changes of `cache`.
    pub fn from_cache(cache: &IdentityCache) -> Self {
        let updates = cache
            .pending_changes()
            .iter()
            .map(UpdateOp::from_recorder)
            .filter(|op| !op.assignments.is_empty())
            .collect();
        Self { updates }
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Execute every update in order.
    ///
    /// Stops at the first failure. Entities updated before the failure are
    /// already marked flushed; the failing one and those after it stay dirty.
    /// A field whose live value no longer matches the value written stays
    /// dirty for the next flush.
    #[tracing::instrument(level = "info", skip(self, executor), fields(updates = self.updates.len()))]
    pub fn execute<X: UpdateExecutor + ?Sized>(
        &self,
        executor: &mut X,
    ) -> Result<FlushResult, CacheError> {
        let start = std::time::Instant::now();
        let mut result = FlushResult::default();

        for op in &self.updates {
            let affected = executor.execute_update(op)?;
            if affected == 0 {
                tracing::warn!(
                    entity = op.entity,
                    identifier = %op.identifier,
                    "Update matched no rows; entity was modified concurrently"
                );
                return Err(CacheError::StaleEntity {
                    entity: op.entity,
                    identifier: op.identifier.clone(),
                });
            }
            let rewritten = op.recorder.mark_fields_flushed(&op.written());
            if !rewritten.is_empty() {
                tracing::debug!(
                    entity = op.entity,
                    identifier = %op.identifier,
                    fields = ?rewritten,
                    "Fields changed again after planning; left dirty"
                );
            }
            result.updated += 1;
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            updated = result.updated,
            "Flush complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionToken;
    use crate::fixtures::{Car, Customer, Order};
    use entitycache_core::{QueryErrorKind, conjunction};

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Vec<(String, Vec<(String, Value)>, String)>,
        affected: u64,
    }

    impl UpdateExecutor for RecordingExecutor {
        fn execute_update(&mut self, op: &UpdateOp) -> Result<u64, Error> {
            let mut params = Vec::new();
            let filter = conjunction(&op.conditions, &mut params);
            self.seen.push((
                op.entity.to_string(),
                op.assignments
                    .iter()
                    .map(|a| (a.column.to_string(), a.value.clone()))
                    .collect(),
                filter,
            ));
            Ok(self.affected)
        }
    }

    fn cache() -> (SessionToken, IdentityCache) {
        let token = SessionToken::new();
        (token, IdentityCache::new(token))
    }

    #[test]
    fn test_plan_contains_only_dirty_entities_and_fields() {
        let (_, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        cache.register_by_identifier(Order::new(8, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let plan = FlushPlan::from_cache(&cache);
        assert_eq!(plan.len(), 1);
        let op = &plan.updates[0];
        assert_eq!(op.entity, "Order");
        assert_eq!(op.table, "orders");
        assert_eq!(op.identifier, Value::BigInt(7));
        assert_eq!(
            op.assignments,
            vec![Assignment {
                table: "orders",
                field: "total",
                column: "total",
                value: Value::BigInt(150),
            }]
        );
        let rendered: Vec<String> = op.conditions.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["id = 7", "ver = 1"]);
    }

    #[test]
    fn test_execute_marks_flushed() {
        let (token, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let mut executor = RecordingExecutor {
            affected: 1,
            ..Default::default()
        };
        let result = FlushPlan::from_cache(&cache).execute(&mut executor).unwrap();
        assert_eq!(result, FlushResult { updated: 1 });
        assert!(!order.is_dirty());
        assert_eq!(
            executor.seen[0].2,
            "\"id\" = $1 AND \"ver\" = $2".to_string()
        );
        assert!(cache.reset(&token).is_ok());
    }

    #[test]
    fn test_zero_rows_is_stale_entity() {
        let (_, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let mut executor = RecordingExecutor::default();
        let err = FlushPlan::from_cache(&cache)
            .execute(&mut executor)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(order.is_dirty());
    }

    #[test]
    fn test_executor_error_propagates() {
        let (_, mut cache) = cache();
        let a = cache
            .register_by_identifier(Customer::new(1, "a@example.com"))
            .unwrap();
        let b = cache
            .register_by_identifier(Customer::new(2, "b@example.com"))
            .unwrap();
        a.set_email("x@example.com").unwrap();
        b.set_email("y@example.com").unwrap();

        let mut calls = 0;
        let mut executor = |_op: &UpdateOp| -> Result<u64, Error> {
            calls += 1;
            if calls == 2 {
                Err(Error::query(QueryErrorKind::Deadlock, "deadlock detected"))
            } else {
                Ok(1)
            }
        };
        let err = FlushPlan::from_cache(&cache)
            .execute(&mut executor)
            .unwrap_err();
        assert!(matches!(err, CacheError::Execution(ref e) if e.is_retryable()));
        assert!(!a.is_dirty());
        assert!(b.is_dirty());
    }

    #[test]
    fn test_two_table_assignments_name_owning_table() {
        let (_, mut cache) = cache();
        let car = cache
            .register_by_identifier(Car::new(3, 1, "Saab", 4))
            .unwrap();
        car.set_doors(2).unwrap();
        car.set_make("Volvo").unwrap();

        let plan = FlushPlan::from_cache(&cache);
        let op = &plan.updates[0];
        assert_eq!(op.table, "cars");
        assert_eq!(op.tables(), vec!["vehicles", "cars"]);
        let vehicles: Vec<&str> = op.assignments_for("vehicles").map(|a| a.column).collect();
        assert_eq!(vehicles, vec!["make"]);
        let cars: Vec<&str> = op.assignments_for("cars").map(|a| a.column).collect();
        assert_eq!(cars, vec!["doors"]);
    }

    #[test]
    fn test_changes_after_planning_survive_flush() {
        let (_, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let plan = FlushPlan::from_cache(&cache);
        order.set_note(Some("late")).unwrap();

        let mut executor = |_op: &UpdateOp| -> Result<u64, Error> { Ok(1) };
        plan.execute(&mut executor).unwrap();
        assert_eq!(order.recorder().dirty_fields(), vec!["note"]);
    }

    #[test]
    fn test_field_rewritten_after_planning_stays_dirty() {
        let (_, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let plan = FlushPlan::from_cache(&cache);
        order.set_total(200).unwrap();

        let mut persisted = Vec::new();
        let mut executor = |op: &UpdateOp| -> Result<u64, Error> {
            persisted.extend(op.assignments.iter().map(|a| a.value.clone()));
            Ok(1)
        };
        plan.execute(&mut executor).unwrap();
        assert_eq!(persisted, vec![Value::BigInt(150)]);
        assert!(order.is_dirty());
        assert_eq!(order.recorder().dirty_fields(), vec!["total"]);

        let next = FlushPlan::from_cache(&cache);
        assert_eq!(next.updates[0].assignments[0].value, Value::BigInt(200));
    }

    #[test]
    fn test_field_restored_to_planned_value_is_flushed() {
        let (_, mut cache) = cache();
        let order = cache.register_by_identifier(Order::new(7, 1, 100)).unwrap();
        order.set_total(150).unwrap();

        let plan = FlushPlan::from_cache(&cache);
        order.set_total(200).unwrap();
        order.set_total(150).unwrap();

        let mut executor = |_op: &UpdateOp| -> Result<u64, Error> { Ok(1) };
        plan.execute(&mut executor).unwrap();
        assert!(!order.is_dirty());
    }

    #[test]
    fn test_empty_plan() {
        let (_, cache) = cache();
        let plan = FlushPlan::from_cache(&cache);
        assert!(plan.is_empty());
        let mut executor = RecordingExecutor::default();
        assert_eq!(plan.execute(&mut executor).unwrap().updated, 0);
        assert!(executor.seen.is_empty());
    }
}
