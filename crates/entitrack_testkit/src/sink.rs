//! A persistence sink for tests.

use entitrack_core::{
    ChangeBatch, EntityState, GeneratedValues, PersistenceSink, TrackError, TrackResult, Value,
};
use std::collections::HashMap;
use tracing::debug;

/// Records every batch it is given and replaces temporary values with
/// sequential permanent ones.
///
/// Equal placeholders map to equal permanent values, so a foreign key that
/// copied a principal's temporary key receives the principal's new key.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Batches received, in order.
    pub batches: Vec<ChangeBatch>,
    next: i64,
    assigned: HashMap<Value, Value>,
    fail_with: Option<String>,
}

impl RecordingSink {
    /// Creates a sink that assigns permanent values starting at 1000.
    pub fn new() -> Self {
        Self {
            next: 1000,
            ..Self::default()
        }
    }

    /// Creates a sink whose every save fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// The most recent batch.
    pub fn last_batch(&self) -> Option<&ChangeBatch> {
        self.batches.last()
    }

    fn permanent(&mut self, temporary: &Value) -> Value {
        if let Some(value) = self.assigned.get(temporary) {
            return value.clone();
        }
        let value = match temporary {
            Value::Long(_) => Value::Long(self.next),
            _ => Value::Int(self.next as i32),
        };
        self.next += 1;
        self.assigned.insert(temporary.clone(), value.clone());
        value
    }
}

impl PersistenceSink for RecordingSink {
    fn persist(&mut self, batch: &ChangeBatch) -> TrackResult<Vec<GeneratedValues>> {
        if let Some(message) = &self.fail_with {
            return Err(TrackError::persistence(message.clone()));
        }
        debug!("Recording batch of {} changes", batch.len());
        self.batches.push(batch.clone());

        let mut generated = Vec::new();
        for change in batch.in_state(EntityState::Added) {
            let mut values = Vec::new();
            for name in &change.temporary {
                if let Some(current) = change.current_value(name) {
                    let current = current.clone();
                    values.push((name.clone(), self.permanent(&current)));
                }
            }
            if !values.is_empty() {
                generated.push(GeneratedValues {
                    handle: change.handle,
                    values,
                });
            }
        }
        Ok(generated)
    }
}
