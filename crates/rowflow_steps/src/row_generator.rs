//! RowGenerator: emits the same row a fixed number of times.

use std::sync::Arc;

use rowflow_core::{Row, Schema, Value};
use rowflow_plan::StepMeta;
use rowflow_runtime::{ProcessOutcome, Step, StepContext, StepError};
use serde::{Deserialize, Serialize};

use crate::data_grid::GridField;

/// A generated column and its constant value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedField {
    /// Column definition
    #[serde(flatten)]
    pub field: GridField,
    /// Value text; variables are resolved before parsing
    #[serde(default)]
    pub value: String,
}

/// RowGenerator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowGeneratorMeta {
    /// Number of rows (variables allowed)
    pub limit: String,
    /// Columns
    pub fields: Vec<GeneratedField>,
}

impl Default for RowGeneratorMeta {
    fn default() -> Self {
        Self {
            limit: "10".to_string(),
            fields: Vec::new(),
        }
    }
}

/// RowGenerator step
#[derive(Debug)]
pub struct RowGenerator {
    meta: RowGeneratorMeta,
    schema: Arc<Schema>,
    row: Row,
    limit: u64,
    emitted: u64,
}

impl RowGenerator {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded or name a field twice
    pub fn new(step: &StepMeta) -> Result<Self, StepError> {
        let meta: RowGeneratorMeta = step.config_as()?;
        let schema = Schema::from_fields(meta.fields.iter().map(|f| f.field.to_field_meta()))?;
        Ok(Self {
            meta,
            schema: Arc::new(schema),
            row: Row::default(),
            limit: 0,
            emitted: 0,
        })
    }
}

impl Step for RowGenerator {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let limit = ctx.substitute(&self.meta.limit);
        self.limit = limit.trim().parse().map_err(|_| {
            StepError::config(ctx.step_name(), format!("row limit '{limit}' is not a number"))
        })?;
        let values = self
            .meta
            .fields
            .iter()
            .map(|f| Value::parse(f.field.value_type, &ctx.substitute(&f.value)))
            .collect::<Result<Vec<_>, _>>()?;
        self.row = Row::new(values);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        if self.emitted >= self.limit {
            return Ok(ProcessOutcome::Done);
        }
        self.emitted += 1;
        ctx.put_row(&self.schema, self.row.clone())?;
        Ok(ProcessOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::ValueType;
    use serde_json::json;

    #[test]
    fn test_settings() {
        let step = StepMeta::new("gen", "RowGenerator").with_config(json!({
            "limit": "${ROWS}",
            "fields": [{ "name": "greeting", "type": "String", "value": "hello" }]
        }));
        let generator = RowGenerator::new(&step).unwrap();
        assert_eq!(generator.meta.limit, "${ROWS}");
        assert_eq!(generator.meta.fields[0].field.value_type, ValueType::String);
        assert_eq!(generator.schema.field_names(), vec!["greeting"]);
    }

    #[test]
    fn test_default_limit() {
        let meta: RowGeneratorMeta = StepMeta::new("gen", "RowGenerator").config_as().unwrap();
        assert_eq!(meta.limit, "10");
    }
}
